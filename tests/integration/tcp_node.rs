use bucketsync::bucket::{BucketOptions, ItemOptions};
use bucketsync::config::{ConfigLoader, NodeConfig};
use bucketsync::node::Node;
use bucketsync::sync::{PeerClient, PeerStatus, SyncService};
use bucketsync::transport::TcpPeerClient;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    service: Arc<SyncService>,
    address: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), bucketsync::error::ApiError>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

fn node_config(id: &str, data_root: &Path, seed: Option<&str>) -> NodeConfig {
    let mut config = ConfigLoader::default().unwrap();
    config.node_id = id.to_string();
    config.data_root = data_root.to_path_buf();
    config.seed_peer = seed.map(str::to_string);
    config.sync_interval_ms = 50;
    config.request_timeout_ms = 2000;
    config
}

async fn start(id: &str, data_root: &Path, seed: Option<&str>) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let mut config = node_config(id, data_root, seed);
    config.listen_address = address.clone();
    let node = Node::open(config).unwrap();
    let service = Arc::clone(node.service());

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(node.run_with_listener(listener, async {
        let _ = stopped.await;
    }));
    Running {
        service,
        address,
        stop,
        task,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..150 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn nodes_replicate_over_tcp() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();

    let node1 = start("node-1", dir1.path(), None).await;
    let item_id = {
        let mut state = node1.service.state().write();
        state
            .create_bucket_with_id("b1", BucketOptions::new("assets", "/assets"))
            .unwrap();
        let info = state
            .create_item("b1", ItemOptions::new("hello", "txt"), b"hello".to_vec())
            .unwrap();
        info.id
    };

    let node2 = start("node-2", dir2.path(), Some(&node1.address)).await;

    let replicated = wait_for(|| node2.service.state().read().get_item("b1", &item_id).is_ok()).await;
    assert!(replicated, "item never reached node-2");

    let client = TcpPeerClient::new(node2.address.clone(), Duration::from_secs(2));
    let peers = client.get_peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, "node-1");
    assert_eq!(peers[0].address, node1.address);

    let item = client.get_item("b1", &item_id).await.unwrap();
    assert_eq!(item.content.as_deref(), Some(&b"hello"[..]));

    let missing = client.get_item("b1", "nope").await.unwrap_err();
    assert!(missing.is_not_found());

    let fingerprint = node1.service.state().read().fingerprint().unwrap();
    let converged = wait_for(|| {
        node2.service.peer_status("node-1") == Some(PeerStatus::Ok)
            && node2.service.state().read().fingerprint().ok() == Some(fingerprint)
    })
    .await;
    assert!(converged);
    assert_eq!(client.ping().await.unwrap(), fingerprint);

    node2.stop().await;
    node1.stop().await;

    // node-2 persisted what it replicated
    let restarted = Node::open(node_config("node-2", dir2.path(), None)).unwrap();
    let fingerprint2 = restarted.state().read().fingerprint().unwrap();
    assert_eq!(fingerprint2, fingerprint);
}

#[tokio::test]
async fn stopped_peer_is_marked_down() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();

    let node1 = start("node-1", dir1.path(), None).await;
    let node2 = start("node-2", dir2.path(), Some(&node1.address)).await;
    assert!(wait_for(|| node2.service.peer_status("node-1").is_some()).await);

    node1.stop().await;
    let down = wait_for(|| node2.service.peer_status("node-1") == Some(PeerStatus::Down)).await;
    assert!(down, "node-1 never marked down");

    node2.stop().await;
}

#[tokio::test]
async fn unreachable_seed_does_not_stop_the_node() {
    let dir = tempfile::tempdir().unwrap();
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_address = unused.local_addr().unwrap().to_string();
    drop(unused);

    let node = start("node-1", dir.path(), Some(&dead_address)).await;
    let client = TcpPeerClient::new(node.address.clone(), Duration::from_secs(2));
    assert!(client.get_peers().await.unwrap().is_empty());
    node.stop().await;
}
