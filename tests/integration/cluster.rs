use async_trait::async_trait;
use bucketsync::bucket::{BucketOptions, ItemOptions};
use bucketsync::error::ApiError;
use bucketsync::sync::{Peer, PeerClient, PeerInfo, PeerStatus, SyncService};
use bucketsync::testing::LocalNetwork;
use bucketsync::transport::{Request, Response};
use bucketsync::types::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn seed_bucket(node: &Arc<SyncService>) -> String {
    let mut state = node.state().write();
    state
        .create_bucket_with_id("b1", BucketOptions::new("assets", "/assets"))
        .unwrap();
    let info = state
        .create_item("b1", ItemOptions::new("hello", "txt"), b"hello".to_vec())
        .unwrap();
    info.id
}

fn fingerprint(node: &Arc<SyncService>) -> Hash {
    node.state().read().fingerprint().unwrap()
}

#[tokio::test]
async fn two_nodes_converge_after_one_tick() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let item_id = seed_bucket(&node1);

    let added = node2.register(node1.address()).await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(node1.peer_status("node-2"), Some(PeerStatus::Ok));
    assert_eq!(node2.peer_status("node-1"), Some(PeerStatus::Ok));

    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.after_ping, PeerStatus::Mismatch);
    assert_eq!(visit.status, PeerStatus::Ok);
    let reconciliation = visit.reconciliation.as_ref().unwrap();
    assert!(reconciliation.is_complete());
    assert_eq!(reconciliation.items_stored, 1);

    let item = node2.state().read().get_item("b1", &item_id).unwrap();
    assert_eq!(item.content.as_deref(), Some(&b"hello"[..]));
    assert_eq!(fingerprint(&node1), fingerprint(&node2));

    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.after_ping, PeerStatus::Ok);
    assert!(visit.reconciliation.is_none());

    let report = node1.tick().await;
    assert_eq!(report.visit("node-2").unwrap().status, PeerStatus::Ok);
}

#[tokio::test]
async fn updates_and_tombstones_replicate() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let item_id = seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();
    node2.tick().await;

    node1
        .state()
        .write()
        .replace_item_content("b1", &item_id, b"hello again".to_vec())
        .unwrap();
    node2.tick().await;
    let item = node2.state().read().get_item("b1", &item_id).unwrap();
    assert_eq!(item.content.as_deref(), Some(&b"hello again"[..]));

    node1.state().write().delete_item("b1", &item_id).unwrap();
    node2.tick().await;
    let item = node2.state().read().get_item("b1", &item_id).unwrap();
    assert!(item.deleted);
    assert!(node2
        .state()
        .read()
        .item_by_access_name("b1", "hello.txt")
        .unwrap_err()
        .is_not_found());
    assert_eq!(fingerprint(&node1), fingerprint(&node2));
}

#[tokio::test]
async fn newer_local_item_is_kept() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let item_id = seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();
    node2.tick().await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    node2
        .state()
        .write()
        .replace_item_content("b1", &item_id, b"local edit".to_vec())
        .unwrap();

    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.after_ping, PeerStatus::Mismatch);
    assert!(visit.reconciliation.as_ref().unwrap().is_complete());
    let item = node2.state().read().get_item("b1", &item_id).unwrap();
    assert_eq!(item.content.as_deref(), Some(&b"local edit"[..]));

    // node1 pulls the newer copy on its own tick
    node1.tick().await;
    let item = node1.state().read().get_item("b1", &item_id).unwrap();
    assert_eq!(item.content.as_deref(), Some(&b"local edit"[..]));
    assert_eq!(fingerprint(&node1), fingerprint(&node2));
}

#[tokio::test]
async fn bucket_metadata_replicates() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();
    node2.tick().await;

    node1
        .state()
        .write()
        .update_bucket("b1", BucketOptions::new("media", "/media").with_gzip(true))
        .unwrap();
    let report = node2.tick().await;
    assert_eq!(
        report
            .visit("node-1")
            .unwrap()
            .reconciliation
            .as_ref()
            .unwrap()
            .buckets_updated,
        1
    );

    let state = node2.state().read();
    let bucket = state.bucket_by_path("/media").unwrap();
    assert_eq!(bucket.id(), "b1");
    assert!(bucket.options().gzip);
    assert!(state.bucket_by_path("/assets").is_err());
}

#[tokio::test]
async fn registration_gossips_the_whole_cluster() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let node3 = network.spawn_node("node-3");

    node2.register(node1.address()).await.unwrap();
    let added = node3.register(node2.address()).await.unwrap();
    assert_eq!(added, 2);

    for (node, expected) in [
        (&node1, ["node-2", "node-3"]),
        (&node2, ["node-1", "node-3"]),
        (&node3, ["node-1", "node-2"]),
    ] {
        let ids: Vec<String> = node.peers().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, expected);
    }

    // Registering again adds nothing
    assert_eq!(node3.register(node1.address()).await.unwrap(), 0);
}

#[tokio::test]
async fn late_joiner_syncs_from_replica_while_origin_is_down() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let node3 = network.spawn_node("node-3");
    seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();
    node2.tick().await;

    network.set_reachable(node1.address(), false);
    // node-1 is gossiped but unreachable; only node-2 is added
    let added = node3.register(node2.address()).await.unwrap();
    assert_eq!(added, 1);
    assert_eq!(node3.peer_status("node-1"), None);

    let report = node3.tick().await;
    assert_eq!(report.visit("node-2").unwrap().status, PeerStatus::Ok);
    assert!(node3.state().read().bucket("b1").is_ok());
    assert_eq!(fingerprint(&node2), fingerprint(&node3));
}

#[tokio::test]
async fn unreachable_peer_goes_down_and_recovers() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    node2.register(node1.address()).await.unwrap();

    network.set_reachable(node1.address(), false);
    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.status, PeerStatus::Down);
    assert!(visit.reconciliation.is_none());
    assert_eq!(node2.peer_status("node-1"), Some(PeerStatus::Down));

    network.set_reachable(node1.address(), true);
    let report = node2.tick().await;
    assert_eq!(report.visit("node-1").unwrap().status, PeerStatus::Ok);
}

#[tokio::test]
async fn recovering_peer_with_new_data_is_reconciled() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    node2.register(node1.address()).await.unwrap();

    network.set_reachable(node1.address(), false);
    node2.tick().await;
    seed_bucket(&node1);
    network.set_reachable(node1.address(), true);

    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.after_ping, PeerStatus::Mismatch);
    assert_eq!(visit.status, PeerStatus::Ok);
    assert_eq!(fingerprint(&node1), fingerprint(&node2));
}

#[tokio::test]
async fn monitor_runs_until_shut_down() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();

    let monitor = Arc::clone(&node2).start();
    let mut converged = false;
    for _ in 0..100 {
        if fingerprint(&node1) == fingerprint(&node2) {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(converged, "monitor never reconciled node-2");
    assert!(!monitor.is_finished());

    monitor.shutdown().await;
}

#[tokio::test]
async fn claimed_path_keeps_peer_in_mismatch() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    node1
        .state()
        .write()
        .create_bucket_with_id("bucket-remote", BucketOptions::new("remote", "/shared"))
        .unwrap();
    node2
        .state()
        .write()
        .create_bucket_with_id("bucket-local", BucketOptions::new("local", "/shared"))
        .unwrap();
    node2.register(node1.address()).await.unwrap();

    for _ in 0..2 {
        let report = node2.tick().await;
        let visit = report.visit("node-1").unwrap();
        assert_eq!(visit.after_ping, PeerStatus::Mismatch);
        assert_eq!(visit.status, PeerStatus::Mismatch);
        let reconciliation = visit.reconciliation.as_ref().unwrap();
        assert_eq!(reconciliation.buckets_skipped, 1);
        assert!(!reconciliation.is_complete());
    }
    assert_eq!(node2.peer_status("node-1"), Some(PeerStatus::Mismatch));
    assert!(node2.state().read().bucket("bucket-remote").is_err());
}

#[tokio::test]
async fn bucket_tombstone_replicates_with_its_items() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    seed_bucket(&node1);
    node2.register(node1.address()).await.unwrap();
    node2.tick().await;

    // node-2 writes into the bucket just before node-1 deletes it
    node2
        .state()
        .write()
        .create_item("b1", ItemOptions::new("x", "txt"), b"late write".to_vec())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    node1.state().write().delete_bucket("b1").unwrap();

    node2.tick().await;
    node1.tick().await;
    node2.tick().await;

    for node in [&node1, &node2] {
        let state = node.state().read();
        let bucket = state.bucket("b1").unwrap();
        assert!(bucket.is_deleted());
        assert_eq!(bucket.items().len(), 2);
        assert!(bucket.items().values().all(|info| info.deleted));
    }
    assert_eq!(fingerprint(&node1), fingerprint(&node2));
    assert_eq!(node1.peer_status("node-2"), Some(PeerStatus::Ok));
    assert_eq!(node2.peer_status("node-1"), Some(PeerStatus::Ok));
}

#[tokio::test]
async fn failed_item_fetch_does_not_block_the_rest() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let kept_id = seed_bucket(&node1);
    let failing_id = node1
        .state()
        .write()
        .create_item("b1", ItemOptions::new("other", "txt"), b"other".to_vec())
        .unwrap()
        .id;
    node2.register(node1.address()).await.unwrap();

    let target = failing_id.clone();
    network.fail_requests(node1.address(), move |request| {
        matches!(request, Request::GetItem { item_id, .. } if item_id == &target)
    });
    let report = node2.tick().await;
    let visit = report.visit("node-1").unwrap();
    assert_eq!(visit.status, PeerStatus::Mismatch);
    let reconciliation = visit.reconciliation.as_ref().unwrap();
    assert_eq!(reconciliation.items_stored, 1);
    assert_eq!(reconciliation.failures, 1);
    {
        let state = node2.state().read();
        assert!(state.get_item("b1", &kept_id).is_ok());
        assert!(state.get_item("b1", &failing_id).unwrap_err().is_not_found());
    }

    network.clear_failures(node1.address());
    let report = node2.tick().await;
    assert_eq!(report.visit("node-1").unwrap().status, PeerStatus::Ok);
    assert_eq!(fingerprint(&node1), fingerprint(&node2));
}

#[tokio::test]
async fn stop_request_finishes_the_current_peer_only() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let node3 = network.spawn_node("node-3");
    node2.register(node1.address()).await.unwrap();
    node3.register(node1.address()).await.unwrap();

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    for node in [&node2, &node3] {
        let stop_tx = Arc::clone(&stop_tx);
        network.fail_requests(node.address(), move |request| {
            if matches!(request, Request::Ping) {
                let _ = stop_tx.send(true);
            }
            false
        });
    }

    let report = node1.tick_until(&stop_rx).await;
    assert!(report.interrupted);
    assert_eq!(report.visits.len(), 1);
    let visit = &report.visits[0];
    assert_eq!(visit.peer_id, "node-2");
    assert_eq!(visit.status, PeerStatus::Ok);
    assert!(report.visit("node-3").is_none());
}

/// Answers every request from `source`, except that item fetches return `wrong`
struct MisroutingClient {
    source: Arc<SyncService>,
    wrong: bucketsync::bucket::Item,
}

#[async_trait]
impl PeerClient for MisroutingClient {
    async fn call(&self, request: Request) -> Result<Response, ApiError> {
        match request {
            Request::GetItem { .. } => Ok(Response::Item(self.wrong.clone())),
            other => Ok(self.source.handle(other).await),
        }
    }
}

#[tokio::test]
async fn item_with_unexpected_id_is_rejected() {
    let network = LocalNetwork::new();
    let node1 = network.spawn_node("node-1");
    let node2 = network.spawn_node("node-2");
    let item_id = seed_bucket(&node1);

    let mut wrong = node1.state().read().get_item("b1", &item_id).unwrap();
    wrong.id = "not-what-was-asked".to_string();
    let client = MisroutingClient {
        source: Arc::clone(&node1),
        wrong,
    };
    let peer = Peer::new(
        PeerInfo::new("node-1", node1.address()),
        Arc::new(client),
    );

    let report = node2.reconcile(&peer).await;
    assert!(report.state_fetched);
    assert_eq!(report.items_stored, 0);
    assert_eq!(report.failures, 1);
    assert!(!report.is_complete());

    let state = node2.state().read();
    let bucket = state.bucket("b1").unwrap();
    assert!(bucket.items().is_empty());
    assert!(state.get_item("b1", "not-what-was-asked").is_err());
}
