use bucketsync::bucket::{BucketOptions, ItemOptions};
use bucketsync::state::NodeState;
use bucketsync::store::{FsObjectStore, ObjectStore};
use bucketsync::tree::DEFAULT_TREE_DEPTH;
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> NodeState {
    let store = Arc::new(FsObjectStore::open(dir.path()).unwrap());
    NodeState::load(store, DEFAULT_TREE_DEPTH).unwrap()
}

#[test]
fn state_is_rebuilt_from_disk() {
    let dir = TempDir::new().unwrap();

    let (fingerprint, kept, removed) = {
        let mut state = open(&dir);
        let record = state
            .create_bucket(BucketOptions::new("assets", "/assets"))
            .unwrap();
        let kept = state
            .create_item(&record.id, ItemOptions::new("logo", "png"), b"png".to_vec())
            .unwrap();
        let removed = state
            .create_item(&record.id, ItemOptions::new("old", "css"), b"body{}".to_vec())
            .unwrap();
        state.delete_item(&record.id, &removed.id).unwrap();
        state
            .create_bucket(BucketOptions::new("scratch", "/scratch"))
            .unwrap();
        (state.fingerprint().unwrap(), kept, removed)
    };

    let state = open(&dir);
    assert_eq!(state.fingerprint().unwrap(), fingerprint);
    assert_eq!(state.buckets().count(), 2);

    let bucket = state.bucket_by_path("/assets").unwrap();
    let bucket_id = bucket.id().to_string();
    assert_eq!(bucket.items().len(), 2);

    let item = state.item_by_access_name(&bucket_id, "logo.png").unwrap();
    assert_eq!(item.id, kept.id);
    assert_eq!(item.content.as_deref(), Some(&b"png"[..]));

    let tombstone = state.get_item(&bucket_id, &removed.id).unwrap();
    assert!(tombstone.deleted);
    assert!(state
        .item_by_access_name(&bucket_id, "old.css")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn deleted_bucket_stays_deleted_after_restart() {
    let dir = TempDir::new().unwrap();
    let bucket_id = {
        let mut state = open(&dir);
        let record = state
            .create_bucket(BucketOptions::new("assets", "/assets"))
            .unwrap();
        state
            .create_item(&record.id, ItemOptions::new("a", "txt"), b"a".to_vec())
            .unwrap();
        state.delete_bucket(&record.id).unwrap();
        record.id
    };

    let state = open(&dir);
    let bucket = state.bucket(&bucket_id).unwrap();
    assert!(bucket.is_deleted());
    assert!(bucket.items().values().all(|info| info.deleted));
}

#[test]
fn unreadable_item_is_skipped_on_load() {
    let dir = TempDir::new().unwrap();
    let bucket_id = {
        let mut state = open(&dir);
        let record = state
            .create_bucket(BucketOptions::new("assets", "/assets"))
            .unwrap();
        state
            .create_item(&record.id, ItemOptions::new("a", "txt"), b"a".to_vec())
            .unwrap();
        record.id
    };
    std::fs::write(dir.path().join(&bucket_id).join("broken.item"), b"not bincode").unwrap();

    let store = FsObjectStore::open(dir.path()).unwrap();
    assert!(store.load_item(&bucket_id, "broken").is_err());

    let state = open(&dir);
    assert_eq!(state.bucket(&bucket_id).unwrap().items().len(), 1);
}
