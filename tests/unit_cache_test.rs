use shepherd::core::storage::cache::ExpirationCache;
use shepherd::core::storage::{StorageService, Topology};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_get_within_ttl_returns_value() {
    let cache: ExpirationCache<String, i32> =
        ExpirationCache::new(Duration::from_secs(60), false);
    cache.put("a".to_string(), 1);
    assert_eq!(cache.get(&"a".to_string()), Some(1));
}

#[tokio::test]
async fn test_get_after_ttl_returns_absent_and_disposes() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let disposed_clone = disposed.clone();
    let cache: ExpirationCache<String, i32> =
        ExpirationCache::new(Duration::from_millis(30), false).with_disposal(
            None,
            Some(Arc::new(move |_| {
                disposed_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );
    cache.put("a".to_string(), 1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get(&"a".to_string()), None);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_entry_survives_when_should_dispose_rejects() {
    let cache: ExpirationCache<String, i32> =
        ExpirationCache::new(Duration::from_millis(30), false)
            .with_disposal(Some(Arc::new(|_| false)), None);
    cache.put("a".to_string(), 1);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.sweep(), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_renewable_on_read_resets_deadline() {
    let cache: ExpirationCache<String, i32> =
        ExpirationCache::new(Duration::from_millis(80), true);
    cache.put("a".to_string(), 1);
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Each hit pushes the deadline out by one TTL.
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get(&"a".to_string()), None);
}

#[tokio::test]
async fn test_sweep_evicts_only_expired_entries() {
    let cache: ExpirationCache<String, i32> =
        ExpirationCache::new(Duration::from_millis(40), false);
    cache.put("old".to_string(), 1);
    tokio::time::sleep(Duration::from_millis(70)).await;
    cache.put("fresh".to_string(), 2);
    assert_eq!(cache.sweep(), 1);
    assert_eq!(cache.get(&"fresh".to_string()), Some(2));
    assert!(!cache.contains_key(&"old".to_string()));
}

#[tokio::test]
async fn test_storage_service_type_keyed_access() {
    let storage = StorageService::new(Duration::from_secs(5));
    storage.set::<String, Topology>("cluster-1".to_string(), vec![]);
    assert_eq!(
        storage.get::<String, Topology>(&"cluster-1".to_string()),
        Some(vec![])
    );
    // A class that was never registered yields nothing.
    assert_eq!(storage.get::<String, i64>(&"cluster-1".to_string()), None);
}

#[tokio::test]
async fn test_storage_registration_is_idempotent() {
    let storage = StorageService::new(Duration::from_secs(5));
    storage.set::<String, Topology>("cluster-1".to_string(), vec![]);
    // Re-registering must not wipe the existing cache.
    storage.register::<String, Topology>(Duration::from_secs(60), true);
    assert!(
        storage
            .get::<String, Topology>(&"cluster-1".to_string())
            .is_some()
    );
}

#[tokio::test]
async fn test_storage_sweeper_start_stop() {
    let storage = StorageService::new(Duration::from_millis(20));
    storage.start_sweeper(Duration::from_millis(30));
    storage.set::<String, Topology>("cluster-1".to_string(), vec![]);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(storage.get::<String, Topology>(&"cluster-1".to_string()), None);
    storage.stop_sweeper().await;
}
