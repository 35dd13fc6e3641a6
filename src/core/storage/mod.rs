// src/core/storage/mod.rs

//! A class-keyed collection of expiration caches shared by every component of
//! one wrapper process, plus the periodic cleanup task that sweeps them.

pub mod cache;

use crate::core::host::HostInfo;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use cache::ExpirationCache;

/// Interval of the periodic cleanup sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default freshness window for cached topology snapshots.
pub const DEFAULT_TOPOLOGY_TTL: Duration = Duration::from_secs(5);

/// A cluster topology snapshot as stored in the shared cache.
pub type Topology = Vec<HostInfo>;

trait AnyCache: Send + Sync {
    fn sweep(&self) -> usize;
    fn clear(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<K, V> AnyCache for ExpirationCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn sweep(&self) -> usize {
        ExpirationCache::sweep(self)
    }

    fn clear(&self) {
        ExpirationCache::clear(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Holds one [`ExpirationCache`] per stored value class. `set` infers the
/// class from the value; `get` returns a value only when the registered cache
/// for that class matches both key and value types.
pub struct StorageService {
    caches: DashMap<TypeId, Arc<dyn AnyCache>>,
    sweeper: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl StorageService {
    /// Creates the service with the topology cache pre-registered under the
    /// given freshness TTL.
    pub fn new(topology_ttl: Duration) -> Arc<Self> {
        let service = Arc::new(Self {
            caches: DashMap::new(),
            sweeper: Mutex::new(None),
        });
        service.register::<String, Topology>(topology_ttl, false);
        service
    }

    /// Registers a cache for value class `V` keyed by `K`. Idempotent: an
    /// existing registration is left untouched.
    pub fn register<K, V>(&self, ttl: Duration, renewable_on_read: bool)
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.caches
            .entry(TypeId::of::<V>())
            .or_insert_with(|| Arc::new(ExpirationCache::<K, V>::new(ttl, renewable_on_read)));
    }

    /// Registers a cache with disposal hooks. Idempotent like [`register`].
    ///
    /// [`register`]: StorageService::register
    pub fn register_with_disposal<K, V>(
        &self,
        ttl: Duration,
        renewable_on_read: bool,
        should_dispose: Option<cache::ShouldDisposeFn<V>>,
        dispose: Option<cache::DisposalFn<V>>,
    ) where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.caches.entry(TypeId::of::<V>()).or_insert_with(|| {
            Arc::new(
                ExpirationCache::<K, V>::new(ttl, renewable_on_read)
                    .with_disposal(should_dispose, dispose),
            )
        });
    }

    fn cache_of<K, V>(&self) -> Option<Arc<dyn AnyCache>>
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.caches.get(&TypeId::of::<V>()).map(|c| c.clone())
    }

    pub fn set<K, V>(&self, key: K, value: V)
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if let Some(cache) = self.cache_of::<K, V>()
            && let Some(cache) = cache.as_any().downcast_ref::<ExpirationCache<K, V>>()
        {
            cache.put(key, value);
        }
    }

    pub fn get<K, V>(&self, key: &K) -> Option<V>
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let cache = self.cache_of::<K, V>()?;
        // Defensive class check: the downcast fails when the registered cache
        // does not carry exactly (K, V).
        let cache = cache.as_any().downcast_ref::<ExpirationCache<K, V>>()?;
        cache.get(key)
    }

    pub fn remove<K, V>(&self, key: &K) -> Option<V>
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let cache = self.cache_of::<K, V>()?;
        let cache = cache.as_any().downcast_ref::<ExpirationCache<K, V>>()?;
        cache.remove(key)
    }

    pub fn clear_all(&self) {
        for cache in self.caches.iter() {
            cache.clear();
        }
    }

    /// Runs one cleanup pass over every registered cache.
    pub fn sweep_all(&self) -> usize {
        let mut evicted = 0;
        for cache in self.caches.iter() {
            evicted += cache.sweep();
        }
        evicted
    }

    /// Starts the periodic cleanup task. A second call is a no-op.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.sweeper.lock();
        if guard.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("Storage cleanup task started.");
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let evicted = service.sweep_all();
                        if evicted > 0 {
                            debug!("Storage cleanup evicted {} expired entries.", evicted);
                        }
                    }
                    _ = stop_rx.changed() => {
                        info!("Storage cleanup task shutting down.");
                        return;
                    }
                }
            }
        });
        *guard = Some((stop_tx, handle));
    }

    /// Stops the cleanup task and waits for it to finish.
    pub async fn stop_sweeper(&self) {
        let taken = self.sweeper.lock().take();
        if let Some((stop_tx, handle)) = taken {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }
    }
}
