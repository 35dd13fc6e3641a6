// src/core/storage/cache.rs

//! A concurrent TTL cache. Entries are only evicted by the periodic sweep or
//! by on-miss inspection; readers never hold the sweep lock.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides whether an expired value may actually be dropped.
pub type ShouldDisposeFn<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;
/// Side effect invoked when a value is dropped from the cache.
pub type DisposalFn<V> = Arc<dyn Fn(&V) + Send + Sync>;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL cache with an optional renew-on-read policy and optional disposal
/// hooks.
pub struct ExpirationCache<K, V>
where
    K: Eq + Hash,
{
    ttl: Duration,
    renewable_on_read: bool,
    entries: DashMap<K, CacheEntry<V>>,
    should_dispose: Option<ShouldDisposeFn<V>>,
    dispose: Option<DisposalFn<V>>,
}

impl<K, V> ExpirationCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, renewable_on_read: bool) -> Self {
        Self {
            ttl,
            renewable_on_read,
            entries: DashMap::new(),
            should_dispose: None,
            dispose: None,
        }
    }

    pub fn with_disposal(
        mut self,
        should_dispose: Option<ShouldDisposeFn<V>>,
        dispose: Option<DisposalFn<V>>,
    ) -> Self {
        self.should_dispose = should_dispose;
        self.dispose = dispose;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a key. An expired entry whose `should_dispose` check passes is
    /// evicted on the spot and reported as absent; otherwise a hit with
    /// `renewable_on_read` pushes the deadline out by one TTL.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut disposed: Option<V> = None;

        let result = {
            let mut entry = self.entries.get_mut(key)?;
            if now >= entry.expires_at && self.may_dispose(&entry.value) {
                disposed = Some(entry.value.clone());
                None
            } else {
                if self.renewable_on_read {
                    entry.expires_at = now + self.ttl;
                }
                Some(entry.value.clone())
            }
        };

        if let Some(value) = disposed {
            self.entries.remove(key);
            self.run_disposal(&value);
        }
        result
    }

    /// Inserts a value with the cache-level TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.ttl);
    }

    /// Inserts a value with an entry-specific TTL.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Visits every entry and evicts the expired ones that may be disposed.
    /// Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut victims: Vec<V> = Vec::new();
        self.entries.retain(|_, entry| {
            let expired = now >= entry.expires_at && self.may_dispose(&entry.value);
            if expired {
                victims.push(entry.value.clone());
            }
            !expired
        });
        for value in &victims {
            self.run_disposal(value);
        }
        victims.len()
    }

    fn may_dispose(&self, value: &V) -> bool {
        match &self.should_dispose {
            Some(check) => check(value),
            None => true,
        }
    }

    fn run_disposal(&self, value: &V) {
        if let Some(dispose) = &self.dispose {
            dispose(value);
        }
    }
}
