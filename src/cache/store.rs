//! Cache entry storage.

use dashmap::DashMap;
use tokio::time::Instant;

/// A cached value and the moment it stops being fresh.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Key-value storage used by [`CacheAside`](super::CacheAside).
///
/// Every method is atomic per key.
pub trait CacheStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry<V>>;

    fn put(&self, key: &str, entry: CacheEntry<V>);

    /// Returns whether an entry was removed.
    fn remove(&self, key: &str) -> bool;

    /// Keep only entries for which `keep` returns true. Returns the number removed.
    fn retain(&self, keep: &mut dyn FnMut(&str, &CacheEntry<V>) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sharded concurrent map.
pub struct LocalStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V> LocalStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> Default for LocalStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> CacheStore<V> for LocalStore<V> {
    fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, entry: CacheEntry<V>) {
        self.entries.insert(key.to_string(), entry);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &CacheEntry<V>) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            let kept = keep(key.as_str(), &*entry);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
