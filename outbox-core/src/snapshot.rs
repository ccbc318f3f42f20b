/// Cache of domain snapshots on top of a persistent store
///
/// Each snapshot is stamped with the time it was cached so callers can decide
/// whether a copy is fresh enough to show while offline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::{duration_millis, system_clock, SharedClock};
use crate::store::{SharedStore, StoreExt, RESERVED_PREFIX};
use crate::Result;

/// Well-known snapshot names
pub mod names {
    pub const PRODUCTS: &str = "products";
    pub const CART: &str = "cart";
    pub const WISHLIST: &str = "wishlist";
    pub const ADDRESSES: &str = "addresses";
    pub const ORDERS: &str = "orders";
}

/// A cached value and when it was stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot<T> {
    pub value: T,
    /// Unix millis
    pub cached_at: i64,
}

/// Typed snapshot cache
#[derive(Clone)]
pub struct SnapshotCache {
    store: SharedStore,
    clock: SharedClock,
}

impl SnapshotCache {
    pub fn new(store: SharedStore) -> Self {
        Self::with_clock(store, system_clock())
    }

    pub fn with_clock(store: SharedStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    fn key(name: &str) -> String {
        format!("{}snapshot#{}", RESERVED_PREFIX, name)
    }

    /// Store `value` under `name`, stamped with the current time
    pub fn put<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let snapshot = CachedSnapshot {
            value,
            cached_at: self.clock.now_millis(),
        };
        self.store.save(&Self::key(name), &snapshot)
    }

    /// Load the snapshot stored under `name`
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedSnapshot<T>>> {
        self.store.load(&Self::key(name))
    }

    /// Cached value, or `fallback` when nothing usable is cached
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, fallback: T) -> T {
        match self.get(name) {
            Ok(Some(snapshot)) => snapshot.value,
            Ok(None) => fallback,
            Err(e) => {
                tracing::warn!("Ignoring unreadable snapshot {}: {}", name, e);
                fallback
            }
        }
    }

    /// Time the snapshot was cached, if present
    pub fn cached_at(&self, name: &str) -> Option<i64> {
        self.get::<serde_json::Value>(name)
            .ok()
            .flatten()
            .map(|s| s.cached_at)
    }

    /// A missing or unreadable snapshot is always stale
    pub fn is_stale(&self, name: &str, max_age: Duration) -> bool {
        match self.cached_at(name) {
            Some(at) => self.clock.now_millis() - at > duration_millis(max_age),
            None => true,
        }
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.store.delete(&Self::key(name))
    }

    /// Names of all cached snapshots
    pub fn names(&self) -> Result<Vec<String>> {
        let prefix = Self::key("");
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::PersistentStore;
    use crate::MemoryStore;
    use std::sync::Arc;

    fn cache() -> (SnapshotCache, ManualClock, MemoryStore) {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000_000);
        let cache = SnapshotCache::with_clock(Arc::new(store.clone()), Arc::new(clock.clone()));
        (cache, clock, store)
    }

    #[test]
    fn test_put_get() {
        let (cache, _, _) = cache();
        cache.put(names::WISHLIST, &vec!["p1".to_string()]).unwrap();

        let snap: CachedSnapshot<Vec<String>> = cache.get(names::WISHLIST).unwrap().unwrap();
        assert_eq!(snap.value, vec!["p1".to_string()]);
        assert_eq!(snap.cached_at, 1_000_000);
    }

    #[test]
    fn test_get_or_fallback() {
        let (cache, _, store) = cache();
        let v: Vec<u32> = cache.get_or(names::ORDERS, vec![7]);
        assert_eq!(v, vec![7]);

        // Unreadable entries fall back too
        store.save_raw("_outbox#snapshot#orders", "oops").unwrap();
        let v: Vec<u32> = cache.get_or(names::ORDERS, vec![8]);
        assert_eq!(v, vec![8]);
    }

    #[test]
    fn test_staleness() {
        let (cache, clock, _) = cache();
        assert!(cache.is_stale(names::PRODUCTS, Duration::from_secs(60)));

        cache.put(names::PRODUCTS, &vec![1, 2]).unwrap();
        assert!(!cache.is_stale(names::PRODUCTS, Duration::from_secs(60)));

        clock.advance(60_001);
        assert!(cache.is_stale(names::PRODUCTS, Duration::from_secs(60)));
        assert!(!cache.is_stale(names::PRODUCTS, Duration::MAX));
    }

    #[test]
    fn test_names_and_remove() {
        let (cache, _, store) = cache();
        cache.put(names::CART, &Vec::<u8>::new()).unwrap();
        cache.put(names::ADDRESSES, &Vec::<u8>::new()).unwrap();
        store.save_raw("_outbox#queue", "[]").unwrap();

        assert_eq!(
            cache.names().unwrap(),
            vec!["addresses".to_string(), "cart".to_string()]
        );

        cache.remove(names::CART).unwrap();
        assert_eq!(cache.names().unwrap(), vec!["addresses".to_string()]);
    }
}
