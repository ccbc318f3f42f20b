/// In-memory persistent store for tests and ephemeral sessions
///
/// Provides the same API as the file-backed store but keeps everything in a
/// map. All data is lost when the last clone is dropped.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::store::{validate_key, PersistentStore};
use crate::{Error, Result};

/// In-memory store. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    entries: RwLock<BTreeMap<String, String>>,
    /// When set, every write fails with `Error::Unavailable`
    read_only: AtomicBool,
    /// Number of successful writes
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (useful for testing)
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of successful `save_raw` calls so far
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.inner.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.read_only.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

impl PersistentStore for MemoryStore {
    fn load_raw(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.inner.entries.read().get(key).cloned())
    }

    fn save_raw(&self, key: &str, json: &str) -> Result<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.inner
            .entries
            .write()
            .insert(key.to_string(), json.to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.check_writable()?;
        self.inner.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.entries.read().keys().cloned().collect())
    }
}
