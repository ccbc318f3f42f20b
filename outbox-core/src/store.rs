/// Persistent key-value store abstraction
///
/// Values are stored as JSON text under string keys. Adapters only deal with
/// raw strings; typed access goes through `StoreExt`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::{Error, Result};

/// Key prefix reserved for engine-owned entries
pub const RESERVED_PREFIX: &str = "_outbox#";

/// Durable key-value storage with load-at-startup / save-on-change semantics.
///
/// Writes are last-write-wins. Implementations must be safe to share between
/// tasks; no cross-process coordination is expected.
pub trait PersistentStore: Send + Sync {
    /// Load the raw JSON stored under `key`, if any
    fn load_raw(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    fn save_raw(&self, key: &str, json: &str) -> Result<()>;

    /// Delete `key`; deleting a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys currently present, sorted
    fn keys(&self) -> Result<Vec<String>>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn PersistentStore>;

/// Typed helpers over any `PersistentStore`
pub trait StoreExt {
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;
    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()>;
}

impl<S: PersistentStore + ?Sized> StoreExt for S {
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load_raw(key)? {
            Some(json) => {
                let value = serde_json::from_str(&json).map_err(|e| Error::Corruption {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.save_raw(key, &json)
    }
}

/// Reject keys that cannot be stored portably by every adapter
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > 200 {
        return Err(Error::InvalidKey(format!("key too long ({} bytes)", key.len())));
    }
    if key == "." || key == ".." {
        return Err(Error::InvalidKey(format!("reserved key: {}", key)));
    }
    if let Some(c) = key.chars().find(|c| matches!(c, '/' | '\\' | '\0') || c.is_control()) {
        return Err(Error::InvalidKey(format!("key {:?} contains {:?}", key, c)));
    }
    Ok(())
}
