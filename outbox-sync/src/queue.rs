/// Durable FIFO queue of pending actions
///
/// Holds mutations that could not be confirmed immediately. Insertion order
/// is replay order: later actions may depend on earlier ones performed while
/// offline, so the scheduler always walks the queue front to back.
///
/// Every mutating call writes the whole queue through to the persistent store
/// before returning. A failed write is logged and counted but never surfaces
/// as an error; the in-memory queue stays authoritative.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use outbox_core::clock::{system_clock, SharedClock};
use outbox_core::store::{SharedStore, StoreExt, RESERVED_PREFIX};

use crate::action::{ActionId, ActionKind, PendingAction};

/// Store key of the persisted queue
pub fn queue_key() -> String {
    format!("{}queue", RESERVED_PREFIX)
}

/// The pending action log
pub struct PendingQueue {
    entries: RwLock<VecDeque<PendingAction>>,
    store: SharedStore,
    clock: SharedClock,
    persist_failures: AtomicU64,
}

impl PendingQueue {
    /// Open the queue, restoring whatever was persisted by a previous session
    pub fn open(store: SharedStore) -> Self {
        Self::open_with_clock(store, system_clock())
    }

    pub fn open_with_clock(store: SharedStore, clock: SharedClock) -> Self {
        let entries = match store.load::<Vec<PendingAction>>(&queue_key()) {
            Ok(Some(actions)) => {
                tracing::info!("Restored {} pending actions", actions.len());
                actions.into_iter().collect()
            }
            Ok(None) => VecDeque::new(),
            Err(e) => {
                tracing::error!("Failed to restore pending actions, starting empty: {}", e);
                VecDeque::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            store,
            clock,
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Append a new action at the tail and return its id
    pub fn enqueue(&self, kind: impl Into<ActionKind>, payload: serde_json::Value) -> ActionId {
        let action = PendingAction::new(kind.into(), payload, self.clock.now_millis());
        let id = action.id.clone();

        let mut entries = self.entries.write();
        tracing::debug!("Enqueued {} ({})", id, action.kind);
        entries.push_back(action);
        self.persist(&entries);

        id
    }

    /// Delete the action with `id`. Removing a missing id is a no-op.
    pub fn remove(&self, id: &ActionId) -> bool {
        let mut entries = self.entries.write();
        let Some(position) = entries.iter().position(|a| &a.id == id) else {
            return false;
        };
        entries.remove(position);
        self.persist(&entries);
        true
    }

    /// Record a failed attempt for `id`; returns the new retry count
    pub fn increment_retry(&self, id: &ActionId, error: Option<String>) -> Option<u32> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.write();
        let action = entries.iter_mut().find(|a| &a.id == id)?;
        action.mark_retry(error, now);
        let count = action.retry_count;
        self.persist(&entries);
        Some(count)
    }

    /// All actions in replay (FIFO) order
    pub fn list(&self) -> Vec<PendingAction> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn get(&self, id: &ActionId) -> Option<PendingAction> {
        self.entries.read().iter().find(|a| &a.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every pending action
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.persist(&entries);
    }

    /// Number of writes to the store that failed since the queue was opened
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    // Called with the write lock held so the persisted order matches memory.
    fn persist(&self, entries: &VecDeque<PendingAction>) {
        let snapshot: Vec<&PendingAction> = entries.iter().collect();
        if let Err(e) = self.store.save(&queue_key(), &snapshot) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Failed to persist pending queue ({} actions): {}",
                entries.len(),
                e
            );
        }
    }
}
