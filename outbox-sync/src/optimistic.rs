/// Optimistic update controller
///
/// Wraps a piece of client state so a mutation shows up immediately, before
/// the remote confirms it. Each resource is either idle or updating; while
/// updating, `visible` holds the speculative value and `committed` the value
/// to fall back to.
///
/// - online: the remote operation runs under a timeout and its result becomes
///   the committed value, or the update is rolled back on failure;
/// - offline: the remote operation is never called, the mutation is queued as
///   a pending action and the speculative value is accepted;
/// - a second update while one is in flight is refused and leaves the state
///   untouched;
/// - an update whose future is dropped before it settles restores the
///   committed value.
///
/// The committed value is written to the snapshot cache after every
/// settlement, so the resource comes back with it after a restart.

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time;

use outbox_core::clock::SharedClock;
use outbox_core::SnapshotCache;

use crate::action::{ActionId, ActionKind};
use crate::config::OptimisticConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::queue::PendingQueue;
use crate::remote::RemoteError;

/// Why an update could not start
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("An update to {0} is already in flight")]
    InFlight(String),
}

/// How an update settled
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    /// The remote confirmed; carries the value it returned
    Committed(T),
    /// Accepted locally and queued for the scheduler
    Queued { action_id: ActionId },
    /// Remote failure or timeout; the previous value is visible again
    RolledBack { error: RemoteError },
    /// The mutation would not change anything; nothing was sent or queued
    Unchanged,
}

impl<T> UpdateOutcome<T> {
    /// Whether the speculative value survived
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Committed(_) | UpdateOutcome::Queued { .. })
    }
}

/// A speculative change and the value to restore if it fails
#[derive(Debug, Clone)]
pub struct Mutation<T> {
    pub speculative: T,
    pub rollback: T,
    /// Queued action kind; the resource's default kind when unset
    pub kind: Option<ActionKind>,
    /// Queued action payload; the JSON form of `speculative` when unset
    pub payload: Option<serde_json::Value>,
}

impl<T> Mutation<T> {
    pub fn new(speculative: T, rollback: T) -> Self {
        Self {
            speculative,
            rollback,
            kind: None,
            payload: None,
        }
    }

    /// Describe the pending action to queue if this mutation cannot reach the remote
    pub fn with_action(mut self, kind: impl Into<ActionKind>, payload: serde_json::Value) -> Self {
        self.kind = Some(kind.into());
        self.payload = Some(payload);
        self
    }
}

/// Point-in-time copy of a resource's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot<T> {
    /// Last confirmed (or offline-accepted) value
    pub committed: T,
    /// Value callers should display
    pub visible: T,
    pub is_updating: bool,
    pub last_error: Option<RemoteError>,
    /// Unix millis of the last settled update
    pub last_update: Option<i64>,
}

/// Everything a resource needs from its surroundings
#[derive(Clone)]
pub struct ResourceContext {
    pub monitor: Arc<ConnectivityMonitor>,
    pub queue: Arc<PendingQueue>,
    pub cache: SnapshotCache,
    pub clock: SharedClock,
    pub config: OptimisticConfig,
}

/// A value updated optimistically against a remote
pub struct OptimisticResource<T> {
    name: String,
    default_kind: ActionKind,
    state: RwLock<ResourceSnapshot<T>>,
    /// Rollback value of the most recent update, consumed by `rollback`
    last_rollback: Mutex<Option<T>>,
    ctx: ResourceContext,
}

/// Clears the updating state if an update is abandoned before it settles
struct UpdateGuard<'a, T: Clone> {
    state: &'a RwLock<ResourceSnapshot<T>>,
    name: &'a str,
    settled: bool,
}

impl<T: Clone> UpdateGuard<'_, T> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl<T: Clone> Drop for UpdateGuard<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.state.write();
        state.visible = state.committed.clone();
        state.is_updating = false;
        tracing::warn!("Update to {} was cancelled, committed value restored", self.name);
    }
}

impl<T> OptimisticResource<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Open the resource `name`, restoring its cached value or starting from `initial`
    pub fn open(
        name: impl Into<String>,
        default_kind: impl Into<ActionKind>,
        initial: T,
        ctx: ResourceContext,
    ) -> Self {
        let name = name.into();
        let value = ctx.cache.get_or(&name, initial);

        Self {
            name,
            default_kind: default_kind.into(),
            state: RwLock::new(ResourceSnapshot {
                committed: value.clone(),
                visible: value,
                is_updating: false,
                last_error: None,
                last_update: None,
            }),
            last_rollback: Mutex::new(None),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_kind(&self) -> &ActionKind {
        &self.default_kind
    }

    /// Apply `mutation` speculatively and settle it through `remote_operation`
    pub async fn update<F, Fut>(
        &self,
        mutation: Mutation<T>,
        remote_operation: F,
    ) -> Result<UpdateOutcome<T>, UpdateError>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let Mutation {
            speculative,
            rollback,
            kind,
            payload,
        } = mutation;

        {
            let mut state = self.state.write();
            if state.is_updating {
                tracing::warn!("Refusing overlapping update to {}", self.name);
                return Err(UpdateError::InFlight(self.name.clone()));
            }
            *self.last_rollback.lock() = Some(rollback.clone());
            state.visible = speculative.clone();
            state.committed = rollback;
            state.is_updating = true;
            state.last_error = None;
        }
        let guard = UpdateGuard {
            state: &self.state,
            name: &self.name,
            settled: false,
        };

        if !self.ctx.monitor.is_online() {
            let action_id = self.enqueue(kind, payload, &speculative);
            tracing::debug!("{} updated offline, queued {}", self.name, action_id);
            self.accept(speculative);
            guard.settle();
            return Ok(UpdateOutcome::Queued { action_id });
        }

        let timeout = self.ctx.config.timeout;
        let result = match time::timeout(timeout, remote_operation(speculative.clone())).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };

        let outcome = match result {
            Ok(value) => {
                self.accept(value.clone());
                UpdateOutcome::Committed(value)
            }
            Err(error) if error.is_retryable() && self.ctx.config.defer_transient_failures => {
                let action_id = self.enqueue(kind, payload, &speculative);
                tracing::info!(
                    "{} update deferred after {}, queued {}",
                    self.name,
                    error,
                    action_id
                );
                self.accept(speculative);
                UpdateOutcome::Queued { action_id }
            }
            Err(error) => {
                tracing::warn!("Rolling back {} update: {}", self.name, error);
                self.roll_back(error.clone());
                UpdateOutcome::RolledBack { error }
            }
        };
        guard.settle();
        Ok(outcome)
    }

    fn enqueue(
        &self,
        kind: Option<ActionKind>,
        payload: Option<serde_json::Value>,
        speculative: &T,
    ) -> ActionId {
        let kind = kind.unwrap_or_else(|| self.default_kind.clone());
        let payload = payload.unwrap_or_else(|| {
            serde_json::to_value(speculative).unwrap_or_else(|e| {
                tracing::warn!("Cannot serialize {} for the pending queue: {}", self.name, e);
                serde_json::Value::Null
            })
        });
        self.ctx.queue.enqueue(kind, payload)
    }

    fn accept(&self, value: T) {
        let mut state = self.state.write();
        state.committed = value.clone();
        state.visible = value;
        state.is_updating = false;
        state.last_error = None;
        state.last_update = Some(self.ctx.clock.now_millis());
        self.persist(&state.committed);
    }

    fn roll_back(&self, error: RemoteError) {
        let mut state = self.state.write();
        state.visible = state.committed.clone();
        state.is_updating = false;
        state.last_error = Some(error);
        state.last_update = Some(self.ctx.clock.now_millis());
        self.persist(&state.committed);
    }

    fn persist(&self, committed: &T) {
        if let Err(e) = self.ctx.cache.put(&self.name, committed) {
            tracing::warn!("Failed to cache {}: {}", self.name, e);
        }
    }

    /// Value to display
    pub fn visible(&self) -> T {
        self.state.read().visible.clone()
    }

    pub fn committed(&self) -> T {
        self.state.read().committed.clone()
    }

    pub fn is_updating(&self) -> bool {
        self.state.read().is_updating
    }

    pub fn last_error(&self) -> Option<RemoteError> {
        self.state.read().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.state.write().last_error = None;
    }

    /// Accept a fresh value from the server while idle
    pub fn replace(&self, value: T) -> Result<(), UpdateError> {
        let mut state = self.state.write();
        if state.is_updating {
            return Err(UpdateError::InFlight(self.name.clone()));
        }
        state.committed = value.clone();
        state.visible = value;
        self.persist(&state.committed);
        Ok(())
    }

    /// Restore the rollback value of the most recent update while idle
    ///
    /// Returns false when there is nothing to restore. Only local state
    /// changes; actions already queued for the remote stay queued.
    pub fn rollback(&self) -> Result<bool, UpdateError> {
        let mut state = self.state.write();
        if state.is_updating {
            return Err(UpdateError::InFlight(self.name.clone()));
        }
        let Some(previous) = self.last_rollback.lock().take() else {
            return Ok(false);
        };
        tracing::debug!("Manual rollback of {}", self.name);
        state.committed = previous.clone();
        state.visible = previous;
        state.last_error = None;
        self.persist(&state.committed);
        Ok(true)
    }

    pub fn snapshot(&self) -> ResourceSnapshot<T> {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::kinds;
    use outbox_core::{ManualClock, MemoryStore};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Fixture {
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<PendingQueue>,
        store: MemoryStore,
        ctx: ResourceContext,
    }

    fn fixture(online: bool, config: OptimisticConfig) -> Fixture {
        let store = MemoryStore::new();
        let clock = ManualClock::new(5_000);
        let monitor = Arc::new(ConnectivityMonitor::new(online));
        let queue = Arc::new(PendingQueue::open_with_clock(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
        ));
        let ctx = ResourceContext {
            monitor: monitor.clone(),
            queue: queue.clone(),
            cache: SnapshotCache::with_clock(Arc::new(store.clone()), Arc::new(clock.clone())),
            clock: Arc::new(clock),
            config,
        };
        Fixture {
            monitor,
            queue,
            store,
            ctx,
        }
    }

    fn counter(f: &Fixture) -> OptimisticResource<Vec<u32>> {
        OptimisticResource::open("counter", kinds::UPDATE_CART, vec![1], f.ctx.clone())
    }

    #[tokio::test]
    async fn test_commit_takes_remote_result() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = counter(&f);

        let outcome = resource
            .update(Mutation::new(vec![1, 2], vec![1]), |value| async move {
                let mut confirmed = value;
                confirmed.push(99);
                Ok::<_, RemoteError>(confirmed)
            })
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Committed(vec![1, 2, 99]));
        assert_eq!(resource.visible(), vec![1, 2, 99]);
        assert_eq!(resource.committed(), vec![1, 2, 99]);
        assert!(!resource.is_updating());
        assert_eq!(resource.snapshot().last_update, Some(5_000));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_value() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = counter(&f);

        let outcome = resource
            .update(Mutation::new(vec![7, 7, 7], vec![1]), |_| async {
                Err::<Vec<u32>, _>(RemoteError::rejected("out of stock"))
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UpdateOutcome::RolledBack {
                error: RemoteError::rejected("out of stock")
            }
        );
        assert!(!outcome.is_accepted());
        assert_eq!(resource.visible(), vec![1]);
        assert_eq!(resource.committed(), vec![1]);
        assert_eq!(resource.last_error(), Some(RemoteError::rejected("out of stock")));

        resource.clear_error();
        assert!(resource.last_error().is_none());
    }

    #[tokio::test]
    async fn test_offline_accepts_and_queues_once() {
        let f = fixture(false, OptimisticConfig::default());
        let resource = counter(&f);
        let mut called = false;

        let outcome = resource
            .update(Mutation::new(vec![1, 2], vec![1]), |v| {
                called = true;
                async move { Ok::<_, RemoteError>(v) }
            })
            .await
            .unwrap();

        assert!(!called);
        let UpdateOutcome::Queued { action_id } = outcome else {
            panic!("expected queued outcome");
        };
        assert_eq!(resource.visible(), vec![1, 2]);
        assert_eq!(resource.committed(), vec![1, 2]);

        let pending = f.queue.list();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, action_id);
        assert_eq!(pending[0].kind.as_str(), kinds::UPDATE_CART);
        assert_eq!(pending[0].payload, json!([1, 2]));

        f.monitor.report(true);
        let outcome = resource
            .update(Mutation::new(vec![1, 2, 3], vec![1, 2]), |v| async move { Ok::<_, RemoteError>(v) })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Committed(vec![1, 2, 3]));
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_uses_mutation_action() {
        let f = fixture(false, OptimisticConfig::default());
        let resource = counter(&f);

        resource
            .update(
                Mutation::new(vec![], vec![1]).with_action(kinds::REMOVE_FROM_CART, json!({"id": 1})),
                |v| async move { Ok::<_, RemoteError>(v) },
            )
            .await
            .unwrap();

        let pending = f.queue.list();
        assert_eq!(pending[0].kind.as_str(), kinds::REMOVE_FROM_CART);
        assert_eq!(pending[0].payload, json!({"id": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back() {
        let f = fixture(true, OptimisticConfig::new().with_timeout(Duration::from_secs(5)));
        let resource = counter(&f);

        let outcome = resource
            .update(Mutation::new(vec![2], vec![1]), |v| async move {
                time::sleep(Duration::from_secs(60)).await;
                Ok::<_, RemoteError>(v)
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            UpdateOutcome::RolledBack {
                error: RemoteError::Timeout(Duration::from_secs(5))
            }
        );
        assert_eq!(resource.visible(), vec![1]);
    }

    #[tokio::test]
    async fn test_deferred_transient_failure() {
        let f = fixture(
            true,
            OptimisticConfig::new().with_defer_transient_failures(true),
        );
        let resource = counter(&f);

        let outcome = resource
            .update(Mutation::new(vec![1, 3], vec![1]), |_| async {
                Err::<Vec<u32>, _>(RemoteError::transient("502"))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::Queued { .. }));
        assert_eq!(resource.visible(), vec![1, 3]);
        assert_eq!(f.queue.len(), 1);

        // Rejections are never deferred
        let outcome = resource
            .update(Mutation::new(vec![4], vec![1, 3]), |_| async {
                Err::<Vec<u32>, _>(RemoteError::rejected("invalid"))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, UpdateOutcome::RolledBack { .. }));
        assert_eq!(resource.visible(), vec![1, 3]);
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_update_rejected() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = Arc::new(counter(&f));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = tokio::spawn({
            let resource = resource.clone();
            async move {
                resource
                    .update(Mutation::new(vec![1, 2], vec![1]), |v| async move {
                        let _ = release_rx.await;
                        Ok::<_, RemoteError>(v)
                    })
                    .await
            }
        });
        while !resource.is_updating() {
            tokio::task::yield_now().await;
        }

        let second = resource
            .update(Mutation::new(vec![9], vec![1, 2]), |v| async move { Ok::<_, RemoteError>(v) })
            .await;
        assert_eq!(second, Err(UpdateError::InFlight("counter".to_string())));
        assert_eq!(resource.visible(), vec![1, 2]);
        assert_eq!(resource.committed(), vec![1]);
        assert!(resource.replace(vec![0]).is_err());

        release_tx.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, UpdateOutcome::Committed(vec![1, 2]));
        assert_eq!(resource.visible(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_update_restores_committed() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = counter(&f);

        let cancelled = time::timeout(
            Duration::from_millis(100),
            resource.update(Mutation::new(vec![1, 2], vec![1]), |v| async move {
                time::sleep(Duration::from_secs(1)).await;
                Ok::<_, RemoteError>(v)
            }),
        )
        .await;
        assert!(cancelled.is_err());

        assert!(!resource.is_updating());
        assert_eq!(resource.visible(), vec![1]);
        assert_eq!(resource.committed(), vec![1]);

        let next = resource
            .update(Mutation::new(vec![1, 3], vec![1]), |v| async move { Ok::<_, RemoteError>(v) })
            .await;
        assert_eq!(next, Ok(UpdateOutcome::Committed(vec![1, 3])));
        assert_eq!(resource.visible(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_aborted_update_task_releases_resource() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = Arc::new(counter(&f));
        let (_hold_tx, hold_rx) = oneshot::channel::<()>();

        let task = tokio::spawn({
            let resource = resource.clone();
            async move {
                resource
                    .update(Mutation::new(vec![1, 2], vec![1]), |v| async move {
                        let _ = hold_rx.await;
                        Ok::<_, RemoteError>(v)
                    })
                    .await
            }
        });
        while !resource.is_updating() {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!resource.is_updating());
        assert_eq!(resource.visible(), vec![1]);
        assert!(resource.replace(vec![4]).is_ok());
    }

    #[tokio::test]
    async fn test_manual_rollback_restores_previous_value() {
        let f = fixture(true, OptimisticConfig::default());
        let resource = counter(&f);
        assert_eq!(resource.rollback(), Ok(false));

        resource
            .update(Mutation::new(vec![1, 2], vec![1]), |v| async move { Ok::<_, RemoteError>(v) })
            .await
            .unwrap();
        assert_eq!(resource.visible(), vec![1, 2]);

        assert_eq!(resource.rollback(), Ok(true));
        assert_eq!(resource.visible(), vec![1]);
        assert_eq!(resource.committed(), vec![1]);
        assert_eq!(counter(&f).visible(), vec![1]);

        // One update, one rollback
        assert_eq!(resource.rollback(), Ok(false));
    }

    #[tokio::test]
    async fn test_committed_value_restored_on_open() {
        let f = fixture(false, OptimisticConfig::default());
        {
            let resource = counter(&f);
            resource
                .update(Mutation::new(vec![1, 5], vec![1]), |v| async move { Ok::<_, RemoteError>(v) })
                .await
                .unwrap();
        }
        assert!(f.store.write_count() >= 2);

        let reopened = counter(&f);
        assert_eq!(reopened.visible(), vec![1, 5]);
        assert_eq!(reopened.committed(), vec![1, 5]);

        reopened.replace(vec![]).unwrap();
        assert_eq!(counter(&f).visible(), Vec::<u32>::new());
    }
}
