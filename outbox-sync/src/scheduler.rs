/// Sync scheduler
///
/// Drains the pending queue against the remote. A drain cycle walks the
/// queue once in FIFO order: successes are removed, retryable failures stay
/// queued with a bumped retry counter until the retry policy gives up, and
/// everything that gets dropped is reported through `sync_error` and the
/// event channel.
///
/// Drains are triggered by offline→online transitions, by a periodic timer
/// while online, and manually via `drain`. At most one drain runs at a time;
/// a trigger that arrives while one is active returns immediately.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time;

use outbox_core::clock::{duration_millis, system_clock, SharedClock};

use crate::action::{ActionId, ActionKind, PendingAction};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::queue::PendingQueue;
use crate::remote::{RemoteError, SharedRemote};

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of the sync state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last known connectivity
    pub is_online: bool,
    /// Whether a drain cycle is running
    pub sync_in_progress: bool,
    /// Last successful drain (unix millis)
    pub last_sync_time: Option<i64>,
    /// Last sync problem, cleared by a clean drain or `clear_sync_error`
    pub sync_error: Option<String>,
    /// Number of queued actions
    pub pending: usize,
}

/// Why a drain returned without doing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    InProgress,
    Offline,
    EmptyQueue,
}

/// Why an action was removed without being delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Failed on every allowed attempt
    RetriesExhausted { attempts: u32, last_error: String },
    /// The remote refused it outright
    Rejected { error: String },
    /// Sat in the queue longer than the configured maximum age
    Expired { age_ms: i64 },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::RetriesExhausted { attempts, last_error } => {
                write!(f, "gave up after {} attempts: {}", attempts, last_error)
            }
            DropReason::Rejected { error } => write!(f, "{}", error),
            DropReason::Expired { age_ms } => write!(f, "expired after {} ms in queue", age_ms),
        }
    }
}

/// An action the scheduler gave up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub reason: DropReason,
    /// Unix millis
    pub dropped_at: i64,
}

impl fmt::Display for DroppedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.id, self.reason)
    }
}

/// Outcome of one drain call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Set when the drain did not run
    pub skipped: Option<SkipReason>,
    /// Delivered and removed, in delivery order
    pub applied: Vec<ActionId>,
    /// Failed and left queued for another attempt
    pub retried: Vec<ActionId>,
    /// Still inside their backoff window; not attempted
    pub deferred: Vec<ActionId>,
    /// Removed without delivery
    pub dropped: Vec<DroppedAction>,
    /// Queue length after the drain
    pub remaining: usize,
}

impl DrainReport {
    fn skipped(reason: SkipReason, remaining: usize) -> Self {
        Self {
            skipped: Some(reason),
            remaining,
            ..Default::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Number of remote calls made
    pub fn attempted(&self) -> usize {
        self.applied.len()
            + self.retried.len()
            + self
                .dropped
                .iter()
                .filter(|d| !matches!(d.reason, DropReason::Expired { .. }))
                .count()
    }
}

/// Events that can be observed
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    DrainStarted { pending: usize },
    ActionApplied { id: ActionId, kind: ActionKind },
    ActionRetried { id: ActionId, retry_count: u32, error: String },
    ActionDeferred { id: ActionId },
    ActionDropped(DroppedAction),
    DrainCompleted { applied: usize, retried: usize, dropped: usize, remaining: usize },
}

#[derive(Default)]
struct StatusInner {
    last_sync_time: Option<i64>,
    sync_error: Option<String>,
    dropped: Vec<DroppedAction>,
}

/// Clears the in-progress flag on every exit path
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives delivery of the pending queue
pub struct SyncScheduler {
    queue: Arc<PendingQueue>,
    monitor: Arc<ConnectivityMonitor>,
    remote: SharedRemote,
    config: SyncConfig,
    clock: SharedClock,
    in_progress: AtomicBool,
    status: RwLock<StatusInner>,
    event_tx: broadcast::Sender<SyncEvent>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        queue: Arc<PendingQueue>,
        monitor: Arc<ConnectivityMonitor>,
        remote: SharedRemote,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(queue, monitor, remote, config, system_clock())
    }

    pub fn with_clock(
        queue: Arc<PendingQueue>,
        monitor: Arc<ConnectivityMonitor>,
        remote: SharedRemote,
        config: SyncConfig,
        clock: SharedClock,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            queue,
            monitor,
            remote,
            config,
            clock,
            in_progress: AtomicBool::new(false),
            status: RwLock::new(StatusInner::default()),
            event_tx,
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Start automatic draining: once now, on every online transition, and
    /// on the configured interval while online.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            tracing::debug!("Sync scheduler already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let scheduler = Arc::clone(self);
        let mut connectivity = self.monitor.subscribe();
        let period = self.config.sync_interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = period.map(|p| {
                let mut interval = time::interval_at(time::Instant::now() + p, p);
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
                interval
            });

            scheduler.drain().await;

            loop {
                tokio::select! {
                    _ = next_tick(&mut ticker) => {
                        scheduler.drain().await;
                    }
                    event = connectivity.recv() => match event {
                        Some(ConnectivityEvent::Online) => {
                            scheduler.drain().await;
                        }
                        Some(ConnectivityEvent::Offline) => {}
                        None => break,
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Sync scheduler shutting down");
                        break;
                    }
                }
            }

            scheduler.monitor.unsubscribe(connectivity.id());
        }));
    }

    /// Stop automatic draining. A drain that is already running finishes first.
    pub async fn shutdown(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Sync scheduler task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run one drain cycle now
    pub async fn drain(&self) -> DrainReport {
        let Some(guard) = DrainGuard::acquire(&self.in_progress) else {
            return DrainReport::skipped(SkipReason::InProgress, self.queue.len());
        };
        if !self.monitor.is_online() {
            return DrainReport::skipped(SkipReason::Offline, self.queue.len());
        }
        if self.queue.is_empty() {
            return DrainReport::skipped(SkipReason::EmptyQueue, 0);
        }

        let actions = self.queue.list();
        tracing::info!("Draining {} pending actions", actions.len());
        self.emit_event(SyncEvent::DrainStarted {
            pending: actions.len(),
        });

        let mut report = DrainReport::default();
        for snapshot in actions {
            // Removed by someone else since the cycle started
            let Some(action) = self.queue.get(&snapshot.id) else {
                continue;
            };
            self.process(action, &mut report).await;
        }

        report.remaining = self.queue.len();
        self.finish(&report);
        drop(guard);

        self.emit_event(SyncEvent::DrainCompleted {
            applied: report.applied.len(),
            retried: report.retried.len(),
            dropped: report.dropped.len(),
            remaining: report.remaining,
        });
        tracing::info!(
            "Drain finished: {} applied, {} retried, {} deferred, {} dropped, {} remaining",
            report.applied.len(),
            report.retried.len(),
            report.deferred.len(),
            report.dropped.len(),
            report.remaining
        );

        report
    }

    async fn process(&self, action: PendingAction, report: &mut DrainReport) {
        let policy = &self.config.retry_policy;
        let now = self.clock.now_millis();

        if let Some(max_age) = self.config.max_action_age {
            if action.is_expired(duration_millis(max_age), now) {
                let reason = DropReason::Expired {
                    age_ms: action.age_ms(now),
                };
                self.drop_action(&action, reason, report);
                return;
            }
        }

        if !policy.is_due(action.retry_count, action.last_retry_at, now) {
            self.emit_event(SyncEvent::ActionDeferred {
                id: action.id.clone(),
            });
            report.deferred.push(action.id);
            return;
        }

        match self.apply_one(&action).await {
            Ok(()) => {
                self.queue.remove(&action.id);
                tracing::debug!("Applied {} ({})", action.id, action.kind);
                self.emit_event(SyncEvent::ActionApplied {
                    id: action.id.clone(),
                    kind: action.kind.clone(),
                });
                report.applied.push(action.id);
            }
            Err(err) if err.is_retryable() && !policy.exhausted(action.retry_count) => {
                let retry_count = self
                    .queue
                    .increment_retry(&action.id, Some(err.to_string()))
                    .unwrap_or(action.retry_count + 1);
                tracing::debug!(
                    "Action {} ({}) failed, retry {}/{}: {}",
                    action.id,
                    action.kind,
                    retry_count,
                    policy.max_retries,
                    err
                );
                self.emit_event(SyncEvent::ActionRetried {
                    id: action.id.clone(),
                    retry_count,
                    error: err.to_string(),
                });
                report.retried.push(action.id);
            }
            Err(err) => {
                let reason = if err.is_retryable() {
                    DropReason::RetriesExhausted {
                        attempts: action.retry_count + 1,
                        last_error: err.to_string(),
                    }
                } else {
                    DropReason::Rejected {
                        error: err.to_string(),
                    }
                };
                self.drop_action(&action, reason, report);
            }
        }
    }

    async fn apply_one(&self, action: &PendingAction) -> Result<(), RemoteError> {
        match self.config.apply_timeout {
            Some(limit) => match time::timeout(limit, self.remote.apply(action)).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(limit)),
            },
            None => self.remote.apply(action).await,
        }
    }

    fn drop_action(&self, action: &PendingAction, reason: DropReason, report: &mut DrainReport) {
        self.queue.remove(&action.id);

        let dropped = DroppedAction {
            id: action.id.clone(),
            kind: action.kind.clone(),
            reason,
            dropped_at: self.clock.now_millis(),
        };
        tracing::warn!("Dropped pending action {}", dropped);

        self.status.write().dropped.push(dropped.clone());
        self.emit_event(SyncEvent::ActionDropped(dropped.clone()));
        report.dropped.push(dropped);
    }

    fn finish(&self, report: &DrainReport) {
        let succeeded = !report.applied.is_empty() || report.remaining == 0;
        let mut status = self.status.write();

        if succeeded {
            status.last_sync_time = Some(self.clock.now_millis());
        }

        if !report.dropped.is_empty() {
            let details: Vec<String> = report.dropped.iter().map(|d| d.to_string()).collect();
            status.sync_error = Some(format!(
                "Dropped {} pending action(s): {}",
                report.dropped.len(),
                details.join("; ")
            ));
        } else if succeeded {
            status.sync_error = None;
        } else if !report.retried.is_empty() {
            let last = report
                .retried
                .last()
                .and_then(|id| self.queue.get(id))
                .and_then(|a| a.last_error)
                .unwrap_or_else(|| "unknown error".to_string());
            status.sync_error = Some(format!(
                "{} pending action(s) failed and will be retried: {}",
                report.retried.len(),
                last
            ));
        }
    }

    /// Current sync state
    pub fn status(&self) -> SyncStatus {
        let status = self.status.read();
        SyncStatus {
            is_online: self.monitor.is_online(),
            sync_in_progress: self.in_progress.load(Ordering::Acquire),
            last_sync_time: status.last_sync_time,
            sync_error: status.sync_error.clone(),
            pending: self.queue.len(),
        }
    }

    /// Dismiss the current sync error
    pub fn clear_sync_error(&self) {
        self.status.write().sync_error = None;
    }

    /// Actions dropped since the last call, oldest first
    pub fn take_dropped(&self) -> Vec<DroppedAction> {
        std::mem::take(&mut self.status.write().dropped)
    }

    /// Subscribe to sync events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit_event(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

async fn next_tick(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
