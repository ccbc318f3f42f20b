/// Test utilities and helpers for Outbox testing
///
/// This module provides a scriptable remote and an outbox wrapper that owns
/// its temporary directory.

use async_trait::async_trait;
use outbox_core::{FileStore, ManualClock, MemoryStore, SharedStore};
use outbox_sync::{
    ActionKind, Outbox, OutboxConfig, PendingAction, RemoteApply, RemoteError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; set RUST_LOG to see engine logs
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Remote that records every call and fails according to a per-kind script
#[derive(Default)]
pub struct ScriptedRemote {
    calls: Mutex<Vec<PendingAction>>,
    queued_failures: Mutex<HashMap<ActionKind, VecDeque<RemoteError>>>,
    permanent_failures: Mutex<HashMap<ActionKind, RemoteError>>,
    latency: Mutex<Option<Duration>>,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next call for `kind` with `error`
    pub fn fail_next(&self, kind: &str, error: RemoteError) {
        self.queued_failures
            .lock()
            .entry(kind.into())
            .or_default()
            .push_back(error);
    }

    /// Fail every call for `kind` until `heal` is called
    pub fn fail_always(&self, kind: &str, error: RemoteError) {
        self.permanent_failures.lock().insert(kind.into(), error);
    }

    pub fn heal(&self, kind: &str) {
        self.permanent_failures.lock().remove(&ActionKind::from(kind));
        self.queued_failures.lock().remove(&ActionKind::from(kind));
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<PendingAction> {
        self.calls.lock().clone()
    }

    /// Kinds of all calls, in call order
    pub fn call_kinds(&self) -> Vec<String> {
        self.calls.lock().iter().map(|a| a.kind.to_string()).collect()
    }

    pub fn attempts_for(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|a| a.kind.as_str() == kind)
            .count()
    }

    fn scripted_result(&self, kind: &ActionKind) -> Result<(), RemoteError> {
        if let Some(error) = self
            .queued_failures
            .lock()
            .get_mut(kind)
            .and_then(|q| q.pop_front())
        {
            return Err(error);
        }
        match self.permanent_failures.lock().get(kind) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApply for ScriptedRemote {
    async fn apply(&self, action: &PendingAction) -> Result<(), RemoteError> {
        self.calls.lock().push(action.clone());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.scripted_result(&action.kind)
    }
}

/// Outbox wrapper that manages store and temporary directory lifecycle
pub struct TestOutbox {
    pub outbox: Outbox,
    pub remote: Arc<ScriptedRemote>,
    pub clock: ManualClock,
    pub config: OutboxConfig,
    path: Option<PathBuf>,
    store: SharedStore,
    _temp_dir: Option<TempDir>,
}

impl TestOutbox {
    /// In-memory outbox with periodic sync disabled
    pub fn new(online: bool) -> Self {
        Self::with_config(online, manual_config())
    }

    pub fn with_config(online: bool, config: OutboxConfig) -> Self {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let outbox = build(store.clone(), remote.clone(), clock.clone(), config.clone(), online);

        Self {
            outbox,
            remote,
            clock,
            config,
            path: None,
            store,
            _temp_dir: None,
        }
    }

    /// Outbox persisted to a file store in a fresh temporary directory
    pub fn on_disk(online: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().to_path_buf();
        let store: SharedStore = Arc::new(FileStore::open(&path).expect("Failed to open file store"));
        let remote = ScriptedRemote::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let config = manual_config();
        let outbox = build(store.clone(), remote.clone(), clock.clone(), config.clone(), online);

        Self {
            outbox,
            remote,
            clock,
            config,
            path: Some(path),
            store,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Drop the outbox and build a new one over the same storage, as after an app restart
    pub fn reopen(self, online: bool) -> Self {
        let Self {
            outbox,
            remote,
            clock,
            config,
            path,
            store,
            _temp_dir,
        } = self;
        drop(outbox);

        let store: SharedStore = match &path {
            Some(path) => Arc::new(FileStore::open(path).expect("Failed to reopen file store")),
            None => store,
        };
        let outbox = build(store.clone(), remote.clone(), clock.clone(), config.clone(), online);

        Self {
            outbox,
            remote,
            clock,
            config,
            path,
            store,
            _temp_dir,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl std::ops::Deref for TestOutbox {
    type Target = Outbox;

    fn deref(&self) -> &Outbox {
        &self.outbox
    }
}

/// Default configuration without the periodic timer, so tests drive drains
pub fn manual_config() -> OutboxConfig {
    let mut config = OutboxConfig::default();
    config.sync = config.sync.without_periodic_sync();
    config
}

fn build(
    store: SharedStore,
    remote: Arc<ScriptedRemote>,
    clock: ManualClock,
    config: OutboxConfig,
    online: bool,
) -> Outbox {
    Outbox::builder()
        .with_store(store)
        .with_remote(remote)
        .with_clock(Arc::new(clock))
        .with_config(config)
        .with_initial_online(online)
        .build()
        .expect("Failed to build outbox")
}

/// Echo remote operation for optimistic updates
pub async fn confirm<T>(value: T) -> Result<T, RemoteError> {
    Ok(value)
}
