/// Remote apply contract
///
/// The backend integration layer supplies a `RemoteApply` that delivers one
/// pending action. Its result is a plain value: the scheduler decides between
/// retry and drop from `RemoteError::is_retryable`, never from panics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::action::{ActionKind, PendingAction};

/// Why a remote call did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    /// Network error, 5xx-equivalent or similar; worth retrying
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Explicit rejection (validation, conflict); retrying will not help
    #[error("Rejected by remote: {0}")]
    Rejected(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("No remote handler for action kind: {0}")]
    UnknownKind(String),
}

impl RemoteError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Returns a stable code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Transient(_) => "TRANSIENT",
            RemoteError::Rejected(_) => "REJECTED",
            RemoteError::Timeout(_) => "TIMEOUT",
            RemoteError::UnknownKind(_) => "UNKNOWN_KIND",
        }
    }

    /// Transient failures and timeouts are retried; rejections are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transient(_) => true,
            RemoteError::Timeout(_) => true,
            RemoteError::Rejected(_) => false,
            RemoteError::UnknownKind(_) => false,
        }
    }
}

/// Delivers a pending action to the remote system
#[async_trait]
pub trait RemoteApply: Send + Sync {
    async fn apply(&self, action: &PendingAction) -> Result<(), RemoteError>;
}

/// Shared handle to a remote
pub type SharedRemote = Arc<dyn RemoteApply>;

#[async_trait]
impl<T: RemoteApply + ?Sized> RemoteApply for Arc<T> {
    async fn apply(&self, action: &PendingAction) -> Result<(), RemoteError> {
        (**self).apply(action).await
    }
}

/// `RemoteApply` backed by a closure
pub struct FnRemote<F> {
    f: F,
}

/// Wrap an async closure as a `RemoteApply`
///
/// ```no_run
/// use outbox_sync::remote::{remote_fn, RemoteError};
///
/// let remote = remote_fn(|action| async move {
///     if action.kind.as_str() == "create_order" {
///         Ok(())
///     } else {
///         Err(RemoteError::transient("backend unavailable"))
///     }
/// });
/// ```
pub fn remote_fn<F, Fut>(f: F) -> FnRemote<F>
where
    F: Fn(PendingAction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), RemoteError>> + Send,
{
    FnRemote { f }
}

#[async_trait]
impl<F, Fut> RemoteApply for FnRemote<F>
where
    F: Fn(PendingAction) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), RemoteError>> + Send,
{
    async fn apply(&self, action: &PendingAction) -> Result<(), RemoteError> {
        (self.f)(action.clone()).await
    }
}

/// Dispatches each action to the handler registered for its kind
#[derive(Default, Clone)]
pub struct RemoteRouter {
    routes: HashMap<ActionKind, SharedRemote>,
    fallback: Option<SharedRemote>,
}

impl RemoteRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous one
    pub fn route(mut self, kind: impl Into<ActionKind>, handler: impl RemoteApply + 'static) -> Self {
        self.routes.insert(kind.into(), Arc::new(handler));
        self
    }

    /// Handler for kinds without a dedicated route
    pub fn fallback(mut self, handler: impl RemoteApply + 'static) -> Self {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn handles(&self, kind: &ActionKind) -> bool {
        self.routes.contains_key(kind) || self.fallback.is_some()
    }
}

#[async_trait]
impl RemoteApply for RemoteRouter {
    async fn apply(&self, action: &PendingAction) -> Result<(), RemoteError> {
        match self.routes.get(&action.kind).or(self.fallback.as_ref()) {
            Some(handler) => handler.apply(action).await,
            None => Err(RemoteError::UnknownKind(action.kind.to_string())),
        }
    }
}
