/// Configuration for the sync scheduler and optimistic resources

use serde::{Deserialize, Serialize};
use std::time::Duration;

use outbox_core::{Error, Result, RetryPolicy};

/// Default periodic sync interval
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on an optimistic remote operation
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sync scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic drain interval while online (None = only event-triggered)
    pub sync_interval: Option<Duration>,

    /// Retry limit and backoff between attempts
    pub retry_policy: RetryPolicy,

    /// Bound on each remote apply call (None = wait for the remote)
    pub apply_timeout: Option<Duration>,

    /// Actions older than this are dropped instead of delivered (None = never)
    pub max_action_age: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            retry_policy: RetryPolicy::default(),
            apply_timeout: None,
            max_action_age: None,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the periodic drain interval
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable the periodic drain; only connectivity events and manual triggers remain
    pub fn without_periodic_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Set how many times a failed action is retried before it is dropped
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bound every remote apply call; exceeding it counts as a retryable failure
    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = Some(timeout);
        self
    }

    /// Drop actions that have been queued longer than `max_age`
    pub fn with_max_action_age(mut self, max_age: Duration) -> Self {
        self.max_action_age = Some(max_age);
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(interval) = self.sync_interval {
            if interval.is_zero() {
                return Err(Error::InvalidConfig(
                    "sync_interval must be greater than 0 when set".to_string(),
                ));
            }
        }

        if let Some(timeout) = self.apply_timeout {
            if timeout.is_zero() {
                return Err(Error::InvalidConfig(
                    "apply_timeout must be greater than 0 when set".to_string(),
                ));
            }
        }

        if let Some(age) = self.max_action_age {
            if age.is_zero() {
                return Err(Error::InvalidConfig(
                    "max_action_age must be greater than 0 when set".to_string(),
                ));
            }
        }

        self.retry_policy.validate()
    }
}

/// Optimistic resource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// Bound on the remote operation; exceeding it rolls the update back
    pub timeout: Duration,

    /// Queue retryable failures for the scheduler instead of rolling back
    pub defer_transient_failures: bool,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_UPDATE_TIMEOUT,
            defer_transient_failures: false,
        }
    }
}

impl OptimisticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_defer_transient_failures(mut self, defer: bool) -> Self {
        self.defer_transient_failures = defer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub sync: SyncConfig,
    pub optimistic: OptimisticConfig,
}

impl OutboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_optimistic(mut self, optimistic: OptimisticConfig) -> Self {
        self.optimistic = optimistic;
        self
    }

    /// Load from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: OutboxConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.optimistic.validate()
    }
}
