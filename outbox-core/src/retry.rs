use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::duration_millis;
use crate::{Error, Result};

/// Configuration for how failed remote deliveries are retried.
///
/// `max_retries` bounds the number of attempts after the first one, so an
/// action that always fails is attempted `max_retries + 1` times in total.
/// Between attempts the action waits an exponentially growing backoff that
/// starts at `initial_backoff_ms` and is capped at `max_backoff_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Backoff before the first retry in milliseconds (0 = retry on the next cycle)
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates a new retry policy with the specified parameters.
    pub fn new(
        max_retries: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
        }
    }

    /// Returns a policy that drops an action after its first failure.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Three retries, each attempted on the next drain cycle.
    pub fn immediate() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Three retries with exponential backoff from one second up to a minute.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
        }
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Calculates the backoff duration for a given retry number (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt.min(30) as i32))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Returns true when an action that has already failed `retry_count`
    /// times must not be retried again.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Earliest time (unix millis) the next attempt is allowed.
    ///
    /// `None` means the action has never failed and may run right away.
    pub fn next_attempt_at(&self, retry_count: u32, last_retry_at: Option<i64>) -> Option<i64> {
        let last = last_retry_at?;
        if retry_count == 0 {
            return None;
        }
        let wait = duration_millis(self.backoff_duration(retry_count - 1));
        Some(last.saturating_add(wait))
    }

    /// Whether the backoff window for an action has elapsed at `now_ms`.
    pub fn is_due(&self, retry_count: u32, last_retry_at: Option<i64>, now_ms: i64) -> bool {
        match self.next_attempt_at(retry_count, last_retry_at) {
            Some(at) => now_ms >= at,
            None => true,
        }
    }

    /// Validate policy values
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::InvalidConfig(
                "max_backoff_ms must not be smaller than initial_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RetryPolicy {
    /// Same as `immediate()`.
    fn default() -> Self {
        Self::immediate()
    }
}
