//! Retry policies with backoff and jitter
//!
//! A [`RetryPolicy`] decides *whether* another attempt is allowed and *how
//! long* to wait before it. A [`RetryExecutor`] drives an operation through
//! that policy. Whether a given error is worth retrying is the error's own
//! call, expressed through [`Retryable`].
//!
//! # Example
//!
//! ```
//! use bulwark_core_resilience::retry::{RetryPolicy, RetryStrategy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     strategy: RetryStrategy::Exponential,
//!     max_attempts: 5,
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(5),
//!     backoff_multiplier: 2.0,
//!     jitter: false,
//! };
//!
//! assert_eq!(policy.delay_for(0), Duration::from_secs(1));
//! assert_eq!(policy.delay_for(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for(2), Duration::from_secs(4));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(5));
//! ```

use super::error::ResilienceError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Upper bound of the random jitter, as a fraction of the computed delay
pub const MAX_JITTER_FRACTION: f64 = 0.1;

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Never retry
    None,
    /// Fixed delay between retries
    Fixed,
    /// Delay grows by `base_delay` each attempt
    Linear,
    /// Delay multiplies by `backoff_multiplier` each attempt
    #[default]
    Exponential,
    /// Uniformly random delay between `base_delay` and `max_delay`
    Random,
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Backoff strategy to use
    pub strategy: RetryStrategy,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Growth factor for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once
    pub fn no_retry() -> Self {
        Self {
            strategy: RetryStrategy::None,
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Policy for database calls: quick, bounded exponential retries
    pub fn database() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Policy for third-party APIs: more patience, longer ceiling
    pub fn external_service() -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Reject policies whose delays cannot be computed
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ResilienceError::InvalidConfig(
                "base_delay must not exceed max_delay".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::InvalidConfig(
                "backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Attempts the policy actually permits
    pub fn effective_max_attempts(&self) -> u32 {
        match self.strategy {
            RetryStrategy::None => 1,
            _ => self.max_attempts.max(1),
        }
    }

    /// Whether another attempt may follow the (zero-based) `attempt` that just failed
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.effective_max_attempts()
    }

    /// Delay after the zero-based `attempt`, before jitter, capped at `max_delay`
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            RetryStrategy::None => Duration::ZERO,
            RetryStrategy::Fixed => self.base_delay,
            RetryStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::Exponential => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
                if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.max_delay
                }
            }
            RetryStrategy::Random => {
                if self.max_delay > self.base_delay {
                    let low = self.base_delay.as_secs_f64();
                    let high = self.max_delay.as_secs_f64();
                    Duration::from_secs_f64(rand::rng().random_range(low..=high))
                } else {
                    self.base_delay
                }
            }
        };

        delay.min(self.max_delay)
    }

    /// Delay after the zero-based `attempt`, including jitter when enabled
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for(attempt);

        if self.jitter && !capped.is_zero() {
            let jitter = rand::rng().random_range(0.0..=MAX_JITTER_FRACTION);
            capped + Duration::from_secs_f64(capped.as_secs_f64() * jitter)
        } else {
            capped
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ResilienceError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::PoolExhausted(_)
                | ResilienceError::ConnectionCreation(_)
                | ResilienceError::UnhealthyConnection(_)
        )
    }
}

/// Runs operations through a [`RetryPolicy`]
///
/// Waits between attempts are `tokio` sleeps, so dropping the returned future
/// cancels the loop cleanly between attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or attempts run out
    ///
    /// The closure receives the zero-based attempt index.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !e.is_retryable() || !self.policy.allows_retry_after(attempt) {
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.effective_max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
