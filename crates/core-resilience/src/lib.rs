//! Bulwark Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! Building blocks for services that call flaky resources on behalf of many
//! concurrent principals:
//!
//! - **Circuit Breaker**: fails fast while a named resource keeps failing
//! - **Retry**: policy-driven backoff with bounded jitter
//! - **Rate Limiter**: per-principal hourly budgets keyed by hour bucket
//! - **Connection Pool**: bounded, health-checked connection reuse with RAII checkout
//! - **Clock**: injectable wall clock for hour buckets and expiry decisions
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Storage systems (databases, file systems)
//! - Credentials, sessions or error records
//! - Application-specific concerns
//!
//! Breaker and rate-limit checks are synchronous and never suspend. The only
//! suspension points are pool acquisition, connection creation and retry
//! delays.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Hourly Rate Limiter               │  ← Per-principal budget
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Executor                    │  ← Backoff between attempts
//! └─────────────┬───────────────────────────┘
//!               │ each attempt
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Connection Pool                   │  ← Bounded reuse, health sweep
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Resource
//! ```
//!
//! # Usage Example
//!
//! ## Circuit Breaker
//!
//! ```no_run
//! use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let breaker = CircuitBreaker::new(
//!     "payments-api",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         success_threshold: 2,
//!         recovery_timeout: Duration::from_secs(60),
//!     },
//! );
//!
//! let value = breaker
//!     .call(|| async { Ok::<_, ResilienceError>(42) })
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry
//!
//! ```no_run
//! use bulwark_core_resilience::{ResilienceError, RetryExecutor, RetryPolicy};
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let executor = RetryExecutor::new(RetryPolicy::database());
//! let rows = executor
//!     .run(|_attempt| async { Ok::<_, ResilienceError>(3) })
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod connection_pool;
pub mod error;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use clock::{hour_bucket, Clock, ManualClock, SystemClock};
pub use connection_pool::{
    ConnectionFactory, ConnectionPool, PoolConfig, PoolHealth, PoolStats, PooledConnection,
};
pub use error::ResilienceError;
pub use rate_limiter::{CounterSnapshot, HourlyRateLimiter, RateDecision};
pub use retry::{RetryExecutor, RetryPolicy, RetryStrategy, Retryable};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use bulwark_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::clock::{Clock, SystemClock};
    pub use super::connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolHealth};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::HourlyRateLimiter;
    pub use super::retry::{RetryExecutor, RetryPolicy, RetryStrategy, Retryable};
}
