//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a resource
//! is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Resource is unhealthy, requests fail immediately
//! - HalfOpen: Testing if the resource has recovered
//!
//! State lives behind a synchronous mutex: admission checks never suspend, and
//! every transition for one breaker is totally ordered.

use super::error::ResilienceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

tokio::task_local! {
    /// Identity of the breaker whose outcomes the enclosing caller records
    static RECORDED_BY_CALLER: usize;
}

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing resource recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// Time since the last failure before an open circuit admits a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject thresholds that would make the breaker unusable
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker, suitable for dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    /// Consecutive failure count
    failure_count: u32,
    /// Consecutive success count (used in half-open state)
    success_count: u32,
    /// Monotonic time of the last failure, drives the recovery timeout
    last_failure: Option<Instant>,
    /// Wall-clock time of the last failure, for reporting
    last_failure_time: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_time: None,
        }
    }
}

/// Circuit breaker protecting one named resource
///
/// Clones share state, so a breaker handed to several callers is still one
/// breaker.
///
/// # Example
/// ```no_run
/// use bulwark_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new("inventory-api", CircuitBreakerConfig::default());
///
///     let result = breaker.call(|| async {
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the protected resource
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    ///
    /// This does not advance an expired open circuit; only an admission check does.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Get current half-open success count
    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// Run `fut` as one attempt whose outcome the caller records
    ///
    /// Code inside the scope that shares this breaker checks
    /// [`is_recorded_by_caller`](Self::is_recorded_by_caller) and leaves the
    /// transition to the caller, so an attempt counts once.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        RECORDED_BY_CALLER.scope(self.identity(), fut).await
    }

    /// Whether the current task runs inside [`scope`](Self::scope) for this breaker
    pub fn is_recorded_by_caller(&self) -> bool {
        RECORDED_BY_CALLER
            .try_with(|id| *id == self.identity())
            .unwrap_or(false)
    }

    /// Shared by clones, distinct between breakers
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.state) as usize
    }

    /// Snapshot of the breaker for reporting
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = CircuitBreakerState::new();
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Decide whether a call may proceed right now
    ///
    /// An open circuit whose recovery timeout has elapsed since the last failure
    /// moves to half-open here and admits the call.
    pub fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = state
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);

                if recovered {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker half-open, probing recovery");
                }
                recovered
            }
        }
    }

    /// Like [`can_execute`](Self::can_execute) but returns the rejection as an error
    pub fn try_acquire(&self) -> Result<(), ResilienceError> {
        if self.can_execute() {
            Ok(())
        } else {
            Err(ResilienceError::CircuitOpen {
                name: self.name.to_string(),
            })
        }
    }

    /// Handle successful operation
    pub fn record_success(&self) {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;

                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    info!(breaker = %self.name, "Circuit breaker closed, resource recovered");
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late; it
                // says nothing about recovery.
            }
        }
    }

    /// Handle failed operation
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.last_failure_time = Some(Utc::now());

        // The recovery window runs from the failure that opened the circuit
        if state.state != CircuitState::Open {
            state.last_failure = Some(Instant::now());
        }

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;

                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        recovery_timeout_secs = self.config.recovery_timeout.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.failure_count += 1;
                state.state = CircuitState::Open;
                state.success_count = 0;
                warn!(breaker = %self.name, "Probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {
                state.failure_count += 1;
            }
        }
    }

    /// Execute an operation under breaker protection, without retries
    ///
    /// The wrapped closure is not invoked at all while the circuit is open.
    /// Every `Err` returned by the operation counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ResilienceError>,
    {
        self.try_acquire()?;

        match self.scope(op()).await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing() -> Result<(), ResilienceError> {
        Err(ResilienceError::ConnectionCreation("test error".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("db", config);

        for _ in 0..3 {
            let result: Result<(), ResilienceError> = breaker.call(|| async { failing() }).await;
            assert!(result.is_err());
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
        assert!(breaker.snapshot().last_failure_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_operation() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("api", config);
        for _ in 0..3 {
            let _: Result<(), ResilienceError> = breaker.call(|| async { failing() }).await;
        }

        tokio::time::advance(Duration::from_secs(1)).await;

        let invoked = AtomicU32::new(0);
        let result: Result<(), ResilienceError> = breaker
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_to_closed() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        };
        let breaker = CircuitBreaker::new("api", config);

        for _ in 0..3 {
            let _: Result<(), ResilienceError> = breaker.call(|| async { failing() }).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        for _ in 0..2 {
            let result = breaker.call(|| async { Ok::<_, ResilienceError>(()) }).await;
            assert!(result.is_ok());
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(10),
        };
        let breaker = CircuitBreaker::new("api", config);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.can_execute());
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.success_count(), 0);
        // Recovery timeout restarts from the new failure
        assert!(!breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_keeps_recovery_window() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(10),
        };
        let breaker = CircuitBreaker::new("api", config);
        breaker.record_failure();

        // A call admitted before the trip fails after it
        tokio::time::advance(Duration::from_secs(6)).await;
        breaker.record_failure();
        assert_eq!(breaker.failure_count(), 2);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("api", config);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_scope_is_per_breaker() {
        let db = CircuitBreaker::new_default("db");
        let namesake = CircuitBreaker::new_default("db");
        assert!(!db.is_recorded_by_caller());

        let (clone_inside, namesake_inside) = db
            .scope(async { (db.clone().is_recorded_by_caller(), namesake.is_recorded_by_caller()) })
            .await;
        assert!(clone_inside);
        assert!(!namesake_inside);
        assert!(!db.is_recorded_by_caller());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let breaker = CircuitBreaker::new(
            "shared",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let other = breaker.clone();
        other.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("db", config);
        breaker.record_failure();
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_config_validation() {
        let bad = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }
}
