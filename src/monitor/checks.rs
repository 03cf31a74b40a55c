//! Built-in health checks and entity sources

use async_trait::async_trait;
use bulwark_core_resilience::{CircuitBreaker, CircuitState, PoolHealth};
use chrono::Duration;
use std::sync::Arc;
use tracing::warn;

use super::alerts::{metric_names, EntitySnapshot};
use super::health::{CheckOutcome, EntitySource, HealthCheck, HealthStatus};
use crate::auth::Authenticator;
use crate::database::DatabasePool;
use crate::resilience::{ErrorHandlingCoordinator, ErrorTracker};
use crate::store::Store;

/// Round trip through the agent database pool
#[derive(Debug)]
pub struct DatabasePingCheck {
    pool: DatabasePool,
}

impl DatabasePingCheck {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for DatabasePingCheck {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> CheckOutcome {
        match self.pool.ping().await {
            Ok(()) => CheckOutcome::healthy(),
            Err(e) => CheckOutcome::failed(e.to_string()),
        }
    }
}

/// Fails while the pool's valid/total ratio is unhealthy
#[derive(Debug)]
pub struct PoolHealthCheck {
    name: String,
    pool: DatabasePool,
}

impl PoolHealthCheck {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            name: format!("pool:{}", pool.name()),
            pool,
        }
    }
}

#[async_trait]
impl HealthCheck for PoolHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> CheckOutcome {
        match self.pool.health() {
            PoolHealth::Unhealthy => CheckOutcome::failed("connection pool is unhealthy"),
            PoolHealth::Healthy | PoolHealth::Degraded => CheckOutcome::healthy(),
        }
    }
}

/// Fails while a breaker is open
#[derive(Debug)]
pub struct BreakerCheck {
    name: String,
    breaker: CircuitBreaker,
}

impl BreakerCheck {
    pub fn new(breaker: CircuitBreaker) -> Self {
        Self {
            name: format!("breaker:{}", breaker.name()),
            breaker,
        }
    }
}

#[async_trait]
impl HealthCheck for BreakerCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> CheckOutcome {
        match self.breaker.state() {
            CircuitState::Open => CheckOutcome::failed(format!(
                "circuit breaker '{}' is open after {} failures",
                self.breaker.name(),
                self.breaker.failure_count()
            )),
            CircuitState::Closed | CircuitState::HalfOpen => CheckOutcome::healthy(),
        }
    }
}

/// Round trip through the ledger
#[derive(Debug)]
pub struct StoreCheck {
    store: Arc<dyn Store>,
}

impl StoreCheck {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreCheck {
    fn name(&self) -> &str {
        "ledger"
    }

    async fn check(&self) -> CheckOutcome {
        match self.store.ping().await {
            Ok(()) => CheckOutcome::healthy(),
            Err(e) => CheckOutcome::failed(e.to_string()),
        }
    }
}

/// One `breaker:<name>` entity per breaker the coordinator knows
#[derive(Debug)]
pub struct BreakerSource {
    coordinator: Arc<ErrorHandlingCoordinator>,
}

impl BreakerSource {
    pub fn new(coordinator: Arc<ErrorHandlingCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EntitySource for BreakerSource {
    async fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.coordinator
            .breaker_snapshots()
            .into_iter()
            .map(|b| {
                let open = if b.state == CircuitState::Open { 1.0 } else { 0.0 };
                EntitySnapshot::new(format!("breaker:{}", b.name), b.state.into())
                    .with_metric(metric_names::BREAKER_OPEN, open)
                    .with_metric(metric_names::BREAKER_FAILURES, f64::from(b.failure_count))
            })
            .collect()
    }
}

/// The `pool:<name>` entity
#[derive(Debug)]
pub struct PoolSource {
    pool: DatabasePool,
}

impl PoolSource {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitySource for PoolSource {
    async fn snapshots(&self) -> Vec<EntitySnapshot> {
        let stats = self.pool.pool_stats();
        vec![EntitySnapshot::new(format!("pool:{}", self.pool.name()), stats.health.into())
            .with_metric(metric_names::POOL_IN_USE, stats.in_use as f64)
            .with_metric(metric_names::POOL_IDLE, stats.idle as f64)
            .with_metric(metric_names::POOL_TOTAL, stats.total as f64)
            .with_metric(metric_names::POOL_UTILIZATION, stats.utilization())
            .with_metric(metric_names::POOL_ACQUIRE_TIMEOUTS, stats.acquire_timeouts as f64)]
    }
}

/// The `errors` entity: errors recorded over the last hour
#[derive(Debug)]
pub struct ErrorRateSource {
    tracker: ErrorTracker,
    threshold: f64,
}

impl ErrorRateSource {
    pub fn new(tracker: ErrorTracker, threshold: f64) -> Self {
        Self { tracker, threshold }
    }
}

#[async_trait]
impl EntitySource for ErrorRateSource {
    async fn snapshots(&self) -> Vec<EntitySnapshot> {
        match self.tracker.count_since(Duration::hours(1)).await {
            Ok(count) => {
                let rate = count as f64;
                let health = if rate > self.threshold {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                vec![EntitySnapshot::new("errors", health)
                    .with_metric(metric_names::ERRORS_PER_HOUR, rate)]
            }
            Err(e) => {
                warn!("Could not read error rate: {}", e);
                Vec::new()
            }
        }
    }
}

/// The `auth` entity: failed authentications and live sessions
#[derive(Debug)]
pub struct AuthSource {
    authenticator: Arc<Authenticator>,
    threshold: f64,
}

impl AuthSource {
    pub fn new(authenticator: Arc<Authenticator>, threshold: f64) -> Self {
        Self {
            authenticator,
            threshold,
        }
    }
}

#[async_trait]
impl EntitySource for AuthSource {
    async fn snapshots(&self) -> Vec<EntitySnapshot> {
        match self.authenticator.get_auth_stats(1).await {
            Ok(stats) => {
                let failures = stats.failed as f64;
                let health = if failures > self.threshold {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                vec![EntitySnapshot::new("auth", health)
                    .with_metric(metric_names::AUTH_FAILURES_PER_HOUR, failures)
                    .with_metric(metric_names::AUTH_ACTIVE_SESSIONS, stats.active_sessions as f64)]
            }
            Err(e) => {
                warn!("Could not read authentication stats: {}", e);
                Vec::new()
            }
        }
    }
}
