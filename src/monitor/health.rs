//! Health checks, entity snapshots and overall system health
//!
//! Checks are independently scheduled probes with their own interval,
//! timeout and retry count. Entity sources report the latest state of
//! breakers, pools and rates; those snapshots feed the alert manager and
//! the overall status.

use async_trait::async_trait;
use bulwark_core_resilience::{CircuitBreakerSnapshot, CircuitState, Clock, PoolHealth};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::alerts::{ActiveAlert, AlertEvent, AlertManager, EntitySnapshot};
use super::metrics::{labels, MetricsCollector};
use crate::config::MonitoringConfig;
use crate::resilience::ErrorHandlingCoordinator;

/// Health level, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PoolHealth> for HealthStatus {
    fn from(health: PoolHealth) -> Self {
        match health {
            PoolHealth::Healthy => HealthStatus::Healthy,
            PoolHealth::Degraded => HealthStatus::Degraded,
            PoolHealth::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded,
            CircuitState::Open => HealthStatus::Unhealthy,
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub healthy: bool,
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
        }
    }
}

/// A named probe
#[async_trait]
pub trait HealthCheck: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    async fn check(&self) -> CheckOutcome;
}

/// Produces the latest snapshots of the entities it watches
#[async_trait]
pub trait EntitySource: Send + Sync + fmt::Debug {
    async fn snapshots(&self) -> Vec<EntitySnapshot>;
}

/// Scheduling and failure semantics of one registered check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
    /// Extra attempts before the run counts as failed
    pub retries: u32,
    /// A failing critical check makes the whole system critical
    pub critical: bool,
}

impl CheckSettings {
    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.health_check_interval_secs.max(1)),
            timeout: Duration::from_secs(config.health_check_timeout_secs.max(1)),
            retries: config.health_check_retries,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// Running state of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckStatus {
    pub name: String,
    pub healthy: bool,
    pub critical: bool,
    pub consecutive_failures: u32,
    pub total_runs: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_duration_ms: u64,
}

impl CheckStatus {
    fn pending(name: &str, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            healthy: true,
            critical,
            consecutive_failures: 0,
            total_runs: 0,
            total_failures: 0,
            last_error: None,
            last_checked: None,
            last_duration_ms: 0,
        }
    }

    fn is_failing(&self) -> bool {
        self.total_runs > 0 && !self.healthy
    }
}

/// Operator view returned by [`HealthMonitor::get_system_health`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub monitoring_enabled: bool,
    pub breakers: Vec<CircuitBreakerSnapshot>,
    pub checks: Vec<CheckStatus>,
    pub entities: Vec<EntitySnapshot>,
    pub active_alerts: Vec<ActiveAlert>,
    pub checked_at: DateTime<Utc>,
}

/// Worst of: a failing critical check, then entity health, then failing
/// non-critical checks (which only degrade)
pub fn overall_status(checks: &[CheckStatus], entities: &[EntitySnapshot]) -> HealthStatus {
    if checks.iter().any(|c| c.critical && c.is_failing()) {
        return HealthStatus::Critical;
    }
    let worst_entity = entities
        .iter()
        .map(|e| e.health)
        .max()
        .unwrap_or(HealthStatus::Healthy);
    if worst_entity >= HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }
    if worst_entity == HealthStatus::Degraded || checks.iter().any(CheckStatus::is_failing) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

#[derive(Debug, Clone)]
struct RegisteredCheck {
    check: Arc<dyn HealthCheck>,
    settings: CheckSettings,
}

/// Runs registered checks, gathers entity snapshots and evaluates alerts
#[derive(Debug)]
pub struct HealthMonitor {
    config: MonitoringConfig,
    coordinator: Arc<ErrorHandlingCoordinator>,
    alerts: AlertManager,
    metrics: MetricsCollector,
    clock: Arc<dyn Clock>,
    checks: RwLock<BTreeMap<String, RegisteredCheck>>,
    statuses: Mutex<BTreeMap<String, CheckStatus>>,
    sources: RwLock<Vec<Arc<dyn EntitySource>>>,
    entities: Mutex<Vec<EntitySnapshot>>,
}

impl HealthMonitor {
    pub fn new(
        config: MonitoringConfig,
        coordinator: Arc<ErrorHandlingCoordinator>,
        alerts: AlertManager,
        metrics: MetricsCollector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            coordinator,
            alerts,
            metrics,
            clock,
            checks: RwLock::new(BTreeMap::new()),
            statuses: Mutex::new(BTreeMap::new()),
            sources: RwLock::new(Vec::new()),
            entities: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    /// Register a check, replacing any check with the same name
    pub fn register_check(&self, check: Arc<dyn HealthCheck>, settings: CheckSettings) {
        let name = check.name().to_string();
        debug!(check = %name, interval = ?settings.interval, critical = settings.critical, "Registered health check");
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), CheckStatus::pending(&name, settings.critical));
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, RegisteredCheck { check, settings });
    }

    pub fn add_source(&self, source: Arc<dyn EntitySource>) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source);
    }

    /// Name and interval of every registered check
    pub fn check_schedule(&self) -> Vec<(String, Duration)> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, registered)| (name.clone(), registered.settings.interval))
            .collect()
    }

    /// Run one check with its timeout and retries; `None` if not registered
    pub async fn run_check(&self, name: &str) -> Option<CheckStatus> {
        let registered = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;

        let started = Instant::now();
        let settings = registered.settings;
        let mut outcome = CheckOutcome::failed("not run");
        for attempt in 0..=settings.retries {
            outcome = match tokio::time::timeout(settings.timeout, registered.check.check()).await {
                Ok(outcome) => outcome,
                Err(_) => CheckOutcome::failed(format!("timed out after {:?}", settings.timeout)),
            };
            if outcome.healthy {
                break;
            }
            debug!(check = name, attempt, error = ?outcome.error, "Health check attempt failed");
        }
        let elapsed = started.elapsed();

        let status = {
            let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
            let status = statuses
                .entry(name.to_string())
                .or_insert_with(|| CheckStatus::pending(name, settings.critical));
            let was_failing = status.is_failing();

            status.total_runs += 1;
            status.healthy = outcome.healthy;
            status.last_checked = Some(self.clock.now());
            status.last_duration_ms = elapsed.as_millis() as u64;
            if outcome.healthy {
                status.consecutive_failures = 0;
                status.last_error = None;
                if was_failing {
                    info!(check = name, "Health check recovered");
                }
            } else {
                status.consecutive_failures += 1;
                status.total_failures += 1;
                status.last_error = outcome.error.clone();
                warn!(
                    check = name,
                    critical = status.critical,
                    consecutive_failures = status.consecutive_failures,
                    "Health check failed: {}",
                    outcome.error.as_deref().unwrap_or("unhealthy")
                );
            }
            status.clone()
        };

        let check_labels = labels(&[("check", name)]);
        self.metrics.gauge(
            "health.check",
            if status.healthy { 1.0 } else { 0.0 },
            check_labels.clone(),
        );
        self.metrics.timer("health.check_duration_ms", elapsed, check_labels);
        Some(status)
    }

    /// Run every registered check once
    pub async fn run_all_checks(&self) -> Vec<CheckStatus> {
        let mut results = Vec::new();
        for (name, _) in self.check_schedule() {
            if let Some(status) = self.run_check(&name).await {
                results.push(status);
            }
        }
        results
    }

    /// Gather entity snapshots, record them as gauges and evaluate alerts
    pub async fn evaluate(&self) -> Vec<AlertEvent> {
        let sources: Vec<_> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut snapshots = Vec::new();
        for source in sources {
            snapshots.extend(source.snapshots().await);
        }
        snapshots.sort_by(|a, b| a.entity.cmp(&b.entity));

        let mut events = Vec::new();
        for snapshot in &snapshots {
            for (metric, value) in &snapshot.metrics {
                self.metrics
                    .gauge(metric, *value, labels(&[("entity", &snapshot.entity)]));
            }
            events.extend(self.alerts.evaluate(snapshot));
        }

        *self.entities.lock().unwrap_or_else(PoisonError::into_inner) = snapshots;
        events
    }

    /// Run every check and evaluate alerts once
    pub async fn refresh(&self) -> Vec<AlertEvent> {
        self.run_all_checks().await;
        self.evaluate().await
    }

    /// Current view from the latest check results and snapshots
    pub fn get_system_health(&self) -> SystemHealth {
        let checks: Vec<CheckStatus> = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let entities = self
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        SystemHealth {
            status: overall_status(&checks, &entities),
            monitoring_enabled: self.config.enabled,
            breakers: self.coordinator.breaker_snapshots(),
            checks,
            entities,
            active_alerts: self.alerts.active_alerts(),
            checked_at: self.clock.now(),
        }
    }
}
