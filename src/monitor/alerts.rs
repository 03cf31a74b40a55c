//! Rule-based alerting over entity snapshots
//!
//! Each evaluation compares a rule's predicate against an entity's latest
//! snapshot. A predicate turning true raises an [`ActiveAlert`] unless the
//! same rule fired for the same entity within its cooldown; turning false
//! resolves it.

use bulwark_core_resilience::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::health::HealthStatus;
use crate::config::MonitoringConfig;
use crate::error::ErrorSeverity;

/// Metric names the default rules look at
pub mod metric_names {
    pub const BREAKER_OPEN: &str = "breaker.open";
    pub const BREAKER_FAILURES: &str = "breaker.failure_count";
    pub const POOL_IN_USE: &str = "pool.in_use";
    pub const POOL_IDLE: &str = "pool.idle";
    pub const POOL_TOTAL: &str = "pool.total";
    pub const POOL_UTILIZATION: &str = "pool.utilization";
    pub const POOL_ACQUIRE_TIMEOUTS: &str = "pool.acquire_timeouts";
    pub const ERRORS_PER_HOUR: &str = "errors.per_hour";
    pub const AUTH_FAILURES_PER_HOUR: &str = "auth.failures_per_hour";
    pub const AUTH_ACTIVE_SESSIONS: &str = "auth.active_sessions";
}

/// Latest known state of one monitored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity name, prefixed by its kind (`breaker:`, `pool:`)
    pub entity: String,
    pub health: HealthStatus,
    pub metrics: BTreeMap<String, f64>,
}

impl EntitySnapshot {
    pub fn new(entity: impl Into<String>, health: HealthStatus) -> Self {
        Self {
            entity: entity.into(),
            health,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.entity
            .split_once(':')
            .is_some_and(|(prefix, _)| prefix == kind)
    }
}

type Predicate = Arc<dyn Fn(&EntitySnapshot) -> bool + Send + Sync>;

/// A named condition over entity snapshots
#[derive(Clone)]
pub struct AlertRule {
    pub name: String,
    pub severity: ErrorSeverity,
    pub message: String,
    pub cooldown: Duration,
    predicate: Predicate,
}

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        severity: ErrorSeverity,
        message: impl Into<String>,
        cooldown: Duration,
        predicate: impl Fn(&EntitySnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            severity,
            message: message.into(),
            cooldown,
            predicate: Arc::new(predicate),
        }
    }

    pub fn holds(&self, snapshot: &EntitySnapshot) -> bool {
        (self.predicate)(snapshot)
    }
}

impl fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// A rule currently holding for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub rule: String,
    pub entity: String,
    pub severity: ErrorSeverity,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Transition produced by one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Triggered(ActiveAlert),
    Resolved(ActiveAlert),
}

type AlertKey = (String, String);

#[derive(Debug, Default)]
struct AlertState {
    active: HashMap<AlertKey, ActiveAlert>,
    last_fired: HashMap<AlertKey, Instant>,
    suppressed: u64,
}

/// Evaluates a fixed rule list against entity snapshots
#[derive(Debug)]
pub struct AlertManager {
    rules: Vec<AlertRule>,
    state: Mutex<AlertState>,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    pub fn new(rules: Vec<AlertRule>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            state: Mutex::new(AlertState::default()),
            clock,
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Apply every rule to `snapshot`, returning the transitions
    pub fn evaluate(&self, snapshot: &EntitySnapshot) -> Vec<AlertEvent> {
        let now = Instant::now();
        let mut events = Vec::new();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        for rule in &self.rules {
            let key = (rule.name.clone(), snapshot.entity.clone());
            let holds = rule.holds(snapshot);
            let active = state.active.contains_key(&key);

            if holds && !active {
                let cooling = state
                    .last_fired
                    .get(&key)
                    .is_some_and(|fired| now.duration_since(*fired) < rule.cooldown);
                if cooling {
                    state.suppressed += 1;
                    debug!(rule = %rule.name, entity = %snapshot.entity, "Alert suppressed by cooldown");
                    continue;
                }

                let alert = ActiveAlert {
                    rule: rule.name.clone(),
                    entity: snapshot.entity.clone(),
                    severity: rule.severity,
                    message: rule.message.clone(),
                    triggered_at: self.clock.now(),
                };
                log_triggered(&alert);
                state.last_fired.insert(key.clone(), now);
                state.active.insert(key, alert.clone());
                events.push(AlertEvent::Triggered(alert));
            } else if !holds && active {
                if let Some(alert) = state.active.remove(&key) {
                    info!(rule = %alert.rule, entity = %alert.entity, "Alert resolved");
                    events.push(AlertEvent::Resolved(alert));
                }
            }
        }

        events
    }

    /// Alerts currently holding, ordered by entity then rule
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alerts: Vec<ActiveAlert> = state.active.values().cloned().collect();
        alerts.sort_by(|a, b| (&a.entity, &a.rule).cmp(&(&b.entity, &b.rule)));
        alerts
    }

    /// Triggers swallowed by cooldown since startup
    pub fn suppressed_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .suppressed
    }
}

fn log_triggered(alert: &ActiveAlert) {
    match alert.severity {
        ErrorSeverity::Critical | ErrorSeverity::High => error!(
            rule = %alert.rule,
            entity = %alert.entity,
            severity = %alert.severity,
            "Alert triggered: {}",
            alert.message
        ),
        ErrorSeverity::Medium | ErrorSeverity::Low => warn!(
            rule = %alert.rule,
            entity = %alert.entity,
            severity = %alert.severity,
            "Alert triggered: {}",
            alert.message
        ),
    }
}

/// Built-in rules for breakers, pools, error rate and authentication
pub fn default_rules(config: &MonitoringConfig) -> Vec<AlertRule> {
    use metric_names::*;

    let cooldown = Duration::from_secs(config.alert_cooldown_secs);
    let error_rate = config.error_rate_threshold;
    let auth_failures = config.auth_failure_threshold;

    vec![
        AlertRule::new(
            "circuit_breaker_open",
            ErrorSeverity::Critical,
            "Circuit breaker is open",
            cooldown,
            |s| s.is_kind("breaker") && s.metric(BREAKER_OPEN).unwrap_or(0.0) >= 1.0,
        ),
        AlertRule::new(
            "pool_unhealthy",
            ErrorSeverity::High,
            "Connection pool is unhealthy",
            cooldown,
            |s| s.is_kind("pool") && s.health >= HealthStatus::Unhealthy,
        ),
        AlertRule::new(
            "pool_degraded",
            ErrorSeverity::Medium,
            "Connection pool is degraded",
            cooldown,
            |s| s.is_kind("pool") && s.health == HealthStatus::Degraded,
        ),
        AlertRule::new(
            "error_rate_high",
            ErrorSeverity::High,
            "Error rate above threshold",
            cooldown,
            move |s| s.metric(ERRORS_PER_HOUR).is_some_and(|v| v > error_rate),
        ),
        AlertRule::new(
            "auth_failure_burst",
            ErrorSeverity::High,
            "Authentication failures above threshold",
            cooldown,
            move |s| {
                s.metric(AUTH_FAILURES_PER_HOUR)
                    .is_some_and(|v| v > auth_failures)
            },
        ),
    ]
}
