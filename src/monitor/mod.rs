//! Metrics, alerting and health monitoring

pub mod alerts;
pub mod checks;
pub mod health;
pub mod metrics;

pub use alerts::{default_rules, ActiveAlert, AlertEvent, AlertManager, AlertRule, EntitySnapshot};
pub use checks::{
    AuthSource, BreakerCheck, BreakerSource, DatabasePingCheck, ErrorRateSource, PoolHealthCheck,
    PoolSource, StoreCheck,
};
pub use health::{
    overall_status, CheckOutcome, CheckSettings, CheckStatus, EntitySource, HealthCheck,
    HealthMonitor, HealthStatus, SystemHealth,
};
pub use metrics::{labels, quantize, Labels, Metric, MetricKind, MetricSummary, MetricsCollector};
