/*!
 * Configuration types for Bulwark
 */

use bulwark_core_resilience::{CircuitBreakerConfig, PoolConfig, RetryPolicy, RetryStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BulwarkError, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "BULWARK_CONFIG";

/// Top-level configuration
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulwarkConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    /// Pooled database reached by agents
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Bulwark's own durable ledger (credentials, sessions, audit, errors, metrics)
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub errors: ErrorsConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credential and session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Lifetime of a session from issue
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Hourly budget used when a credential is created without one
    #[serde(default = "default_rate_limit_per_hour")]
    pub default_rate_limit_per_hour: u32,

    /// Shortest accepted principal id
    #[serde(default = "default_min_principal_len")]
    pub min_principal_len: usize,

    /// Prefix prepended to generated secrets
    #[serde(default = "default_secret_prefix")]
    pub secret_prefix: String,

    /// How often in-memory rate counters are written to the store
    #[serde(default = "default_rate_flush_interval_secs")]
    pub rate_flush_interval_secs: u64,

    /// How often expired sessions are purged from the cache
    #[serde(default = "default_session_purge_interval_secs")]
    pub session_purge_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            default_rate_limit_per_hour: default_rate_limit_per_hour(),
            min_principal_len: default_min_principal_len(),
            secret_prefix: default_secret_prefix(),
            rate_flush_interval_secs: default_rate_flush_interval_secs(),
            session_purge_interval_secs: default_session_purge_interval_secs(),
        }
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        i64::try_from(self.session_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::days(365 * 100))
    }
}

/// Connection pool settings for the agent-facing database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path (or `:memory:`)
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_min_connections")]
    pub min_connections: usize,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Zero disables idle retirement
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Zero disables age retirement
    #[serde(default = "default_max_connection_age_secs")]
    pub max_connection_age_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Name of the breaker shared by the pool
    #[serde(default = "default_database_breaker")]
    pub breaker: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_connection_age_secs: default_max_connection_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            breaker: default_database_breaker(),
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.min_connections,
            max_connections: self.max_connections,
            idle_timeout: non_zero_secs(self.idle_timeout_secs),
            max_connection_age: non_zero_secs(self.max_connection_age_secs),
            acquire_timeout: self.acquire_timeout(),
            test_on_checkout: true,
        }
    }
}

/// Durable ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_store_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_connections: default_store_connections(),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        CircuitBreakerConfig {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
        }
    }
}

/// Retry policy in configuration form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        RetryPolicy {
            strategy: settings.strategy,
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: settings.backoff_multiplier,
            jitter: settings.jitter,
        }
    }
}

/// Error handling settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorsConfig {
    /// Thresholds for breakers without an override
    #[serde(default)]
    pub default_breaker: BreakerSettings,

    /// Per-resource breaker overrides
    #[serde(default)]
    pub breakers: HashMap<String, BreakerSettings>,

    /// Policy for operations without a named policy
    #[serde(default)]
    pub default_retry: RetrySettings,

    /// Named retry policies referenced by operation descriptors
    #[serde(default)]
    pub retry_policies: HashMap<String, RetrySettings>,
}

impl ErrorsConfig {
    pub fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        self.breakers
            .get(name)
            .unwrap_or(&self.default_breaker)
            .into()
    }

    /// Named policy, or the default when the name is unknown
    pub fn retry_policy(&self, name: Option<&str>) -> RetryPolicy {
        name.and_then(|n| self.retry_policies.get(n))
            .unwrap_or(&self.default_retry)
            .into()
    }
}

/// Health checks, metrics and alerting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    /// Extra attempts a failing check gets before it counts as failed
    #[serde(default = "default_health_check_retries")]
    pub health_check_retries: u32,

    #[serde(default = "default_metrics_flush_interval_secs")]
    pub metrics_flush_interval_secs: u64,

    /// Buffered metrics that trigger an early flush
    #[serde(default = "default_metrics_buffer_size")]
    pub metrics_buffer_size: usize,

    /// Decimal places kept when recording metric values
    #[serde(default = "default_metric_precision")]
    pub metric_precision: u32,

    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,

    /// Errors per hour above which the error-rate alert fires
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Failed authentications per hour above which the burst alert fires
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            health_check_retries: default_health_check_retries(),
            metrics_flush_interval_secs: default_metrics_flush_interval_secs(),
            metrics_buffer_size: default_metrics_buffer_size(),
            metric_precision: default_metric_precision(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            error_rate_threshold: default_error_rate_threshold(),
            auth_failure_threshold: default_auth_failure_threshold(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_rate_limit_per_hour() -> u32 {
    1000
}

fn default_min_principal_len() -> usize {
    3
}

fn default_secret_prefix() -> String {
    "bwk_".to_string()
}

fn default_rate_flush_interval_secs() -> u64 {
    60
}

fn default_session_purge_interval_secs() -> u64 {
    300
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bulwark-data.db")
}

fn default_min_connections() -> usize {
    2
}

fn default_max_connections() -> usize {
    10
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_max_connection_age_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_database_breaker() -> String {
    "database".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("bulwark.db")
}

fn default_store_connections() -> u32 {
    5
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_health_check_timeout_secs() -> u64 {
    10
}

fn default_health_check_retries() -> u32 {
    1
}

fn default_metrics_flush_interval_secs() -> u64 {
    60
}

fn default_metrics_buffer_size() -> usize {
    1000
}

fn default_metric_precision() -> u32 {
    4
}

fn default_alert_cooldown_secs() -> u64 {
    300
}

fn default_error_rate_threshold() -> f64 {
    100.0
}

fn default_auth_failure_threshold() -> f64 {
    25.0
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl BulwarkConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BulwarkConfig = toml::from_str(&contents)
            .map_err(|e| BulwarkError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| BulwarkError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load from the file named by `BULWARK_CONFIG`, or fall back to defaults
    pub fn from_env_or_default() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.auth.session_ttl_secs == 0 {
            return Err(BulwarkError::Config("auth.session_ttl_secs must be positive".to_string()));
        }
        if self.auth.min_principal_len == 0 {
            return Err(BulwarkError::Config("auth.min_principal_len must be positive".to_string()));
        }

        self.database
            .pool_config()
            .validate()
            .map_err(|e| BulwarkError::Config(format!("database: {}", e)))?;

        let breakers = std::iter::once(("default", &self.errors.default_breaker))
            .chain(self.errors.breakers.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, settings) in breakers {
            CircuitBreakerConfig::from(settings)
                .validate()
                .map_err(|e| BulwarkError::Config(format!("breaker '{}': {}", name, e)))?;
        }

        let policies = std::iter::once(("default", &self.errors.default_retry))
            .chain(self.errors.retry_policies.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, settings) in policies {
            RetryPolicy::from(settings)
                .validate()
                .map_err(|e| BulwarkError::Config(format!("retry policy '{}': {}", name, e)))?;
        }

        if self.monitoring.metrics_buffer_size == 0 {
            return Err(BulwarkError::Config(
                "monitoring.metrics_buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = BulwarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.session_ttl_secs, 3600);
        assert_eq!(config.database.pool_config().max_connections, 10);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: BulwarkConfig = toml::from_str("").unwrap();
        assert_eq!(config, BulwarkConfig::default());
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: BulwarkConfig = toml::from_str(
            r#"
            [database]
            max_connections = 3

            [errors.breakers.payments]
            failure_threshold = 2

            [errors.retry_policies.fast]
            strategy = "fixed"
            base_delay_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.database.min_connections, 2);

        let payments = config.errors.breaker_config("payments");
        assert_eq!(payments.failure_threshold, 2);
        assert_eq!(payments.success_threshold, 3);
        assert_eq!(config.errors.breaker_config("other").failure_threshold, 5);

        let fast = config.errors.retry_policy(Some("fast"));
        assert_eq!(fast.strategy, RetryStrategy::Fixed);
        assert_eq!(fast.base_delay, Duration::from_millis(100));
        assert_eq!(config.errors.retry_policy(None).max_attempts, 3);
    }

    #[test]
    fn test_validation_rejects_inverted_pool_bounds() {
        let mut config = BulwarkConfig::default();
        config.database.min_connections = 20;
        assert!(matches!(config.validate(), Err(BulwarkError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_breaker_threshold() {
        let mut config = BulwarkConfig::default();
        config.errors.breakers.insert(
            "api".to_string(),
            BreakerSettings {
                failure_threshold: 0,
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut config = BulwarkConfig::default();
        config.auth.default_rate_limit_per_hour = 42;
        config.logging.level = LogLevel::Debug;

        config.to_file(file.path()).unwrap();
        let loaded = BulwarkConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_zero_timeouts_disable_retirement() {
        let database = DatabaseConfig {
            idle_timeout_secs: 0,
            max_connection_age_secs: 0,
            ..Default::default()
        };
        let pool = database.pool_config();
        assert!(pool.idle_timeout.is_none());
        assert!(pool.max_connection_age.is_none());
    }
}
