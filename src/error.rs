/*!
 * Error types for Bulwark
 */

use bulwark_core_resilience::{ResilienceError, Retryable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BulwarkError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_AUTH: i32 = 3;

/// Why an authentication or authorization attempt was refused
///
/// Never shown to callers; it is recorded in the audit log and returned
/// inside [`BulwarkError::Authentication`], whose message is uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    UnknownCredential,
    Deactivated,
    Expired,
    IpNotAllowed,
    RateLimited,
    SessionNotFound,
    SessionExpired,
    SessionRevoked,
    PermissionDenied,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::UnknownCredential => "unknown_credential",
            AuthFailure::Deactivated => "deactivated",
            AuthFailure::Expired => "expired",
            AuthFailure::IpNotAllowed => "ip_not_allowed",
            AuthFailure::RateLimited => "rate_limited",
            AuthFailure::SessionNotFound => "session_not_found",
            AuthFailure::SessionExpired => "session_expired",
            AuthFailure::SessionRevoked => "session_revoked",
            AuthFailure::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinct ways a pooled database call can fail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseFailure {
    #[error("no connection available within {0:?}")]
    PoolExhausted(Duration),

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("could not open connection: {0}")]
    Connect(String),

    #[error("connection {id} invalidated: {reason}")]
    ConnectionInvalid { id: u64, reason: String },

    #[error("query failed: {0}")]
    Query(String),
}

impl From<ResilienceError> for DatabaseFailure {
    fn from(err: ResilienceError) -> Self {
        match err {
            ResilienceError::PoolExhausted(waited) => DatabaseFailure::PoolExhausted(waited),
            ResilienceError::CircuitOpen { name } => DatabaseFailure::CircuitOpen(name),
            ResilienceError::PoolClosed => DatabaseFailure::PoolClosed,
            ResilienceError::ConnectionCreation(msg) => DatabaseFailure::Connect(msg),
            ResilienceError::UnhealthyConnection(id) => DatabaseFailure::ConnectionInvalid {
                id,
                reason: "failed liveness probe".to_string(),
            },
            other => DatabaseFailure::Query(other.to_string()),
        }
    }
}

/// Main error type
#[derive(Debug, Error)]
pub enum BulwarkError {
    /// Caller supplied something unusable
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential or session refused; the reason is deliberately not displayed
    #[error("authentication failed")]
    Authentication(AuthFailure),

    /// Pooled database access failed
    #[error("Database error: {0}")]
    Database(#[from] DatabaseFailure),

    #[error("Network error: {0}")]
    Network(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    /// Exhausted or unavailable local resource
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Business logic error: {0}")]
    BusinessLogic(String),

    /// Durable store failure
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    /// Error re-raised by the error handling coordinator
    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

impl BulwarkError {
    /// Taxonomy category for classification and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            BulwarkError::Validation(_) | BulwarkError::Config(_) => ErrorCategory::Validation,
            BulwarkError::Authentication(_) => ErrorCategory::Authentication,
            BulwarkError::Database(_) | BulwarkError::Store(_) => ErrorCategory::Database,
            BulwarkError::Network(_) => ErrorCategory::Network,
            BulwarkError::ExternalService(_) => ErrorCategory::ExternalService,
            BulwarkError::Resource(_) => ErrorCategory::Resource,
            BulwarkError::BusinessLogic(_) => ErrorCategory::BusinessLogic,
            BulwarkError::Io(err) if is_io_network(err) => ErrorCategory::Network,
            BulwarkError::Io(_) => ErrorCategory::Resource,
            BulwarkError::Resilience(err) => resilience_category(err),
            BulwarkError::Classified(err) => err.category,
        }
    }

    /// Severity used for logging and retry decisions
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BulwarkError::Validation(_) => ErrorSeverity::Low,
            BulwarkError::Authentication(_) => ErrorSeverity::Medium,
            BulwarkError::Database(DatabaseFailure::PoolClosed) => ErrorSeverity::Critical,
            BulwarkError::Database(_) | BulwarkError::Store(_) => ErrorSeverity::High,
            BulwarkError::Network(_) | BulwarkError::ExternalService(_) => ErrorSeverity::Medium,
            BulwarkError::Resource(_) => ErrorSeverity::High,
            BulwarkError::BusinessLogic(_) => ErrorSeverity::Medium,
            BulwarkError::Config(_) => ErrorSeverity::Critical,
            BulwarkError::Io(_) => ErrorSeverity::Medium,
            BulwarkError::Resilience(ResilienceError::InvalidConfig(_)) => ErrorSeverity::Critical,
            BulwarkError::Resilience(_) => ErrorSeverity::High,
            BulwarkError::Classified(err) => err.severity,
        }
    }

    /// Authentication failure reason, if this is an authentication error
    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            BulwarkError::Authentication(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Authentication => EXIT_AUTH,
            _ if self.severity() == ErrorSeverity::Critical => EXIT_FATAL,
            _ => EXIT_FAILURE,
        }
    }
}

pub(crate) fn is_io_network(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        err.kind(),
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe | TimedOut
    )
}

pub(crate) fn resilience_category(err: &ResilienceError) -> ErrorCategory {
    match err {
        ResilienceError::PoolExhausted(_)
        | ResilienceError::PoolClosed
        | ResilienceError::ConnectionCreation(_)
        | ResilienceError::UnhealthyConnection(_) => ErrorCategory::Database,
        ResilienceError::RateLimitExceeded { .. } => ErrorCategory::Authentication,
        ResilienceError::CircuitOpen { .. } => ErrorCategory::Resource,
        ResilienceError::InvalidConfig(_) => ErrorCategory::Validation,
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Persistence and pooled connection failures
    Database,
    /// Transport-level failures
    Network,
    /// Bad input; never retried
    Validation,
    /// Refused credentials, sessions or permissions; never retried
    Authentication,
    /// Domain rule violations; never retried
    BusinessLogic,
    /// Third-party API failures
    ExternalService,
    /// Exhausted local resources
    Resource,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Database,
        ErrorCategory::Network,
        ErrorCategory::Validation,
        ErrorCategory::Authentication,
        ErrorCategory::BusinessLogic,
        ErrorCategory::ExternalService,
        ErrorCategory::Resource,
    ];

    /// Whether errors of this category may be retried at all
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Database
                | ErrorCategory::Network
                | ErrorCategory::ExternalService
                | ErrorCategory::Resource
        )
    }

    /// Whether errors of this category count against a circuit breaker
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Database | ErrorCategory::Network | ErrorCategory::ExternalService
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Database => "database",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::BusinessLogic => "business_logic",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::Resource => "resource",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BulwarkError::Validation(format!("unknown error category: {}", s)))
    }
}

/// Error severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub const ALL: [ErrorSeverity; 4] = [
        ErrorSeverity::Low,
        ErrorSeverity::Medium,
        ErrorSeverity::High,
        ErrorSeverity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorSeverity {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self> {
        ErrorSeverity::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BulwarkError::Validation(format!("unknown error severity: {}", s)))
    }
}

/// A failure that has been classified, logged and recorded
///
/// The coordinator re-raises this once retries are exhausted or the error is
/// not retryable. Re-classifying a `ClassifiedError` preserves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{operation} failed ({category}/{severity}): {message}")]
pub struct ClassifiedError {
    /// Id of the most recent error record written for this failure
    pub error_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub operation: String,
    pub message: String,
    /// Structured context supplied by the caller
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Zero-based index of the attempt that produced this error
    pub retry_count: u32,
    /// Category allows retrying; severity is checked separately
    pub retryable: bool,
    /// Precise refusal reason for authentication errors
    pub auth_failure: Option<AuthFailure>,
}

impl ClassifiedError {
    /// Whether another attempt is allowed for this error
    pub fn should_retry(&self) -> bool {
        self.retryable && self.severity != ErrorSeverity::Critical
    }
}

impl Retryable for ClassifiedError {
    fn is_retryable(&self) -> bool {
        self.should_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_message_is_uniform() {
        for reason in [
            AuthFailure::UnknownCredential,
            AuthFailure::IpNotAllowed,
            AuthFailure::RateLimited,
            AuthFailure::SessionExpired,
        ] {
            let err = BulwarkError::Authentication(reason);
            assert_eq!(err.to_string(), "authentication failed");
            assert_eq!(err.auth_failure(), Some(reason));
        }
    }

    #[test]
    fn test_category_retryability() {
        assert!(ErrorCategory::Database.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::ExternalService.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Authentication.is_retryable());
        assert!(!ErrorCategory::BusinessLogic.is_retryable());
    }

    #[test]
    fn test_database_failures_share_category() {
        let failures = [
            DatabaseFailure::PoolExhausted(Duration::from_secs(1)),
            DatabaseFailure::CircuitOpen("db".to_string()),
            DatabaseFailure::ConnectionInvalid {
                id: 4,
                reason: "closed".to_string(),
            },
        ];
        for failure in failures {
            assert_eq!(BulwarkError::from(failure).category(), ErrorCategory::Database);
        }
    }

    #[test]
    fn test_resilience_error_maps_to_database_failure() {
        let failure = DatabaseFailure::from(ResilienceError::PoolExhausted(Duration::from_secs(2)));
        assert_eq!(failure, DatabaseFailure::PoolExhausted(Duration::from_secs(2)));

        let failure = DatabaseFailure::from(ResilienceError::CircuitOpen {
            name: "primary".to_string(),
        });
        assert!(failure.to_string().contains("primary"));
    }

    #[test]
    fn test_critical_classified_error_is_not_retried() {
        let err = ClassifiedError {
            error_id: "e1".to_string(),
            category: ErrorCategory::Database,
            severity: ErrorSeverity::Critical,
            operation: "load".to_string(),
            message: "disk full".to_string(),
            context: Default::default(),
            retry_count: 0,
            retryable: true,
            auth_failure: None,
        };
        assert!(!err.should_retry());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_category_round_trip_through_str() {
        for category in ErrorCategory::ALL {
            assert_eq!(category.as_str().parse::<ErrorCategory>().unwrap(), category);
        }
        assert!("bogus".parse::<ErrorSeverity>().is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BulwarkError::Authentication(AuthFailure::Expired).exit_code(), EXIT_AUTH);
        assert_eq!(BulwarkError::Config("bad".to_string()).exit_code(), EXIT_FATAL);
        assert_eq!(BulwarkError::Network("reset".to_string()).exit_code(), EXIT_FAILURE);
    }
}
