//! Error classification
//!
//! Typed errors anywhere in the chain win over message heuristics. An error
//! that was already classified keeps its classification.

use bulwark_core_resilience::ResilienceError;
use std::io;

use crate::error::{
    is_io_network, resilience_category, AuthFailure, BulwarkError, ClassifiedError,
    DatabaseFailure, ErrorCategory, ErrorSeverity,
};

/// Result of classifying an arbitrary error
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub retryable: bool,
    pub auth_failure: Option<AuthFailure>,
    /// Refused by an open circuit breaker before reaching the resource
    pub breaker_rejection: bool,
    /// Context carried by an earlier classification
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Classification {
    fn new(category: ErrorCategory, severity: ErrorSeverity, message: String) -> Self {
        Self {
            category,
            severity,
            message,
            retryable: category.is_retryable(),
            auth_failure: None,
            breaker_rejection: false,
            context: Default::default(),
        }
    }

    fn rejected_by_breaker(mut self) -> Self {
        self.retryable = false;
        self.breaker_rejection = true;
        self
    }
}

const CRITICAL_MARKERS: &[&str] = &[
    "out of memory",
    "no space left",
    "disk full",
    "corrupt",
    "fatal",
];

const MESSAGE_MARKERS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Authentication,
        &[
            "unauthorized",
            "unauthenticated",
            "authentication",
            "forbidden",
            "permission denied",
            "access denied",
            "invalid token",
            "invalid credentials",
        ],
    ),
    (
        ErrorCategory::Database,
        &[
            "database",
            "sqlite",
            "sql",
            "deadlock",
            "constraint",
            "connection pool",
            "query",
        ],
    ),
    (
        ErrorCategory::Network,
        &[
            "connection refused",
            "connection reset",
            "connection aborted",
            "broken pipe",
            "timed out",
            "timeout",
            "network",
            "dns",
            "unreachable",
        ],
    ),
    (
        ErrorCategory::ExternalService,
        &[
            "rate limit",
            "too many requests",
            "429",
            "502",
            "503",
            "504",
            "bad gateway",
            "service unavailable",
            "upstream",
        ],
    ),
    (
        ErrorCategory::Resource,
        &[
            "out of memory",
            "no space left",
            "disk full",
            "too many open files",
            "exhausted",
            "quota",
        ],
    ),
    (
        ErrorCategory::Validation,
        &[
            "validation",
            "invalid",
            "malformed",
            "must be",
            "required",
            "missing field",
            "parse",
        ],
    ),
];

fn default_severity(category: ErrorCategory) -> ErrorSeverity {
    match category {
        ErrorCategory::Validation => ErrorSeverity::Low,
        ErrorCategory::Database | ErrorCategory::Resource => ErrorSeverity::High,
        ErrorCategory::Network
        | ErrorCategory::Authentication
        | ErrorCategory::BusinessLogic
        | ErrorCategory::ExternalService => ErrorSeverity::Medium,
    }
}

/// Infer a category from free text, if any marker matches
pub fn category_from_message(message: &str) -> Option<ErrorCategory> {
    let lower = message.to_lowercase();
    MESSAGE_MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map(|(category, _)| *category)
}

fn is_critical_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CRITICAL_MARKERS.iter().any(|m| lower.contains(m))
}

/// `fallback`, unless the message names a critical condition
fn escalate(message: &str, fallback: ErrorSeverity) -> ErrorSeverity {
    if is_critical_message(message) {
        ErrorSeverity::Critical
    } else {
        fallback
    }
}

fn from_bulwark(err: &BulwarkError, message: String) -> Classification {
    if let BulwarkError::Classified(inner) = err {
        return preserved(inner);
    }
    let mut classification = Classification::new(err.category(), err.severity(), message);
    classification.auth_failure = err.auth_failure();
    match err {
        BulwarkError::Database(DatabaseFailure::CircuitOpen(_))
        | BulwarkError::Resilience(ResilienceError::CircuitOpen { .. }) => {
            classification.rejected_by_breaker()
        }
        _ => classification,
    }
}

fn from_resilience(err: &ResilienceError, message: String) -> Classification {
    let severity = match err {
        ResilienceError::InvalidConfig(_) => ErrorSeverity::Critical,
        ResilienceError::CircuitOpen { .. } => ErrorSeverity::Medium,
        _ => ErrorSeverity::High,
    };
    let mut classification = Classification::new(resilience_category(err), severity, message);
    match err {
        ResilienceError::RateLimitExceeded { .. } => {
            classification.auth_failure = Some(AuthFailure::RateLimited);
            classification
        }
        ResilienceError::CircuitOpen { .. } => classification.rejected_by_breaker(),
        _ => classification,
    }
}

fn preserved(err: &ClassifiedError) -> Classification {
    Classification {
        category: err.category,
        severity: err.severity,
        message: err.message.clone(),
        retryable: err.retryable,
        auth_failure: err.auth_failure,
        breaker_rejection: false,
        context: err.context.clone(),
    }
}

/// Classify an operation error
pub fn classify(err: &anyhow::Error) -> Classification {
    let message = format!("{:#}", err);

    for cause in err.chain() {
        if let Some(classified) = cause.downcast_ref::<ClassifiedError>() {
            return preserved(classified);
        }
        if let Some(bulwark) = cause.downcast_ref::<BulwarkError>() {
            return from_bulwark(bulwark, message);
        }
        if let Some(resilience) = cause.downcast_ref::<ResilienceError>() {
            return from_resilience(resilience, message);
        }
        if cause.downcast_ref::<sqlx::Error>().is_some() {
            let severity = escalate(&message, ErrorSeverity::High);
            return Classification::new(ErrorCategory::Database, severity, message);
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            let category = if is_io_network(io_err) {
                ErrorCategory::Network
            } else {
                ErrorCategory::Resource
            };
            let severity = if io_err.kind() == io::ErrorKind::OutOfMemory {
                ErrorSeverity::Critical
            } else {
                escalate(&message, default_severity(category))
            };
            return Classification::new(category, severity, message);
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Classification::new(ErrorCategory::Network, ErrorSeverity::Medium, message);
        }
    }

    let category = category_from_message(&message).unwrap_or(ErrorCategory::BusinessLogic);
    let severity = escalate(&message, default_severity(category));
    Classification::new(category, severity, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_typed_errors_win_over_text() {
        let err = anyhow::Error::new(BulwarkError::Validation("network down".to_string()));
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Validation);
        assert!(!c.retryable);
    }

    #[test]
    fn test_typed_error_found_under_context() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "peer went away");
        let err = anyhow::Error::new(io_err).context("syncing ledger");
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(c.message.contains("syncing ledger"));
        assert!(c.retryable);
    }

    #[test]
    fn test_critical_io_error_is_not_retryable() {
        let io_err = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let c = classify(&anyhow::Error::new(io_err).context("writing ledger"));
        assert_eq!(c.category, ErrorCategory::Resource);
        assert_eq!(c.severity, ErrorSeverity::Critical);

        let oom = io::Error::from(io::ErrorKind::OutOfMemory);
        assert_eq!(classify(&anyhow::Error::new(oom)).severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_existing_classification_is_preserved() {
        let mut context = serde_json::Map::new();
        context.insert("shard".to_string(), serde_json::json!(3));
        let original = ClassifiedError {
            error_id: "e1".to_string(),
            category: ErrorCategory::ExternalService,
            severity: ErrorSeverity::High,
            operation: "charge".to_string(),
            message: "gateway said no".to_string(),
            context,
            retry_count: 1,
            retryable: true,
            auth_failure: None,
        };
        let c = classify(&anyhow::Error::new(original));
        assert_eq!(c.category, ErrorCategory::ExternalService);
        assert_eq!(c.severity, ErrorSeverity::High);
        assert_eq!(c.message, "gateway said no");
        assert_eq!(c.context["shard"], serde_json::json!(3));
    }

    #[test]
    fn test_message_heuristics() {
        let cases = [
            ("upstream returned 503", ErrorCategory::ExternalService),
            ("connection refused by host", ErrorCategory::Network),
            ("database is locked", ErrorCategory::Database),
            ("field 'email' is required", ErrorCategory::Validation),
            ("invalid token presented", ErrorCategory::Authentication),
            ("order already shipped", ErrorCategory::BusinessLogic),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&anyhow!(message)).category, expected, "{}", message);
        }
    }

    #[test]
    fn test_critical_markers_escalate_severity() {
        let c = classify(&anyhow!("write failed: no space left on device"));
        assert_eq!(c.category, ErrorCategory::Resource);
        assert_eq!(c.severity, ErrorSeverity::Critical);
    }

    #[test]
    fn test_rate_limit_maps_to_authentication() {
        let err = anyhow::Error::new(ResilienceError::RateLimitExceeded {
            principal: "agent".to_string(),
            limit: 2,
        });
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Authentication);
        assert_eq!(c.auth_failure, Some(AuthFailure::RateLimited));
    }

    #[test]
    fn test_open_breaker_is_not_retried() {
        let err = anyhow::Error::new(BulwarkError::Database(DatabaseFailure::CircuitOpen(
            "database".to_string(),
        )));
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Database);
        assert!(c.breaker_rejection);
        assert!(!c.retryable);
    }
}
