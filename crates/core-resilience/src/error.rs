//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in resilience operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker '{name}' is open, rejecting requests")]
    CircuitOpen { name: String },

    /// Every connection is checked out and the acquire timeout elapsed
    #[error("Connection pool exhausted: no connection available within {0:?}")]
    PoolExhausted(Duration),

    /// Hourly request budget for a principal is spent
    #[error("Rate limit exceeded for '{principal}': {limit} requests per hour")]
    RateLimitExceeded { principal: String, limit: u32 },

    /// Connection creation failed
    #[error("Failed to create connection: {0}")]
    ConnectionCreation(String),

    /// Connection failed its liveness probe
    #[error("Connection {0} is unhealthy")]
    UnhealthyConnection(u64),

    /// The pool has been shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Invalid primitive configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResilienceError {
    /// Check if this error should contribute to circuit breaker failure count
    ///
    /// Rejections produced by the primitives themselves never count, otherwise an
    /// open breaker would keep re-opening itself.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            ResilienceError::CircuitOpen { .. }
                | ResilienceError::RateLimitExceeded { .. }
                | ResilienceError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_tripping_classification() {
        let open = ResilienceError::CircuitOpen {
            name: "db".to_string(),
        };
        assert!(!open.should_trip_breaker());

        let limited = ResilienceError::RateLimitExceeded {
            principal: "agent-1".to_string(),
            limit: 10,
        };
        assert!(!limited.should_trip_breaker());

        assert!(ResilienceError::ConnectionCreation("refused".to_string()).should_trip_breaker());
        assert!(ResilienceError::PoolExhausted(Duration::from_secs(1)).should_trip_breaker());
    }

    #[test]
    fn test_display_names_resource() {
        let err = ResilienceError::CircuitOpen {
            name: "payments-api".to_string(),
        };
        assert!(err.to_string().contains("payments-api"));
    }
}
