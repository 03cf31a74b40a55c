/*!
 * Bulwark - access control and resilience for autonomous agents
 *
 * Lets many independent agent workers call shared, fallible resources
 * safely:
 * - Credential provisioning, authentication and session validation
 * - Per-principal hourly rate limits
 * - Circuit breakers and policy-driven retries around every operation
 * - Structured error records with pattern analysis
 * - A breaker-protected SQLite connection pool
 * - Health checks, quantized metrics and rule-based alerts
 */

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod resilience;
pub mod scheduler;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use auth::{AuthContext, Authenticator, NewCredential, Permission, Role};
pub use config::BulwarkConfig;
pub use error::{BulwarkError, ClassifiedError, ErrorCategory, ErrorSeverity, Result};
pub use pipeline::{OperationDescriptor, Pipeline};
pub use resilience::{ErrorHandlingCoordinator, OperationOptions};
pub use service::Bulwark;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
