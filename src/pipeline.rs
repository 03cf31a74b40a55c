//! Authenticated, permission-checked, resilient operation execution
//!
//! A [`Pipeline`] runs collaborator operations described by an
//! [`OperationDescriptor`]: validate the session, check the required
//! permission, then hand the operation to the coordinator under the
//! descriptor's breaker and retry policy.

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::auth::{AuthContext, Authenticator, Permission};
use crate::error::{BulwarkError, Result};
use crate::resilience::{ErrorHandlingCoordinator, OperationOptions};

/// Static description of a protected operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: String,
    pub permission: Option<Permission>,
    pub breaker: Option<String>,
    pub retry_policy: Option<String>,
}

impl OperationDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permission: None,
            breaker: None,
            retry_policy: None,
        }
    }

    pub fn require(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn with_breaker(mut self, breaker: impl Into<String>) -> Self {
        self.breaker = Some(breaker.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: impl Into<String>) -> Self {
        self.retry_policy = Some(policy.into());
        self
    }

    fn options(&self, ctx: &AuthContext) -> OperationOptions {
        let mut options = OperationOptions::new()
            .principal(ctx.principal_id.clone())
            .context("session_id", ctx.session_id.clone().into());
        if let Some(breaker) = &self.breaker {
            options = options.breaker(breaker.clone());
        }
        if let Some(policy) = &self.retry_policy {
            options = options.retry_policy(policy.clone());
        }
        options
    }
}

/// Interceptor chain shared by every protected operation
#[derive(Debug, Clone)]
pub struct Pipeline {
    authenticator: Arc<Authenticator>,
    coordinator: Arc<ErrorHandlingCoordinator>,
}

impl Pipeline {
    pub fn new(authenticator: Arc<Authenticator>, coordinator: Arc<ErrorHandlingCoordinator>) -> Self {
        Self {
            authenticator,
            coordinator,
        }
    }

    /// Run `op` on behalf of the session
    ///
    /// Session and permission failures surface as authentication errors
    /// without invoking `op`. Operation failures come back as
    /// [`BulwarkError::Classified`].
    pub async fn run<T, F, Fut>(
        &self,
        session_id: &str,
        descriptor: &OperationDescriptor,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(AuthContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let ctx = self.authenticator.validate_session(session_id).await?;
        if let Some(permission) = descriptor.permission {
            self.authenticator.require_permission(&ctx, permission).await?;
        }

        debug!(
            operation = %descriptor.name,
            principal = %ctx.principal_id,
            "Running protected operation"
        );
        let options = descriptor.options(&ctx);
        self.coordinator
            .execute(&descriptor.name, &options, || op(ctx.clone()))
            .await
            .map_err(BulwarkError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewCredential, Role};
    use crate::config::{AuthConfig, ErrorsConfig};
    use crate::error::{AuthFailure, ErrorCategory};
    use crate::resilience::ErrorTracker;
    use crate::store::SqliteStore;
    use anyhow::anyhow;
    use bulwark_core_resilience::SystemClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn pipeline() -> (Pipeline, Arc<Authenticator>) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let clock = Arc::new(SystemClock);
        let authenticator = Arc::new(Authenticator::new(
            store.clone(),
            clock.clone(),
            AuthConfig::default(),
        ));
        let coordinator = Arc::new(ErrorHandlingCoordinator::new(
            ErrorTracker::new(store, clock),
            ErrorsConfig::default(),
        ));
        (Pipeline::new(authenticator.clone(), coordinator), authenticator)
    }

    async fn session(authenticator: &Authenticator, role: Role) -> String {
        let secret = authenticator
            .create_credential(NewCredential::new("agent-7", role))
            .await
            .unwrap();
        authenticator
            .authenticate(&secret, None, None)
            .await
            .unwrap()
            .session_id
    }

    #[tokio::test]
    async fn test_runs_with_context() {
        let (pipeline, authenticator) = pipeline().await;
        let session_id = session(&authenticator, Role::System).await;

        let descriptor = OperationDescriptor::new("lookup")
            .require(Permission::ReadData)
            .with_breaker("crm");
        let principal = pipeline
            .run(&session_id, &descriptor, |ctx| async move {
                Ok::<_, anyhow::Error>(ctx.principal_id)
            })
            .await
            .unwrap();
        assert_eq!(principal, "agent-7");
    }

    #[tokio::test]
    async fn test_missing_permission_skips_operation() {
        let (pipeline, authenticator) = pipeline().await;
        let session_id = session(&authenticator, Role::ReadOnly).await;
        let calls = AtomicU32::new(0);

        let descriptor = OperationDescriptor::new("delete").require(Permission::AdminSystem);
        let err = pipeline
            .run(&session_id, &descriptor, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), anyhow::Error>(()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.auth_failure(), Some(AuthFailure::PermissionDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_refused() {
        let (pipeline, _) = pipeline().await;
        let err = pipeline
            .run("no-such-session", &OperationDescriptor::new("x"), |_| async {
                Ok::<(), anyhow::Error>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.auth_failure(), Some(AuthFailure::SessionNotFound));
    }

    #[tokio::test]
    async fn test_operation_failure_is_classified() {
        let (pipeline, authenticator) = pipeline().await;
        let session_id = session(&authenticator, Role::System).await;

        let descriptor = OperationDescriptor::new("charge").with_retry_policy("none");
        let err = pipeline
            .run(&session_id, &descriptor, |_| async {
                Err::<(), _>(anyhow!("invalid card number format"))
            })
            .await
            .unwrap_err();

        match err {
            BulwarkError::Classified(classified) => {
                assert_eq!(classified.category, ErrorCategory::Validation);
                assert_eq!(classified.context["session_id"], session_id.as_str());
            }
            other => panic!("expected classified error, got {other:?}"),
        }
    }
}
