//! Error handling coordinator
//!
//! Single entry point for running a collaborator operation under a named
//! circuit breaker and retry policy. Every attempt records exactly one
//! breaker transition and every failed attempt writes one error record.

use bulwark_core_resilience::{
    CircuitBreaker, CircuitBreakerSnapshot, ResilienceError, RetryExecutor,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::classify::{classify, Classification};
use super::tracker::{ErrorRecord, ErrorTracker};
use crate::config::ErrorsConfig;
use crate::error::{ClassifiedError, ErrorCategory, ErrorSeverity};
use crate::monitor::{labels, MetricsCollector};

/// Per-call options for [`ErrorHandlingCoordinator::execute`]
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Breaker guarding the resource; `None` runs unguarded
    pub breaker: Option<String>,
    /// Named retry policy; `None` uses the default policy
    pub retry_policy: Option<String>,
    pub principal_id: Option<String>,
    pub client_id: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breaker(mut self, name: impl Into<String>) -> Self {
        self.breaker = Some(name.into());
        self
    }

    pub fn retry_policy(mut self, name: impl Into<String>) -> Self {
        self.retry_policy = Some(name.into());
        self
    }

    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// Wraps operations with classification, retry and breaker checks
#[derive(Debug)]
pub struct ErrorHandlingCoordinator {
    tracker: ErrorTracker,
    config: ErrorsConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    metrics: Option<MetricsCollector>,
}

impl ErrorHandlingCoordinator {
    pub fn new(tracker: ErrorTracker, config: ErrorsConfig) -> Self {
        Self {
            tracker,
            config,
            breakers: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    /// The breaker for `name`, created from configuration on first use
    pub fn breaker(&self, name: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating circuit breaker");
                CircuitBreaker::new(name, self.config.breaker_config(name))
            })
            .clone()
    }

    /// States of every breaker created so far, sorted by name
    pub fn breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<_> = breakers.values().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Force a breaker back to closed; returns whether it exists
    pub fn reset_breaker(&self, name: &str) -> bool {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        match breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                info!(breaker = name, "Circuit breaker reset");
                true
            }
            None => false,
        }
    }

    /// Run `op` under the options' breaker and retry policy
    ///
    /// The breaker is consulted before every attempt; a rejected attempt never
    /// invokes `op`. Failures come back as a [`ClassifiedError`] describing
    /// the last attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        options: &OperationOptions,
        mut op: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let executor = RetryExecutor::new(self.config.retry_policy(options.retry_policy.as_deref()));
        let breaker = options.breaker.as_deref().map(|name| self.breaker(name));

        executor
            .run(|attempt| {
                let admitted = match &breaker {
                    Some(b) => b.try_acquire(),
                    None => Ok(()),
                };
                let pending = admitted.map(|()| op());
                let breaker = breaker.clone();

                async move {
                    let fut = match pending {
                        Ok(fut) => fut,
                        Err(rejection) => {
                            return Err(self.rejected(operation, options, attempt, rejection).await)
                        }
                    };

                    let started = Instant::now();
                    let outcome = match &breaker {
                        Some(b) => b.scope(fut).await,
                        None => fut.await,
                    };
                    match outcome {
                        Ok(value) => {
                            if let Some(b) = &breaker {
                                b.record_success();
                            }
                            self.observe(operation, "success", started);
                            Ok(value)
                        }
                        Err(err) => {
                            let classification = classify(&err);
                            // A downstream breaker rejection never reached the resource
                            let guarded = breaker
                                .as_ref()
                                .filter(|_| !classification.breaker_rejection);
                            if let Some(b) = guarded {
                                if classification.category.trips_breaker() {
                                    b.record_failure();
                                } else {
                                    b.record_success();
                                }
                            }
                            self.observe(operation, "failure", started);
                            let stack = format!("{:?}", err);
                            Err(self
                                .failed(operation, options, attempt, classification, Some(stack))
                                .await)
                        }
                    }
                }
            })
            .await
    }

    async fn rejected(
        &self,
        operation: &str,
        options: &OperationOptions,
        attempt: u32,
        rejection: ResilienceError,
    ) -> ClassifiedError {
        let classification = Classification {
            category: ErrorCategory::Resource,
            severity: ErrorSeverity::Medium,
            message: rejection.to_string(),
            retryable: false,
            auth_failure: None,
            breaker_rejection: true,
            context: Default::default(),
        };
        if let Some(metrics) = &self.metrics {
            metrics.counter("operation.rejected", 1.0, labels(&[("operation", operation)]));
        }
        self.failed(operation, options, attempt, classification, None)
            .await
    }

    async fn failed(
        &self,
        operation: &str,
        options: &OperationOptions,
        attempt: u32,
        classification: Classification,
        stack: Option<String>,
    ) -> ClassifiedError {
        let mut context = options.context.clone();
        context.extend(classification.context);

        let err = ClassifiedError {
            error_id: Uuid::new_v4().to_string(),
            category: classification.category,
            severity: classification.severity,
            operation: operation.to_string(),
            message: classification.message,
            context,
            retry_count: attempt,
            retryable: classification.retryable,
            auth_failure: classification.auth_failure,
        };

        let record = ErrorRecord::from_classified(
            &err,
            options.principal_id.clone(),
            options.client_id.clone(),
            stack,
            self.tracker.clock().now(),
        );
        self.tracker.record(&record).await;

        if let Some(metrics) = &self.metrics {
            metrics.counter(
                "operation.errors",
                1.0,
                labels(&[("operation", operation), ("category", err.category.as_str())]),
            );
        }
        err
    }

    fn observe(&self, operation: &str, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.timer(
                "operation.duration_ms",
                started.elapsed(),
                labels(&[("operation", operation), ("outcome", outcome)]),
            );
        }
    }
}
