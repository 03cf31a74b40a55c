//! Structured error records and pattern analysis

use bulwark_core_resilience::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{BulwarkError, ClassifiedError, ErrorCategory, ErrorSeverity, Result};
use crate::store::ErrorStore;

/// How many repeated messages `get_error_patterns` reports
const TOP_MESSAGES: usize = 10;

/// One failed attempt of a protected operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,
    pub operation: String,
    pub principal_id: Option<String>,
    pub client_id: Option<String>,
    pub message: String,
    /// Full error chain, outermost first
    pub stack: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub retry_count: u32,
    pub resolved: bool,
}

impl ErrorRecord {
    pub fn from_classified(
        err: &ClassifiedError,
        principal_id: Option<String>,
        client_id: Option<String>,
        stack: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            error_id: err.error_id.clone(),
            timestamp,
            severity: err.severity,
            category: err.category,
            operation: err.operation.clone(),
            principal_id,
            client_id,
            message: err.message.clone(),
            stack,
            context: err.context.clone(),
            retry_count: err.retry_count,
            resolved: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCount {
    pub message: String,
    pub count: usize,
}

/// Aggregated error counts over a trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPatterns {
    pub window_hours: u32,
    pub total_errors: usize,
    pub unresolved: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
    pub by_operation: BTreeMap<String, usize>,
    /// Most frequent messages, most frequent first
    pub top_messages: Vec<MessageCount>,
    pub errors_per_hour: f64,
}

impl ErrorPatterns {
    fn from_records(window_hours: u32, records: &[ErrorRecord]) -> Self {
        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut by_operation = BTreeMap::new();
        let mut messages: HashMap<&str, usize> = HashMap::new();
        let mut unresolved = 0;

        for record in records {
            *by_category.entry(record.category).or_insert(0) += 1;
            *by_severity.entry(record.severity).or_insert(0) += 1;
            *by_operation.entry(record.operation.clone()).or_insert(0) += 1;
            *messages.entry(record.message.as_str()).or_insert(0) += 1;
            if !record.resolved {
                unresolved += 1;
            }
        }

        let mut top_messages: Vec<MessageCount> = messages
            .into_iter()
            .map(|(message, count)| MessageCount {
                message: message.to_string(),
                count,
            })
            .collect();
        top_messages.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        top_messages.truncate(TOP_MESSAGES);

        Self {
            window_hours,
            total_errors: records.len(),
            unresolved,
            by_category,
            by_severity,
            by_operation,
            top_messages,
            errors_per_hour: records.len() as f64 / f64::from(window_hours.max(1)),
        }
    }
}

/// Logs and persists error records
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    store: Arc<dyn ErrorStore>,
    clock: Arc<dyn Clock>,
}

impl ErrorTracker {
    pub fn new(store: Arc<dyn ErrorStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Log a record and write it to the error log
    ///
    /// A ledger failure is logged and swallowed so that recording never masks
    /// the error being recorded.
    pub async fn record(&self, record: &ErrorRecord) {
        match record.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                error_id = %record.error_id,
                operation = %record.operation,
                category = %record.category,
                severity = %record.severity,
                retry_count = record.retry_count,
                principal = record.principal_id.as_deref().unwrap_or("-"),
                "{}",
                record.message
            ),
            ErrorSeverity::Medium => warn!(
                error_id = %record.error_id,
                operation = %record.operation,
                category = %record.category,
                retry_count = record.retry_count,
                principal = record.principal_id.as_deref().unwrap_or("-"),
                "{}",
                record.message
            ),
            ErrorSeverity::Low => info!(
                error_id = %record.error_id,
                operation = %record.operation,
                category = %record.category,
                retry_count = record.retry_count,
                "{}",
                record.message
            ),
        }

        if let Err(e) = self.store.insert_error(record).await {
            warn!(error_id = %record.error_id, "Failed to persist error record: {}", e);
        }
    }

    /// Error counts over the trailing `hours`
    pub async fn get_error_patterns(&self, hours: u32) -> Result<ErrorPatterns> {
        if hours == 0 {
            return Err(BulwarkError::Validation(
                "analysis window must be at least one hour".to_string(),
            ));
        }
        let since = self.clock.now() - Duration::hours(i64::from(hours));
        let records = self.store.errors_since(since).await?;
        Ok(ErrorPatterns::from_records(hours, &records))
    }

    /// Errors recorded over the trailing `window`
    pub async fn count_since(&self, window: Duration) -> Result<usize> {
        let since = self.clock.now() - window;
        Ok(self.store.errors_since(since).await?.len())
    }

    /// Mark a record resolved; returns whether it was unresolved
    pub async fn resolve_error(&self, error_id: &str) -> Result<bool> {
        let resolved = self.store.resolve_error(error_id).await?;
        if resolved {
            info!(error_id, "Error marked resolved");
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use bulwark_core_resilience::SystemClock;

    fn record(id: &str, operation: &str, category: ErrorCategory, message: &str) -> ErrorRecord {
        ErrorRecord {
            error_id: id.to_string(),
            timestamp: Utc::now(),
            severity: ErrorSeverity::Medium,
            category,
            operation: operation.to_string(),
            principal_id: None,
            client_id: None,
            message: message.to_string(),
            stack: None,
            context: Default::default(),
            retry_count: 0,
            resolved: false,
        }
    }

    #[test]
    fn test_patterns_rank_repeated_messages() {
        let records = vec![
            record("1", "sync", ErrorCategory::Network, "connection reset"),
            record("2", "sync", ErrorCategory::Network, "connection reset"),
            record("3", "load", ErrorCategory::Database, "locked"),
        ];
        let patterns = ErrorPatterns::from_records(2, &records);

        assert_eq!(patterns.total_errors, 3);
        assert_eq!(patterns.by_category[&ErrorCategory::Network], 2);
        assert_eq!(patterns.by_operation["load"], 1);
        assert_eq!(patterns.top_messages[0].message, "connection reset");
        assert_eq!(patterns.top_messages[0].count, 2);
        assert_eq!(patterns.errors_per_hour, 1.5);
    }

    #[tokio::test]
    async fn test_record_then_resolve() -> Result<()> {
        let store = Arc::new(SqliteStore::open_in_memory().await?);
        let tracker = ErrorTracker::new(store, Arc::new(SystemClock));

        tracker
            .record(&record("e1", "sync", ErrorCategory::Network, "timeout"))
            .await;

        let patterns = tracker.get_error_patterns(1).await?;
        assert_eq!(patterns.total_errors, 1);
        assert_eq!(patterns.unresolved, 1);

        assert!(tracker.resolve_error("e1").await?);
        assert_eq!(tracker.get_error_patterns(1).await?.unresolved, 0);
        assert!(tracker.get_error_patterns(0).await.is_err());
        Ok(())
    }
}
