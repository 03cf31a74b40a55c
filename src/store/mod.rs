//! Durable ledger
//!
//! The in-memory components (rate limiter, session cache, breakers) make the
//! real-time decisions; the store keeps the durable copy for audit and
//! analysis. Every method is a single-row statement or a read, so concurrent
//! writers from different components never share a transaction.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use bulwark_core_resilience::CounterSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::{Credential, Session};
use crate::error::Result;
use crate::monitor::Metric;
use crate::resilience::ErrorRecord;

/// Audited authentication actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateCredential,
    RevokeCredential,
    Authenticate,
    ValidateSession,
    RevokeSession,
    RevokeAllSessions,
}

impl AuditAction {
    pub const ALL: [AuditAction; 6] = [
        AuditAction::CreateCredential,
        AuditAction::RevokeCredential,
        AuditAction::Authenticate,
        AuditAction::ValidateSession,
        AuditAction::RevokeSession,
        AuditAction::RevokeAllSessions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateCredential => "create_credential",
            AuditAction::RevokeCredential => "revoke_credential",
            AuditAction::Authenticate => "authenticate",
            AuditAction::ValidateSession => "validate_session",
            AuditAction::RevokeSession => "revoke_session",
            AuditAction::RevokeAllSessions => "revoke_all_sessions",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        AuditAction::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit log row
///
/// `error` holds the precise failure reason, which callers never see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub principal_id: Option<String>,
    pub action: AuditAction,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Insert a new credential; fails with a validation error on a duplicate id
    async fn insert_credential(&self, credential: &Credential) -> Result<()>;

    async fn credential(&self, principal_id: &str) -> Result<Option<Credential>>;

    async fn credential_by_hash(&self, secret_hash: &str) -> Result<Option<Credential>>;

    async fn list_credentials(&self) -> Result<Vec<Credential>>;

    /// Set the active flag; returns whether the credential exists
    async fn set_credential_active(&self, principal_id: &str, active: bool) -> Result<bool>;

    async fn touch_credential(&self, principal_id: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// Session row without permissions; the caller re-derives them
    async fn session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Returns whether an active session was deactivated
    async fn deactivate_session(&self, session_id: &str) -> Result<bool>;

    /// Returns how many active sessions were deactivated
    async fn deactivate_sessions_for(&self, principal_id: &str) -> Result<u64>;

    async fn count_active_sessions(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AuditStore: Send + Sync + fmt::Debug {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    async fn audit_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
pub trait ErrorStore: Send + Sync + fmt::Debug {
    async fn insert_error(&self, record: &ErrorRecord) -> Result<()>;

    async fn errors_since(&self, since: DateTime<Utc>) -> Result<Vec<ErrorRecord>>;

    /// Returns whether an unresolved record was marked resolved
    async fn resolve_error(&self, error_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait RateCounterStore: Send + Sync + fmt::Debug {
    /// Write one counter, keeping the larger count on conflict
    async fn upsert_counter(&self, counter: &CounterSnapshot) -> Result<()>;

    async fn counters_for_bucket(&self, hour_bucket: i64) -> Result<Vec<CounterSnapshot>>;

    /// Delete counters older than `hour_bucket`
    async fn prune_counters(&self, before_bucket: i64) -> Result<u64>;
}

#[async_trait]
pub trait MetricStore: Send + Sync + fmt::Debug {
    async fn insert_metric(&self, metric: &Metric) -> Result<()>;

    async fn metrics_since(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<Metric>>;
}

/// Everything the service persists
#[async_trait]
pub trait Store:
    CredentialStore + SessionStore + AuditStore + ErrorStore + RateCounterStore + MetricStore
{
    /// Cheap round trip used by health checks
    async fn ping(&self) -> Result<()>;
}
