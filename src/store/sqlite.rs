//! SQLite ledger
//!
//! WAL mode lets the health checker, the flush jobs and request handlers
//! write concurrently. Timestamps are stored as Unix milliseconds and sets
//! as JSON arrays.

use async_trait::async_trait;
use bulwark_core_resilience::CounterSnapshot;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    AuditAction, AuditEntry, AuditStore, CredentialStore, ErrorStore, MetricStore,
    RateCounterStore, SessionStore, Store,
};
use crate::auth::{Credential, Role, Session};
use crate::error::{BulwarkError, Result};
use crate::monitor::{Metric, MetricKind};
use crate::resilience::ErrorRecord;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS credentials (
        principal_id TEXT PRIMARY KEY,
        secret_hash TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        permissions TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER,
        last_used INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        rate_limit_per_hour INTEGER NOT NULL,
        allowed_ips TEXT
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        principal_id TEXT NOT NULL,
        client_ip TEXT,
        user_agent TEXT,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_principal ON sessions(principal_id)",
    "CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        principal_id TEXT,
        action TEXT NOT NULL,
        client_ip TEXT,
        user_agent TEXT,
        success INTEGER NOT NULL,
        error TEXT,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
    "CREATE TABLE IF NOT EXISTS error_log (
        error_id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        severity TEXT NOT NULL,
        category TEXT NOT NULL,
        operation TEXT NOT NULL,
        principal_id TEXT,
        client_id TEXT,
        message TEXT NOT NULL,
        stack TEXT,
        context TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        resolved INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_error_timestamp ON error_log(timestamp)",
    "CREATE TABLE IF NOT EXISTS rate_limit_counters (
        principal_id TEXT NOT NULL,
        hour_bucket INTEGER NOT NULL,
        count INTEGER NOT NULL,
        PRIMARY KEY (principal_id, hour_bucket)
    )",
    "CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        value REAL NOT NULL,
        timestamp INTEGER NOT NULL,
        labels TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_time ON metrics(name, timestamp)",
];

/// SQLite-backed [`Store`]
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create the ledger at `path` and apply the schema
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Opened ledger at {}", path.display());
        Ok(store)
    }

    /// Private in-memory ledger, mainly for tests
    ///
    /// Pinned to a single connection that never expires, since every new
    /// in-memory connection would see an empty database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Ledger schema ready");
        Ok(())
    }

    /// Get the underlying pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> BulwarkError {
    BulwarkError::Store(sqlx::Error::Decode(
        format!("invalid {} in ledger: {}", what, value).into(),
    ))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| corrupt("timestamp", ms))
}

fn from_opt_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| corrupt("json", e))
}

fn from_json<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| corrupt(what, e))
}

fn row_to_credential(row: &SqliteRow) -> Result<Credential> {
    let role: String = row.try_get("role")?;
    let permissions: String = row.try_get("permissions")?;
    let allowed_ips: Option<String> = row.try_get("allowed_ips")?;
    let rate_limit: i64 = row.try_get("rate_limit_per_hour")?;

    Ok(Credential {
        principal_id: row.try_get("principal_id")?,
        secret_hash: row.try_get("secret_hash")?,
        role: Role::from_str(&role).map_err(|_| corrupt("role", &role))?,
        permissions: from_json("permissions", &permissions)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_opt_millis(row.try_get("expires_at")?)?,
        last_used: from_opt_millis(row.try_get("last_used")?)?,
        active: row.try_get("active")?,
        rate_limit_per_hour: u32::try_from(rate_limit)
            .map_err(|_| corrupt("rate limit", rate_limit))?,
        allowed_ips: allowed_ips
            .map(|raw| from_json("allowed_ips", &raw))
            .transpose()?,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let active: bool = row.try_get("active")?;
    Ok(Session {
        session_id: row.try_get("session_id")?,
        principal_id: row.try_get("principal_id")?,
        permissions: Default::default(),
        client_ip: row.try_get("client_ip")?,
        user_agent: row.try_get("user_agent")?,
        issued_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        revoked: !active,
    })
}

fn row_to_audit(row: &SqliteRow) -> Result<AuditEntry> {
    let action: String = row.try_get("action")?;
    Ok(AuditEntry {
        principal_id: row.try_get("principal_id")?,
        action: AuditAction::parse(&action).ok_or_else(|| corrupt("audit action", &action))?,
        client_ip: row.try_get("client_ip")?,
        user_agent: row.try_get("user_agent")?,
        success: row.try_get("success")?,
        error: row.try_get("error")?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
    })
}

fn row_to_error(row: &SqliteRow) -> Result<ErrorRecord> {
    let severity: String = row.try_get("severity")?;
    let category: String = row.try_get("category")?;
    let context: String = row.try_get("context")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(ErrorRecord {
        error_id: row.try_get("error_id")?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
        severity: severity.parse().map_err(|_| corrupt("severity", &severity))?,
        category: category.parse().map_err(|_| corrupt("category", &category))?,
        operation: row.try_get("operation")?,
        principal_id: row.try_get("principal_id")?,
        client_id: row.try_get("client_id")?,
        message: row.try_get("message")?,
        stack: row.try_get("stack")?,
        context: from_json("context", &context)?,
        retry_count: u32::try_from(retry_count).map_err(|_| corrupt("retry count", retry_count))?,
        resolved: row.try_get("resolved")?,
    })
}

fn row_to_metric(row: &SqliteRow) -> Result<Metric> {
    let kind: String = row.try_get("kind")?;
    let labels: String = row.try_get("labels")?;
    Ok(Metric {
        name: row.try_get("name")?,
        kind: kind.parse::<MetricKind>().map_err(|_| corrupt("metric kind", &kind))?,
        value: row.try_get("value")?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
        labels: from_json::<BTreeMap<String, String>>("labels", &labels)?,
    })
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<()> {
        let allowed_ips = credential.allowed_ips.as_ref().map(to_json).transpose()?;

        let result = sqlx::query(
            "INSERT INTO credentials
             (principal_id, secret_hash, role, permissions, created_at, expires_at,
              last_used, active, rate_limit_per_hour, allowed_ips)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.principal_id)
        .bind(&credential.secret_hash)
        .bind(credential.role.as_str())
        .bind(to_json(&credential.permissions)?)
        .bind(to_millis(credential.created_at))
        .bind(credential.expires_at.map(to_millis))
        .bind(credential.last_used.map(to_millis))
        .bind(credential.active)
        .bind(i64::from(credential.rate_limit_per_hour))
        .bind(allowed_ips)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                BulwarkError::Validation(format!(
                    "principal '{}' already exists",
                    credential.principal_id
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn credential(&self, principal_id: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE principal_id = ?")
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_credential).transpose()
    }

    async fn credential_by_hash(&self, secret_hash: &str) -> Result<Option<Credential>> {
        let row = sqlx::query("SELECT * FROM credentials WHERE secret_hash = ?")
            .bind(secret_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_credential).transpose()
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>> {
        let rows = sqlx::query("SELECT * FROM credentials ORDER BY created_at ASC, principal_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_credential).collect()
    }

    async fn set_credential_active(&self, principal_id: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE credentials SET active = ? WHERE principal_id = ?")
            .bind(active)
            .bind(principal_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_credential(&self, principal_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE credentials SET last_used = ? WHERE principal_id = ?")
            .bind(to_millis(at))
            .bind(principal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions
             (session_id, principal_id, client_ip, user_agent, created_at, expires_at, active)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.session_id)
        .bind(&session.principal_id)
        .bind(&session.client_ip)
        .bind(&session.user_agent)
        .bind(to_millis(session.issued_at))
        .bind(to_millis(session.expires_at))
        .bind(!session.revoked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn deactivate_session(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET active = 0 WHERE session_id = ? AND active = 1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_sessions_for(&self, principal_id: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE sessions SET active = 0 WHERE principal_id = ? AND active = 1")
                .bind(principal_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn count_active_sessions(&self, now: DateTime<Utc>) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE active = 1 AND expires_at > ?")
                .bind(to_millis(now))
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log
             (principal_id, action, client_ip, user_agent, success, error, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.principal_id)
        .bind(entry.action.as_str())
        .bind(&entry.client_ip)
        .bind(&entry.user_agent)
        .bind(entry.success)
        .bind(&entry.error)
        .bind(to_millis(entry.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE timestamp >= ? ORDER BY id ASC")
            .bind(to_millis(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_audit).collect()
    }
}

#[async_trait]
impl ErrorStore for SqliteStore {
    async fn insert_error(&self, record: &ErrorRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_log
             (error_id, timestamp, severity, category, operation, principal_id, client_id,
              message, stack, context, retry_count, resolved)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.error_id)
        .bind(to_millis(record.timestamp))
        .bind(record.severity.as_str())
        .bind(record.category.as_str())
        .bind(&record.operation)
        .bind(&record.principal_id)
        .bind(&record.client_id)
        .bind(&record.message)
        .bind(&record.stack)
        .bind(to_json(&record.context)?)
        .bind(i64::from(record.retry_count))
        .bind(record.resolved)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn errors_since(&self, since: DateTime<Utc>) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query("SELECT * FROM error_log WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(to_millis(since))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_error).collect()
    }

    async fn resolve_error(&self, error_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE error_log SET resolved = 1 WHERE error_id = ? AND resolved = 0")
                .bind(error_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RateCounterStore for SqliteStore {
    async fn upsert_counter(&self, counter: &CounterSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO rate_limit_counters (principal_id, hour_bucket, count) VALUES (?, ?, ?)
             ON CONFLICT (principal_id, hour_bucket)
             DO UPDATE SET count = MAX(count, excluded.count)",
        )
        .bind(&counter.principal)
        .bind(counter.hour_bucket)
        .bind(i64::from(counter.count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counters_for_bucket(&self, hour_bucket: i64) -> Result<Vec<CounterSnapshot>> {
        let rows = sqlx::query(
            "SELECT principal_id, hour_bucket, count FROM rate_limit_counters
             WHERE hour_bucket = ? ORDER BY principal_id ASC",
        )
        .bind(hour_bucket)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get("count")?;
                Ok(CounterSnapshot {
                    principal: row.try_get("principal_id")?,
                    hour_bucket: row.try_get("hour_bucket")?,
                    count: u32::try_from(count).map_err(|_| corrupt("counter", count))?,
                })
            })
            .collect()
    }

    async fn prune_counters(&self, before_bucket: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE hour_bucket < ?")
            .bind(before_bucket)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn insert_metric(&self, metric: &Metric) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics (name, kind, value, timestamp, labels) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&metric.name)
        .bind(metric.kind.as_str())
        .bind(metric.value)
        .bind(to_millis(metric.timestamp))
        .bind(to_json(&metric.labels)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn metrics_since(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<Metric>> {
        let rows = sqlx::query(
            "SELECT * FROM metrics WHERE name = ? AND timestamp >= ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(name)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_metric).collect()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{hash_secret, Role};
    use crate::error::{ErrorCategory, ErrorSeverity};
    use chrono::Duration;

    fn credential(id: &str, secret: &str) -> Credential {
        Credential {
            principal_id: id.to_string(),
            secret_hash: hash_secret(secret),
            role: Role::Agent,
            permissions: Role::Agent.permissions(),
            created_at: Utc::now(),
            expires_at: None,
            last_used: None,
            active: true,
            rate_limit_per_hour: 100,
            allowed_ips: Some(["127.0.0.1".parse().unwrap()].into_iter().collect()),
        }
    }

    #[tokio::test]
    async fn test_credential_round_trip_and_duplicate() -> Result<()> {
        let store = SqliteStore::open_in_memory().await?;
        let cred = credential("agent-1", "secret");
        store.insert_credential(&cred).await?;

        let loaded = store.credential_by_hash(&hash_secret("secret")).await?.unwrap();
        assert_eq!(loaded.principal_id, "agent-1");
        assert_eq!(loaded.permissions, cred.permissions);
        assert_eq!(loaded.allowed_ips, cred.allowed_ips);

        let dup = store.insert_credential(&credential("agent-1", "other")).await;
        assert!(matches!(dup, Err(BulwarkError::Validation(_))));

        assert!(store.set_credential_active("agent-1", false).await?);
        assert!(!store.set_credential_active("missing", false).await?);
        assert!(!store.credential("agent-1").await?.unwrap().active);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_deactivation_is_counted_once() -> Result<()> {
        let store = SqliteStore::open_in_memory().await?;
        let now = Utc::now();
        for id in ["s1", "s2"] {
            store
                .insert_session(&Session {
                    session_id: id.to_string(),
                    principal_id: "agent-1".to_string(),
                    permissions: Default::default(),
                    client_ip: None,
                    user_agent: Some("test".to_string()),
                    issued_at: now,
                    expires_at: now + Duration::hours(1),
                    revoked: false,
                })
                .await?;
        }

        assert_eq!(store.count_active_sessions(now).await?, 2);
        assert!(store.deactivate_session("s1").await?);
        assert!(!store.deactivate_session("s1").await?);
        assert_eq!(store.deactivate_sessions_for("agent-1").await?, 1);
        assert!(store.session("s2").await?.unwrap().revoked);
        assert_eq!(store.count_active_sessions(now).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_rate_counter_upsert_keeps_max() -> Result<()> {
        let store = SqliteStore::open_in_memory().await?;
        let snap = |count| CounterSnapshot {
            principal: "agent-1".to_string(),
            hour_bucket: 10,
            count,
        };
        store.upsert_counter(&snap(5)).await?;
        store.upsert_counter(&snap(3)).await?;

        let counters = store.counters_for_bucket(10).await?;
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].count, 5);

        assert_eq!(store.prune_counters(11).await?, 1);
        assert!(store.counters_for_bucket(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_error_log_resolve() -> Result<()> {
        let store = SqliteStore::open_in_memory().await?;
        let mut context = serde_json::Map::new();
        context.insert("table".to_string(), serde_json::json!("users"));
        let record = ErrorRecord {
            error_id: "err-1".to_string(),
            timestamp: from_millis(to_millis(Utc::now()))?,
            severity: ErrorSeverity::High,
            category: ErrorCategory::Database,
            operation: "load_user".to_string(),
            principal_id: Some("agent-1".to_string()),
            client_id: None,
            message: "connection reset".to_string(),
            stack: None,
            context,
            retry_count: 2,
            resolved: false,
        };
        store.insert_error(&record).await?;

        let loaded = store.errors_since(Utc::now() - Duration::minutes(1)).await?;
        assert_eq!(loaded, vec![record]);
        assert!(store.resolve_error("err-1").await?);
        assert!(!store.resolve_error("err-1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_filtered_by_name() -> Result<()> {
        let store = SqliteStore::open_in_memory().await?;
        let now = Utc::now();
        for (name, value) in [("auth.attempts", 1.0), ("auth.attempts", 2.0), ("other", 9.0)] {
            store
                .insert_metric(&Metric {
                    name: name.to_string(),
                    kind: MetricKind::Counter,
                    value,
                    timestamp: now,
                    labels: BTreeMap::from([("principal".to_string(), "a".to_string())]),
                })
                .await?;
        }

        let metrics = store.metrics_since("auth.attempts", now - Duration::seconds(1)).await?;
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].value, 2.0);
        store.ping().await?;
        Ok(())
    }
}
