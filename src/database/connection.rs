//! Pooled SQLite connection with per-connection metrics

use async_trait::async_trait;
use bulwark_core_resilience::{ConnectionFactory, ResilienceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow,
};
use sqlx::{Column, ConnectOptions, Connection, Row, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{BulwarkError, DatabaseFailure, Result};

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One statement of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// What a statement produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Rows of a query, one JSON object per row
    Rows(Vec<Map<String, Value>>),
    /// Rows changed by a write
    Affected(u64),
}

impl QueryOutcome {
    pub fn rows(&self) -> &[Map<String, Value>] {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Affected(_) => &[],
        }
    }

    pub fn affected(&self) -> u64 {
        match self {
            QueryOutcome::Rows(_) => 0,
            QueryOutcome::Affected(n) => *n,
        }
    }
}

/// Usage counters for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub queries: u64,
    pub failed_queries: u64,
    pub total_query_time: Duration,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    fn new() -> Self {
        Self {
            queries: 0,
            failed_queries: 0,
            total_query_time: Duration::ZERO,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    pub fn average_query_time(&self) -> Duration {
        if self.queries == 0 {
            return Duration::ZERO;
        }
        self.total_query_time / u32::try_from(self.queries).unwrap_or(u32::MAX)
    }
}

/// A single SQLite connection owned by the pool
#[derive(Debug)]
pub struct DatabaseConnection {
    id: u64,
    conn: SqliteConnection,
    metrics: ConnectionMetrics,
}

impl DatabaseConnection {
    pub async fn open(id: u64, options: &SqliteConnectOptions) -> Result<Self> {
        let conn = options.connect().await.map_err(|e| {
            BulwarkError::Database(DatabaseFailure::Connect(e.to_string()))
        })?;
        debug!(id, "Database connection opened");
        Ok(Self {
            id,
            conn,
            metrics: ConnectionMetrics::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Liveness probe
    pub async fn ping(&mut self) -> bool {
        self.conn.ping().await.is_ok()
    }

    /// Run one statement
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryOutcome> {
        let started = Instant::now();
        let result = run_statement(&mut self.conn, sql, params).await;
        self.observe(started, result.is_ok());
        result.map_err(query_failure)
    }

    /// Run statements in one transaction; any failure rolls back all of them
    pub async fn execute_transaction(&mut self, statements: &[Statement]) -> Result<Vec<QueryOutcome>> {
        let started = Instant::now();
        let result = async {
            let mut tx = self.conn.begin().await?;
            let mut outcomes = Vec::with_capacity(statements.len());
            for statement in statements {
                outcomes.push(run_statement(&mut *tx, &statement.sql, &statement.params).await?);
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(outcomes)
        }
        .await;
        self.observe(started, result.is_ok());
        result.map_err(query_failure)
    }

    pub async fn close(self) {
        let id = self.id;
        if let Err(e) = self.conn.close().await {
            debug!(id, "Error closing connection: {}", e);
        }
    }

    fn observe(&mut self, started: Instant, ok: bool) {
        self.metrics.queries += 1;
        if !ok {
            self.metrics.failed_queries += 1;
        }
        self.metrics.total_query_time += started.elapsed();
        self.metrics.last_used = Some(Utc::now());
    }
}

fn query_failure(err: sqlx::Error) -> BulwarkError {
    BulwarkError::Database(DatabaseFailure::Query(err.to_string()))
}

/// Whether a statement produces rows rather than an affected count
fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    ["SELECT", "WITH", "PRAGMA", "VALUES", "EXPLAIN"]
        .iter()
        .any(|kw| upper.starts_with(kw))
        || upper.contains(" RETURNING ")
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

async fn run_statement(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[Value],
) -> std::result::Result<QueryOutcome, sqlx::Error> {
    trace!(sql, params = params.len(), "Executing statement");
    let mut query = sqlx::query(sql);
    for value in params {
        query = bind_value(query, value);
    }

    if returns_rows(sql) {
        let rows = query.fetch_all(&mut *conn).await?;
        rows.iter()
            .map(row_to_json)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(QueryOutcome::Rows)
    } else {
        let result = query.execute(&mut *conn).await?;
        Ok(QueryOutcome::Affected(result.rows_affected()))
    }
}

fn row_to_json(row: &SqliteRow) -> std::result::Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" | "NUMERIC" => Value::from(row.try_get::<f64, _>(idx)?),
                "BLOB" => Value::from(hex::encode(row.try_get::<Vec<u8>, _>(idx)?)),
                _ => Value::from(row.try_get::<String, _>(idx)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

/// Opens [`DatabaseConnection`]s for the pool
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    options: SqliteConnectOptions,
}

impl SqliteConnectionFactory {
    /// Connections to the database file at `path`, created if missing
    pub fn new(path: &Path) -> Self {
        Self::from_options(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT),
        )
    }

    pub fn from_options(options: SqliteConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ConnectionFactory<DatabaseConnection> for SqliteConnectionFactory {
    async fn create(&self, id: u64) -> std::result::Result<DatabaseConnection, ResilienceError> {
        DatabaseConnection::open(id, &self.options)
            .await
            .map_err(|e| ResilienceError::ConnectionCreation(e.to_string()))
    }

    async fn is_healthy(&self, conn: &mut DatabaseConnection) -> bool {
        conn.ping().await
    }

    async fn close(&self, conn: DatabaseConnection) {
        conn.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    async fn memory_connection() -> DatabaseConnection {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        DatabaseConnection::open(1, &options).await.unwrap()
    }

    #[test]
    fn test_statement_kind_detection() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET a = 2"));
    }

    #[tokio::test]
    async fn test_execute_binds_json_params() {
        let mut conn = memory_connection().await;
        conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, tag TEXT)", &[])
            .await
            .unwrap();

        let inserted = conn
            .execute(
                "INSERT INTO items (name, price, tag) VALUES (?, ?, ?)",
                &[json!("widget"), json!(2.5), Value::Null],
            )
            .await
            .unwrap();
        assert_eq!(inserted.affected(), 1);

        let rows = conn
            .execute("SELECT id, name, price, tag FROM items WHERE name = ?", &[json!("widget")])
            .await
            .unwrap();
        assert_eq!(
            rows.rows(),
            &[json!({"id": 1, "name": "widget", "price": 2.5, "tag": null})
                .as_object()
                .unwrap()
                .clone()]
        );
        assert_eq!(conn.metrics().queries, 3);
        assert_eq!(conn.metrics().failed_queries, 0);
    }

    #[tokio::test]
    async fn test_failed_transaction_rolls_back() {
        let mut conn = memory_connection().await;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let result = conn
            .execute_transaction(&[
                Statement::new("INSERT INTO t (id) VALUES (?)").bind(1),
                Statement::new("INSERT INTO t (id) VALUES (?)").bind(1),
            ])
            .await;
        assert!(matches!(
            result,
            Err(BulwarkError::Database(DatabaseFailure::Query(_)))
        ));

        let rows = conn.execute("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows.rows()[0]["n"], json!(0));
        assert_eq!(conn.metrics().failed_queries, 1);
        assert!(conn.ping().await);
    }
}
