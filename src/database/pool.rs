//! Breaker-protected pool of SQLite connections
//!
//! Collaborators reach the agent database only through
//! [`DatabasePool::execute_query`] and [`DatabasePool::execute_transaction`].
//! Every failure is recorded against the shared breaker and surfaced as
//! [`BulwarkError::Database`].

use bulwark_core_resilience::{
    CircuitBreaker, CircuitBreakerSnapshot, ConnectionFactory, ConnectionPool, PoolConfig,
    PoolHealth, PoolStats, PooledConnection, ResilienceError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::connection::{DatabaseConnection, QueryOutcome, SqliteConnectionFactory, Statement};
use crate::config::DatabaseConfig;
use crate::error::{BulwarkError, DatabaseFailure, Result};

/// Query counters across every connection of the pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub queries: u64,
    pub failed_queries: u64,
    pub transactions: u64,
    pub failed_transactions: u64,
    pub total_query_time_ms: u64,
}

impl QueryStats {
    pub fn average_query_time_ms(&self) -> f64 {
        let total = self.queries + self.transactions;
        if total == 0 {
            return 0.0;
        }
        self.total_query_time_ms as f64 / total as f64
    }
}

/// Pool, query and breaker state in one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabasePoolStats {
    pub pool: PoolStats,
    pub queries: QueryStats,
    pub breaker: CircuitBreakerSnapshot,
}

/// Connection pool for the agent database
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: ConnectionPool<DatabaseConnection>,
    breaker: CircuitBreaker,
    stats: Arc<Mutex<QueryStats>>,
}

impl DatabasePool {
    /// Pool over the database file named in `config`
    pub fn new(config: &DatabaseConfig, breaker: CircuitBreaker) -> Result<Self> {
        let factory = Arc::new(SqliteConnectionFactory::new(&config.path));
        Self::with_factory("database", factory, config.pool_config(), breaker)
    }

    pub fn with_factory(
        name: &str,
        factory: Arc<dyn ConnectionFactory<DatabaseConnection>>,
        config: PoolConfig,
        breaker: CircuitBreaker,
    ) -> Result<Self> {
        let pool = ConnectionPool::with_breaker(name, factory, config, breaker.clone())?;
        Ok(Self {
            pool,
            breaker,
            stats: Arc::new(Mutex::new(QueryStats::default())),
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// Open the configured minimum of connections
    pub async fn initialize(&self) -> Result<usize> {
        let opened = self.pool.fill_min().await.map_err(|e| self.pool_failure(e))?;
        debug!(pool = self.pool.name(), opened, "Database pool initialized");
        Ok(opened)
    }

    /// Check out a connection, waiting up to `timeout`
    ///
    /// The connection returns to the pool when the guard drops.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<DatabaseConnection>> {
        self.pool.acquire(timeout).await.map_err(|e| self.pool_failure(e))
    }

    /// Run one statement on a pooled connection
    pub async fn execute_query(&self, sql: &str, params: &[Value]) -> Result<QueryOutcome> {
        let mut conn = self.acquire(self.pool.config().acquire_timeout).await?;
        let started = Instant::now();
        let result = conn.execute(sql, params).await;
        self.settle(&mut conn, &result, started, false).await;
        result
    }

    /// Run statements in one transaction on a pooled connection
    pub async fn execute_transaction(&self, statements: &[Statement]) -> Result<Vec<QueryOutcome>> {
        let mut conn = self.acquire(self.pool.config().acquire_timeout).await?;
        let started = Instant::now();
        let result = conn.execute_transaction(statements).await;
        self.settle(&mut conn, &result, started, true).await;
        result
    }

    /// Acquire a connection and probe it
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.acquire(self.pool.config().acquire_timeout).await?;
        if conn.ping().await {
            return Ok(());
        }
        let id = conn.id();
        conn.invalidate();
        Err(BulwarkError::Database(DatabaseFailure::ConnectionInvalid {
            id,
            reason: "failed liveness probe".to_string(),
        }))
    }

    /// Probe idle connections, retire stale ones and recompute health
    pub async fn sweep(&self) -> PoolHealth {
        self.pool.sweep().await
    }

    pub fn health(&self) -> PoolHealth {
        self.pool.health()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn query_stats(&self) -> QueryStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats {
            pool: self.pool.stats(),
            queries: self.query_stats(),
            breaker: self.breaker.snapshot(),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Record the outcome against the breaker and the query counters
    ///
    /// Inside a caller's breaker scope the caller records the transition.
    /// A failed statement triggers a liveness probe; a dead connection is
    /// invalidated so the pool replaces it.
    async fn settle<T>(
        &self,
        conn: &mut PooledConnection<DatabaseConnection>,
        result: &Result<T>,
        started: Instant,
        transaction: bool,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.total_query_time_ms += elapsed_ms;
            match (transaction, result.is_ok()) {
                (false, true) => stats.queries += 1,
                (false, false) => {
                    stats.queries += 1;
                    stats.failed_queries += 1;
                }
                (true, true) => stats.transactions += 1,
                (true, false) => {
                    stats.transactions += 1;
                    stats.failed_transactions += 1;
                }
            }
        }

        let recorded_by_caller = self.breaker.is_recorded_by_caller();
        let Err(err) = result else {
            if !recorded_by_caller {
                self.breaker.record_success();
            }
            return;
        };

        if !recorded_by_caller {
            self.breaker.record_failure();
        }
        if !conn.ping().await {
            warn!(
                pool = self.pool.name(),
                id = conn.id(),
                error = %err,
                "Connection died during statement, invalidating"
            );
            conn.invalidate();
        }
    }

    /// Map a pool error, recording resource failures against the breaker
    /// unless a caller's scope owns it
    fn pool_failure(&self, err: ResilienceError) -> BulwarkError {
        if matches!(
            err,
            ResilienceError::PoolExhausted(_) | ResilienceError::ConnectionCreation(_)
        ) && !self.breaker.is_recorded_by_caller()
        {
            self.breaker.record_failure();
        }
        BulwarkError::Database(DatabaseFailure::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core_resilience::{CircuitBreakerConfig, CircuitState};
    use serde_json::json;
    use tempfile::TempDir;

    fn pool_in(dir: &TempDir, min: usize, max: usize, breaker: CircuitBreaker) -> DatabasePool {
        let config = DatabaseConfig {
            path: dir.path().join("agents.db"),
            min_connections: min,
            max_connections: max,
            acquire_timeout_ms: 200,
            ..Default::default()
        };
        DatabasePool::new(&config, breaker).unwrap()
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir, 1, 2, CircuitBreaker::new_default("database"));
        assert_eq!(pool.initialize().await.unwrap(), 1);

        pool.execute_query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", &[])
            .await
            .unwrap();
        let outcomes = pool
            .execute_transaction(&[
                Statement::new("INSERT INTO notes (body) VALUES (?)").bind("first"),
                Statement::new("INSERT INTO notes (body) VALUES (?)").bind("second"),
            ])
            .await
            .unwrap();
        assert_eq!(outcomes.iter().map(QueryOutcome::affected).sum::<u64>(), 2);

        let rows = pool
            .execute_query("SELECT body FROM notes ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.rows()[1]["body"], json!("second"));

        let stats = pool.stats();
        assert_eq!(stats.queries.queries, 2);
        assert_eq!(stats.queries.transactions, 1);
        assert_eq!(stats.pool.in_use, 0);
        assert_eq!(stats.breaker.state, CircuitState::Closed);
        pool.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_trip_shared_breaker() {
        let dir = TempDir::new().unwrap();
        let breaker = CircuitBreaker::new(
            "database",
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                recovery_timeout: Duration::from_secs(60),
            },
        );
        let pool = pool_in(&dir, 0, 2, breaker.clone());

        for _ in 0..2 {
            let err = pool.execute_query("SELECT * FROM missing_table", &[]).await;
            assert!(matches!(
                err,
                Err(BulwarkError::Database(DatabaseFailure::Query(_)))
            ));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = pool.execute_query("SELECT 1", &[]).await;
        assert!(matches!(
            rejected,
            Err(BulwarkError::Database(DatabaseFailure::CircuitOpen(_)))
        ));
        assert_eq!(pool.query_stats().failed_queries, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_a_database_error() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir, 0, 1, CircuitBreaker::new_default("database"));

        let held = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let err = pool.acquire(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(
            err,
            BulwarkError::Database(DatabaseFailure::PoolExhausted(_))
        ));
        assert_eq!(pool.breaker().failure_count(), 1);
        drop(held);

        pool.acquire(Duration::from_millis(100)).await.unwrap();
    }
}
