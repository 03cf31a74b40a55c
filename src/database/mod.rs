//! Agent database access through a breaker-protected connection pool

pub mod connection;
pub mod pool;

pub use connection::{
    ConnectionMetrics, DatabaseConnection, QueryOutcome, SqliteConnectionFactory, Statement,
};
pub use pool::{DatabasePool, DatabasePoolStats, QueryStats};
