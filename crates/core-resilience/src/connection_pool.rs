//! Generic connection pool for reusable connections
//!
//! The pool exclusively owns every connection. A checkout hands out a
//! [`PooledConnection`] guard that holds one semaphore permit; dropping the
//! guard checks the connection back in (or retires it when invalidated), so a
//! connection can never be held by two callers and every exit path releases.
//!
//! Every live connection is either idle or backed by a permit, and new
//! connections are only opened by permit holders that found the idle list
//! empty. That keeps the live count at or below `max_connections`.

use super::circuit_breaker::CircuitBreaker;
use super::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Valid/total ratio at or above which the pool is healthy
const HEALTHY_RATIO: f64 = 0.8;
/// Valid/total ratio at or above which the pool is degraded rather than unhealthy
const DEGRADED_RATIO: f64 = 0.5;

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept open even when idle
    pub min_connections: usize,
    /// Hard cap on live connections
    pub max_connections: usize,
    /// Idle connections older than this are retired by the sweep
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are retired by the sweep
    pub max_connection_age: Option<Duration>,
    /// Default wait used by [`ConnectionPool::acquire_default`]
    pub acquire_timeout: Duration,
    /// Probe idle connections before handing them out
    pub test_on_checkout: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            idle_timeout: Some(Duration::from_secs(300)),
            max_connection_age: Some(Duration::from_secs(3600)),
            acquire_timeout: Duration::from_secs(30),
            test_on_checkout: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_connections == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ResilienceError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Health of the pool as computed by the last sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl PoolHealth {
    /// Classify a sweep outcome by its valid/total ratio
    pub fn from_counts(valid: usize, total: usize, min_connections: usize) -> Self {
        if total == 0 {
            return if min_connections == 0 {
                PoolHealth::Healthy
            } else {
                PoolHealth::Unhealthy
            };
        }
        let ratio = valid as f64 / total as f64;
        if ratio >= HEALTHY_RATIO {
            PoolHealth::Healthy
        } else if ratio >= DEGRADED_RATIO {
            PoolHealth::Degraded
        } else {
            PoolHealth::Unhealthy
        }
    }
}

impl fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolHealth::Healthy => write!(f, "healthy"),
            PoolHealth::Degraded => write!(f, "degraded"),
            PoolHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Factory trait for creating and validating connections
#[async_trait::async_trait]
pub trait ConnectionFactory<T: Send + 'static>: Send + Sync {
    /// Open a new connection; `id` is the pool-assigned identifier
    async fn create(&self, id: u64) -> Result<T, ResilienceError>;

    /// Liveness probe
    async fn is_healthy(&self, conn: &mut T) -> bool;

    /// Close a connection (optional cleanup)
    async fn close(&self, conn: T) {
        drop(conn);
    }
}

/// A connection plus the pool's bookkeeping for it
struct Slot<T> {
    id: u64,
    conn: T,
    created_at: Instant,
    last_used: Instant,
}

impl<T> Slot<T> {
    fn new(id: u64, conn: T) -> Self {
        let now = Instant::now();
        Self {
            id,
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, config: &PoolConfig, now: Instant) -> bool {
        if let Some(idle_timeout) = config.idle_timeout {
            if now.duration_since(self.last_used) > idle_timeout {
                return true;
            }
        }
        if let Some(max_age) = config.max_connection_age {
            if now.duration_since(self.created_at) > max_age {
                return true;
            }
        }
        false
    }
}

struct PoolState<T> {
    idle: VecDeque<Slot<T>>,
    in_use: usize,
    /// Connections being opened right now
    pending: usize,
    closed: bool,
    health: PoolHealth,
    created: u64,
    retired: u64,
    acquire_timeouts: u64,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.idle.len() + self.in_use + self.pending
    }
}

struct PoolInner<T: Send + 'static> {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<T>>,
    state: Mutex<PoolState<T>>,
    semaphore: Arc<Semaphore>,
    breaker: Option<CircuitBreaker>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> PoolInner<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close a connection without blocking the caller
    fn close_detached(&self, conn: T) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let factory = Arc::clone(&self.factory);
                handle.spawn(async move { factory.close(conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    fn check_in(&self, mut slot: Slot<T>, valid: bool, used: bool) {
        let mut state = self.lock();
        state.in_use -= 1;

        if valid && !state.closed {
            if used {
                slot.last_used = Instant::now();
            }
            state.idle.push_back(slot);
            return;
        }

        state.retired += 1;
        drop(state);
        debug!(pool = %self.name, id = slot.id, "Retiring connection");
        self.close_detached(slot.conn);
    }
}

/// Slot in `pending` that is released if the open never completes
struct Reservation<'a, T: Send + 'static> {
    pool: &'a PoolInner<T>,
    committed: bool,
}

impl<'a, T: Send + 'static> Reservation<'a, T> {
    fn commit(mut self, slot: Slot<T>, checked_out: bool) -> Option<Slot<T>> {
        let mut state = self.pool.lock();
        state.pending -= 1;
        state.created += 1;
        self.committed = true;
        if checked_out {
            state.in_use += 1;
            Some(slot)
        } else {
            state.idle.push_back(slot);
            None
        }
    }
}

impl<T: Send + 'static> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.lock().pending -= 1;
        }
    }
}

/// Checked-out connection
///
/// Dereferences to the underlying connection. Dropping the guard returns the
/// connection to the pool unless [`PooledConnection::invalidate`] was called.
pub struct PooledConnection<T: Send + 'static> {
    slot: Option<Slot<T>>,
    valid: bool,
    used: bool,
    pool: Arc<PoolInner<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Send + 'static> PooledConnection<T> {
    fn new(slot: Slot<T>, pool: Arc<PoolInner<T>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            slot: Some(slot),
            valid: true,
            used: true,
            pool,
            _permit: permit,
        }
    }

    fn slot(&self) -> &Slot<T> {
        match &self.slot {
            Some(slot) => slot,
            None => unreachable!("slot is only taken on drop"),
        }
    }

    /// Pool-assigned connection id
    pub fn id(&self) -> u64 {
        self.slot().id
    }

    /// Time since the connection was opened
    pub fn age(&self) -> Duration {
        self.slot().created_at.elapsed()
    }

    /// Retire the connection instead of returning it to the pool
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl<T: Send + 'static> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot().conn
    }
}

impl<T: Send + 'static> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.slot {
            Some(slot) => &mut slot.conn,
            None => unreachable!("slot is only taken on drop"),
        }
    }
}

impl<T: Send + 'static> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.check_in(slot, self.valid, self.used);
        }
    }
}

impl<T: Send + 'static> fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.name)
            .field("id", &self.slot.as_ref().map(|s| s.id))
            .field("valid", &self.valid)
            .finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    /// Live connections including ones being opened
    pub total: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    /// Connections opened over the pool's lifetime
    pub created: u64,
    /// Connections closed because they were invalid, aged out or idle
    pub retired: u64,
    pub acquire_timeouts: u64,
    pub health: PoolHealth,
}

impl PoolStats {
    /// Pool utilization as a percentage of `max_connections`
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            (self.in_use as f64 / self.max_connections as f64) * 100.0
        }
    }
}

/// A generic connection pool
///
/// # Example
/// ```no_run
/// use bulwark_core_resilience::{ConnectionFactory, ConnectionPool, PoolConfig, ResilienceError};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Conn;
/// struct ConnFactory;
///
/// #[async_trait::async_trait]
/// impl ConnectionFactory<Conn> for ConnFactory {
///     async fn create(&self, _id: u64) -> Result<Conn, ResilienceError> {
///         Ok(Conn)
///     }
///
///     async fn is_healthy(&self, _conn: &mut Conn) -> bool {
///         true
///     }
/// }
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let pool = ConnectionPool::new("primary", Arc::new(ConnFactory), PoolConfig::default())?;
/// let conn = pool.acquire(Duration::from_secs(5)).await?;
/// // use the connection; dropping the guard returns it
/// drop(conn);
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a new connection pool
    ///
    /// No connections are opened until the first acquire or [`Self::fill_min`].
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory<T>>,
        config: PoolConfig,
    ) -> Result<Self, ResilienceError> {
        Self::build(name.into(), factory, config, None)
    }

    /// Create a pool whose acquires are gated by a shared circuit breaker
    pub fn with_breaker(
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory<T>>,
        config: PoolConfig,
        breaker: CircuitBreaker,
    ) -> Result<Self, ResilienceError> {
        Self::build(name.into(), factory, config, Some(breaker))
    }

    fn build(
        name: String,
        factory: Arc<dyn ConnectionFactory<T>>,
        config: PoolConfig,
        breaker: Option<CircuitBreaker>,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;
        let max = config.max_connections;
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                config,
                factory,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    pending: 0,
                    closed: false,
                    health: PoolHealth::Healthy,
                    created: 0,
                    retired: 0,
                    acquire_timeouts: 0,
                }),
                semaphore: Arc::new(Semaphore::new(max)),
                breaker,
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.breaker.as_ref()
    }

    /// Acquire with the configured default timeout
    pub async fn acquire_default(&self) -> Result<PooledConnection<T>, ResilienceError> {
        self.acquire(self.inner.config.acquire_timeout).await
    }

    /// Acquire a connection, waiting up to `timeout` for one to free up
    ///
    /// The breaker is consulted before waiting. Idle connections are probed
    /// (when `test_on_checkout` is set) and replaced if they fail. Dropping
    /// the returned future before it completes leaves nothing checked out.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<T>, ResilienceError> {
        if let Some(breaker) = &self.inner.breaker {
            breaker.try_acquire()?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let permit = match tokio::time::timeout_at(
                deadline,
                Arc::clone(&self.inner.semaphore).acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(ResilienceError::PoolClosed),
                Err(_) => {
                    self.inner.lock().acquire_timeouts += 1;
                    warn!(pool = %self.inner.name, ?timeout, "Timed out waiting for a connection");
                    return Err(ResilienceError::PoolExhausted(timeout));
                }
            };

            let idle = {
                let mut state = self.inner.lock();
                if state.closed {
                    return Err(ResilienceError::PoolClosed);
                }
                match state.idle.pop_back() {
                    Some(slot) => {
                        state.in_use += 1;
                        Some(slot)
                    }
                    None => {
                        state.pending += 1;
                        None
                    }
                }
            };

            let Some(slot) = idle else {
                return self.open_checked_out(permit).await;
            };

            let mut guard = PooledConnection::new(slot, Arc::clone(&self.inner), permit);
            if !self.inner.config.test_on_checkout
                || self.inner.factory.is_healthy(&mut *guard).await
            {
                return Ok(guard);
            }

            warn!(pool = %self.inner.name, id = guard.id(), "Replacing unhealthy connection");
            guard.invalidate();
        }
    }

    /// Open a connection for a caller that already holds a permit and a
    /// pending reservation
    async fn open_checked_out(
        &self,
        permit: OwnedSemaphorePermit,
    ) -> Result<PooledConnection<T>, ResilienceError> {
        let reservation = Reservation {
            pool: &self.inner,
            committed: false,
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = self.inner.factory.create(id).await?;
        debug!(pool = %self.inner.name, id, "Opened connection");

        match reservation.commit(Slot::new(id, conn), true) {
            Some(slot) => Ok(PooledConnection::new(slot, Arc::clone(&self.inner), permit)),
            None => Err(ResilienceError::PoolClosed),
        }
    }

    /// Open idle connections until `min_connections` are live
    ///
    /// Returns how many were opened. Stops early when every permit is taken.
    pub async fn fill_min(&self) -> Result<usize, ResilienceError> {
        let config = &self.inner.config;
        let mut opened = 0;

        loop {
            let Ok(permit) = Arc::clone(&self.inner.semaphore).try_acquire_owned() else {
                break;
            };

            let reservation = {
                let mut state = self.inner.lock();
                if state.closed
                    || state.total() >= config.min_connections
                    || state.total() >= config.max_connections
                {
                    break;
                }
                state.pending += 1;
                Reservation {
                    pool: &self.inner,
                    committed: false,
                }
            };

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let conn = self.inner.factory.create(id).await?;
            reservation.commit(Slot::new(id, conn), false);
            drop(permit);
            opened += 1;
        }

        if opened > 0 {
            debug!(pool = %self.inner.name, opened, "Filled pool to minimum");
        }
        Ok(opened)
    }

    /// Probe idle connections, retire stale ones and recompute health
    ///
    /// Connections idle past `idle_timeout` or older than `max_connection_age`
    /// are retired as long as `min_connections` remain. Failed probes are
    /// retired unconditionally, then the pool is refilled to its minimum.
    pub async fn sweep(&self) -> PoolHealth {
        let config = &self.inner.config;
        let mut invalid = 0usize;
        let mut aged_out = 0usize;

        let rounds = self.inner.lock().idle.len();
        for _ in 0..rounds {
            let Ok(permit) = Arc::clone(&self.inner.semaphore).try_acquire_owned() else {
                break;
            };

            let slot = {
                let mut state = self.inner.lock();
                let Some(slot) = state.idle.pop_front() else {
                    break;
                };
                // `total` no longer counts the popped slot
                if slot.is_expired(config, Instant::now())
                    && state.total() >= config.min_connections
                {
                    state.retired += 1;
                    drop(state);
                    aged_out += 1;
                    self.inner.close_detached(slot.conn);
                    continue;
                }
                state.in_use += 1;
                slot
            };

            let mut guard = PooledConnection::new(slot, Arc::clone(&self.inner), permit);
            guard.used = false;
            if !self.inner.factory.is_healthy(&mut *guard).await {
                warn!(pool = %self.inner.name, id = guard.id(), "Connection failed liveness probe");
                guard.invalidate();
                invalid += 1;
            }
        }

        if let Err(e) = self.fill_min().await {
            warn!(pool = %self.inner.name, error = %e, "Could not refill pool to minimum");
            invalid += 1;
        }

        let mut state = self.inner.lock();
        let valid = state.idle.len() + state.in_use;
        let health = PoolHealth::from_counts(valid, valid + invalid, config.min_connections);
        let previous = std::mem::replace(&mut state.health, health);
        drop(state);

        if previous != health {
            info!(pool = %self.inner.name, %previous, current = %health, "Pool health changed");
        }
        debug!(pool = %self.inner.name, valid, invalid, aged_out, %health, "Pool sweep complete");
        health
    }

    /// Health computed by the last sweep
    pub fn health(&self) -> PoolHealth {
        self.inner.lock().health
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use,
            total: state.total(),
            min_connections: self.inner.config.min_connections,
            max_connections: self.inner.config.max_connections,
            created: state.created,
            retired: state.retired,
            acquire_timeouts: state.acquire_timeouts,
            health: state.health,
        }
    }

    /// Close the pool
    ///
    /// Idle connections are closed now; checked-out ones are closed when
    /// their guards drop. Pending and future acquires fail with `PoolClosed`.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.retired += state.idle.len() as u64;
            std::mem::take(&mut state.idle)
        };
        self.inner.semaphore.close();

        let count = idle.len();
        for slot in idle {
            self.inner.factory.close(slot.conn).await;
        }
        info!(pool = %self.inner.name, closed = count, "Connection pool closed");
    }
}
