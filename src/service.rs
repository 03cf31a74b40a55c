//! The assembled service
//!
//! [`Bulwark`] builds every component from a [`BulwarkConfig`] and owns
//! their lifecycle: [`Bulwark::start`] opens the pool and schedules the
//! background loops, [`Bulwark::shutdown`] stops them and flushes buffers.
//! Shutdown is final: the pool and ledger are closed, so a stopped service
//! refuses to start again.
//! Collaborators receive the service (or its components) by reference.

use bulwark_core_resilience::{Clock, SystemClock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{AuthStats, Authenticator};
use crate::config::BulwarkConfig;
use crate::database::DatabasePool;
use crate::error::{BulwarkError, Result};
use crate::monitor::{
    default_rules, AlertManager, AuthSource, BreakerSource, CheckSettings, DatabasePingCheck,
    ErrorRateSource, HealthMonitor, MetricsCollector, PoolHealthCheck, PoolSource, StoreCheck,
    SystemHealth,
};
use crate::pipeline::Pipeline;
use crate::resilience::{ErrorHandlingCoordinator, ErrorPatterns, ErrorTracker};
use crate::scheduler::Scheduler;
use crate::store::{SqliteStore, Store};

/// Resilience and access-control service for agent workers
#[derive(Debug)]
pub struct Bulwark {
    config: BulwarkConfig,
    ledger: Arc<SqliteStore>,
    store: Arc<dyn Store>,
    metrics: MetricsCollector,
    tracker: ErrorTracker,
    coordinator: Arc<ErrorHandlingCoordinator>,
    authenticator: Arc<Authenticator>,
    pool: DatabasePool,
    monitor: Arc<HealthMonitor>,
    pipeline: Pipeline,
    scheduler: Mutex<Scheduler>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl Bulwark {
    /// Build every component; nothing runs until [`Self::start`]
    pub async fn open(config: BulwarkConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(config: BulwarkConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(SqliteStore::open(&config.store.path, config.store.max_connections).await?);
        let store: Arc<dyn Store> = ledger.clone();

        let metrics = MetricsCollector::with_store(&config.monitoring, clock.clone(), store.clone());
        let tracker = ErrorTracker::new(store.clone(), clock.clone());
        let coordinator = Arc::new(
            ErrorHandlingCoordinator::new(tracker.clone(), config.errors.clone())
                .with_metrics(metrics.clone()),
        );
        let authenticator = Arc::new(
            Authenticator::new(store.clone(), clock.clone(), config.auth.clone())
                .with_metrics(metrics.clone()),
        );
        authenticator.reload_rate_counters().await?;

        let pool = DatabasePool::new(&config.database, coordinator.breaker(&config.database.breaker))?;

        let alerts = AlertManager::new(default_rules(&config.monitoring), clock.clone());
        let monitor = Arc::new(HealthMonitor::new(
            config.monitoring.clone(),
            coordinator.clone(),
            alerts,
            metrics.clone(),
            clock,
        ));
        let settings = CheckSettings::from_config(&config.monitoring);
        monitor.register_check(Arc::new(DatabasePingCheck::new(pool.clone())), settings.critical());
        monitor.register_check(Arc::new(StoreCheck::new(store.clone())), settings.critical());
        monitor.register_check(Arc::new(PoolHealthCheck::new(pool.clone())), settings);
        monitor.add_source(Arc::new(BreakerSource::new(coordinator.clone())));
        monitor.add_source(Arc::new(PoolSource::new(pool.clone())));
        monitor.add_source(Arc::new(ErrorRateSource::new(
            tracker.clone(),
            config.monitoring.error_rate_threshold,
        )));
        monitor.add_source(Arc::new(AuthSource::new(
            authenticator.clone(),
            config.monitoring.auth_failure_threshold,
        )));

        let pipeline = Pipeline::new(authenticator.clone(), coordinator.clone());

        info!(
            database = %config.database.path.display(),
            ledger = %config.store.path.display(),
            "Bulwark opened"
        );
        Ok(Self {
            config,
            ledger,
            store,
            metrics,
            tracker,
            coordinator,
            authenticator,
            pool,
            monitor,
            pipeline,
            scheduler: Mutex::new(Scheduler::new()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<ErrorHandlingCoordinator> {
        &self.coordinator
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Open the pool's minimum connections and schedule background loops
    ///
    /// Calling `start` on a running service does nothing. A service that
    /// has been shut down returns an error.
    pub async fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(BulwarkError::Resource(
                "service has been shut down".to_string(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.pool.initialize().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let mut scheduler = self.scheduler.lock().await;
        self.schedule_maintenance(&mut scheduler);
        if self.config.monitoring.enabled {
            self.schedule_monitoring(&mut scheduler);
        } else {
            info!("Monitoring disabled; health checks and alerts are not scheduled");
        }

        info!(jobs = scheduler.len(), "Bulwark started");
        Ok(())
    }

    fn schedule_maintenance(&self, scheduler: &mut Scheduler) {
        let pool = self.pool.clone();
        scheduler.spawn_interval(
            "pool-sweep",
            secs(self.config.database.sweep_interval_secs),
            move || {
                let pool = pool.clone();
                async move {
                    let health = pool.sweep().await;
                    debug!(%health, "Pool sweep finished");
                }
            },
        );

        let authenticator = self.authenticator.clone();
        scheduler.spawn_interval(
            "rate-counter-flush",
            secs(self.config.auth.rate_flush_interval_secs),
            move || {
                let authenticator = authenticator.clone();
                async move {
                    if let Err(e) = authenticator.flush_rate_counters().await {
                        warn!("Rate counter flush failed: {}", e);
                    }
                }
            },
        );

        let authenticator = self.authenticator.clone();
        scheduler.spawn_interval(
            "session-purge",
            secs(self.config.auth.session_purge_interval_secs),
            move || {
                let authenticator = authenticator.clone();
                async move {
                    if let Err(e) = authenticator.purge_expired_sessions().await {
                        warn!("Session purge failed: {}", e);
                    }
                }
            },
        );

        let metrics = self.metrics.clone();
        let period = secs(self.config.monitoring.metrics_flush_interval_secs);
        scheduler.spawn("metrics-flush", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                    _ = metrics.flush_requested() => {}
                }
                if let Err(e) = metrics.flush().await {
                    warn!("Metrics flush failed: {}", e);
                }
            }
        });
    }

    fn schedule_monitoring(&self, scheduler: &mut Scheduler) {
        for (name, interval) in self.monitor.check_schedule() {
            let monitor = self.monitor.clone();
            scheduler.spawn_interval(format!("health-check:{}", name), interval, move || {
                let monitor = monitor.clone();
                let name = name.clone();
                async move {
                    monitor.run_check(&name).await;
                }
            });
        }

        let monitor = self.monitor.clone();
        scheduler.spawn_interval(
            "alert-evaluation",
            secs(self.config.monitoring.health_check_interval_secs),
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.evaluate().await;
                }
            },
        );
    }

    /// Stop background loops, flush buffers and close connections
    ///
    /// Repeated calls after the first do nothing.
    pub async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let jobs = self.scheduler.lock().await.shutdown().await;
        let was_running = self.running.swap(false, Ordering::SeqCst);

        let counters = self.authenticator.flush_rate_counters().await?;
        let flushed = match self.metrics.flush().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Final metrics flush failed: {}", e);
                0
            }
        };
        self.pool.close().await;
        self.ledger.close().await;

        info!(jobs, counters, metrics = flushed, was_running, "Bulwark stopped");
        Ok(())
    }

    /// Latest health view without probing
    pub fn get_system_health(&self) -> SystemHealth {
        self.monitor.get_system_health()
    }

    /// Run every check and evaluate alerts, then report
    pub async fn check_health(&self) -> SystemHealth {
        self.monitor.refresh().await;
        self.monitor.get_system_health()
    }

    pub async fn get_auth_stats(&self, hours: u32) -> Result<AuthStats> {
        self.authenticator.get_auth_stats(hours).await
    }

    pub async fn get_error_patterns(&self, hours: u32) -> Result<ErrorPatterns> {
        self.tracker.get_error_patterns(hours).await
    }
}

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewCredential, Role};
    use crate::monitor::HealthStatus;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> BulwarkConfig {
        let mut config = BulwarkConfig::default();
        config.database.path = dir.path().join("agents.db");
        config.database.min_connections = 1;
        config.database.max_connections = 2;
        config.store.path = dir.path().join("ledger.db");
        config
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        let service = Bulwark::open(config(&dir)).await.unwrap();

        service.start().await.unwrap();
        assert!(service.is_running());
        service.start().await.unwrap();

        let secret = service
            .authenticator()
            .create_credential(NewCredential::new("agent-1", Role::Agent))
            .await
            .unwrap();
        service
            .authenticator()
            .authenticate(&secret, None, None)
            .await
            .unwrap();

        let health = service.check_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.checks.iter().all(|c| c.healthy));
        assert!(health.breakers.iter().any(|b| b.name == "database"));

        let stats = service.get_auth_stats(1).await.unwrap();
        assert_eq!(stats.successful, 1);

        service.shutdown().await.unwrap();
        assert!(!service.is_running());
        assert!(service.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_service_refuses_restart() {
        let dir = TempDir::new().unwrap();
        let service = Bulwark::open(config(&dir)).await.unwrap();
        service.start().await.unwrap();
        service.shutdown().await.unwrap();

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, BulwarkError::Resource(_)));
        assert!(!service.is_running());
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.database.min_connections = 5;
        assert!(Bulwark::open(config).await.is_err());
    }
}
