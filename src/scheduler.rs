//! Background job scheduler
//!
//! Jobs are tasks in a `JoinSet` that share one cancellation token.
//! Interval jobs run their body on a fixed period; missed ticks are delayed
//! rather than bursted. Shutdown cancels the token and joins every job.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the background loops of a running service
#[derive(Debug)]
pub struct Scheduler {
    tasks: JoinSet<String>,
    token: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled on shutdown; child tokens can be handed to jobs
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `job` every `period`, first immediately
    ///
    /// A job in progress when shutdown starts completes its current run.
    pub fn spawn_interval<F, Fut>(&mut self, name: impl Into<String>, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();
        debug!(job = %name, ?period, "Scheduling interval job");

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => job().await,
                }
            }
            name
        });
    }

    /// Run a long-lived job that watches the token itself
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let fut = job(self.token.child_token());
        self.tasks.spawn(async move {
            fut.await;
            name
        });
    }

    /// Cancel every job and wait for all of them to finish
    ///
    /// Returns how many jobs were joined.
    pub async fn shutdown(&mut self) -> usize {
        self.token.cancel();
        let mut joined = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(name) => debug!(job = %name, "Background job stopped"),
                Err(e) => warn!("Background job ended abnormally: {}", e),
            }
            joined += 1;
        }
        info!(jobs = joined, "Scheduler stopped");
        joined
    }
}
