//! Buffered metric collection
//!
//! Measurements are quantized, buffered in memory and flushed to the ledger
//! on a fixed interval or once the buffer reaches its size threshold. While
//! the ledger is unreachable the buffer holds at most
//! `PENDING_LIMIT_FACTOR` thresholds; older measurements are dropped first.

use bulwark_core_resilience::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::MonitoringConfig;
use crate::error::{BulwarkError, Result};
use crate::store::MetricStore;

pub type Labels = BTreeMap<String, String>;

const PENDING_LIMIT_FACTOR: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Timer,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Timer => "timer",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = BulwarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "histogram" => Ok(MetricKind::Histogram),
            "timer" => Ok(MetricKind::Timer),
            other => Err(BulwarkError::Validation(format!("unknown metric kind: {}", other))),
        }
    }
}

/// One measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub labels: Labels,
}

/// Aggregate over the buffered values of one metric name
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Build a label map from string pairs
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Round `value` to `precision` decimal places
pub fn quantize(value: f64, precision: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(precision.min(15) as i32);
    (value * factor).round() / factor
}

#[derive(Debug, Default)]
struct Buffers {
    pending: Vec<Metric>,
    latest: HashMap<(String, Labels), Metric>,
    dropped: u64,
    /// Set on the first drop since the last successful flush
    dropping: bool,
}

impl Buffers {
    /// Drop the oldest pending measurements beyond `limit`
    fn trim(&mut self, limit: usize) {
        let excess = self.pending.len().saturating_sub(limit);
        if excess == 0 {
            return;
        }
        self.pending.drain(..excess);
        self.dropped += excess as u64;
        if !self.dropping {
            self.dropping = true;
            warn!(
                dropped = excess,
                limit, "Metric buffer full, dropping oldest measurements"
            );
        }
    }
}

#[derive(Debug)]
struct Inner {
    buffers: Mutex<Buffers>,
    flush_wanted: Notify,
    threshold: usize,
    limit: usize,
    precision: u32,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn MetricStore>>,
}

/// Cheaply cloneable handle to a shared metric buffer
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

impl MetricsCollector {
    /// Collector without a backing store; flushes just drain the buffer
    pub fn new(config: &MonitoringConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock, None)
    }

    pub fn with_store(
        config: &MonitoringConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn MetricStore>,
    ) -> Self {
        Self::build(config, clock, Some(store))
    }

    fn build(
        config: &MonitoringConfig,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn MetricStore>>,
    ) -> Self {
        let threshold = config.metrics_buffer_size.max(1);
        Self {
            inner: Arc::new(Inner {
                buffers: Mutex::new(Buffers::default()),
                flush_wanted: Notify::new(),
                threshold,
                limit: threshold.saturating_mul(PENDING_LIMIT_FACTOR),
                precision: config.metric_precision,
                clock,
                store,
            }),
        }
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, Buffers> {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one measurement
    pub fn record(&self, name: &str, kind: MetricKind, value: f64, labels: Labels) {
        let metric = Metric {
            name: name.to_string(),
            kind,
            value: quantize(value, self.inner.precision),
            timestamp: self.inner.clock.now(),
            labels,
        };

        let full = {
            let mut buffers = self.buffers();
            buffers
                .latest
                .insert((metric.name.clone(), metric.labels.clone()), metric.clone());
            buffers.pending.push(metric);
            buffers.trim(self.inner.limit);
            buffers.pending.len() >= self.inner.threshold
        };

        if full {
            self.inner.flush_wanted.notify_one();
        }
    }

    pub fn counter(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricKind::Counter, value, labels);
    }

    pub fn gauge(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricKind::Gauge, value, labels);
    }

    pub fn histogram(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricKind::Histogram, value, labels);
    }

    /// Record a duration in milliseconds
    pub fn timer(&self, name: &str, elapsed: Duration, labels: Labels) {
        self.record(name, MetricKind::Timer, elapsed.as_secs_f64() * 1000.0, labels);
    }

    /// Most recent measurement for a name and label set
    pub fn latest(&self, name: &str, labels: &Labels) -> Option<Metric> {
        self.buffers()
            .latest
            .get(&(name.to_string(), labels.clone()))
            .cloned()
    }

    /// Most recent value for every label set of `name`
    pub fn latest_by_name(&self, name: &str) -> Vec<Metric> {
        let mut metrics: Vec<Metric> = self
            .buffers()
            .latest
            .values()
            .filter(|m| m.name == name)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| a.labels.cmp(&b.labels));
        metrics
    }

    /// Count/min/max/avg over the buffered values of `name`
    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        let buffers = self.buffers();
        let values: Vec<f64> = buffers
            .pending
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .collect();
        if values.is_empty() {
            return None;
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        Some(MetricSummary {
            count: values.len(),
            min,
            max,
            avg: quantize(avg, self.inner.precision),
        })
    }

    /// Number of measurements awaiting flush
    pub fn buffered(&self) -> usize {
        self.buffers().pending.len()
    }

    /// Measurements discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.buffers().dropped
    }

    /// Resolves once the buffer has reached its size threshold
    pub async fn flush_requested(&self) {
        self.inner.flush_wanted.notified().await;
    }

    /// Write the buffer to the ledger, returning how many metrics were written
    ///
    /// On a ledger failure the unwritten metrics go back to the front of the
    /// buffer, subject to its limit, and the error is returned.
    pub async fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut self.buffers().pending);
        if batch.is_empty() {
            return Ok(0);
        }

        let Some(store) = &self.inner.store else {
            debug!(count = batch.len(), "Discarded metrics (no store configured)");
            return Ok(batch.len());
        };

        for (written, metric) in batch.iter().enumerate() {
            if let Err(e) = store.insert_metric(metric).await {
                warn!(written, remaining = batch.len() - written, "Metric flush failed: {}", e);
                let mut buffers = self.buffers();
                let mut requeued = batch[written..].to_vec();
                requeued.append(&mut buffers.pending);
                buffers.pending = requeued;
                buffers.trim(self.inner.limit);
                return Err(e);
            }
        }

        self.buffers().dropping = false;
        debug!(count = batch.len(), "Flushed metrics");
        Ok(batch.len())
    }
}
