//! Hourly request budgets per principal
//!
//! Counters are keyed strictly by `(principal, hour bucket)`, where the bucket
//! is the number of whole hours since the Unix epoch. A new bucket starts at
//! zero, so budgets reset at every hour rollover.
//!
//! The limiter is the in-memory hot path: check-and-increment happens under one
//! lock and never suspends. Durable copies of the counters are the caller's
//! business; [`HourlyRateLimiter::snapshot`] and [`HourlyRateLimiter::seed`]
//! support flushing and reloading them.

use super::clock::{hour_bucket, Clock, SystemClock};
use super::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Outcome of an admitted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub hour_bucket: i64,
    /// Requests counted in this bucket, including the admitted one
    pub count: u32,
    pub limit: u32,
}

impl RateDecision {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

/// One counter row, as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub principal: String,
    pub hour_bucket: i64,
    pub count: u32,
}

type CounterKey = (String, i64);

/// Fixed hourly window limiter
///
/// # Example
/// ```
/// use bulwark_core_resilience::HourlyRateLimiter;
///
/// let limiter = HourlyRateLimiter::new();
/// assert!(limiter.check_and_increment("agent-7", 2).is_ok());
/// assert!(limiter.check_and_increment("agent-7", 2).is_ok());
/// assert!(limiter.check_and_increment("agent-7", 2).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct HourlyRateLimiter {
    clock: Arc<dyn Clock>,
    counters: Arc<Mutex<HashMap<CounterKey, u32>>>,
}

impl Default for HourlyRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl HourlyRateLimiter {
    /// Create a limiter driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a limiter driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CounterKey, u32>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hour bucket the limiter is currently counting into
    pub fn current_bucket(&self) -> i64 {
        hour_bucket(self.clock.now())
    }

    /// Count one request for `principal` if the hourly budget allows it
    ///
    /// A rejected request leaves the counter untouched.
    pub fn check_and_increment(
        &self,
        principal: &str,
        limit: u32,
    ) -> Result<RateDecision, ResilienceError> {
        let bucket = self.current_bucket();
        let mut counters = self.lock();
        let count = counters.entry((principal.to_string(), bucket)).or_insert(0);

        if *count >= limit {
            debug!(principal, bucket, limit, "Hourly rate limit reached");
            return Err(ResilienceError::RateLimitExceeded {
                principal: principal.to_string(),
                limit,
            });
        }

        *count += 1;
        Ok(RateDecision {
            hour_bucket: bucket,
            count: *count,
            limit,
        })
    }

    /// Requests counted for `principal` in the current bucket
    pub fn current_count(&self, principal: &str) -> u32 {
        let bucket = self.current_bucket();
        self.lock()
            .get(&(principal.to_string(), bucket))
            .copied()
            .unwrap_or(0)
    }

    /// Load a persisted counter, keeping the larger of the two values
    pub fn seed(&self, principal: &str, bucket: i64, count: u32) {
        let mut counters = self.lock();
        let entry = counters.entry((principal.to_string(), bucket)).or_insert(0);
        *entry = (*entry).max(count);
    }

    /// Copy of every live counter
    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        self.lock()
            .iter()
            .map(|((principal, bucket), count)| CounterSnapshot {
                principal: principal.clone(),
                hour_bucket: *bucket,
                count: *count,
            })
            .collect()
    }

    /// Drop counters from buckets before the current one
    ///
    /// Returns how many counters were removed.
    pub fn purge_stale(&self) -> usize {
        let bucket = self.current_bucket();
        let mut counters = self.lock();
        let before = counters.len();
        counters.retain(|(_, b), _| *b >= bucket);
        before - counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn clock_at(h: u32, m: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap(),
        ))
    }

    #[test]
    fn test_exactly_limit_requests_succeed() {
        let limiter = HourlyRateLimiter::with_clock(clock_at(10, 0));

        for expected in 1..=5 {
            let decision = limiter.check_and_increment("agent", 5).unwrap();
            assert_eq!(decision.count, expected);
        }
        let err = limiter.check_and_increment("agent", 5).unwrap_err();
        assert!(matches!(err, ResilienceError::RateLimitExceeded { limit: 5, .. }));
        assert_eq!(limiter.current_count("agent"), 5);
    }

    #[test]
    fn test_bucket_rollover_resets_budget() {
        let clock = clock_at(10, 59);
        let limiter = HourlyRateLimiter::with_clock(clock.clone());

        limiter.check_and_increment("agent", 1).unwrap();
        assert!(limiter.check_and_increment("agent", 1).is_err());

        clock.advance(Duration::minutes(1));
        assert!(limiter.check_and_increment("agent", 1).is_ok());
    }

    #[test]
    fn test_principals_are_independent() {
        let limiter = HourlyRateLimiter::with_clock(clock_at(8, 0));
        limiter.check_and_increment("a", 1).unwrap();
        assert!(limiter.check_and_increment("b", 1).is_ok());
        assert!(limiter.check_and_increment("a", 1).is_err());
    }

    #[test]
    fn test_seed_and_purge() {
        let clock = clock_at(12, 30);
        let limiter = HourlyRateLimiter::with_clock(clock.clone());
        let bucket = limiter.current_bucket();

        limiter.seed("agent", bucket, 3);
        limiter.seed("agent", bucket - 1, 9);
        assert_eq!(limiter.current_count("agent"), 3);
        assert!(limiter.check_and_increment("agent", 3).is_err());

        assert_eq!(limiter.purge_stale(), 1);
        assert_eq!(limiter.snapshot().len(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let limiter = HourlyRateLimiter::with_clock(clock_at(9, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check_and_increment("shared", 300).is_ok())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 300);
        assert_eq!(limiter.current_count("shared"), 300);
    }
}
