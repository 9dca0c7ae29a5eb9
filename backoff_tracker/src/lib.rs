// Per-source failure tracking for exponential backoff. Adds delay between
// retries after consecutive failures; never adds extra requests.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit-breaker bookkeeping keyed by source name. Pure in-memory state:
/// entries are created lazily on first failure and removed entirely on
/// success, so a source that has never failed costs nothing.
#[derive(Debug)]
pub struct BackoffTracker {
    base_delay: Duration,
    max_delay: Duration,
    max_failures: u32,
    entries: HashMap<String, Entry>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    next_allowed: Instant,
}

impl Default for BackoffTracker {
    /// The production schedule: 5s, 10s, 20s, 40s, 60s, capped there.
    fn default() -> Self {
        Self::with_schedule(Duration::from_secs(5), Duration::from_secs(60), 5)
    }
}

impl BackoffTracker {
    /// Schedule parameters are injectable so tests can run in milliseconds.
    pub fn with_schedule(base_delay: Duration, max_delay: Duration, max_failures: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_failures,
            entries: HashMap::new(),
        }
    }

    /// True only while a failed source is still cooling down. Sources never
    /// seen, and sources whose last attempt succeeded, are never skipped.
    pub fn should_skip(&self, source: &str) -> bool {
        match self.entries.get(source) {
            Some(entry) if entry.failures > 0 => Instant::now() < entry.next_allowed,
            _ => false,
        }
    }

    pub fn on_success(&mut self, source: &str) {
        if self.entries.remove(source).is_some() {
            debug!("Source '{}' recovered, backoff cleared", source);
        }
    }

    pub fn on_failure(&mut self, source: &str) {
        let failures = self
            .entries
            .get(source)
            .map(|e| e.failures)
            .unwrap_or(0)
            .saturating_add(1)
            .min(self.max_failures);

        let delay = self.delay_for_failures(failures);
        self.entries.insert(
            source.to_string(),
            Entry {
                failures,
                next_allowed: Instant::now() + delay,
            },
        );

        warn!(
            "Source '{}' failed ({} consecutive), next attempt allowed in {:?}",
            source, failures, delay
        );
    }

    pub fn failures(&self, source: &str) -> u32 {
        self.entries.get(source).map(|e| e.failures).unwrap_or(0)
    }

    /// The delay applied after the given consecutive-failure count:
    /// `min(base * 2^(failures-1), max)`.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let capped = failures.min(self.max_failures);
        let scaled = self
            .base_delay
            .saturating_mul(1u32 << (capped - 1).min(31));
        scaled.min(self.max_delay)
    }
}

/// Schedule for transient per-request retries (used by the swap scanner's
/// chunk requests). Distinct from [`BackoffTracker`]: this retries a single
/// operation inline, the tracker spaces out whole polling ticks.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    /// Retry attempts beyond the initial one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetrySchedule {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(31))
            .min(self.max_delay)
    }
}

/// Retries an async operation with capped exponential delays between
/// attempts. All errors are treated as transient: every caller here issues
/// idempotent reads.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    schedule: &RetrySchedule,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded after {} retry attempts", attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= schedule.max_attempts {
                    warn!(
                        "Operation failed after {} attempts, giving up: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = schedule.delay_for_attempt(attempt);
                debug!(
                    "Operation failed (attempt {}/{}): {} - retrying in {:?}",
                    attempt + 1,
                    schedule.max_attempts + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
