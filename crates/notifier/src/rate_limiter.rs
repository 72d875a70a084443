//! Send pacing for the dispatcher.
//!
//! Keeps at least `current_interval` between the end of the last successful
//! send and the start of the next one. The interval is raised when the API
//! throttles us and falls back to the base interval after any success. The
//! API's `retry_after` is the only backoff signal; there is no exponential
//! growth on our side. A failed attempt holds the next one back by the base
//! interval, so a dead network is not hammered.

use std::time::Duration;

use tokio::time::Instant;

/// Dispatch pacing state, owned by the dispatcher loop alone.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    base_interval: Duration,
    current_interval: Duration,
    last_sent_at: Option<Instant>,
    last_failed_at: Option<Instant>,
}

impl RateLimiter {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            current_interval: base_interval,
            last_sent_at: None,
            last_failed_at: None,
        }
    }

    /// How long to wait at `now` before the next send may start.
    pub fn delay_before_send(&self, now: Instant) -> Option<Duration> {
        let since_success = self.last_sent_at.map(|at| (at, self.current_interval));
        let since_failure = self.last_failed_at.map(|at| (at, self.base_interval));

        [since_success, since_failure]
            .into_iter()
            .flatten()
            .filter_map(|(at, interval)| {
                let elapsed = now.saturating_duration_since(at);
                (elapsed < interval).then(|| interval - elapsed)
            })
            .max()
    }

    pub fn record_success(&mut self, now: Instant) {
        self.last_sent_at = Some(now);
        self.last_failed_at = None;
        self.current_interval = self.base_interval;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.last_failed_at = Some(now);
    }

    pub fn record_throttle(&mut self, retry_after: Duration) {
        self.current_interval = self.current_interval.max(retry_after);
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }
}
