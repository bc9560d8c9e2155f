//! Per-source circuit breaker and rate limiter

use std::time::{Duration, Instant};

use tracing::debug;

/// Two-state circuit breaker: closed until `failure_threshold` consecutive
/// failures, then open until `recovery_timeout` elapses.
///
/// `can_execute` is the only gate; callers that proceed must record exactly
/// one success or failure. A success in the closed state resets the count.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            failures: 0,
            opened_at: None,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures >= self.failure_threshold && self.opened_at.is_none() {
            debug!(failures = self.failures, "CircuitBreaker::record_failure: opening");
            self.opened_at = Some(Instant::now());
        }
    }

    /// Whether a call may proceed. The first call after the recovery
    /// timeout closes the breaker and clears the failure count.
    pub fn can_execute(&mut self) -> bool {
        let Some(opened_at) = self.opened_at else {
            return true;
        };
        if opened_at.elapsed() >= self.recovery_timeout {
            debug!("CircuitBreaker::can_execute: recovery timeout elapsed, closing");
            self.opened_at = None;
            self.failures = 0;
            return true;
        }
        false
    }

    pub fn state(&self) -> &'static str {
        if self.opened_at.is_some() { "open" } else { "closed" }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Fixed-window rate limiter with a minimum inter-request delay.
///
/// `wait` sleeps until both the per-minute budget and the minimum spacing
/// are satisfied, then records the request.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    min_delay: Duration,
    window_start: Instant,
    request_count: u32,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, min_delay: Duration) -> Self {
        Self {
            requests_per_minute,
            min_delay,
            window_start: Instant::now(),
            request_count: 0,
            last_request: None,
        }
    }

    pub async fn wait(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(60) {
            self.window_start = now;
            self.request_count = 0;
        }

        if self.request_count >= self.requests_per_minute {
            let elapsed = Instant::now().duration_since(self.window_start);
            if let Some(sleep_for) = Duration::from_secs(60).checked_sub(elapsed) {
                debug!(?sleep_for, "RateLimiter::wait: window exhausted, sleeping");
                tokio::time::sleep(sleep_for).await;
            }
            self.window_start = Instant::now();
            self.request_count = 0;
        }

        if let Some(last) = self.last_request {
            let since = Instant::now().duration_since(last);
            if since < self.min_delay {
                tokio::time::sleep(self.min_delay - since).await;
            }
        }

        self.last_request = Some(Instant::now());
        self.request_count += 1;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(30, Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_lifecycle() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_millis(20));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success(); // resets the count
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), "closed");

        breaker.record_failure(); // third consecutive failure opens it
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), "open");

        std::thread::sleep(Duration::from_millis(25));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), "closed");

        // Counters cleared: takes a full threshold run to open again
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn test_rate_limiter_enforces_min_delay() {
        let mut limiter = RateLimiter::new(100, Duration::from_millis(30));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window_budget() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(0));
        limiter.wait().await;
        limiter.wait().await;
        let before = tokio::time::Instant::now();
        // Third request must wait for the window to roll over
        limiter.wait().await;
        assert!(before.elapsed() >= Duration::from_secs(50));
    }
}
