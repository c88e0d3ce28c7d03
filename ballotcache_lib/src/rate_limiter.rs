//! Request pacing and outcome counters for geocoder calls.
//!
//! The provider enforces a per-second request ceiling in addition to the
//! daily quota. A sliding-window limiter keeps us under the per-second
//! ceiling; the daily quota is handled by the keyless fallback in
//! [`crate::geocoder`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Default per-window budget for the provider's standard plan.
pub const DEFAULT_MAX_REQUESTS: u64 = 50;

/// Default sliding window duration.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window rate limiter.
///
/// Tracks timestamps of recent requests in a `VecDeque` behind a tokio Mutex.
/// When the window is full, `acquire()` sleeps until the oldest entry expires.
pub struct RateLimiter {
    timestamps: Mutex<VecDeque<Instant>>,
    max_requests: u64,
    window_duration: Duration,
    tracker: RequestTracker,
}

impl RateLimiter {
    /// Create a rate limiter with explicit budget and window.
    pub fn new(max_requests: u64, window_duration: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
            max_requests,
            window_duration,
            tracker: RequestTracker::new(),
        }
    }

    /// Wait until a request slot is available, then record the timestamp.
    pub async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let mut ts = self.timestamps.lock().await;

            while ts
                .front()
                .is_some_and(|&t| now.duration_since(t) >= self.window_duration)
            {
                ts.pop_front();
            }

            if (ts.len() as u64) < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait = match ts.front() {
                Some(&oldest) => (oldest + self.window_duration).duration_since(now),
                None => Duration::ZERO,
            };

            // Drop lock before sleeping
            drop(ts);
            sleep(wait).await;
        }
    }

    /// Non-blocking snapshot of remaining request budget in the current window.
    ///
    /// Returns `None` if the lock is contended (callers should treat as "unknown").
    pub fn remaining_budget(&self) -> Option<u64> {
        match self.timestamps.try_lock() {
            Ok(ts) => {
                let now = Instant::now();
                let active = ts
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window_duration)
                    .count() as u64;
                Some(self.max_requests.saturating_sub(active))
            }
            Err(_) => None,
        }
    }

    /// Access the request tracker for recording outcomes.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// The configured max requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

/// Atomic counters tracking geocoder outcomes.
pub struct RequestTracker {
    requests_made: AtomicU64,
    found: AtomicU64,
    not_found: AtomicU64,
    quota_exceeded: AtomicU64,
    failed: AtomicU64,
    keyless_fallbacks: AtomicU64,
    cache_hits: AtomicU64,
}

impl RequestTracker {
    fn new() -> Self {
        Self {
            requests_made: AtomicU64::new(0),
            found: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            quota_exceeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            keyless_fallbacks: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn record_found(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_exceeded(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.quota_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_made.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keyless_fallback(&self) {
        self.keyless_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache hits do not count as requests.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the current counters.
    pub fn summary(&self) -> TrackerSummary {
        TrackerSummary {
            requests_made: self.requests_made.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            quota_exceeded: self.quota_exceeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            keyless_fallbacks: self.keyless_fallbacks.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of tracker counters for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSummary {
    pub requests_made: u64,
    pub found: u64,
    pub not_found: u64,
    pub quota_exceeded: u64,
    pub failed: u64,
    pub keyless_fallbacks: u64,
    pub cache_hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn acquire_under_limit() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));

        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(limiter.remaining_budget(), Some(0));
    }

    #[tokio::test]
    async fn acquire_at_limit_blocks() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(10)));

        for _ in 0..3 {
            limiter.acquire().await;
        }

        let limiter_clone = Arc::clone(&limiter);
        let handle = tokio::spawn(async move {
            limiter_clone.acquire().await;
        });

        // Just short of expiry -- task should still be pending
        tokio::time::advance(Duration::from_secs(9)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn window_expiry() {
        tokio::time::pause();

        let limiter = RateLimiter::new(2, Duration::from_secs(1));

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(0));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(limiter.remaining_budget(), Some(2));

        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(1));
    }

    #[tokio::test]
    async fn zero_budget_is_clamped_to_one() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 1);
        limiter.acquire().await;
        assert_eq!(limiter.remaining_budget(), Some(0));
    }

    #[test]
    fn tracker_counters() {
        let tracker = RequestTracker::new();

        tracker.record_found();
        tracker.record_found();
        tracker.record_not_found();
        tracker.record_quota_exceeded();
        tracker.record_failure();
        tracker.record_keyless_fallback();
        tracker.record_cache_hit();

        let summary = tracker.summary();
        assert_eq!(summary.requests_made, 5);
        assert_eq!(summary.found, 2);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.quota_exceeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.keyless_fallbacks, 1);
        assert_eq!(summary.cache_hits, 1);
    }

    #[tokio::test]
    async fn default_budget() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.max_requests(), DEFAULT_MAX_REQUESTS);
    }
}
