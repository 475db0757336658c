//! Per-Client Rate Limiting
//!
//! Sliding-window counter keyed by client identity (the peer's token
//! subject). Owned by the front-end boundary: read-only query traffic runs
//! through it, gateway game traffic does not. The window state is scoped
//! to one limiter instance, never global.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default budget for front-end peers: 60 requests per 60 seconds.
pub const FRONTEND_MAX_REQUESTS: usize = 60;

/// Default window length for front-end peers.
pub const FRONTEND_WINDOW: Duration = Duration::from_secs(60);

/// Every this many checks, keys whose hits have all aged out are dropped,
/// so the map tracks active clients only.
const SWEEP_INTERVAL: u64 = 64;

/// Sliding-window rate limiter. Each key keeps the timestamps of its hits
/// inside the window; a hit past the budget is refused and not recorded.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Limiter allowing `max_requests` per `window` per key.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    /// Limiter with the front-end defaults.
    pub fn frontend_default() -> Self {
        Self::new(FRONTEND_MAX_REQUESTS, FRONTEND_WINDOW)
    }

    /// Records a hit for `key` and says whether it fits the budget.
    /// Refused hits do not consume budget, so a throttled client recovers
    /// as soon as old hits age out of the window.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut hits = self
            .hits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Idle keys only ever get pruned here; without the sweep the map
        // would grow by one entry per client key forever.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == 0 {
            hits.retain(|_, entry| {
                entry
                    .back()
                    .is_some_and(|newest| now.duration_since(*newest) < self.window)
            });
        }

        let entry = hits.entry(key.to_string()).or_default();
        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.max_requests {
            return false;
        }
        entry.push_back(now);
        true
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_budget_then_blocks() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(!limiter.check("a"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_recovers_after_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(30));

        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("a"));
    }

    #[test]
    fn test_idle_keys_are_swept() {
        let limiter = RateLimiter::new(5, Duration::from_millis(50));

        limiter.check("idle");
        assert_eq!(limiter.tracked_keys(), 1);
        std::thread::sleep(Duration::from_millis(60));

        // Enough traffic on other keys to cross a sweep boundary
        for i in 0..SWEEP_INTERVAL {
            limiter.check(&format!("client-{i}"));
        }
        assert!(
            limiter.tracked_keys() <= SWEEP_INTERVAL as usize,
            "the aged-out key must be gone"
        );
    }

    #[test]
    fn test_refused_hits_do_not_extend_throttle() {
        let limiter = RateLimiter::new(1, Duration::from_millis(30));

        assert!(limiter.check("a"));
        // Hammering while throttled must not push recovery further out
        for _ in 0..5 {
            assert!(!limiter.check("a"));
        }

        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("a"));
    }
}
