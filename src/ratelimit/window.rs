use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

use super::{Admission, RateLimiter};

/// Requests seen for one client in the current window.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
}

/// Shared client key -> window map. Owned by whoever builds the limiter so it
/// can be inspected or shared; sharded locking keeps keys independent.
#[derive(Clone, Default)]
pub struct RateWindows {
    inner: Arc<DashMap<String, RateWindow>>,
}

impl RateWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<RateWindow> {
        self.inner.get(key).map(|w| *w)
    }
}

/// Fixed-window counter: at most `limit` admissions per key per `window`.
/// A burst straddling a window boundary can reach `2 * limit`.
pub struct FixedWindowLimiter {
    windows: RateWindows,
    limit: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(windows: RateWindows, limit: u32, window: Duration) -> Self {
        Self {
            windows,
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check_at(&self, key: &str, now: Instant) -> Admission {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .windows
            .inner
            .entry(key.to_owned())
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
            });

        let elapsed = now.saturating_duration_since(entry.window_start);
        if elapsed >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count < self.limit {
            entry.count += 1;
            Admission::Allowed
        } else {
            let elapsed = now.saturating_duration_since(entry.window_start);
            Admission::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }

    pub fn evict_stale_at(&self, now: Instant) -> usize {
        let before = self.windows.inner.len();
        self.windows
            .inner
            .retain(|_, w| now.saturating_duration_since(w.window_start) < self.window);
        before.saturating_sub(self.windows.inner.len())
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> Admission {
        self.check_at(key, Instant::now())
    }

    fn evict_stale(&self) -> usize {
        self.evict_stale_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn limiter(limit: u32, window: Duration) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateWindows::new(), limit, window)
    }

    #[test]
    fn admits_up_to_limit_then_denies_until_window_rolls() {
        let limiter = limiter(3, Duration::from_secs(1));
        let t0 = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.check_at("client", t0), Admission::Allowed);
        }
        assert_eq!(
            limiter.check_at("client", t0 + Duration::from_millis(400)),
            Admission::Limited {
                retry_after: Duration::from_millis(600)
            }
        );
        assert_eq!(
            limiter.check_at("client", t0 + Duration::from_secs(1)),
            Admission::Allowed
        );
        let w = limiter.windows.get("client").unwrap();
        assert_eq!(w.count, 1);
        assert_eq!(w.window_start, t0 + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn real_clock_window_elapses() {
        let limiter = limiter(3, Duration::from_secs(1));
        for _ in 0..3 {
            assert!(limiter.check("k").is_allowed());
        }
        assert!(!limiter.check("k").is_allowed());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check("k").is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
    }

    #[test]
    fn denied_requests_do_not_grow_the_count() {
        let limiter = limiter(2, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..10 {
            limiter.check_at("a", now);
        }
        assert_eq!(limiter.windows.get("a").unwrap().count, 2);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let limiter = limiter(0, Duration::from_secs(10));
        assert!(matches!(
            limiter.check_at("a", Instant::now()),
            Admission::Limited { .. }
        ));
    }

    #[test]
    fn boundary_burst_is_bounded_by_twice_the_limit() {
        let limiter = limiter(5, Duration::from_secs(10));
        let t0 = Instant::now();
        let late = t0 + Duration::from_millis(9_999);
        let early = t0 + Duration::from_secs(10);
        assert!(limiter.check_at("a", t0).is_allowed());
        let mut admitted = 0;
        for _ in 0..4 {
            admitted += limiter.check_at("a", late).is_allowed() as u32;
        }
        for _ in 0..10 {
            admitted += limiter.check_at("a", early).is_allowed() as u32;
        }
        assert_eq!(admitted, 9);
    }

    #[test]
    fn eviction_drops_only_finished_windows() {
        let limiter = limiter(5, Duration::from_secs(10));
        let t0 = Instant::now();
        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(8));
        assert_eq!(limiter.evict_stale_at(t0 + Duration::from_secs(12)), 1);
        assert!(limiter.windows.get("old").is_none());
        assert!(limiter.windows.get("fresh").is_some());
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter(50, Duration::from_secs(60)));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.check_at("shared", now).is_allowed())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
