//! Per-client admission control.
//!
//! Callers only see [`RateLimiter::check`]; the fixed-window counter can be
//! swapped for a sliding-window or token-bucket limiter behind the same trait.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::debug;

pub mod middleware;
mod window;

pub use window::{FixedWindowLimiter, RateWindow, RateWindows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

pub trait RateLimiter: Send + Sync {
    /// Count one request for `key` and decide whether it may proceed.
    fn check(&self, key: &str) -> Admission;

    /// Drop state for clients that have gone quiet; returns how many were removed.
    fn evict_stale(&self) -> usize {
        0
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str) -> Admission {
        Admission::Allowed
    }
}

/// Periodically evicts stale client windows so the map stays bounded.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_stale();
            if evicted > 0 {
                debug!(evicted, "rate limit windows evicted");
            }
        }
    })
}
