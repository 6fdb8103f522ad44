//! Sliding-window admission control per caller.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Rejected; the oldest request in the window ages out after `retry_after`
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Allows at most `limit` requests per caller within any `window`.
///
/// Each caller's window is updated under its own map entry lock, so checks
/// for different callers never contend.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request for `caller_id` unless it would exceed the limit.
    pub fn check(&self, caller_id: &str) -> RateDecision {
        self.check_at(caller_id, Instant::now())
    }

    pub(crate) fn check_at(&self, caller_id: &str, now: Instant) -> RateDecision {
        let mut requests = self.windows.entry(caller_id.to_string()).or_default();
        prune(&mut requests, now, self.window);

        if requests.len() >= self.limit {
            let retry_after = requests
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            tracing::warn!(caller_id, limit = self.limit, "rate limit exceeded");
            return RateDecision::Limited { retry_after };
        }

        requests.push_back(now);
        RateDecision::Allowed
    }

    /// Drops callers with no request inside the current window.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub(crate) fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, requests| {
            prune(requests, now, self.window);
            !requests.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of callers currently tracked.
    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = requests.front() {
        if now.saturating_duration_since(*oldest) < window {
            break;
        }
        requests.pop_front();
    }
}
