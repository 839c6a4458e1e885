//! Fixed-window request counters keyed by client.
//!
//! Each key owns one slot in a [`KeyedLocks`], so hits on different keys
//! never contend. Expired windows are dropped by [`WindowedCounter::purge_expired`],
//! which the worker runs on an interval.

use chrono::Duration;
use occtrack_core::types::Timestamp;

use crate::locks::KeyedLocks;

/// Counter state for one key.
#[derive(Debug, Default)]
struct Window {
    started_at: Option<Timestamp>,
    hits: u32,
}

impl Window {
    fn expired(&self, now: Timestamp, length: Duration) -> bool {
        self.started_at.map_or(true, |start| now - start >= length)
    }
}

/// Outcome of one [`WindowedCounter::hit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Hits left in the current window after this one.
    pub remaining: u32,
    /// When the current window closes.
    pub reset_at: Timestamp,
}

pub struct WindowedCounter {
    windows: KeyedLocks<Window>,
    length: Duration,
    max_hits: u32,
}

impl WindowedCounter {
    pub fn new(length: Duration, max_hits: u32) -> Self {
        Self {
            windows: KeyedLocks::new(),
            length,
            max_hits,
        }
    }

    /// Count a request for `key` at `now`.
    ///
    /// A rejected hit does not consume capacity.
    pub async fn hit(&self, key: &str, now: Timestamp) -> RateDecision {
        let mut window = self.windows.lock(key).await;
        if window.expired(now, self.length) {
            window.started_at = Some(now);
            window.hits = 0;
        }
        let reset_at = window.started_at.unwrap_or(now) + self.length;

        if window.hits >= self.max_hits {
            tracing::debug!(key, hits = window.hits, "Rate limit exceeded");
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }
        window.hits += 1;
        RateDecision {
            allowed: true,
            remaining: self.max_hits - window.hits,
            reset_at,
        }
    }

    /// Drop every idle window that has expired at `now`. Returns how many.
    pub fn purge_expired(&self, now: Timestamp) -> usize {
        let length = self.length;
        self.windows.retain_idle(|w| !w.expired(now, length))
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
