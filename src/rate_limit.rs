//! Per-user rate limiting for generation requests.
//!
//! Fixed-window counter backed by the shared store: the first request in a
//! window opens it, subsequent requests increment, and once the count
//! exceeds the capacity further requests are rejected until the window
//! elapses. A burst straddling a window boundary can admit close to 2N
//! requests; that approximation is accepted.
//!
//! The limiter fails open: on any store error the request is allowed and a
//! warning is logged. Availability wins over strict enforcement for this
//! non-critical control.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix timestamp when the current window resets. None when the check
    /// failed open and no window state is known.
    pub reset_at: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    max_per_window: u32,
    window_secs: i64,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_secs: i64) -> Self {
        assert!(max_per_window > 0, "Rate limit capacity must be positive");
        assert!(window_secs > 0, "Rate limit window must be positive");
        Self {
            max_per_window,
            window_secs,
        }
    }

    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Count a request against `key`'s current window and decide.
    pub fn check(&self, conn: &Connection, key: &str) -> RateDecision {
        self.check_at(conn, key, Utc::now().timestamp())
    }

    /// Like [`check`](Self::check) with an explicit clock, for tests.
    pub fn check_at(&self, conn: &Connection, key: &str, now: i64) -> RateDecision {
        match queries::hit_rate_window(conn, key, now, self.window_secs) {
            Ok((window_start, count)) => {
                let allowed = count <= self.max_per_window as i64;
                let remaining = (self.max_per_window as i64 - count).max(0) as u32;
                RateDecision {
                    allowed,
                    remaining,
                    reset_at: Some(window_start + self.window_secs),
                }
            }
            Err(e) => {
                // Fail open: a store hiccup must not block generations.
                tracing::warn!("Rate limiter store error for {}: {} (failing open)", key, e);
                RateDecision {
                    allowed: true,
                    remaining: 0,
                    reset_at: None,
                }
            }
        }
    }
}
