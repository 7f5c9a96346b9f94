//! Per-identity fixed-window rate limiting for execution requests.
//!
//! One mutex-guarded map for the whole process; limits reset on restart and
//! are not shared across instances.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Window length for the default limiter (1 minute).
pub const WINDOW: Duration = Duration::from_secs(60);

/// Requests allowed per identity per window.
pub const MAX_REQUESTS: u32 = 10;

#[derive(Debug)]
struct Entry {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in: Duration,
}

/// Fixed-window counter keyed by caller identity.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    entries: Mutex<HashMap<String, Entry>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check the caller's quota and consume one slot if allowed.
    ///
    /// A fresh or expired window replaces the entry with `count = 1`. A
    /// denied request is not charged.
    pub fn check_and_consume(&self, identity: &str) -> RateDecision {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        match entries.get_mut(identity) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= self.max_requests {
                    RateDecision {
                        allowed: false,
                        remaining: 0,
                        reset_in: entry.reset_at - now,
                    }
                } else {
                    entry.count += 1;
                    RateDecision {
                        allowed: true,
                        remaining: self.max_requests - entry.count,
                        reset_in: entry.reset_at - now,
                    }
                }
            }
            _ => {
                entries.insert(
                    identity.to_string(),
                    Entry {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                RateDecision {
                    allowed: true,
                    remaining: self.max_requests - 1,
                    reset_in: self.window,
                }
            }
        }
    }

    /// Drop entries whose window already elapsed. Scheduled by the server on
    /// an interval equal to the window; bounds memory to recent callers.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| now <= entry.reset_at);
    }

    #[cfg(test)]
    fn tracked_identities(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WINDOW, MAX_REQUESTS)
    }
}
