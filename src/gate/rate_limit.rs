//! Per-user sliding-window rate limiter.
//!
//! Each user keeps a queue of the instants at which they were admitted.
//! On every check, entries older than the window are evicted first; the
//! request is allowed only while fewer than `max_requests` remain.
//! Denied requests are not recorded, so a denied burst does not extend the
//! penalty.
//!
//! The check-and-record step runs under one lock: two concurrent requests
//! from the same user can never both take the last slot.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_RATE_LIMIT_REQUESTS: usize = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Drop users whose windows are fully expired every this many checks, or on
/// every check once the map grows past `SWEEP_AFTER_USERS`.
const SWEEP_EVERY_CHECKS: usize = 64;
const SWEEP_AFTER_USERS: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitParams {
    /// Max admitted requests per user inside one window.
    pub max_requests: usize,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitParams {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_RATE_LIMIT_REQUESTS,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

#[derive(Debug)]
pub struct RateLimiter {
    params: RateLimitParams,
    window: Duration,
    users: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    checks: AtomicUsize,
}

impl RateLimiter {
    pub fn new(mut params: RateLimitParams) -> Self {
        // Basic parameter hygiene
        if params.max_requests == 0 {
            params.max_requests = 1;
        }
        if params.window_secs == 0 {
            params.window_secs = 1;
        }
        let window = Duration::seconds(params.window_secs.min(u32::MAX as u64) as i64);
        Self {
            params,
            window,
            users: Mutex::new(HashMap::new()),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn params(&self) -> &RateLimitParams {
        &self.params
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<DateTime<Utc>>>> {
        match self.users.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Check and record one request from `user_id` observed at `now`.
    pub fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Admission {
        let horizon = now - self.window;
        let mut users = self.lock();

        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if users.len() > SWEEP_AFTER_USERS || checks % SWEEP_EVERY_CHECKS == 0 {
            users.retain(|_, q| {
                evict_old(q, horizon);
                !q.is_empty()
            });
        }

        let queue = users.entry(user_id.to_string()).or_default();
        evict_old(queue, horizon);

        if queue.len() >= self.params.max_requests {
            return Admission::Denied;
        }
        queue.push_back(now);
        Admission::Allowed
    }

    /// Requests still counted against `user_id` at `now`.
    pub fn in_window(&self, user_id: &str, now: DateTime<Utc>) -> usize {
        let horizon = now - self.window;
        self.lock()
            .get(user_id)
            .map(|q| q.iter().filter(|t| **t > horizon).count())
            .unwrap_or(0)
    }

    pub fn tracked_users(&self) -> usize {
        self.lock().len()
    }
}

/// An entry exactly `window` old is already outside the window.
/// Gateway timestamps may arrive out of order, so the whole queue is scanned.
fn evict_old(queue: &mut VecDeque<DateTime<Utc>>, horizon: DateTime<Utc>) {
    queue.retain(|t| *t > horizon);
}
