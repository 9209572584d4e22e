use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{config::Config, domain::UserId};

// ============== Rate Limiter (Sliding Window) ==============

/// Per-identity admission history.
#[derive(Clone, Debug, Default)]
struct RateWindow {
    /// Admitted events, oldest first.
    timestamps: VecDeque<Instant>,
    blocked_count: u64,
    allowed_count: u64,
    last_blocked_at: Option<Instant>,
}

impl RateWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&front) = self.timestamps.front() {
            if now.saturating_duration_since(front) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn last_event(&self) -> Option<Instant> {
        let last_allowed = self.timestamps.back().copied();
        match (last_allowed, self.last_blocked_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

#[derive(Debug, Default)]
struct LimiterState {
    users: HashMap<UserId, RateWindow>,
    global_allowed: u64,
    global_blocked: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserRateStats {
    pub total_allowed: u64,
    pub total_blocked: u64,
    pub current_window: u32,
    pub remaining: u32,
    pub cooldown_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlobalRateStats {
    pub tracked_users: usize,
    pub active_in_window: usize,
    pub global_allowed: u64,
    pub global_blocked: u64,
    /// Percentage in `0.0..=100.0`.
    pub block_rate: f64,
    pub limit: u32,
    pub window: Duration,
}

/// Sliding-window admission control with admin bypass.
///
/// All state sits behind one mutex; contention is low and no lock is held
/// across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    admins: Vec<i64>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration, admins: Vec<i64>) -> Self {
        debug!(limit, window_secs = window.as_secs(), "rate limiter initialized");
        Self {
            limit,
            window,
            admins,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
            cfg.admin_ids.clone(),
        )
    }

    fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id.0)
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.is_allowed_at(user_id, Instant::now())
    }

    pub fn is_allowed_at(&self, user_id: UserId, now: Instant) -> bool {
        let mut st = self.lock();
        if self.is_admin(user_id) {
            st.global_allowed += 1;
            return true;
        }

        let window = self.window;
        let limit = self.limit as usize;
        let data = st.users.entry(user_id).or_default();
        data.prune(now, window);

        if data.timestamps.len() >= limit {
            data.blocked_count += 1;
            data.last_blocked_at = Some(now);
            let in_window = data.timestamps.len();
            let total_blocks = data.blocked_count;
            st.global_blocked += 1;
            debug!(
                %user_id,
                in_window,
                limit,
                total_blocks,
                "rate limited"
            );
            return false;
        }

        data.timestamps.push_back(now);
        data.allowed_count += 1;
        st.global_allowed += 1;
        true
    }

    /// Seconds until the oldest event leaves the window and frees a slot;
    /// 0 when the identity is under its limit.
    pub fn cooldown_seconds(&self, user_id: UserId) -> u64 {
        self.cooldown_seconds_at(user_id, Instant::now())
    }

    pub fn cooldown_seconds_at(&self, user_id: UserId, now: Instant) -> u64 {
        if self.is_admin(user_id) {
            return 0;
        }
        let mut st = self.lock();
        let Some(data) = st.users.get_mut(&user_id) else {
            return 0;
        };
        data.prune(now, self.window);

        if data.timestamps.len() < self.limit as usize {
            return 0;
        }
        let Some(&oldest) = data.timestamps.front() else {
            // limit == 0: nothing will ever free up a slot sooner than a window.
            return self.window.as_secs().max(1);
        };
        let until_free = (oldest + self.window).saturating_duration_since(now);
        (until_free.as_secs() + 1).max(1)
    }

    /// Slots left in the current window.
    pub fn remaining(&self, user_id: UserId) -> u32 {
        self.remaining_at(user_id, Instant::now())
    }

    pub fn remaining_at(&self, user_id: UserId, now: Instant) -> u32 {
        if self.is_admin(user_id) {
            return self.limit;
        }
        let mut st = self.lock();
        let Some(data) = st.users.get_mut(&user_id) else {
            return self.limit;
        };
        data.prune(now, self.window);
        self.limit.saturating_sub(data.timestamps.len() as u32)
    }

    pub fn user_stats(&self, user_id: UserId) -> UserRateStats {
        self.user_stats_at(user_id, Instant::now())
    }

    pub fn user_stats_at(&self, user_id: UserId, now: Instant) -> UserRateStats {
        let (total_allowed, total_blocked, current_window) = {
            let mut st = self.lock();
            match st.users.get_mut(&user_id) {
                Some(data) => {
                    data.prune(now, self.window);
                    (
                        data.allowed_count,
                        data.blocked_count,
                        data.timestamps.len() as u32,
                    )
                }
                None => (0, 0, 0),
            }
        };
        UserRateStats {
            total_allowed,
            total_blocked,
            current_window,
            remaining: self.remaining_at(user_id, now),
            cooldown_secs: self.cooldown_seconds_at(user_id, now),
        }
    }

    pub fn global_stats(&self) -> GlobalRateStats {
        self.global_stats_at(Instant::now())
    }

    pub fn global_stats_at(&self, now: Instant) -> GlobalRateStats {
        let st = self.lock();
        let active_in_window = st
            .users
            .values()
            .filter(|d| {
                d.timestamps
                    .iter()
                    .any(|&t| now.saturating_duration_since(t) < self.window)
            })
            .count();
        let decided = st.global_allowed + st.global_blocked;
        let block_rate = if decided > 0 {
            st.global_blocked as f64 / decided as f64 * 100.0
        } else {
            0.0
        };
        GlobalRateStats {
            tracked_users: st.users.len(),
            active_in_window,
            global_allowed: st.global_allowed,
            global_blocked: st.global_blocked,
            block_rate,
            limit: self.limit,
            window: self.window,
        }
    }

    /// Drop identities whose most recent event is older than `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        self.evict_stale_at(max_age, Instant::now())
    }

    pub fn evict_stale_at(&self, max_age: Duration, now: Instant) -> usize {
        let mut st = self.lock();
        let before = st.users.len();
        st.users.retain(|_, d| match d.last_event() {
            Some(t) => now.saturating_duration_since(t) <= max_age,
            None => false,
        });
        let removed = before - st.users.len();
        if removed > 0 {
            debug!(removed, "rate limiter cleanup");
        }
        removed
    }
}
