//! Periodic housekeeping: limiter and pacer eviction, history TTL.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config, history::HistoryStore, messaging::pacing::OutboundPacer,
    security::RateLimiter,
};

#[derive(Clone, Copy, Debug)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    pub limiter_stale_after: Duration,
    pub history_ttl: Duration,
}

impl MaintenanceConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.maintenance_interval,
            limiter_stale_after: cfg.rate_limit_stale_after,
            history_ttl: cfg.history_ttl,
        }
    }
}

/// What one sweep removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_identities: usize,
    pub evicted_chats: usize,
    pub purged_turns: usize,
}

pub struct Maintenance {
    cfg: MaintenanceConfig,
    limiter: Arc<RateLimiter>,
    history: Arc<dyn HistoryStore>,
    pacer: Option<Arc<OutboundPacer>>,
}

impl Maintenance {
    pub fn new(
        cfg: MaintenanceConfig,
        limiter: Arc<RateLimiter>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            cfg,
            limiter,
            history,
            pacer: None,
        }
    }

    /// Also drop idle per-chat slots from `pacer` on each sweep.
    pub fn with_pacer(mut self, pacer: Arc<OutboundPacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// One pass. History errors are logged and do not stop the limiter sweep.
    pub async fn sweep(&self) -> SweepReport {
        let evicted_identities = self.limiter.evict_stale(self.cfg.limiter_stale_after);
        let evicted_chats = self.pacer.as_ref().map_or(0, |p| p.evict_idle());

        let purged_turns = match self.history.purge_older_than(self.cfg.history_ttl).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "history purge failed");
                0
            }
        };
        if let Err(e) = self.history.flush().await {
            warn!(error = %e, "history flush failed");
        }

        let report = SweepReport {
            evicted_identities,
            evicted_chats,
            purged_turns,
        };
        if report != SweepReport::default() {
            info!(evicted_identities, evicted_chats, purged_turns, "maintenance sweep");
        } else {
            debug!("maintenance sweep: nothing to do");
        }
        report
    }

    /// Run `sweep` every interval until `cancel` fires. The first sweep runs
    /// one interval after start.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.cfg.interval;
            let mut tick = tokio::time::interval_at(start, self.cfg.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        self.sweep().await;
                    }
                }
            }
            debug!("maintenance task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, Role, UserId},
        history::MemoryHistoryStore,
        messaging::pacing::PacingConfig,
    };

    fn maintenance(history: Arc<MemoryHistoryStore>, limiter: Arc<RateLimiter>) -> Maintenance {
        Maintenance::new(
            MaintenanceConfig {
                interval: Duration::from_secs(600),
                limiter_stale_after: Duration::ZERO,
                history_ttl: Duration::from_secs(24 * 3600),
            },
            limiter,
            history,
        )
    }

    #[tokio::test]
    async fn sweep_evicts_idle_identities() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60), vec![]));
        limiter.is_allowed_at(UserId(1), std::time::Instant::now() - Duration::from_secs(5));
        let history = Arc::new(MemoryHistoryStore::new());
        history.append(UserId(1), Role::User, "fresh").await.unwrap();

        let report = maintenance(history.clone(), limiter.clone()).sweep().await;
        assert_eq!(report.evicted_identities, 1);
        assert_eq!(report.purged_turns, 0);
        assert_eq!(history.fetch_recent(UserId(1), 5).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_forgets_idle_chat_slots() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60), vec![]));
        let history = Arc::new(MemoryHistoryStore::new());
        let pacer = Arc::new(OutboundPacer::new(PacingConfig {
            min_gap: Duration::from_millis(40),
            chat_gap: Duration::from_millis(300),
        }));
        let now = tokio::time::Instant::now();
        for chat in 1..=3 {
            pacer.reserve_at(Some(ChatId(chat)), now);
        }

        let sweeper = maintenance(history, limiter).with_pacer(pacer.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        pacer.reserve_at(Some(ChatId(4)), tokio::time::Instant::now());

        let report = sweeper.sweep().await;
        assert_eq!(report.evicted_chats, 3);
        assert_eq!(pacer.tracked_chats(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_stops_on_cancel() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60), vec![]));
        let history = Arc::new(MemoryHistoryStore::new());
        let cancel = CancellationToken::new();

        let handle = maintenance(history, limiter).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(1300)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
