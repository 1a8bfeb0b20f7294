//! Stale stream sweeper.
//!
//! Periodically terminates ready streams nobody has requested for longer
//! than the stale threshold. Starting entries are left alone; their launch
//! is already bounded by the readiness timeout.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::manager::StreamManager;
use super::registry::StreamPhase;

/// Background reclaimer of idle streams.
#[derive(Clone)]
pub struct StaleSweeper {
    manager: StreamManager,
    stale_threshold: Duration,
    interval: Duration,
}

impl StaleSweeper {
    pub fn new(manager: StreamManager) -> Self {
        let config = manager.config();
        let stale_threshold = config.stale_threshold;
        let interval = config.sweep_interval;
        Self {
            manager,
            stale_threshold,
            interval,
        }
    }

    /// Run the sweep loop until `cancel_token` fires.
    ///
    /// Call once per service; the first sweep happens one interval after
    /// start.
    pub fn spawn(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                threshold_secs = self.stale_threshold.as_secs(),
                interval_secs = self.interval.as_secs(),
                "Stale stream sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Stale stream sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_at(Instant::now()).await;
                    }
                }
            }
        })
    }

    /// Reclaim every ready stream idle for longer than the threshold as of
    /// `now`. Returns the names that were reclaimed.
    pub async fn sweep_at(&self, now: Instant) -> Vec<String> {
        let registry = self.manager.registry();
        let mut reclaimed = Vec::new();

        for snapshot in registry.snapshot() {
            if snapshot.phase != StreamPhase::Ready {
                continue;
            }
            let idle = snapshot.idle_at(now);
            if idle <= self.stale_threshold {
                continue;
            }
            // Re-checked under the entry lock; a concurrent touch wins.
            let Some(retired) = registry.retire_if_idle(
                &snapshot.name,
                snapshot.generation,
                self.stale_threshold,
                now,
            ) else {
                continue;
            };

            info!(
                stream = %snapshot.name,
                idle_secs = idle.as_secs(),
                "Reclaiming stale stream"
            );
            self.manager.reclaim(retired).await;
            reclaimed.push(snapshot.name);
        }

        if !reclaimed.is_empty() {
            debug!(count = reclaimed.len(), "Sweep finished");
        }
        reclaimed
    }
}
