//! Session sweeper
//!
//! Owns the two periodic registry checks (heartbeat timeout and idle
//! cleanup) behind an explicit start/stop lifecycle. Timeouts are evaluated
//! on each tick, so there is one timer per check, not per session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::support::shutdown::ShutdownSignal;

use super::registry::SharedSessionRegistry;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub heartbeat_check_period: Duration,
    pub idle_sweep_period: Duration,
}

impl From<&SessionConfig> for SweeperConfig {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            heartbeat_check_period: cfg.heartbeat_check_period(),
            idle_sweep_period: cfg.idle_sweep_period(),
        }
    }
}

pub struct SessionSweeper {
    registry: SharedSessionRegistry,
    config: SweeperConfig,
}

impl SessionSweeper {
    pub fn new(registry: SharedSessionRegistry, config: SweeperConfig) -> Self {
        Self { registry, config }
    }

    /// Spawn the background task. The first checks run one period after start.
    pub fn start(self) -> SweeperHandle {
        let stop = ShutdownSignal::new();
        let registry = self.registry.clone();
        let config = self.config;

        let task = {
            let stop = stop.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                info!(
                    heartbeat_check_secs = config.heartbeat_check_period.as_secs(),
                    idle_sweep_secs = config.idle_sweep_period.as_secs(),
                    "Session sweeper started"
                );

                let now = Instant::now();
                let mut heartbeat_tick = interval_at(
                    now + config.heartbeat_check_period,
                    config.heartbeat_check_period,
                );
                let mut idle_tick =
                    interval_at(now + config.idle_sweep_period, config.idle_sweep_period);
                heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = heartbeat_tick.tick() => {
                            let evicted = registry.check_heartbeats();
                            if !evicted.is_empty() {
                                warn!(count = evicted.len(), devices = ?evicted, "Evicted sessions after heartbeat timeout");
                            }
                        }
                        _ = idle_tick.tick() => {
                            let evicted = registry.sweep();
                            debug!(count = evicted.len(), "Idle sweep finished");
                        }
                        _ = stop.wait() => break,
                    }
                }

                info!("Session sweeper stopped");
            })
        };

        SweeperHandle {
            registry,
            stop,
            task,
        }
    }
}

/// Running sweeper. Dropping the handle leaves the task running;
/// call [`stop`](Self::stop) to end it.
pub struct SweeperHandle {
    registry: SharedSessionRegistry,
    stop: ShutdownSignal,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Flush-close every open session, then stop both checks.
    /// Returns the number of sessions closed.
    pub async fn stop(self) -> usize {
        let closed = self.registry.close_all();
        info!(closed, "Closed remaining sessions");
        self.stop.trigger();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session sweeper task ended abnormally");
        }
        closed
    }
}
