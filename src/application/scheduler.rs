use super::engine::DispatchEngine;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Never tick faster than this.
pub const MIN_MATCHING_INTERVAL: Duration = Duration::from_millis(100);

/// Background task running `run_matching_pass` on a fixed period. A pass
/// that overruns its period delays the next one instead of bunching ticks.
pub struct MatchingScheduler {
    handle: JoinHandle<()>,
}

impl MatchingScheduler {
    pub fn spawn(engine: DispatchEngine, period: Duration) -> Self {
        let period = period.max(MIN_MATCHING_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match engine.run_matching_pass().await {
                    Ok(0) => {}
                    Ok(matched) => debug!(matched, "scheduled matching pass"),
                    Err(err) => warn!(error = %err, "matching pass failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for MatchingScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
