use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pipeline::DiscoveryPipeline;

/// Default tick cadence for the discovery pipeline.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Drives `DiscoveryPipeline::run_tick` on a fixed interval. Overlap is
/// guarded with a `try_lock`, not a queue: if the previous tick hasn't
/// finished, the new tick is skipped outright rather than stacking up.
pub struct Scheduler {
    pipeline: Arc<DiscoveryPipeline>,
    interval: Duration,
    overlap_guard: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<DiscoveryPipeline>, interval: Duration) -> Self {
        Self { pipeline, interval, overlap_guard: Arc::new(Mutex::new(())) }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.run_one_tick().await;
        }
    }

    async fn run_one_tick(&self) {
        let guard = match self.overlap_guard.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("previous discovery tick still running, skipping this interval");
                return;
            }
        };

        match self.pipeline.run_tick().await {
            Ok(()) => info!("discovery tick completed"),
            Err(e) => warn!(error = %e, "discovery tick failed"),
        }
        drop(guard);
    }
}

