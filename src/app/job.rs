use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::TaskError;

/// One unit of monitoring work, run on every capture tick.
///
/// The runtime treats it as opaque; it must return within a bounded time
/// since the scheduler is cooperative.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// One-time setup before the first tick of every start.
    async fn prepare(&self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Runs one tick.
    async fn run(&self) -> Result<(), TaskError>;
}

/// Job that only logs a counter. Keeps the daemon observable without a camera.
#[derive(Debug, Default)]
pub struct HeartbeatJob {
    ticks: AtomicU64,
}

impl HeartbeatJob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Job for HeartbeatJob {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self) -> Result<(), TaskError> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        info!(tick, pid = std::process::id(), "heartbeat");
        Ok(())
    }
}
