//! The monitoring service: runs a [`Job`] on a fixed-interval timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::app::job::{HeartbeatJob, Job};
use crate::config::Config;
use crate::error::TaskError;
use crate::group::{Flow, TaskGroup};
use crate::service::{DEFAULT_SERVICE_POOL, Service, ServiceCore};

/// Default pause between two captures.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay before the first capture.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Periodically runs a job (a frame capture in production).
pub struct CaptureService {
    core: ServiceCore,
    job: Arc<dyn Job>,
    periodic_enable: bool,
    interval: Duration,
    initial_delay: Option<Duration>,
}

impl CaptureService {
    /// Creates the service with the built-in [`HeartbeatJob`].
    ///
    /// `periodic_interval_max` defaults to 10s when `None`.
    pub fn create(periodic_enable: bool, periodic_interval_max: Option<Duration>) -> Self {
        Self {
            core: ServiceCore::new(DEFAULT_SERVICE_POOL),
            job: Arc::new(HeartbeatJob::new()),
            periodic_enable,
            interval: periodic_interval_max.unwrap_or(DEFAULT_INTERVAL),
            initial_delay: Some(DEFAULT_INITIAL_DELAY),
        }
    }

    /// Creates the service from the configuration file settings.
    pub fn from_config(cfg: &Config) -> Self {
        let group = TaskGroup::with_options("capture", cfg.service_pool_size, cfg.deadline());
        Self {
            core: ServiceCore::with_group(group),
            job: Arc::new(HeartbeatJob::new()),
            periodic_enable: cfg.periodic_enable,
            interval: cfg.periodic_interval,
            initial_delay: cfg.first_delay(),
        }
    }

    /// Replaces the job run on every tick.
    pub fn with_job(mut self, job: Arc<dyn Job>) -> Self {
        self.job = job;
        self
    }

    /// Overrides the delay before the first tick (`None` = run immediately).
    pub fn with_initial_delay(mut self, delay: Option<Duration>) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Interval between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Service for CaptureService {
    fn name(&self) -> &str {
        "capture"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn start(&self) -> Result<(), TaskError> {
        info!(job = self.job.name(), "capture service started");
        self.job.prepare().await?;

        if self.periodic_enable {
            let job = Arc::clone(&self.job);
            self.core.group().add_periodic_timer(
                "capture",
                self.initial_delay,
                self.interval,
                move || {
                    let job = Arc::clone(&job);
                    async move {
                        // A bad tick must not end the time-lapse.
                        if let Err(e) = job.run().await {
                            warn!(job = job.name(), label = e.as_label(), error = %e, "capture failed");
                        }
                        Ok::<_, TaskError>(Flow::<()>::Continue)
                    }
                },
            );
        }
        Ok(())
    }

    async fn stop(&self) {
        info!("capture service stopping");
        self.core.stop().await;
    }
}
