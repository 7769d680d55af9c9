//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the launchers, the service groups
//! and the built-in capture service.
//!
//! Config is used in three ways:
//! 1. **Process supervision**: `ProcessLauncher::new(config)` (throttle, reap poll, daemon mode)
//! 2. **Service wiring**: pool sizes and the optional callback deadline
//! 3. **Application**: `CaptureService::from_config(&config)`
//!
//! ## Sentinel values
//! - `workers = 0` → no forking, services run inside the launching process
//! - `service_pool_size = 0` / `services_pool_size = 0` → unbounded task pool
//! - `callback_deadline = 0s` → periodic callbacks are not bounded
//!
//! ## File format
//! ```toml
//! workers = 1
//! spawn_throttle = "1s"
//! periodic_interval = "10s"
//! daemon = "auto"
//! log_level = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::LaunchError;
use crate::signals::DaemonMode;

/// Global configuration for the supervision runtime.
///
/// Every field has a default, so a configuration file only needs to name
/// what it changes.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of worker processes to fork (`0` = run in-process).
    pub workers: usize,

    /// Pause between two consecutive forks (guards against fork storms).
    #[serde(with = "humantime_serde")]
    pub spawn_throttle: Duration,

    /// How often the parent polls for dead children when none is pending.
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,

    /// Concurrency bound of each service's own task group.
    pub service_pool_size: usize,

    /// Concurrency bound of the group that runs the services themselves.
    pub services_pool_size: usize,

    /// Upper bound for one periodic callback invocation (`0s` = none).
    #[serde(with = "humantime_serde")]
    pub callback_deadline: Duration,

    /// Whether the capture service installs its periodic timer.
    pub periodic_enable: bool,

    /// Interval of the capture timer.
    #[serde(with = "humantime_serde")]
    pub periodic_interval: Duration,

    /// Delay before the first capture.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// How SIGHUP is interpreted (reload when daemonized, or pinned).
    pub daemon: DaemonMode,

    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,

    /// Optional log file; logs go to stderr when absent.
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Loads a configuration file, falling back to defaults for missing keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LaunchError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| LaunchError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&data).map_err(|e| LaunchError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Returns `true` when workers must be forked.
    #[inline]
    pub fn forks_workers(&self) -> bool {
        self.workers > 0
    }

    /// Returns the periodic callback deadline as an `Option`.
    ///
    /// - `None` → callbacks run unbounded
    /// - `Some(d)` → every invocation is cut off after `d`
    #[inline]
    pub fn deadline(&self) -> Option<Duration> {
        if self.callback_deadline == Duration::ZERO {
            None
        } else {
            Some(self.callback_deadline)
        }
    }

    /// Returns the initial delay as an `Option` (`0s` → `None`).
    #[inline]
    pub fn first_delay(&self) -> Option<Duration> {
        if self.initial_delay == Duration::ZERO {
            None
        } else {
            Some(self.initial_delay)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `workers = 1` (one supervised worker process)
    /// - `spawn_throttle = 1s`, `reap_interval = 10ms`
    /// - `service_pool_size = 100`, `services_pool_size = 10`
    /// - `callback_deadline = 0s` (unbounded)
    /// - capture timer enabled, every `10s`, first run after `1s`
    /// - `daemon = DaemonMode::Auto`, `log_level = "info"`
    fn default() -> Self {
        Self {
            workers: 1,
            spawn_throttle: Duration::from_secs(1),
            reap_interval: Duration::from_millis(10),
            service_pool_size: 100,
            services_pool_size: 10,
            callback_deadline: Duration::ZERO,
            periodic_enable: true,
            periodic_interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
            daemon: DaemonMode::Auto,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}
