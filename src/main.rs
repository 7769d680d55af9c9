//! garage-eye daemon entry point.
//!
//! # Usage
//!
//! ```bash
//! # One supervised worker process (default)
//! garage-eye --config /etc/garage-eye.toml
//!
//! # Run the services in this process, no forking
//! garage-eye --workers 0 --interval 30s
//!
//! # Debug logging
//! RUST_LOG=garage_eye=debug garage-eye
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown
//! - SIGHUP: restart services in place when daemonized, shutdown otherwise

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use garage_eye::{
    CaptureService, Config, DaemonMode, OsSignals, ProcessLauncher, ServiceLauncher, ServiceRef,
    Signal,
};

/// garage-eye - garage door and time-lapse monitor
#[derive(Parser, Debug)]
#[command(name = "garage-eye", version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker processes to fork (0 = run in this process)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Capture interval, e.g. "10s" or "1m"
    #[arg(short, long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// How SIGHUP is interpreted
    #[arg(long, value_enum)]
    daemon_mode: Option<DaemonMode>,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        if let Some(interval) = self.interval {
            cfg.periodic_interval = interval;
        }
        if let Some(level) = self.log_level {
            cfg.log_level = level;
        }
        if let Some(mode) = self.daemon_mode {
            cfg.daemon = mode;
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cfg = Args::parse().into_config()?;
    init_tracing(&cfg)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        workers = cfg.workers,
        "garage-eye starting"
    );

    let service: ServiceRef = Arc::new(CaptureService::from_config(&cfg));

    if cfg.forks_workers() {
        // No tokio runtime may exist in this process before fork().
        let mut launcher = ProcessLauncher::new(cfg.clone()).context("Failed to create process launcher")?;
        launcher
            .launch_service(service, cfg.workers)
            .context("Failed to launch workers")?;
        launcher.wait().context("Process supervision failed")?;
        info!("garage-eye stopped");
        return Ok(());
    }

    let code = run_in_process(&cfg, service)?;
    info!(code, "garage-eye stopped");
    process::exit(code);
}

/// Runs the services inside this process until a signal stops them.
fn run_in_process(cfg: &Config, service: ServiceRef) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let signals = OsSignals::new(&[Signal::Terminate, Signal::Interrupt, Signal::Hangup])
            .context("Failed to install signal handlers")?;
        let mut launcher = ServiceLauncher::from_config(cfg, Box::new(signals));
        launcher.launch_service(service);
        Ok::<_, anyhow::Error>(launcher.wait().await.code)
    })
}

/// Installs the global subscriber: `RUST_LOG` wins over the configured level.
fn init_tracing(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .context("Invalid log level")?;

    match &cfg.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
