//! Body of a forked worker process.
//!
//! ```text
//! fork() == 0
//!   ├─ SIGTERM/SIGHUP → default, SIGINT → ignored (the parent relays it as SIGTERM)
//!   ├─ close inherited write end of the shutdown pipe
//!   ├─ fresh current-thread runtime (nothing of the parent's reactor is reused)
//!   ├─ spawn pipe watcher: EOF → exit(1)
//!   └─ ServiceLauncher(OsSignals[SIGTERM, SIGHUP]).wait() → exit code
//!        error or panic → 2
//! ```

use std::os::fd::OwnedFd;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info};

use crate::config::Config;
use crate::error::LaunchError;
use crate::group::panic_message;
use crate::process::pipe::{ShutdownPipe, watch_parent};
use crate::service::{ExitStatus, ServiceLauncher, ServiceRef};
use crate::signals::{self, OsSignals, Signal};

/// Exit status of a child whose launcher failed unexpectedly.
pub const UNHANDLED_EXIT: i32 = 2;

/// Runs `service` inside a freshly forked child and returns its exit status.
///
/// Only call this in the child, right after `fork()`, with no runtime alive:
/// it resets signal dispositions and builds its own runtime. Status is the
/// launcher's exit code, `1` once the parent's end of `pipe` closes, or
/// [`UNHANDLED_EXIT`] on a launcher error or panic.
pub fn run_child(service: &ServiceRef, cfg: &Config, pipe: &mut ShutdownPipe) -> i32 {
    signals::restore_default(&[Signal::Terminate, Signal::Hangup]);
    signals::ignore(Signal::Interrupt);
    pipe.close_write();

    let watch = match pipe.try_clone_read() {
        Ok(fd) => fd,
        Err(source) => {
            let err = LaunchError::Pipe { source };
            error!(error = %err, "child cannot watch its parent");
            return UNHANDLED_EXIT;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(source) => {
            let err = LaunchError::Runtime { source };
            error!(error = %err, "child runtime failed");
            return UNHANDLED_EXIT;
        }
    };

    let service = ServiceRef::clone(service);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(serve(service, cfg, watch))
    }));
    // The pipe watcher sits in a blocking read; do not wait for it.
    runtime.shutdown_background();

    match result {
        Ok(Ok(status)) => status.code,
        Ok(Err(e)) => {
            error!(label = e.as_label(), error = %e, "Unhandled exception");
            UNHANDLED_EXIT
        }
        Err(payload) => {
            error!(error = %panic_message(payload.as_ref()), "Unhandled exception");
            UNHANDLED_EXIT
        }
    }
}

async fn serve(service: ServiceRef, cfg: &Config, watch: OwnedFd) -> Result<ExitStatus, LaunchError> {
    tokio::spawn(async move {
        match watch_parent(watch).await {
            Ok(()) => info!("Parent process has died unexpectedly, exiting"),
            Err(e) => error!(error = %e, "shutdown pipe watcher failed, exiting"),
        }
        std::process::exit(1);
    });

    let source = OsSignals::new(&[Signal::Terminate, Signal::Hangup])?;
    let mut launcher = ServiceLauncher::from_config(cfg, Box::new(source));
    launcher.launch_service(service);

    let status = launcher.wait().await;
    if let Some(signal) = status.signal {
        info!(code = status.code, "Caught {signal}, exiting");
    }
    Ok(status)
}
