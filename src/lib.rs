//! # garage-eye
//!
//! **garage-eye** is a home-monitoring daemon (garage door, time-lapse camera).
//! The monitoring work itself is a plain [`Job`]; this crate is mostly the
//! supervision runtime around it: worker processes that respawn, in-process
//! services with periodic timers, and signal-driven shutdown and reload.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ProcessLauncher (parent, no async runtime)                       │
//! │  - fork one child per worker slot, throttled                      │
//! │  - reap + respawn dead children                                   │
//! │  - SIGHUP → relay to children (daemon) / SIGTERM,SIGINT → stop    │
//! │  - ShutdownPipe: write end held by the parent only                │
//! └──────┬──────────────────────────┬─────────────────────────────────┘
//!        ▼ fork()                   ▼ fork()
//! ┌─────────────────────┐   ┌─────────────────────┐
//! │ child: runtime      │   │ child: runtime      │   pipe EOF → exit(1)
//! │  ServiceLauncher    │   │  ServiceLauncher    │
//! │   └─ Services       │   │   └─ Services       │
//! │       └─ Service    │   │       └─ Service    │
//! │           └─ Group  │   │           └─ Group  │
//! │              ├ task │   │              ├ task │
//! │              └ timer│   │              └ timer│
//! └─────────────────────┘   └─────────────────────┘
//! ```
//!
//! ### Shutdown
//! ```text
//! signal ─► launcher ─► Services::stop() ─► Service::stop() ─► TaskGroup::stop() + wait()
//!                                                              (tasks, timers cancelled)
//!        ◄──────────── completion signals, bottom-up ◄──────────────────────┘
//! ```
//!
//! ## Modules
//! | Area           | Description                                                   | Key types                                   |
//! |----------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Scheduling** | Task groups on a bounded pool, fixed and dynamic timers.      | [`TaskGroup`], [`PeriodicCall`], [`Flow`]   |
//! | **Services**   | Long-lived units, sets of them, the in-process launcher.      | [`Service`], [`Services`], [`ServiceLauncher`] |
//! | **Processes**  | Forked workers with respawn and signal relay.                 | [`ProcessLauncher`], [`ProcessOps`]         |
//! | **Signals**    | Signal sources and daemon detection.                          | [`SignalSource`], [`DaemonMode`]            |
//! | **Errors**     | Typed errors for launchers and tasks.                         | [`LaunchError`], [`TaskError`]              |
//! | **Config**     | TOML settings with defaults for every key.                    | [`Config`]                                  |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use garage_eye::{Flow, TaskGroup, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let group = TaskGroup::new(10);
//!     let timer = group.add_dynamic_timer::<u32, _, _>("countdown", None, None, {
//!         let mut left = 3;
//!         move || {
//!             left -= 1;
//!             let flow = if left == 0 { Flow::Done(42) } else { Flow::Idle(Duration::from_millis(5)) };
//!             async move { Ok::<_, TaskError>(flow) }
//!         }
//!     });
//!     assert_eq!(timer.wait().await.into_value(), Some(42));
//!     group.stop();
//!     group.wait().await;
//! }
//! ```

mod app;
mod config;
mod error;
mod group;
mod process;
mod service;
mod signals;
mod sync;

// ---- Public re-exports ----

pub use app::{CaptureService, DEFAULT_INITIAL_DELAY, DEFAULT_INTERVAL, HeartbeatJob, Job};
pub use config::Config;
pub use error::{LaunchError, TaskError};
pub use group::{Flow, Outcome, PeriodicCall, Schedule, TaskGroup, TaskHandle, TimerSpec};
pub use process::{
    ChildExit, OsProcesses, Pid, ProcessLauncher, ProcessOps, Reaped, ServiceRecord, ShutdownPipe,
    UNHANDLED_EXIT, run_child, watch_parent,
};
pub use service::{
    DEFAULT_SERVICE_POOL, DEFAULT_SERVICES_POOL, ExitStatus, Service, ServiceCore, ServiceLauncher,
    ServiceRef, Services,
};
pub use signals::{
    ChannelSignals, DaemonMode, OsSignals, Signal, SignalExit, SignalSource, ignore, is_daemon,
    is_reload_while_daemon, restore_default,
};
pub use sync::Completion;
