//! # Multi-process supervision.
//!
//! - [`ProcessLauncher`]: forks one worker per requested slot, respawns dead ones,
//!   relays `SIGHUP` (reload) and `SIGTERM` (stop) to them.
//! - [`ProcessOps`]: the kernel seam ([`OsProcesses`] in production).
//! - [`ShutdownPipe`]: lets children notice the parent's death.

mod child;
mod launcher;
mod ops;
mod pipe;

pub use child::{UNHANDLED_EXIT, run_child};
pub use launcher::{ProcessLauncher, ServiceRecord};
pub use ops::{ChildExit, OsProcesses, Pid, ProcessOps, Reaped};
pub use pipe::{ShutdownPipe, watch_parent};
