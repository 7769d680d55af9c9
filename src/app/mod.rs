//! Application glue: the capture service and the jobs it runs.

mod capture;
mod job;

pub use capture::{CaptureService, DEFAULT_INITIAL_DELAY, DEFAULT_INTERVAL};
pub use job::{HeartbeatJob, Job};
