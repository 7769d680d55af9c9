//! # Cooperative scheduling: task groups and periodic calls.
//!
//! - [`TaskGroup`] runs one-shot tasks on a bounded pool and tracks the timers started through it.
//! - [`PeriodicCall`] repeatedly invokes a callback on a fixed or dynamic [`Schedule`].
//! - [`Outcome`] is how either kind of work ended; [`Flow`] is what a callback asks its loop to do next.

mod outcome;
mod periodic;
mod runner;
mod task_group;

pub use outcome::{Flow, Outcome};
pub use periodic::{PeriodicCall, Schedule, TimerSpec};
pub use task_group::{TaskGroup, TaskHandle};

pub(crate) use runner::panic_message;
