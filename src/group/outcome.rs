//! Terminal states of tasks and periodic calls, and the control value periodic
//! callbacks hand back to their loop.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;

/// How a task or a periodic call ended.
///
/// Delivered exactly once through the owner's completion signal.
#[derive(Debug, Clone)]
pub enum Outcome<V = ()> {
    /// The work finished on its own, carrying its result value.
    Done(V),
    /// A periodic loop saw its running flag cleared and exited normally.
    Stopped,
    /// The owner cancelled the work at a suspension point.
    Cancelled,
    /// The work failed; the error is shared with every waiter.
    Failed(Arc<TaskError>),
}

impl<V> Outcome<V> {
    /// True only for [`Outcome::Failed`].
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// True for [`Outcome::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Returns the failure, if any.
    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the carried value for [`Outcome::Done`].
    pub fn into_value(self) -> Option<V> {
        match self {
            Outcome::Done(v) => Some(v),
            _ => None,
        }
    }

    /// Drops the carried value, keeping the terminal state.
    pub fn erase(self) -> Outcome<()> {
        match self {
            Outcome::Done(_) => Outcome::Done(()),
            Outcome::Stopped => Outcome::Stopped,
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Done(_) => "done",
            Outcome::Stopped => "stopped",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed(_) => "failed",
        }
    }
}

/// What a periodic callback asks its loop to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow<V = ()> {
    /// Keep looping; the schedule decides the delay.
    Continue,
    /// Keep looping after the given idle period (honored by dynamic schedules).
    Idle(Duration),
    /// Leave the loop, resolving the completion with `V`.
    Done(V),
}
