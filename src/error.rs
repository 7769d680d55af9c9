//! Error types used by the supervision runtime, its launchers and the work it runs.
//!
//! This module defines two main error enums:
//!
//! - [`LaunchError`]: errors raised by the launchers themselves (signals, fork, runtime setup).
//! - [`TaskError`]: errors raised by tasks, periodic callbacks and services.
//!
//! Both types provide helper methods (`as_label`, `as_message`) for logging.
//! Cancellation is modelled as [`TaskError::Canceled`] so that callers can tell an
//! intentional stop apart from a failure without unwinding.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the launchers.
///
/// These represent failures of the supervision machinery itself, never of the
/// services it runs.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// A process launcher was already constructed in this process.
    #[error("a process launcher can only be created once per process")]
    AlreadyLaunched,

    /// Installing or listening for an OS signal failed.
    #[error("signal registration failed: {source}")]
    Signal {
        #[source]
        source: std::io::Error,
    },

    /// Building the in-process scheduler failed.
    #[error("failed to build runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    /// `fork(2)` failed.
    #[error("fork failed: {source}")]
    Fork {
        #[source]
        source: std::io::Error,
    },

    /// Creating the shutdown pipe failed.
    #[error("shutdown pipe failed: {source}")]
    Pipe {
        #[source]
        source: std::io::Error,
    },

    /// `waitpid(2)` failed for a reason other than an interrupted call.
    #[error("reaping children failed: {source}")]
    Reap {
        #[source]
        source: std::io::Error,
    },

    /// Reading or parsing a configuration file failed.
    #[error("invalid config {path:?}: {reason}")]
    Config {
        /// File that was being loaded.
        path: PathBuf,
        /// Parser or I/O message.
        reason: String,
    },
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use garage_eye::LaunchError;
    ///
    /// assert_eq!(LaunchError::AlreadyLaunched.as_label(), "launch_already_launched");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::AlreadyLaunched => "launch_already_launched",
            LaunchError::Signal { .. } => "launch_signal",
            LaunchError::Runtime { .. } => "launch_runtime",
            LaunchError::Fork { .. } => "launch_fork",
            LaunchError::Pipe { .. } => "launch_pipe",
            LaunchError::Reap { .. } => "launch_reap",
            LaunchError::Config { .. } => "launch_config",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            LaunchError::AlreadyLaunched => "launcher already created".to_string(),
            LaunchError::Signal { source } => format!("signal: {source}"),
            LaunchError::Runtime { source } => format!("runtime: {source}"),
            LaunchError::Fork { source } => format!("fork: {source}"),
            LaunchError::Pipe { source } => format!("pipe: {source}"),
            LaunchError::Reap { source } => format!("reap: {source}"),
            LaunchError::Config { path, reason } => format!("config {}: {reason}", path.display()),
        }
    }
}

/// # Errors produced by tasks, periodic callbacks and services.
///
/// A periodic loop that sees any of these (other than [`TaskError::Canceled`])
/// terminates and publishes the error through its completion signal.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// A callback exceeded its deadline.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error (a panic inside a task ends up here).
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Ordinary failure reported by user code.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Work was cancelled by its owner.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use garage_eye::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            TaskError::Fatal { error } => format!("fatal: {error}"),
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Canceled => "context cancelled".to_string(),
        }
    }

    /// Indicates whether the failure is worth retrying on the next tick.
    ///
    /// Returns `true` for [`TaskError::Fail`] and [`TaskError::Timeout`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Timeout { .. })
    }

    /// True for [`TaskError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}
