//! # OS signals, signal sources and daemon detection.
//!
//! Launchers never install handlers directly. They consume a [`SignalSource`]:
//!
//! - [`OsSignals`] listens to real Unix signals through `tokio::signal::unix`.
//! - [`ChannelSignals`] is fed from an `mpsc` channel (embedding, tests).
//!
//! A received signal becomes a [`SignalExit`] at the launcher layer. Whether a
//! `SIGHUP` means "reload in place" or "exit" depends on the [`DaemonMode`]:
//!
//! ```text
//! SIGHUP ─► is_reload_while_daemon(sig, mode)
//!             Auto   → is_daemon()  (process group ≠ terminal foreground group)
//!             Always → reload
//!             Never  → exit
//! ```

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::task::Poll;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::LaunchError;

/// Signals the supervision runtime reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// `SIGTERM`: graceful stop.
    Terminate,
    /// `SIGINT`: interactive stop (Ctrl-C).
    Interrupt,
    /// `SIGHUP`: reload when daemonized, stop otherwise.
    Hangup,
}

impl Signal {
    /// Raw signal number.
    pub fn signo(self) -> i32 {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Interrupt => libc::SIGINT,
            Signal::Hangup => libc::SIGHUP,
        }
    }

    /// Conventional name, e.g. `SIGTERM`.
    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Interrupt => "SIGINT",
            Signal::Hangup => "SIGHUP",
        }
    }

    /// Maps a raw signal number back, if it is one we handle.
    pub fn from_signo(signo: i32) -> Option<Self> {
        match signo {
            libc::SIGTERM => Some(Signal::Terminate),
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGHUP => Some(Signal::Hangup),
            _ => None,
        }
    }

    fn kind(self) -> SignalKind {
        SignalKind::from_raw(self.signo())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signal converted into an exit request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalExit {
    /// The signal that was caught.
    pub signal: Signal,
    /// Process exit status to report.
    pub code: i32,
}

impl SignalExit {
    /// Exit request with the default status `1`.
    pub fn new(signal: Signal) -> Self {
        Self { signal, code: 1 }
    }
}

/// Source of signals consumed by a launcher.
///
/// Launchers hold the source across `.await` points of a spawnable future,
/// hence `Send + Sync`.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Waits for the next signal; `None` means the source is closed for good.
    async fn recv(&mut self) -> Option<Signal>;

    /// Called once the launcher decided to exit on a signal, before it stops its services.
    ///
    /// OS-backed sources give the signals back to their default disposition so a
    /// second delivery terminates the process immediately.
    fn disarm(&mut self) {}
}

/// Real Unix signals delivered through the tokio reactor.
pub struct OsSignals {
    streams: Vec<(Signal, unix::Signal)>,
}

impl OsSignals {
    /// Starts listening for `signals`. Must be called from within a tokio runtime.
    pub fn new(signals: &[Signal]) -> Result<Self, LaunchError> {
        let streams = signals
            .iter()
            .map(|&s| {
                unix::signal(s.kind())
                    .map(|stream| (s, stream))
                    .map_err(|source| LaunchError::Signal { source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { streams })
    }

    /// Signals this source listens to.
    pub fn signals(&self) -> impl Iterator<Item = Signal> + '_ {
        self.streams.iter().map(|(s, _)| *s)
    }
}

#[async_trait]
impl SignalSource for OsSignals {
    async fn recv(&mut self) -> Option<Signal> {
        if self.streams.is_empty() {
            return None;
        }
        poll_fn(|cx| {
            for (signal, stream) in self.streams.iter_mut() {
                if let Poll::Ready(Some(())) = stream.poll_recv(cx) {
                    return Poll::Ready(Some(*signal));
                }
            }
            Poll::Pending
        })
        .await
    }

    fn disarm(&mut self) {
        let signals: Vec<Signal> = self.signals().collect();
        restore_default(&signals);
    }
}

/// Signals fed through a channel.
pub struct ChannelSignals {
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl ChannelSignals {
    /// Creates the source together with its sending side.
    pub fn channel() -> (mpsc::UnboundedSender<Signal>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl SignalSource for ChannelSignals {
    async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

/// Gives `signals` back to their default disposition.
pub fn restore_default(signals: &[Signal]) {
    for s in signals {
        // SAFETY: installing SIG_DFL has no memory-safety preconditions.
        unsafe {
            libc::signal(s.signo(), libc::SIG_DFL);
        }
    }
}

/// Ignores `signal` for the rest of the process lifetime (or until reinstalled).
pub fn ignore(signal: Signal) {
    // SAFETY: installing SIG_IGN has no memory-safety preconditions.
    unsafe {
        libc::signal(signal.signo(), libc::SIG_IGN);
    }
}

/// Returns `true` when the process is not in the foreground group of its terminal.
///
/// No controlling terminal on stdout (or any failed query) counts as daemon.
pub fn is_daemon() -> bool {
    // SAFETY: both calls only query process state.
    let (pgrp, foreground) = unsafe { (libc::getpgrp(), libc::tcgetpgrp(libc::STDOUT_FILENO)) };

    let daemon = if foreground < 0 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ENOTTY) | Some(libc::EBADF) => {
                debug!(error = %err, "stdout is not a terminal");
            }
            _ => warn!(error = %err, "terminal query failed, assuming daemon"),
        }
        true
    } else {
        pgrp != foreground
    };

    if daemon {
        info!("Daemon is set");
    }
    daemon
}

/// How `SIGHUP` is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    /// Decide with [`is_daemon`] each time a `SIGHUP` arrives.
    #[default]
    Auto,
    /// Always treat `SIGHUP` as reload.
    Always,
    /// Never reload; `SIGHUP` stops like any other signal.
    Never,
}

impl DaemonMode {
    /// Resolves the mode to a yes/no answer.
    pub fn resolve(self) -> bool {
        match self {
            DaemonMode::Auto => is_daemon(),
            DaemonMode::Always => true,
            DaemonMode::Never => false,
        }
    }
}

/// True when `signal` asks for an in-place reload rather than an exit.
pub fn is_reload_while_daemon(signal: Signal, mode: DaemonMode) -> bool {
    signal == Signal::Hangup && mode.resolve()
}
