//! # OS operations used by the process launcher.
//!
//! [`ProcessOps`] is the seam between the respawn state machine and the kernel.
//! [`OsProcesses`] implements it with `fork(2)`, `waitpid(2)` and `kill(2)`; tests
//! drive the launcher with a scripted implementation instead.
//!
//! Parent-side signals are recorded by a plain `sigaction` handler into an atomic
//! and polled by the launcher loop, which keeps the parent free of any async
//! runtime at the moment it forks.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::error::LaunchError;
use crate::process::child;
use crate::process::launcher::ServiceRecord;
use crate::process::pipe::ShutdownPipe;
use crate::signals::{self, Signal};

/// Process id.
pub type Pid = libc::pid_t;

/// How a child process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited with a status code.
    Exited(i32),
    /// Killed by a signal number.
    Signaled(i32),
}

impl ChildExit {
    /// Decodes a raw `waitpid` status.
    pub fn from_raw(status: libc::c_int) -> Self {
        if libc::WIFSIGNALED(status) {
            ChildExit::Signaled(libc::WTERMSIG(status))
        } else {
            ChildExit::Exited(libc::WEXITSTATUS(status))
        }
    }
}

/// A child collected by [`ProcessOps::reap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub status: ChildExit,
}

/// Kernel-facing operations of the process launcher.
pub trait ProcessOps {
    /// Starts one worker for `record`, returning its pid in the parent.
    fn spawn(&mut self, record: &ServiceRecord) -> Result<Pid, LaunchError>;

    /// Collects one dead child without blocking.
    fn reap(&mut self) -> io::Result<Option<Reaped>>;

    /// Sends `signal` to `pid`.
    fn kill(&mut self, pid: Pid, signal: Signal) -> io::Result<()>;

    /// Returns (and clears) the last signal delivered to this process.
    fn take_signal(&mut self) -> Option<Signal>;

    /// Blocks the calling thread.
    fn sleep(&mut self, dur: Duration);

    /// Whether this process runs detached from its terminal.
    fn is_daemon(&self) -> bool;
}

static LAUNCHED: AtomicBool = AtomicBool::new(false);
static CAUGHT: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    CAUGHT.store(signo, Ordering::SeqCst);
}

fn install_handler(signal: Signal) -> Result<(), LaunchError> {
    // SAFETY: the handler only performs an atomic store, which is async-signal-safe,
    // and `action` is fully initialized before being passed to sigaction(2).
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = record_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signal.signo(), &action, std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(LaunchError::Signal {
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// [`ProcessOps`] backed by the real kernel.
pub struct OsProcesses {
    cfg: Config,
    pipe: ShutdownPipe,
}

impl OsProcesses {
    /// Creates the shutdown pipe and installs the parent's signal handlers.
    ///
    /// Only one instance may exist per process.
    pub fn new(cfg: Config) -> Result<Self, LaunchError> {
        if LAUNCHED.swap(true, Ordering::SeqCst) {
            return Err(LaunchError::AlreadyLaunched);
        }
        let pipe = ShutdownPipe::new()?;
        for signal in [Signal::Terminate, Signal::Interrupt, Signal::Hangup] {
            install_handler(signal)?;
        }
        Ok(Self { cfg, pipe })
    }
}

impl ProcessOps for OsProcesses {
    fn spawn(&mut self, record: &ServiceRecord) -> Result<Pid, LaunchError> {
        // SAFETY: the parent runs no async runtime and no other threads at this point;
        // the child only touches its own copy of the address space before exiting.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(LaunchError::Fork {
                source: io::Error::last_os_error(),
            }),
            0 => {
                let code = child::run_child(record.service(), &self.cfg, &mut self.pipe);
                std::process::exit(code);
            }
            pid => Ok(pid),
        }
    }

    fn reap(&mut self) -> io::Result<Option<Reaped>> {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        match pid {
            -1 => Err(io::Error::last_os_error()),
            0 => Ok(None),
            pid => Ok(Some(Reaped {
                pid,
                status: ChildExit::from_raw(status),
            })),
        }
    }

    fn kill(&mut self, pid: Pid, signal: Signal) -> io::Result<()> {
        debug!(pid, signal = signal.name(), "sending signal");
        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(pid, signal.signo()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn take_signal(&mut self) -> Option<Signal> {
        Signal::from_signo(CAUGHT.swap(0, Ordering::SeqCst))
    }

    fn sleep(&mut self, dur: Duration) {
        std::thread::sleep(dur);
    }

    fn is_daemon(&self) -> bool {
        signals::is_daemon()
    }
}
