//! Dead-man's switch between the parent and its children.
//!
//! The parent keeps the write end of a pipe open for its whole life and never
//! writes to it. Children close their inherited copy of the write end and block
//! reading the read end: the read only returns (EOF) once every write end is
//! closed, which means the parent is gone.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{FromRawFd, OwnedFd};

use tracing::debug;

use crate::error::LaunchError;

/// Both ends of the shutdown pipe.
#[derive(Debug)]
pub struct ShutdownPipe {
    read: OwnedFd,
    write: Option<OwnedFd>,
}

impl ShutdownPipe {
    /// Creates the pipe.
    pub fn new() -> Result<Self, LaunchError> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` is a valid two-element buffer for pipe(2).
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(LaunchError::Pipe {
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: pipe(2) succeeded, both descriptors are fresh and owned by us.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            read,
            write: Some(write),
        })
    }

    /// Closes this process's copy of the write end.
    pub fn close_write(&mut self) {
        if self.write.take().is_some() {
            debug!("shutdown pipe write end closed");
        }
    }

    /// True while this process still holds the write end.
    pub fn holds_write(&self) -> bool {
        self.write.is_some()
    }

    /// Duplicates the read end for a watcher.
    pub fn try_clone_read(&self) -> io::Result<OwnedFd> {
        self.read.try_clone()
    }
}

/// Resolves once every write end of the pipe behind `read` is closed.
///
/// The blocking read runs on tokio's blocking pool.
pub async fn watch_parent(read: OwnedFd) -> io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut file = File::from(read);
        let mut buf = [0u8; 64];
        loop {
            match file.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .map_err(io::Error::other)?
}
