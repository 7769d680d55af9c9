//! Worker process body, run in real forked children.
//!
//! Every test forks while holding [`FORK`], so no other test's pipe ends leak
//! into a child and delay its EOF.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use garage_eye::{
    ChildExit, Config, DaemonMode, Pid, Service, ServiceCore, ServiceRef, ShutdownPipe, TaskError,
    UNHANDLED_EXIT, run_child,
};
use parking_lot::Mutex;

static FORK: Mutex<()> = Mutex::new(());

const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Reports readiness over a socket once started; optionally panics in `stop()`.
struct Worker {
    core: ServiceCore,
    ready: UnixStream,
    panic_on_stop: bool,
}

#[async_trait]
impl Service for Worker {
    fn name(&self) -> &str {
        "worker"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn start(&self) -> Result<(), TaskError> {
        let _ = (&self.ready).write_all(b"r");
        Ok(())
    }

    async fn stop(&self) {
        if self.panic_on_stop {
            panic!("camera wedged");
        }
        self.core.stop().await;
    }
}

/// Forks a child running the worker body; returns its pid and the readiness socket.
fn fork_worker(panic_on_stop: bool, pipe: &mut ShutdownPipe) -> (Pid, UnixStream) {
    let (ready_rx, ready_tx) = UnixStream::pair().unwrap();
    let service: ServiceRef = Arc::new(Worker {
        core: ServiceCore::default(),
        ready: ready_tx,
        panic_on_stop,
    });
    let cfg = Config {
        daemon: DaemonMode::Never,
        ..Config::default()
    };

    // SAFETY: the child only runs the worker body and leaves through _exit.
    match unsafe { libc::fork() } {
        -1 => panic!("fork failed: {}", io::Error::last_os_error()),
        0 => {
            let code = run_child(&service, &cfg, pipe);
            unsafe { libc::_exit(code) }
        }
        pid => (pid, ready_rx),
    }
}

fn await_ready(ready: &mut UnixStream) {
    ready.set_read_timeout(Some(EXIT_TIMEOUT)).unwrap();
    let mut byte = [0u8; 1];
    ready.read_exact(&mut byte).expect("worker never started its service");
}

fn try_reap(pid: Pid) -> Option<ChildExit> {
    let mut status = 0;
    let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    assert!(rc >= 0, "waitpid: {}", io::Error::last_os_error());
    (rc == pid).then(|| ChildExit::from_raw(status))
}

fn wait_exit(pid: Pid) -> ChildExit {
    let deadline = Instant::now() + EXIT_TIMEOUT;
    loop {
        if let Some(exit) = try_reap(pid) {
            return exit;
        }
        if Instant::now() > deadline {
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, std::ptr::null_mut(), 0);
            }
            panic!("worker {pid} did not exit");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn send(pid: Pid, signo: libc::c_int) {
    assert_eq!(unsafe { libc::kill(pid, signo) }, 0);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn worker_exits_once_parent_end_of_pipe_closes() {
    let _forking = FORK.lock();
    let mut pipe = ShutdownPipe::new().unwrap();
    let (pid, mut ready) = fork_worker(false, &mut pipe);
    await_ready(&mut ready);

    let before = Instant::now();
    pipe.close_write();
    assert_eq!(wait_exit(pid), ChildExit::Exited(1));
    assert!(before.elapsed() < Duration::from_secs(2));
}

#[test]
fn worker_ignores_interrupt_and_exits_one_on_terminate() {
    let _forking = FORK.lock();
    let mut pipe = ShutdownPipe::new().unwrap();
    let (pid, mut ready) = fork_worker(false, &mut pipe);
    await_ready(&mut ready);

    send(pid, libc::SIGINT);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(try_reap(pid), None, "SIGINT must not end a worker");

    send(pid, libc::SIGTERM);
    assert_eq!(wait_exit(pid), ChildExit::Exited(1));
}

#[test]
fn worker_panic_during_teardown_exits_unhandled() {
    let _forking = FORK.lock();
    let mut pipe = ShutdownPipe::new().unwrap();
    let (pid, mut ready) = fork_worker(true, &mut pipe);
    await_ready(&mut ready);

    send(pid, libc::SIGTERM);
    assert_eq!(wait_exit(pid), ChildExit::Exited(UNHANDLED_EXIT));
}
