//! # ProcessLauncher: forks workers, respawns them, relays signals.
//!
//! One [`ServiceRecord`] per launched service tracks how many workers it wants and
//! which pids currently serve it. The launcher is a synchronous state machine: no
//! async runtime exists in the parent, so every fork starts from a clean slate.
//!
//! ```text
//! launch_service(svc, n) ─► fork n children (throttled)
//!
//! wait():
//!   loop
//!     respawn_children():  while running
//!                            reap one child ─► none: sleep(reap_interval)
//!                                          └─► its record below target: fork again (throttled)
//!     caught SIGHUP && daemon ─► SIGHUP to every child, running = true, continue
//!     otherwise               ─► break
//!   SIGTERM to every child, reap until none is left
//! ```
//!
//! A caught signal clears `running`; the loops notice it at their next poll.

use std::collections::{BTreeSet, HashMap};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::LaunchError;
use crate::process::ops::{ChildExit, OsProcesses, Pid, ProcessOps};
use crate::service::ServiceRef;
use crate::signals::{DaemonMode, Signal};

/// A launched service, its target worker count and its live pids.
pub struct ServiceRecord {
    service: ServiceRef,
    workers: usize,
    children: BTreeSet<Pid>,
}

impl ServiceRecord {
    fn new(service: ServiceRef, workers: usize) -> Self {
        Self {
            service,
            workers,
            children: BTreeSet::new(),
        }
    }

    /// The service run by every worker of this record.
    pub fn service(&self) -> &ServiceRef {
        &self.service
    }

    /// Desired number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of live workers.
    pub fn live(&self) -> usize {
        self.children.len()
    }

    fn wants_more(&self) -> bool {
        self.children.len() < self.workers
    }
}

/// Multi-process supervisor.
pub struct ProcessLauncher<P: ProcessOps = OsProcesses> {
    cfg: Config,
    ops: P,
    running: bool,
    caught: Option<Signal>,
    records: Vec<ServiceRecord>,
    children: HashMap<Pid, usize>,
}

impl ProcessLauncher<OsProcesses> {
    /// Creates the OS-backed launcher. Fails if one was already created in this process.
    pub fn new(cfg: Config) -> Result<Self, LaunchError> {
        let ops = OsProcesses::new(cfg.clone())?;
        Ok(Self::with_ops(cfg, ops))
    }
}

impl<P: ProcessOps> ProcessLauncher<P> {
    /// Creates a launcher over custom process operations.
    pub fn with_ops(cfg: Config, ops: P) -> Self {
        Self {
            cfg,
            ops,
            running: true,
            caught: None,
            records: Vec::new(),
            children: HashMap::new(),
        }
    }

    /// Forks `workers` children running `service`, one throttle period apart.
    pub fn launch_service(&mut self, service: ServiceRef, workers: usize) -> Result<(), LaunchError> {
        info!(service = service.name(), workers, "launch_service() starting workers");
        self.records.push(ServiceRecord::new(service, workers));
        let idx = self.records.len() - 1;

        self.poll_signal();
        self.refill(idx)
    }

    /// Supervises children until an exit signal arrives, then terminates them all.
    pub fn wait(&mut self) -> Result<(), LaunchError> {
        loop {
            self.respawn_children()?;

            let Some(signal) = self.caught.take() else {
                break;
            };
            info!("Caught {signal}, stopping children");
            if !self.is_reload(signal) {
                break;
            }

            for &pid in self.children.keys() {
                if let Err(e) = self.ops.kill(pid, Signal::Hangup) {
                    warn!(pid, error = %e, "failed to forward SIGHUP");
                }
            }
            self.running = true;
        }
        self.terminate_children()
    }

    /// Number of live children across all records.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Launched services.
    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    fn is_reload(&self, signal: Signal) -> bool {
        signal == Signal::Hangup
            && match self.cfg.daemon {
                DaemonMode::Auto => self.ops.is_daemon(),
                DaemonMode::Always => true,
                DaemonMode::Never => false,
            }
    }

    fn poll_signal(&mut self) {
        if let Some(signal) = self.ops.take_signal() {
            self.caught = Some(signal);
            self.running = false;
        }
    }

    /// Forks for record `idx` until it reaches its target, throttled.
    fn refill(&mut self, idx: usize) -> Result<(), LaunchError> {
        while self.running && self.records[idx].wants_more() {
            self.start_child(idx)?;
            self.ops.sleep(self.cfg.spawn_throttle);
            self.poll_signal();
        }
        Ok(())
    }

    fn start_child(&mut self, idx: usize) -> Result<Pid, LaunchError> {
        let pid = self.ops.spawn(&self.records[idx])?;
        info!(pid, service = self.records[idx].service.name(), "Started child");
        self.records[idx].children.insert(pid);
        self.children.insert(pid, idx);
        Ok(pid)
    }

    /// Reaps one child; returns the index of the record it belonged to.
    fn wait_child(&mut self) -> Result<Option<usize>, LaunchError> {
        let reaped = match self.ops.reap() {
            Ok(Some(reaped)) => reaped,
            Ok(None) => return Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => return Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                if !self.children.is_empty() {
                    warn!(tracked = self.children.len(), "no children left to reap, forgetting tracked pids");
                    self.children.clear();
                    for record in &mut self.records {
                        record.children.clear();
                    }
                }
                return Ok(None);
            }
            Err(source) => return Err(LaunchError::Reap { source }),
        };

        let pid = reaped.pid;
        match reaped.status {
            ChildExit::Signaled(signo) => info!(pid, signal = signo, "Child killed by signal"),
            ChildExit::Exited(code) => info!(pid, code, "Child exited"),
        }

        let Some(idx) = self.children.remove(&pid) else {
            info!(pid, "pid not in child list");
            return Ok(None);
        };
        self.records[idx].children.remove(&pid);
        Ok(Some(idx))
    }

    fn respawn_children(&mut self) -> Result<(), LaunchError> {
        loop {
            self.poll_signal();
            if !self.running {
                return Ok(());
            }
            match self.wait_child()? {
                Some(idx) => self.refill(idx)?,
                None => {
                    // Nothing reaped; records emptied by ECHILD are topped up here.
                    for idx in 0..self.records.len() {
                        self.refill(idx)?;
                    }
                    self.ops.sleep(self.cfg.reap_interval);
                }
            }
        }
    }

    fn terminate_children(&mut self) -> Result<(), LaunchError> {
        for &pid in self.children.keys() {
            if let Err(e) = self.ops.kill(pid, Signal::Terminate) {
                if e.raw_os_error() != Some(libc::ESRCH) {
                    warn!(pid, error = %e, "failed to send SIGTERM");
                }
            }
        }

        if !self.children.is_empty() {
            info!(children = self.children.len(), "Waiting on children to exit");
            while !self.children.is_empty() {
                if self.wait_child()?.is_none() {
                    self.ops.sleep(self.cfg.reap_interval);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::TaskError;
    use crate::process::ops::Reaped;
    use crate::service::{Service, ServiceCore};

    struct Camera {
        core: ServiceCore,
    }

    #[async_trait]
    impl Service for Camera {
        fn name(&self) -> &str {
            "camera"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        async fn start(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn camera() -> ServiceRef {
        Arc::new(Camera {
            core: ServiceCore::default(),
        })
    }

    /// What the fake kernel does on each `reap()` that finds no dead child queued.
    enum Step {
        Idle,
        Crash(usize),
        Signal(Signal),
        Stray(Pid),
        Fail(i32),
    }

    #[derive(Default)]
    struct FakeOps {
        script: VecDeque<Step>,
        next_pid: Pid,
        live: BTreeSet<Pid>,
        dead: VecDeque<Reaped>,
        pending: Option<Signal>,
        daemon: bool,
        spawned: Vec<Pid>,
        kills: Vec<(Pid, Signal)>,
        sleeps: Vec<Duration>,
        peak: usize,
    }

    impl FakeOps {
        fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                script: steps.into_iter().collect(),
                next_pid: 100,
                ..Default::default()
            }
        }

        fn die(&mut self, pid: Pid, status: ChildExit) {
            if self.live.remove(&pid) {
                self.dead.push_back(Reaped { pid, status });
            }
        }

        fn signals_sent(&self, signal: Signal) -> usize {
            self.kills.iter().filter(|(_, s)| *s == signal).count()
        }

        fn throttles(&self) -> usize {
            let throttle = Config::default().spawn_throttle;
            self.sleeps.iter().filter(|d| **d == throttle).count()
        }
    }

    impl ProcessOps for FakeOps {
        fn spawn(&mut self, _record: &ServiceRecord) -> Result<Pid, LaunchError> {
            self.next_pid += 1;
            self.live.insert(self.next_pid);
            self.spawned.push(self.next_pid);
            self.peak = self.peak.max(self.live.len());
            Ok(self.next_pid)
        }

        fn reap(&mut self) -> io::Result<Option<Reaped>> {
            if let Some(r) = self.dead.pop_front() {
                return Ok(Some(r));
            }
            match self.script.pop_front() {
                None => {
                    self.pending.get_or_insert(Signal::Terminate);
                    Ok(None)
                }
                Some(Step::Idle) => Ok(None),
                Some(Step::Signal(s)) => {
                    self.pending = Some(s);
                    Ok(None)
                }
                Some(Step::Crash(n)) => {
                    let victims: Vec<Pid> = self.live.iter().take(n).copied().collect();
                    for pid in victims {
                        self.die(pid, ChildExit::Signaled(libc::SIGSEGV));
                    }
                    Ok(self.dead.pop_front())
                }
                Some(Step::Stray(pid)) => Ok(Some(Reaped {
                    pid,
                    status: ChildExit::Exited(0),
                })),
                Some(Step::Fail(errno)) => Err(io::Error::from_raw_os_error(errno)),
            }
        }

        fn kill(&mut self, pid: Pid, signal: Signal) -> io::Result<()> {
            self.kills.push((pid, signal));
            if !self.live.contains(&pid) {
                return Err(io::Error::from_raw_os_error(libc::ESRCH));
            }
            if signal == Signal::Terminate {
                self.die(pid, ChildExit::Exited(1));
            }
            Ok(())
        }

        fn take_signal(&mut self) -> Option<Signal> {
            self.pending.take()
        }

        fn sleep(&mut self, dur: Duration) {
            self.sleeps.push(dur);
        }

        fn is_daemon(&self) -> bool {
            self.daemon
        }
    }

    fn launcher(ops: FakeOps, daemon: DaemonMode) -> ProcessLauncher<FakeOps> {
        let cfg = Config {
            daemon,
            ..Config::default()
        };
        ProcessLauncher::with_ops(cfg, ops)
    }

    #[test]
    fn test_launch_is_throttled() {
        let mut pl = launcher(FakeOps::scripted([]), DaemonMode::Never);
        pl.launch_service(camera(), 3).unwrap();
        assert_eq!(pl.child_count(), 3);
        assert_eq!(pl.ops.throttles(), 3);
        assert_eq!(pl.records()[0].live(), 3);
    }

    #[test]
    fn test_crashed_workers_are_respawned() {
        let ops = FakeOps::scripted([Step::Idle, Step::Crash(2), Step::Idle]);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 3).unwrap();
        pl.wait().unwrap();

        assert_eq!(pl.ops.spawned.len(), 5);
        assert_eq!(pl.ops.throttles(), 5);
        assert_eq!(pl.ops.peak, 3);
        assert_eq!(pl.ops.signals_sent(Signal::Terminate), 3);
        assert_eq!(pl.child_count(), 0);
        assert_eq!(pl.records()[0].live(), 0);
    }

    #[test]
    fn test_hangup_is_forwarded_when_daemonized() {
        let ops = FakeOps::scripted([Step::Signal(Signal::Hangup)]);
        let mut pl = launcher(ops, DaemonMode::Always);
        pl.launch_service(camera(), 2).unwrap();
        pl.wait().unwrap();

        assert_eq!(pl.ops.signals_sent(Signal::Hangup), 2);
        assert_eq!(pl.ops.signals_sent(Signal::Terminate), 2);
        assert_eq!(pl.ops.spawned.len(), 2);
    }

    #[test]
    fn test_hangup_in_foreground_stops_children() {
        let ops = FakeOps::scripted([Step::Signal(Signal::Hangup), Step::Idle, Step::Idle]);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 2).unwrap();
        pl.wait().unwrap();

        assert_eq!(pl.ops.signals_sent(Signal::Hangup), 0);
        assert_eq!(pl.ops.signals_sent(Signal::Terminate), 2);
        // Script steps after the signal are never consumed.
        assert_eq!(pl.ops.script.len(), 2);
    }

    #[test]
    fn test_auto_mode_asks_the_terminal() {
        let mut ops = FakeOps::scripted([Step::Signal(Signal::Hangup)]);
        ops.daemon = true;
        let mut pl = launcher(ops, DaemonMode::Auto);
        pl.launch_service(camera(), 1).unwrap();
        pl.wait().unwrap();
        assert_eq!(pl.ops.signals_sent(Signal::Hangup), 1);
    }

    #[test]
    fn test_unknown_pid_and_interrupted_reap_are_ignored() {
        let ops = FakeOps::scripted([Step::Stray(4242), Step::Fail(libc::EINTR), Step::Idle]);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 1).unwrap();
        pl.wait().unwrap();
        assert_eq!(pl.ops.spawned.len(), 1);
    }

    #[test]
    fn test_no_children_left_forgets_tracked_pids_and_refills() {
        let ops = FakeOps::scripted([Step::Fail(libc::ECHILD), Step::Idle]);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 2).unwrap();
        let forgotten = pl.ops.spawned.clone();
        pl.wait().unwrap();

        assert_eq!(pl.ops.spawned.len(), 4);
        assert_eq!(pl.child_count(), 0);
        // Only the replacements are still tracked when the stop arrives.
        let terminated: Vec<Pid> = pl.ops.kills.iter().map(|(pid, _)| *pid).collect();
        assert_eq!(terminated.len(), 2);
        assert!(terminated.iter().all(|pid| !forgotten.contains(pid)));
    }

    #[test]
    fn test_unexpected_reap_error_is_returned() {
        let ops = FakeOps::scripted([Step::Fail(libc::EINVAL)]);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 1).unwrap();
        let err = pl.wait().unwrap_err();
        assert_eq!(err.as_label(), "launch_reap");
    }

    #[test]
    fn test_signal_during_launch_stops_forking() {
        let mut ops = FakeOps::scripted([]);
        ops.pending = Some(Signal::Interrupt);
        let mut pl = launcher(ops, DaemonMode::Never);
        pl.launch_service(camera(), 3).unwrap();
        assert_eq!(pl.child_count(), 0);
        pl.wait().unwrap();
    }
}
