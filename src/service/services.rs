//! # Services: an ordered set of services sharing one runner group.
//!
//! Every member gets a runner task in the shared group. The runner calls
//! `start()` and then parks on the shared `done` signal, so a service whose
//! `start()` returns right after installing timers stays "running" until the
//! whole set is stopped.
//!
//! ```text
//! add(svc) ──► group.add_task(runner):  svc.start()? ─► done.wait()
//!
//! stop():    for svc in members: svc.stop(); svc.wait()
//!            done.send(())            (only if not sent yet)
//!            group.stop()             (cancels runners still inside start())
//!
//! restart(): stop() ─► done = new ─► svc.reset() ─► add runners again
//! ```

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::group::TaskGroup;
use crate::service::base::ServiceRef;
use crate::sync::Completion;

/// Default concurrency bound of the runner group.
pub const DEFAULT_SERVICES_POOL: usize = 10;

/// Ordered set of services driven together.
pub struct Services {
    members: Mutex<Vec<ServiceRef>>,
    group: TaskGroup,
    done: Mutex<Completion<()>>,
}

impl Services {
    /// Creates an empty set whose runner group is bounded by `pool_size` (`0` = unbounded).
    pub fn new(pool_size: usize) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            group: TaskGroup::with_options("services", pool_size, None),
            done: Mutex::new(Completion::new()),
        }
    }

    /// Adds a service and schedules its runner. Must be called inside a tokio runtime.
    pub fn add(&self, service: ServiceRef) {
        self.spawn_runner(&service);
        self.members.lock().push(service);
    }

    fn spawn_runner(&self, service: &ServiceRef) {
        let done = self.done.lock().clone();
        let svc = ServiceRef::clone(service);
        let name = format!("run:{}", service.name());
        self.group.add_task(name, async move {
            svc.start().await?;
            done.wait().await;
            Ok(())
        });
    }

    /// Stops every member, releases the runners and cancels what is left of them.
    ///
    /// Safe to call repeatedly: `done` is sent at most once per generation.
    pub async fn stop(&self) {
        let members = self.members.lock().clone();
        for svc in &members {
            debug!(service = svc.name(), "stopping service");
            svc.stop().await;
            svc.wait().await;
        }

        let done = self.done.lock().clone();
        if !done.is_ready() {
            done.send(());
        }
        self.group.stop();
    }

    /// Waits until every runner ended (normally after `stop()`).
    pub async fn wait(&self) {
        self.group.wait().await;
    }

    /// Stops the set and starts every member again in place.
    pub async fn restart(&self) {
        self.stop().await;
        self.group.wait().await;
        *self.done.lock() = Completion::new();

        let members = self.members.lock().clone();
        info!(services = members.len(), "restarting services");
        for svc in &members {
            svc.reset();
            self.spawn_runner(svc);
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the current generation was stopped.
    pub fn is_done(&self) -> bool {
        self.done.lock().is_ready()
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICES_POOL)
    }
}
