//! # Service: a long-lived unit hosted by a [`Services`](super::Services) set.
//!
//! A service owns a [`ServiceCore`]: its private [`TaskGroup`] plus a completion
//! signal that fires once `stop()` has torn the group down.
//!
//! ```text
//! start()  ──► install timers / tasks in core.group (may return immediately)
//! stop()   ──► group.stop() ─► group.wait() ─► done.send(())
//! wait()   ──► done.wait()
//! reset()  ──► done = Completion::new()      (ready for another start())
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TaskError;
use crate::group::TaskGroup;
use crate::sync::Completion;

/// Default concurrency bound of a service's own group.
pub const DEFAULT_SERVICE_POOL: usize = 100;

/// State every service embeds: its task group and its stop signal.
pub struct ServiceCore {
    group: TaskGroup,
    done: Mutex<Completion<()>>,
}

impl ServiceCore {
    /// Creates a core whose group runs at most `pool_size` tasks at once (`0` = unbounded).
    pub fn new(pool_size: usize) -> Self {
        Self::with_group(TaskGroup::new(pool_size))
    }

    /// Creates a core around an existing group.
    pub fn with_group(group: TaskGroup) -> Self {
        Self {
            group,
            done: Mutex::new(Completion::new()),
        }
    }

    /// The service's task group.
    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    /// Stops and joins the group, then signals completion (once).
    pub async fn stop(&self) {
        self.group.stop();
        self.group.wait().await;
        let done = self.done.lock().clone();
        done.send(());
    }

    /// Waits until `stop()` completed.
    pub async fn wait(&self) {
        let done = self.done.lock().clone();
        done.wait().await;
    }

    /// Replaces the completion signal so the service can be started again.
    pub fn reset(&self) {
        *self.done.lock() = Completion::new();
    }

    /// True once `stop()` completed and no `reset()` happened since.
    pub fn is_stopped(&self) -> bool {
        self.done.lock().is_ready()
    }
}

impl Default for ServiceCore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_POOL)
    }
}

/// A long-lived unit of work run by a [`Services`](super::Services) set.
///
/// Implementors provide `start()`; the lifecycle methods default to the embedded
/// [`ServiceCore`]. Overrides of `stop()` should still end with `self.core().stop()`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The embedded core.
    fn core(&self) -> &ServiceCore;

    /// Starts the service. May return immediately after installing timers,
    /// or keep running until the service's work is over.
    async fn start(&self) -> Result<(), TaskError>;

    /// Stops every task and timer of the service and waits for them.
    async fn stop(&self) {
        self.core().stop().await;
    }

    /// Waits until the service was stopped.
    async fn wait(&self) {
        self.core().wait().await;
    }

    /// Prepares the service for another `start()`.
    fn reset(&self) {
        self.core().reset();
    }
}

/// Shared handle to a service.
pub type ServiceRef = Arc<dyn Service>;
