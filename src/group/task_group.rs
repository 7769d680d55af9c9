//! # Task group: a cooperative scheduling context.
//!
//! A [`TaskGroup`] owns a bounded pool of concurrently runnable tasks plus the
//! periodic timers started through it, and provides cancellation and join for all
//! of them.
//!
//! ## Architecture
//! ```text
//! add_task(name, fut) ──► spawn(run_task) ──► [permit] ──► fut ──► Outcome
//!                          │                                         │
//!                          └─► tasks[key] = TaskHandle               └─► remove tasks[key]
//!                                                                        done.send(outcome)
//! add_periodic_timer / add_dynamic_timer ──► PeriodicCall::start ──► timers.push
//!
//! stop():  cancel every task  (except the caller)
//!          cancel every timer (the caller's own timer is only asked to stop)
//!          timers → draining   (no longer tracked as active)
//! wait():  await draining + active timers, then every task (except the caller)
//!          Cancelled → silent, Failed → logged, never returned
//! ```
//!
//! ## Rules
//! - `add_task` never blocks; the pool permit is acquired inside the spawned task.
//! - A task leaves the live set exactly once, right before its completion fires.
//! - `stop()` never fails and never cancels the task that calls it.
//! - Callers that need synchronous teardown pair `stop()` with `wait()`.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::select;
use tokio::sync::Semaphore;
use tokio::task::Id;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::group::outcome::{Flow, Outcome};
use crate::group::periodic::{PeriodicCall, TimerSpec};
use crate::group::runner::run_guarded;
use crate::sync::Completion;

/// Handle to a task spawned into a [`TaskGroup`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    name: Arc<str>,
    id: Id,
    token: CancellationToken,
    done: Completion<Outcome>,
}

impl TaskHandle {
    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runtime id of the underlying tokio task.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Requests cancellation at the task's next suspension point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the task to terminate.
    pub async fn wait(&self) -> Outcome {
        self.done.wait().await
    }

    /// True once the task terminated.
    pub fn is_finished(&self) -> bool {
        self.done.is_ready()
    }
}

/// Type-erased control surface of a periodic call, as seen by its group.
#[async_trait]
pub(crate) trait TimerControl: Send + Sync {
    fn name(&self) -> &str;
    fn stop(&self);
    fn cancel(&self);
    fn task_id(&self) -> Option<Id>;
    fn is_finished(&self) -> bool;
    async fn finish(&self) -> Outcome;
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> TimerControl for PeriodicCall<V> {
    fn name(&self) -> &str {
        PeriodicCall::name(self)
    }

    fn stop(&self) {
        PeriodicCall::stop(self)
    }

    fn cancel(&self) {
        PeriodicCall::cancel(self)
    }

    fn task_id(&self) -> Option<Id> {
        PeriodicCall::task_id(self)
    }

    fn is_finished(&self) -> bool {
        PeriodicCall::is_finished(self)
    }

    async fn finish(&self) -> Outcome {
        self.wait().await.erase()
    }
}

struct Inner {
    name: Cow<'static, str>,
    pool: Option<Arc<Semaphore>>,
    deadline: Option<Duration>,
    next_key: AtomicU64,
    tasks: Mutex<BTreeMap<u64, TaskHandle>>,
    timers: Mutex<Vec<Arc<dyn TimerControl>>>,
    draining: Mutex<Vec<Arc<dyn TimerControl>>>,
}

/// Cooperative scheduling context owning tasks and periodic timers. Cheap to clone.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

impl TaskGroup {
    /// Creates a group whose pool runs at most `pool_size` tasks at once (`0` = unbounded).
    pub fn new(pool_size: usize) -> Self {
        Self::with_options("group", pool_size, None)
    }

    /// Creates a named group with an optional deadline for every periodic callback.
    pub fn with_options(
        name: impl Into<Cow<'static, str>>,
        pool_size: usize,
        deadline: Option<Duration>,
    ) -> Self {
        let pool = match pool_size {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                pool,
                deadline,
                next_key: AtomicU64::new(0),
                tasks: Mutex::new(BTreeMap::new()),
                timers: Mutex::new(Vec::new()),
                draining: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Group name used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Schedules `fut` to run concurrently and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_task<Fut>(&self, name: impl Into<Cow<'static, str>>, fut: Fut) -> TaskHandle
    where
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into().as_ref());
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let done = Completion::new();

        // Hold the table lock across spawn so the task cannot remove itself before it is inserted.
        let mut tasks = self.inner.tasks.lock();
        let join = tokio::spawn(run_task(
            Arc::clone(&self.inner),
            key,
            Arc::clone(&name),
            token.clone(),
            done.clone(),
            fut,
        ));
        let handle = TaskHandle {
            name,
            id: join.id(),
            token,
            done,
        };
        tasks.insert(key, handle.clone());
        drop(tasks);

        debug!(group = %self.inner.name, task = %handle.name, "task added");
        handle
    }

    /// Starts a fixed-interval timer tracked by this group.
    pub fn add_periodic_timer<V, F, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        initial_delay: Option<Duration>,
        interval: Duration,
        callback: F,
    ) -> PeriodicCall<V>
    where
        V: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        let spec = TimerSpec::fixed(name, interval).with_initial_delay(initial_delay);
        self.add_timer(spec, callback)
    }

    /// Starts a dynamic timer tracked by this group.
    pub fn add_dynamic_timer<V, F, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        initial_delay: Option<Duration>,
        max_interval: Option<Duration>,
        callback: F,
    ) -> PeriodicCall<V>
    where
        V: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        let spec = TimerSpec::dynamic(name, max_interval).with_initial_delay(initial_delay);
        self.add_timer(spec, callback)
    }

    fn add_timer<V, F, Fut>(&self, spec: TimerSpec, callback: F) -> PeriodicCall<V>
    where
        V: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        let spec = spec.with_deadline(self.inner.deadline);
        let call = PeriodicCall::start(spec, callback);
        let mut timers = self.inner.timers.lock();
        timers.retain(|t| !t.is_finished());
        timers.push(Arc::new(call.clone()));
        drop(timers);
        debug!(group = %self.inner.name, timer = call.name(), "periodic timer started");
        call
    }

    /// Cancels every tracked task and timer except the caller's own.
    ///
    /// Timers are no longer tracked as active afterwards; tasks stay tracked until
    /// they report completion.
    pub fn stop(&self) {
        let current = tokio::task::try_id();

        let tasks: Vec<TaskHandle> = self.inner.tasks.lock().values().cloned().collect();
        debug!(group = %self.inner.name, tasks = tasks.len(), "stopping tasks");
        for task in tasks.iter().filter(|t| Some(t.id) != current) {
            task.cancel();
        }

        let timers = std::mem::take(&mut *self.inner.timers.lock());
        debug!(group = %self.inner.name, timers = timers.len(), "stopping timers");
        for timer in &timers {
            if timer.task_id().is_some() && timer.task_id() == current {
                timer.stop();
            } else {
                timer.cancel();
            }
        }
        self.inner.draining.lock().extend(timers);
    }

    /// Waits until every tracked timer and task (except the caller) terminated.
    ///
    /// Cancellation is swallowed; failures are logged and do not stop the wait.
    pub async fn wait(&self) {
        let current = tokio::task::try_id();
        debug!(group = %self.inner.name, "wait started");

        let timers: Vec<Arc<dyn TimerControl>> = {
            let draining = self.inner.draining.lock();
            let active = self.inner.timers.lock();
            draining.iter().chain(active.iter()).cloned().collect()
        };
        for timer in timers {
            if timer.task_id().is_some() && timer.task_id() == current {
                continue;
            }
            self.report(timer.name(), timer.finish().await);
        }
        self.inner.draining.lock().retain(|t| !t.is_finished());

        let tasks: Vec<TaskHandle> = self.inner.tasks.lock().values().cloned().collect();
        for task in tasks.into_iter().filter(|t| Some(t.id) != current) {
            self.report(&task.name, task.wait().await);
        }
        debug!(group = %self.inner.name, "wait ended");
    }

    fn report(&self, name: &str, outcome: Outcome) {
        match outcome {
            Outcome::Failed(e) => info!(
                group = %self.inner.name,
                member = name,
                label = e.as_label(),
                error = %e,
                "member ended with error"
            ),
            other => debug!(
                group = %self.inner.name,
                member = name,
                outcome = other.as_label(),
                "member ended"
            ),
        }
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// True if no task is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked timers that were not stopped yet.
    ///
    /// Timers that ended on their own are dropped on the next `add_*_timer` call.
    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }
}

async fn run_task<Fut>(
    inner: Arc<Inner>,
    key: u64,
    name: Arc<str>,
    token: CancellationToken,
    done: Completion<Outcome>,
    fut: Fut,
) where
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let pool = inner.pool.clone();
    let work = async move {
        let _permit = match pool {
            Some(sem) => Some(sem.acquire_owned().await.map_err(|_closed| TaskError::Canceled)?),
            None => None,
        };
        run_guarded(fut, None).await
    };

    let outcome = select! {
        res = work => match res {
            Ok(()) => Outcome::Done(()),
            Err(TaskError::Canceled) => Outcome::Cancelled,
            Err(e) => Outcome::Failed(Arc::new(e)),
        },
        _ = token.cancelled() => Outcome::Cancelled,
    };

    if let Outcome::Failed(e) = &outcome {
        info!(group = %inner.name, task = %name, error = %e, "task failed");
    }
    inner.tasks.lock().remove(&key);
    done.send(outcome);
}
