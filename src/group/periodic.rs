//! # Periodic calls: a callback repeated on a schedule.
//!
//! A [`PeriodicCall`] wraps a callback as a repeating task. Two schedules share one
//! driver loop:
//! - [`Schedule::Fixed`] runs the callback every `interval`, correcting for the time
//!   the callback itself took;
//! - [`Schedule::Dynamic`] sleeps for whatever the callback reports via
//!   [`Flow::Idle`], clamped to an optional ceiling.
//!
//! ## Loop
//! ```text
//! [initial_delay] (cancellable)
//! while running {
//!   ├─► t0 = now
//!   ├─► callback()  (deadline, panic guard, cancellable)
//!   │     ├─ Ok(Done(v))  ─► Outcome::Done(v), exit
//!   │     ├─ Err(e)       ─► Outcome::Failed(e), exit
//!   │     └─ Ok(flow)     ─► continue
//!   ├─► pause = schedule.pause_after(now - t0, flow)
//!   │     └─ fixed & overran ─► log overrun, no sleep
//!   └─► sleep(pause) (cancellable)
//! }
//! Outcome::Stopped
//! ```
//!
//! ## Rules
//! - The completion is signaled **exactly once**, whatever the exit path.
//! - [`PeriodicCall::stop`] only clears the running flag; the loop notices at its
//!   next check point. [`PeriodicCall::cancel`] also interrupts the current
//!   suspension point and resolves as [`Outcome::Cancelled`].
//! - Starting a call requires a running tokio runtime.

use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::select;
use tokio::task::Id;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::group::outcome::{Flow, Outcome};
use crate::group::runner::run_guarded;
use crate::sync::Completion;

/// How the delay between two invocations is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// Start an invocation every `interval`; overruns start the next one immediately.
    Fixed {
        /// Target distance between two invocation starts.
        interval: Duration,
    },
    /// Sleep for the idle time reported by the callback.
    Dynamic {
        /// Ceiling applied to the reported idle time.
        max_interval: Option<Duration>,
    },
}

/// Delay chosen after one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Pause {
    pub sleep: Duration,
    pub overrun: Option<Duration>,
}

impl Schedule {
    /// Computes the pause that follows an invocation which took `elapsed`.
    pub(crate) fn pause_after<V>(&self, elapsed: Duration, flow: &Flow<V>) -> Pause {
        match *self {
            Schedule::Fixed { interval } => {
                if elapsed < interval {
                    Pause {
                        sleep: interval - elapsed,
                        overrun: None,
                    }
                } else {
                    Pause {
                        sleep: Duration::ZERO,
                        overrun: Some(elapsed.saturating_sub(interval)),
                    }
                }
            }
            Schedule::Dynamic { max_interval } => {
                let idle = match flow {
                    Flow::Idle(d) => *d,
                    _ => Duration::ZERO,
                };
                Pause {
                    sleep: max_interval.map_or(idle, |max| idle.min(max)),
                    overrun: None,
                }
            }
        }
    }
}

/// Specification of a periodic call.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use garage_eye::{Schedule, TimerSpec};
///
/// let spec = TimerSpec::fixed("snapshot", Duration::from_secs(10))
///     .with_initial_delay(Some(Duration::from_secs(1)));
/// assert_eq!(spec.schedule(), Schedule::Fixed { interval: Duration::from_secs(10) });
/// ```
#[derive(Clone, Debug)]
pub struct TimerSpec {
    name: Cow<'static, str>,
    schedule: Schedule,
    initial_delay: Option<Duration>,
    deadline: Option<Duration>,
}

impl TimerSpec {
    /// Fixed-interval spec.
    pub fn fixed(name: impl Into<Cow<'static, str>>, interval: Duration) -> Self {
        Self::new(name, Schedule::Fixed { interval })
    }

    /// Dynamic spec with an optional idle ceiling.
    pub fn dynamic(name: impl Into<Cow<'static, str>>, max_interval: Option<Duration>) -> Self {
        Self::new(name, Schedule::Dynamic { max_interval })
    }

    fn new(name: impl Into<Cow<'static, str>>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            schedule,
            initial_delay: None,
            deadline: None,
        }
    }

    /// Returns a new spec with updated initial delay.
    pub fn with_initial_delay(mut self, delay: Option<Duration>) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Returns a new spec with a per-invocation deadline.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Timer name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the schedule.
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Returns the initial delay, if any.
    pub fn initial_delay(&self) -> Option<Duration> {
        self.initial_delay
    }

    /// Returns the per-invocation deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

struct Shared<V> {
    spec: TimerSpec,
    running: AtomicBool,
    token: CancellationToken,
    done: Completion<Outcome<V>>,
    iterations: AtomicU64,
    overruns: AtomicU64,
    task_id: OnceLock<Id>,
}

/// Handle to a running periodic call. Cheap to clone.
pub struct PeriodicCall<V = ()> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for PeriodicCall<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> PeriodicCall<V> {
    /// Spawns the driver loop for `spec` and returns its handle.
    pub fn start<F, Fut>(spec: TimerSpec, callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            spec,
            running: AtomicBool::new(true),
            token: CancellationToken::new(),
            done: Completion::new(),
            iterations: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            task_id: OnceLock::new(),
        });

        let join = tokio::spawn(drive(Arc::clone(&shared), callback));
        let _ = shared.task_id.set(join.id());
        Self { shared }
    }

    /// Starts a fixed-interval call.
    pub fn fixed_interval<F, Fut>(
        name: impl Into<Cow<'static, str>>,
        interval: Duration,
        initial_delay: Option<Duration>,
        callback: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        Self::start(
            TimerSpec::fixed(name, interval).with_initial_delay(initial_delay),
            callback,
        )
    }

    /// Starts a dynamic call whose callback reports the next idle time.
    pub fn dynamic<F, Fut>(
        name: impl Into<Cow<'static, str>>,
        initial_delay: Option<Duration>,
        max_interval: Option<Duration>,
        callback: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Flow<V>, TaskError>> + Send + 'static,
    {
        Self::start(
            TimerSpec::dynamic(name, max_interval).with_initial_delay(initial_delay),
            callback,
        )
    }

    /// Waits for the loop to finish and returns how it ended.
    pub async fn wait(&self) -> Outcome<V> {
        self.shared.done.wait().await
    }

    /// Returns the completion signal of this call.
    pub fn completion(&self) -> Completion<Outcome<V>> {
        self.shared.done.clone()
    }
}

impl<V> PeriodicCall<V> {
    /// Timer name.
    pub fn name(&self) -> &str {
        self.shared.spec.name()
    }

    /// Timer schedule.
    pub fn schedule(&self) -> Schedule {
        self.shared.spec.schedule()
    }

    /// Asks the loop to exit at its next check point.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Stops the loop and interrupts its current suspension point.
    pub fn cancel(&self) {
        self.stop();
        self.shared.token.cancel();
    }

    /// True while the loop has not been asked to stop and has not exited.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of completed callback invocations.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Relaxed)
    }

    /// Number of invocations that outlasted a fixed interval.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub(crate) fn task_id(&self) -> Option<Id> {
        self.shared.task_id.get().copied()
    }
}

impl<V: Clone> PeriodicCall<V> {
    /// True once the completion was signaled.
    pub fn is_finished(&self) -> bool {
        self.shared.done.is_ready()
    }
}

async fn drive<V, F, Fut>(shared: Arc<Shared<V>>, mut callback: F)
where
    V: Clone,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Flow<V>, TaskError>>,
{
    let outcome = shared.run_loop(&mut callback).await;
    shared.running.store(false, Ordering::Release);

    match &outcome {
        Outcome::Failed(e) => info!(
            timer = %shared.spec.name,
            label = e.as_label(),
            error = %e,
            "periodic call failed"
        ),
        other => debug!(
            timer = %shared.spec.name,
            outcome = other.as_label(),
            "periodic call finished"
        ),
    }
    shared.done.send(outcome);
}

impl<V> Shared<V> {
    async fn run_loop<F, Fut>(&self, callback: &mut F) -> Outcome<V>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Flow<V>, TaskError>>,
    {
        if let Some(delay) = self.spec.initial_delay {
            if !self.pause(delay).await {
                return Outcome::Cancelled;
            }
        }

        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            let res = select! {
                r = run_guarded(callback(), self.spec.deadline) => r,
                _ = self.token.cancelled() => return Outcome::Cancelled,
            };
            let elapsed = started.elapsed();
            self.iterations.fetch_add(1, Ordering::Relaxed);

            let flow = match res {
                Ok(Flow::Done(v)) => return Outcome::Done(v),
                Ok(flow) => flow,
                Err(TaskError::Canceled) => return Outcome::Cancelled,
                Err(e) => return Outcome::Failed(Arc::new(e)),
            };
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let pause = self.spec.schedule.pause_after(elapsed, &flow);
            match pause.overrun {
                Some(over) => {
                    self.overruns.fetch_add(1, Ordering::Relaxed);
                    info!(
                        timer = %self.spec.name,
                        overrun_ms = over.as_millis() as u64,
                        "task run outlasted interval"
                    );
                }
                None => debug!(
                    timer = %self.spec.name,
                    delay_ms = pause.sleep.as_millis() as u64,
                    "periodic call sleeping"
                ),
            }
            if !self.pause(pause.sleep).await {
                return Outcome::Cancelled;
            }
        }
        Outcome::Stopped
    }

    /// Sleeps for `d`; returns `false` if cancelled first.
    async fn pause(&self, d: Duration) -> bool {
        if d.is_zero() {
            tokio::task::yield_now().await;
            return !self.token.is_cancelled();
        }
        select! {
            _ = time::sleep(d) => true,
            _ = self.token.cancelled() => false,
        }
    }
}
