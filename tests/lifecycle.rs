//! End-to-end lifecycle tests: services, launchers, signals and the shutdown pipe.
//!
//! Tests run on tokio's paused clock where timing matters, so intervals are exact.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use garage_eye::{
    ChannelSignals, DaemonMode, ExitStatus, Flow, Service, ServiceCore, ServiceLauncher, Services,
    ShutdownPipe, Signal, TaskError, watch_parent,
};
use tokio::time::{self, Instant, timeout};

// ============================================================================
// Test Helpers
// ============================================================================

const TICK: Duration = Duration::from_millis(100);

/// Service whose `start()` installs a fixed-interval timer bumping a counter.
#[derive(Default)]
struct Counter {
    core: ServiceCore,
    ticks: Arc<AtomicUsize>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    resets: AtomicUsize,
}

#[async_trait]
impl Service for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn start(&self) -> Result<(), TaskError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let ticks = Arc::clone(&self.ticks);
        self.core.group().add_periodic_timer("count", Some(TICK), TICK, move || {
            ticks.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TaskError>(Flow::<()>::Continue) }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.core.stop().await;
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.core.reset();
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fixed_timer_service_counts_then_stops_promptly() {
    let services = Services::default();
    let svc = Arc::new(Counter::default());
    services.add(svc.clone());

    time::sleep(Duration::from_millis(350)).await;
    services.stop().await;

    let before = Instant::now();
    timeout(Duration::from_secs(1), services.wait())
        .await
        .expect("wait must return promptly after stop");
    assert!(before.elapsed() < TICK);

    let ticks = svc.ticks.load(Ordering::SeqCst);
    assert!((2..=3).contains(&ticks), "ticks = {ticks}");
    assert_eq!(svc.core().group().timer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn terminate_signal_stops_service_once() {
    let (tx, source) = ChannelSignals::channel();
    let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Always);
    let svc = Arc::new(Counter::default());
    launcher.launch_service(svc.clone());

    time::sleep(Duration::from_millis(250)).await;
    tx.send(Signal::Terminate).unwrap();

    let status = launcher.wait().await;
    assert_eq!(
        status,
        ExitStatus {
            code: 1,
            signal: Some(Signal::Terminate)
        }
    );
    assert_eq!(svc.stops.load(Ordering::SeqCst), 1);
    assert!(svc.core().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn hangup_while_daemonized_restarts_in_place() {
    let (tx, source) = ChannelSignals::channel();
    let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Always);
    let svc = Arc::new(Counter::default());
    launcher.launch_service(svc.clone());

    let running = tokio::spawn(async move { launcher.wait().await });

    time::sleep(Duration::from_millis(250)).await;
    let before_reload = svc.ticks.load(Ordering::SeqCst);
    tx.send(Signal::Hangup).unwrap();

    time::sleep(Duration::from_millis(250)).await;
    assert!(!running.is_finished(), "reload must not end the launcher");
    assert_eq!(svc.resets.load(Ordering::SeqCst), 1);
    assert_eq!(svc.starts.load(Ordering::SeqCst), 2);
    assert_eq!(svc.core().group().timer_count(), 1);
    assert!(svc.ticks.load(Ordering::SeqCst) > before_reload);

    tx.send(Signal::Terminate).unwrap();
    let status = running.await.unwrap();
    assert_eq!(status.signal, Some(Signal::Terminate));
    assert_eq!(status.code, 1);
}

#[tokio::test(start_paused = true)]
async fn hangup_in_foreground_exits() {
    let (tx, source) = ChannelSignals::channel();
    let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Never);
    let svc = Arc::new(Counter::default());
    launcher.launch_service(svc.clone());

    tx.send(Signal::Hangup).unwrap();
    let status = launcher.wait().await;
    assert_eq!(status.signal, Some(Signal::Hangup));
    assert_eq!(svc.resets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn child_notices_parent_death_through_pipe() {
    let mut pipe = ShutdownPipe::new().unwrap();
    let exited = Arc::new(AtomicUsize::new(0));

    let flag = Arc::clone(&exited);
    let watcher = tokio::spawn({
        let read = pipe.try_clone_read().unwrap();
        async move {
            watch_parent(read).await.unwrap();
            flag.store(1, Ordering::SeqCst);
        }
    });

    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exited.load(Ordering::SeqCst), 0);

    // The parent "dies": its write end goes away.
    pipe.close_write();
    timeout(Duration::from_secs(2), watcher)
        .await
        .expect("watcher must observe EOF")
        .unwrap();
    assert_eq!(exited.load(Ordering::SeqCst), 1);
}
