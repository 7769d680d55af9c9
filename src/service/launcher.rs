//! # ServiceLauncher: a [`Services`] set plus signal-driven exit and reload.
//!
//! Signal handling is a strategy ([`SignalSource`]) held by the launcher; a launcher
//! without one simply runs until its services end.
//!
//! ```text
//! wait():
//!   loop
//!     select! {
//!       services.wait()  → stop() → ExitStatus { code: 0 }
//!       signals.recv()   → "Caught SIGxxx"
//!                            ├─ SIGHUP && daemon → stop(); restart(); continue
//!                            └─ otherwise       → disarm(); stop(); ExitStatus { code: 1, signal }
//!     }
//! ```

use tracing::{info, warn};

use crate::config::Config;
use crate::service::base::ServiceRef;
use crate::service::services::{DEFAULT_SERVICES_POOL, Services};
use crate::signals::{DaemonMode, Signal, SignalExit, SignalSource, is_reload_while_daemon};

/// How a launcher's `wait()` ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitStatus {
    /// Status to exit the process with.
    pub code: i32,
    /// The signal that ended the launcher, if any.
    pub signal: Option<Signal>,
}

impl ExitStatus {
    /// Clean stop, status `0`.
    pub const CLEAN: ExitStatus = ExitStatus {
        code: 0,
        signal: None,
    };

    /// True for a clean stop.
    pub fn is_clean(&self) -> bool {
        self.code == 0
    }
}

impl From<SignalExit> for ExitStatus {
    fn from(exit: SignalExit) -> Self {
        Self {
            code: exit.code,
            signal: Some(exit.signal),
        }
    }
}

/// Runs services in the current process until they end or a signal arrives.
pub struct ServiceLauncher {
    services: Services,
    signals: Option<Box<dyn SignalSource>>,
    daemon: DaemonMode,
}

impl ServiceLauncher {
    /// Creates a launcher reacting to the signals delivered by `signals`.
    pub fn new(pool_size: usize, signals: Box<dyn SignalSource>, daemon: DaemonMode) -> Self {
        Self {
            services: Services::new(pool_size),
            signals: Some(signals),
            daemon,
        }
    }

    /// Creates a launcher that never looks at signals.
    pub fn without_signals() -> Self {
        Self {
            services: Services::new(DEFAULT_SERVICES_POOL),
            signals: None,
            daemon: DaemonMode::Never,
        }
    }

    /// Creates a launcher sized and configured from `cfg`.
    pub fn from_config(cfg: &Config, signals: Box<dyn SignalSource>) -> Self {
        Self::new(cfg.services_pool_size, signals, cfg.daemon)
    }

    /// Adds a service and starts it.
    pub fn launch_service(&self, service: ServiceRef) {
        info!(service = service.name(), "launching service");
        self.services.add(service);
    }

    /// The managed services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Stops every service and waits for their runners.
    pub async fn stop(&self) {
        self.services.stop().await;
        self.services.wait().await;
    }

    /// Restarts every service in place.
    pub async fn restart(&self) {
        self.services.restart().await;
    }

    /// Runs until the services end or an exit signal arrives.
    pub async fn wait(&mut self) -> ExitStatus {
        loop {
            let caught = match self.signals.as_mut() {
                Some(signals) => tokio::select! {
                    _ = self.services.wait() => None,
                    sig = signals.recv() => match sig {
                        Some(sig) => Some(sig),
                        None => {
                            warn!("signal source closed, waiting for services");
                            self.services.wait().await;
                            None
                        }
                    },
                },
                None => {
                    self.services.wait().await;
                    None
                }
            };

            let Some(signal) = caught else {
                self.stop().await;
                return ExitStatus::CLEAN;
            };

            info!("Caught {signal}, stopping services");
            if is_reload_while_daemon(signal, self.daemon) {
                self.stop().await;
                info!("reloading services");
                self.restart().await;
                continue;
            }

            // Disarm before teardown: a second delivery must kill a hung stop().
            if let Some(signals) = self.signals.as_mut() {
                signals.disarm();
            }
            self.stop().await;
            return SignalExit::new(signal).into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::TaskError;
    use crate::service::base::{Service, ServiceCore};
    use crate::signals::ChannelSignals;

    #[derive(Default)]
    struct Probe {
        core: ServiceCore,
        stops: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Service for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn core(&self) -> &ServiceCore {
            &self.core
        }

        async fn start(&self) -> Result<(), TaskError> {
            if self.fail {
                return Err(TaskError::fail("no device"));
            }
            Ok(())
        }

        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.core.stop().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_services_ending_on_their_own_is_clean() {
        let mut launcher = ServiceLauncher::without_signals();
        let probe = Arc::new(Probe {
            fail: true,
            ..Default::default()
        });
        launcher.launch_service(probe.clone());
        assert_eq!(launcher.wait().await, ExitStatus::CLEAN);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_exits_with_signal_status() {
        let (tx, source) = ChannelSignals::channel();
        let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Always);
        let probe = Arc::new(Probe::default());
        launcher.launch_service(probe.clone());

        tx.send(Signal::Interrupt).unwrap();
        let status = launcher.wait().await;
        assert_eq!(status.code, 1);
        assert_eq!(status.signal, Some(Signal::Interrupt));
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hangup_in_foreground_exits() {
        let (tx, source) = ChannelSignals::channel();
        let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Never);
        launcher.launch_service(Arc::new(Probe::default()));

        tx.send(Signal::Hangup).unwrap();
        assert_eq!(launcher.wait().await.signal, Some(Signal::Hangup));
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn test_wait_future_is_send() {
        let (_tx, source) = ChannelSignals::channel();
        let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Never);
        assert_send(launcher.wait());
        let mut bare = ServiceLauncher::without_signals();
        assert_send(bare.wait());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_source_falls_back_to_services() {
        let (tx, source) = ChannelSignals::channel();
        drop(tx);
        let mut launcher = ServiceLauncher::new(0, Box::new(source), DaemonMode::Never);
        launcher.launch_service(Arc::new(Probe {
            fail: true,
            ..Default::default()
        }));
        assert!(launcher.wait().await.is_clean());
    }
}
