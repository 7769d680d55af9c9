//! # Services and the in-process launcher.
//!
//! - [`Service`] / [`ServiceCore`]: one long-lived unit owning its own task group.
//! - [`Services`]: an ordered set of services started, stopped and restarted together.
//! - [`ServiceLauncher`]: a [`Services`] set plus signal-driven exit and reload.

mod base;
mod launcher;
mod services;

pub use base::{DEFAULT_SERVICE_POOL, Service, ServiceCore, ServiceRef};
pub use launcher::{ExitStatus, ServiceLauncher};
pub use services::{DEFAULT_SERVICES_POOL, Services};
