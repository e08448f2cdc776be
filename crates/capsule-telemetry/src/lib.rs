//! Capsule Telemetry - logging setup for hosts embedding `capsule-fetch`.
//!
//! The acquisition library only emits `tracing` events; it never installs a
//! subscriber. Binaries and test harnesses call [`setup_logging`] once at
//! startup to route those events somewhere useful.
//!
//! # Example
//!
//! ```rust,no_run
//! use capsule_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), capsule_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("capsule_fetch=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
