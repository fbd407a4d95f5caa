//! Kinship Telemetry - Logging and run correlation.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats
//! - A run context that ties together the log lines of one audit or repair
//!
//! # Example
//!
//! ```rust,no_run
//! use kinship_telemetry::{LogConfig, LogFormat, RunContext, setup_logging};
//!
//! # fn main() -> Result<(), kinship_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("kinship_storage=warn");
//!
//! setup_logging(&config)?;
//!
//! let ctx = RunContext::new("audit").with_model("user");
//! let span = ctx.span();
//! let _guard = span.enter();
//! tracing::info!("auditing");
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`config`** (default): `From<&kinship_config::LoggingConfig>` for [`LogConfig`]

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::RunContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
