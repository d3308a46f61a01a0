//! android-tools core - shared types
//!
//! Errors, host platform detection, process execution and persisted user
//! preferences used by the toolchain and task crates.

pub mod config;
pub mod error;
pub mod platform;
pub mod process;

pub use config::UserPreferences;
pub use error::{Result, ToolsError};
pub use platform::{HostArch, HostOs, Platform};
pub use process::{OutputLine, ProcessExitState, ProcessRunOptions};

/// Re-exported so callers do not need a direct tokio-util dependency
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
