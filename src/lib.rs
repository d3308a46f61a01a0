//! android-tools
//!
//! Discovery of Android SDK, NDK and JDK installations, Android API level
//! metadata, `sdkmanager` and JDK installation, and the base contracts and
//! utilities for build tasks.
//!
//! ## Architecture
//!
//! - `android-tools-core`: errors, host platform, process execution, preferences
//! - `android-tools-toolchain`: discovery, API levels, sdkmanager, JDK installer
//! - `android-tools-tasks`: task bases, file utilities, pools, ABI helpers

#![warn(clippy::all)]

pub use android_tools_core as core;
pub use android_tools_tasks as tasks;
pub use android_tools_toolchain as toolchain;

/// Common imports
pub mod prelude {
    pub use android_tools_core::{CancellationToken, Platform, ToolsError, UserPreferences};
    pub use android_tools_tasks::{execute, execute_async, execute_tool, AndroidTask, AndroidToolTask, AsyncTask, Files};
    pub use android_tools_toolchain::{AndroidSdkInfo, AndroidVersions, JdkInfo, SdkInfoOptions, SdkManager};
}
