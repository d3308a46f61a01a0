//! Android Toolchain Management
//!
//! Handles detection, download, and management of:
//! - Android SDK, NDK and JDK installations
//! - Android API level metadata
//! - `sdkmanager` packages and licenses
//! - Command-line tools and Microsoft OpenJDK installs

pub mod detector;
pub mod downloader;
pub mod jdk;
pub mod jdk_installer;
pub mod licenses;
pub mod locations;
pub mod manifest;
pub mod ndk;
pub mod registry;
pub mod sdk_manager;
pub mod versions;

pub use detector::{AndroidSdkInfo, SdkInfoOptions};
pub use downloader::Downloader;
pub use jdk::{known_system_jdks, latest_jdk, supported_jdks, JdkInfo, JdkVersion};
pub use jdk_installer::{JdkInstaller, DEFAULT_JDK_VERSION, SUPPORTED_JDK_VERSIONS};
pub use licenses::SdkLicense;
pub use locations::{Candidate, Locator};
pub use manifest::{ChecksumType, ManifestFeed, ManifestFormat, SdkArchive, SdkManifestComponent};
pub use ndk::{NdkInfo, NdkRevision};
pub use sdk_manager::{SdkManager, SdkPackage, SdkPackageList};
pub use versions::{AndroidVersion, AndroidVersions};
