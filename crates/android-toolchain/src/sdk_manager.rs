//! SDK Manager
//!
//! Wraps the Android `sdkmanager` command-line tool to install and manage SDK
//! components, and bootstraps the command-line tools themselves from a
//! manifest feed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use android_tools_core::process::{self, ProcessExitState, ProcessRunOptions};
use android_tools_core::{CancellationToken, Platform, Result, ToolsError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::downloader::{self, Downloader};
use crate::licenses::{self, SdkLicense};
use crate::locations::version_key;
use crate::manifest::{ChecksumType, ManifestFeed};

/// Answers written to `sdkmanager` prompts
const PROMPT_ANSWERS: usize = 64;

// Non-zero exits carrying this output leave the SDK in the requested state
static BENIGN_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(all sdk package licenses accepted|licenses? (has|have) already been accepted|already accepted)")
        .expect("valid regex")
});

/// A package row from `sdkmanager --list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPackage {
    pub path: String,
    pub version: String,
    pub description: String,
    /// Install location relative to the SDK, for installed packages
    pub location: Option<String>,
    pub is_installed: bool,
}

/// Parsed `sdkmanager --list` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdkPackageList {
    pub installed: Vec<SdkPackage>,
    pub available: Vec<SdkPackage>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ListSection {
    None,
    Installed,
    Available,
}

/// Parse `sdkmanager --list` output.
///
/// Rows are pipe-delimited; header and dash rows are skipped and the
/// `Available Updates:` section ends parsing.
pub fn parse_sdk_manager_list(output: &str) -> SdkPackageList {
    let mut list = SdkPackageList::default();
    let mut section = ListSection::None;

    for line in output.lines() {
        let line = line.trim();

        if line.starts_with("Installed packages:") {
            section = ListSection::Installed;
            continue;
        }
        if line.starts_with("Available Packages:") {
            section = ListSection::Available;
            continue;
        }
        if line.starts_with("Available Updates:") {
            break;
        }
        if section == ListSection::None || line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split('|').map(str::trim).collect();
        if parts.len() < 3 || parts[0] == "Path" || parts[0].starts_with("---") {
            continue;
        }

        let installed = section == ListSection::Installed;
        let package = SdkPackage {
            path: parts[0].to_string(),
            version: parts[1].to_string(),
            description: parts[2].to_string(),
            location: if installed {
                parts.get(3).filter(|l| !l.is_empty()).map(|l| l.to_string())
            } else {
                None
            },
            is_installed: installed,
        };

        if installed {
            list.installed.push(package);
        } else {
            list.available.push(package);
        }
    }

    list
}

/// Whether `sdkmanager` output indicates a harmless failure
pub fn is_benign_failure(output: &str) -> bool {
    BENIGN_FAILURE.is_match(output)
}

/// Android SDK Manager wrapper
pub struct SdkManager {
    sdk_root: PathBuf,
    platform: Platform,
    java_home: Option<PathBuf>,
    downloader: Downloader,
    timeout: Option<Duration>,
}

impl SdkManager {
    /// Create a manager for the SDK at `sdk_root`; the directory may not exist yet
    pub fn new(sdk_root: impl Into<PathBuf>, platform: Platform) -> Result<Self> {
        Ok(Self {
            sdk_root: sdk_root.into(),
            platform,
            java_home: None,
            downloader: Downloader::new(Duration::from_secs(300))?,
            timeout: None,
        })
    }

    /// Set the JAVA_HOME for sdkmanager invocations
    pub fn with_java_home(mut self, java_home: impl Into<PathBuf>) -> Self {
        self.java_home = Some(java_home.into());
        self
    }

    /// Kill sdkmanager invocations running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sdk_root(&self) -> &Path {
        &self.sdk_root
    }

    /// Locate `sdkmanager`: `cmdline-tools/latest`, then versioned
    /// `cmdline-tools` directories newest first, then legacy `tools/bin`
    pub fn find_sdkmanager(&self) -> Result<PathBuf> {
        let exe = self.platform.sdkmanager_name();
        let cmdline_tools = self.sdk_root.join("cmdline-tools");

        let latest = cmdline_tools.join("latest").join("bin").join(&exe);
        if latest.is_file() {
            return Ok(latest);
        }

        let mut versioned: Vec<PathBuf> = std::fs::read_dir(&cmdline_tools)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path().join("bin").join(&exe))
            .filter(|p| p.is_file())
            .collect();
        versioned.sort_by_key(|p| {
            let version = p
                .parent()
                .and_then(Path::parent)
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            std::cmp::Reverse(version_key(&version))
        });
        if let Some(found) = versioned.into_iter().next() {
            return Ok(found);
        }

        let legacy = self.sdk_root.join("tools").join("bin").join(&exe);
        if legacy.is_file() {
            return Ok(legacy);
        }

        Err(ToolsError::InvalidOperation(format!(
            "sdkmanager not found in {:?}; bootstrap the command-line tools first",
            self.sdk_root
        )))
    }

    /// Install the newest command-line tools listed in `feed`.
    ///
    /// Returns the directory the tools were installed into,
    /// `<sdk>/cmdline-tools/<revision>`.
    pub async fn bootstrap(&self, feed: &ManifestFeed, cancel: &CancellationToken) -> Result<PathBuf> {
        let (component, archive) = feed.select_cmdline_tools(&self.platform).ok_or_else(|| {
            ToolsError::NotFound(format!(
                "command-line tools for {}/{}",
                self.platform.feed_os(),
                self.platform.feed_arch()
            ))
        })?;
        info!("Bootstrapping command-line tools {}", component.revision);

        // Removed on drop, whichever way this returns
        let temp = tempfile::tempdir()?;
        let archive_path = temp.path().join("cmdline-tools.zip");
        self.downloader
            .download_file(&archive.url, &archive_path, cancel, None)
            .await?;

        self.install_cmdline_tools(&archive_path, archive.checksum_type, &archive.checksum, &component.revision)
            .await
    }

    /// Install a downloaded command-line tools zip into
    /// `<sdk>/cmdline-tools/<revision>` after verifying its checksum.
    pub async fn install_cmdline_tools(
        &self,
        archive: &Path,
        checksum_type: ChecksumType,
        checksum: &str,
        revision: &str,
    ) -> Result<PathBuf> {
        downloader::verify_checksum(archive, checksum_type, checksum).await?;

        let temp = tempfile::tempdir()?;
        let extracted = temp.path().join("extracted");
        downloader::extract_zip(archive, &extracted).await?;

        let inner = extracted.join("cmdline-tools");
        let source = if inner.is_dir() { inner } else { extracted };
        let destination = self.sdk_root.join("cmdline-tools").join(revision);
        downloader::move_directory_with_backup(&source, &destination)?;
        downloader::set_executable_bits(&destination.join("bin"))?;

        info!("Command-line tools installed to {:?}", destination);
        Ok(destination)
    }

    /// Fetch the feed at `url` and bootstrap from it
    pub async fn bootstrap_from_url(&self, url: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let feed = ManifestFeed::fetch(self.downloader.client(), url).await?;
        self.bootstrap(&feed, cancel).await
    }

    fn command<I, S>(&self, args: I) -> Result<ProcessRunOptions>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sdk_root = self.sdk_root.display().to_string();
        let mut options = ProcessRunOptions::new(self.find_sdkmanager()?)
            .args(args)
            .arg(format!("--sdk_root={}", sdk_root))
            .env("ANDROID_SDK_ROOT", sdk_root.clone())
            .env("ANDROID_HOME", sdk_root);
        if let Some(java_home) = &self.java_home {
            options = options.env("JAVA_HOME", java_home.display().to_string());
        }
        if let Some(timeout) = self.timeout {
            options = options.timeout(timeout);
        }
        Ok(options)
    }

    async fn run(&self, options: ProcessRunOptions, cancel: &CancellationToken) -> Result<ProcessExitState> {
        let state = process::run_streaming(&options, cancel, |line| debug!("sdkmanager: {}", line.text())).await?;
        if state.success() {
            return Ok(state);
        }

        let combined = format!("{}\n{}", state.stdout, state.stderr);
        if is_benign_failure(&combined) {
            warn!("sdkmanager exited with {:?}, ignoring: licenses already accepted", state.exit_code);
            return Ok(state);
        }

        let message = if state.stderr.trim().is_empty() {
            state.stdout.trim().to_string()
        } else {
            state.stderr.trim().to_string()
        };
        Err(ToolsError::InvalidOperation(format!(
            "sdkmanager exited with {:?}: {}",
            state.exit_code, message
        )))
    }

    /// Install packages such as `platforms;android-34`
    pub async fn install(&self, packages: &[&str], accept_licenses: bool, cancel: &CancellationToken) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("Installing {}", packages.join(", "));
        let answer = if accept_licenses { "y" } else { "n" };
        let options = self
            .command(packages.iter().copied())?
            .stdin_lines(std::iter::repeat(answer).take(PROMPT_ANSWERS));
        self.run(options, cancel).await?;
        Ok(())
    }

    pub async fn uninstall(&self, packages: &[&str], cancel: &CancellationToken) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        info!("Uninstalling {}", packages.join(", "));
        let options = self.command(std::iter::once("--uninstall").chain(packages.iter().copied()))?;
        self.run(options, cancel).await?;
        Ok(())
    }

    /// Update every installed package
    pub async fn update(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Updating installed SDK packages");
        let options = self
            .command(["--update"])?
            .stdin_lines(std::iter::repeat("y").take(PROMPT_ANSWERS));
        self.run(options, cancel).await?;
        Ok(())
    }

    pub async fn list(&self, cancel: &CancellationToken) -> Result<SdkPackageList> {
        let state = self.run(self.command(["--list"])?, cancel).await?;
        Ok(parse_sdk_manager_list(&state.stdout))
    }

    /// Licenses that have not been accepted yet
    pub async fn licenses(&self, cancel: &CancellationToken) -> Result<Vec<SdkLicense>> {
        let options = self
            .command(["--licenses"])?
            .stdin_lines(std::iter::repeat("n").take(PROMPT_ANSWERS));
        let state = self.run(options, cancel).await?;
        Ok(licenses::parse_licenses(&state.stdout))
    }

    /// Record acceptance of a single license
    pub fn accept_license(&self, license: &SdkLicense) -> Result<bool> {
        licenses::accept_license(&self.sdk_root, license)
    }

    /// Accept every pending license, returning how many were newly accepted
    pub async fn accept_all_licenses(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut accepted = 0;
        for license in self.licenses(cancel).await? {
            if self.accept_license(&license)? {
                accepted += 1;
            }
        }
        info!("Accepted {} license(s)", accepted);
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use android_tools_core::{HostArch, HostOs};

    const LIST_OUTPUT: &str = "\
Installed packages:
  Path                 | Version | Description                    | Location
  -------              | ------- | -------                        | -------
  build-tools;34.0.0   | 34.0.0  | Android SDK Build-Tools 34     | build-tools/34.0.0
  platform-tools       | 34.0.5  | Android SDK Platform-Tools     | platform-tools

Available Packages:
  Path                                  | Version | Description
  -------                               | ------- | -------
  add-ons;addon-google_apis-google-15   | 3       | Google APIs
  platforms;android-34                  | 3       | Android SDK Platform 34

Available Updates:
  ID            | Installed | Available
  -------       | -------   | -------
  emulator      | 32.1.14   | 33.1.24
";

    #[test]
    fn test_parse_list() {
        let list = parse_sdk_manager_list(LIST_OUTPUT);
        assert_eq!(list.installed.len(), 2);
        assert_eq!(list.available.len(), 2);

        assert_eq!(
            list.installed[0],
            SdkPackage {
                path: "build-tools;34.0.0".into(),
                version: "34.0.0".into(),
                description: "Android SDK Build-Tools 34".into(),
                location: Some("build-tools/34.0.0".into()),
                is_installed: true,
            }
        );
        assert_eq!(list.available[1].path, "platforms;android-34");
        assert_eq!(list.available[1].location, None);
        assert!(!list.available[1].is_installed);
        assert!(list.available.iter().all(|p| p.path != "emulator"));
    }

    #[test]
    fn test_benign_failures() {
        assert!(is_benign_failure("All SDK package licenses accepted."));
        assert!(is_benign_failure("The license has already been accepted"));
        assert!(!is_benign_failure("Error: Failed to find package 'platforms;android-99'"));
    }

    #[test]
    fn test_find_sdkmanager_order() {
        let sdk = tempfile::tempdir().unwrap();
        let platform = Platform::new(HostOs::Linux, HostArch::X64);
        let manager = SdkManager::new(sdk.path(), platform).unwrap();

        assert!(matches!(manager.find_sdkmanager(), Err(ToolsError::InvalidOperation(_))));

        let make = |rel: &str| {
            let bin = sdk.path().join(rel).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("sdkmanager"), b"").unwrap();
            bin.join("sdkmanager")
        };

        let legacy = make("tools");
        assert_eq!(manager.find_sdkmanager().unwrap(), legacy);

        make("cmdline-tools/9.0");
        let newer = make("cmdline-tools/11.0");
        assert_eq!(manager.find_sdkmanager().unwrap(), newer);

        let latest = make("cmdline-tools/latest");
        assert_eq!(manager.find_sdkmanager().unwrap(), latest);
    }

    #[tokio::test]
    async fn test_operations_require_sdkmanager() {
        let sdk = tempfile::tempdir().unwrap();
        let manager = SdkManager::new(sdk.path(), Platform::current()).unwrap();
        let cancel = CancellationToken::new();

        assert!(matches!(manager.list(&cancel).await, Err(ToolsError::InvalidOperation(_))));
        assert!(matches!(
            manager.install(&["platform-tools"], true, &cancel).await,
            Err(ToolsError::InvalidOperation(_))
        ));
        manager.install(&[], true, &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_without_matching_archive() {
        let sdk = tempfile::tempdir().unwrap();
        let mac = Platform::new(HostOs::MacOs, HostArch::Arm64);
        let manager = SdkManager::new(sdk.path(), mac).unwrap();
        let feed = ManifestFeed::parse_auto(crate::manifest::tests::XAMARIN_FEED).unwrap();

        let err = manager.bootstrap(&feed, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ToolsError::NotFound(_)));
        assert!(!sdk.path().join("cmdline-tools").exists());
    }

    fn cmdline_tools_zip(dir: &Path) -> PathBuf {
        let staging = dir.join("staging").join("cmdline-tools");
        std::fs::create_dir_all(staging.join("bin")).unwrap();
        std::fs::write(staging.join("bin").join("sdkmanager"), b"#!/bin/sh\n").unwrap();
        std::fs::write(staging.join("source.properties"), b"Pkg.Revision=11.0\n").unwrap();

        let archive = dir.join("commandlinetools.zip");
        downloader::tests::zip_directory(&dir.join("staging"), &archive);
        archive
    }

    #[tokio::test]
    async fn test_install_cmdline_tools_archive() {
        let work = tempfile::tempdir().unwrap();
        let sdk = tempfile::tempdir().unwrap();
        let archive = cmdline_tools_zip(work.path());
        let checksum = downloader::file_digest(&archive, ChecksumType::Sha1).unwrap();

        let platform = Platform::new(HostOs::Linux, HostArch::X64);
        let manager = SdkManager::new(sdk.path(), platform).unwrap();
        let installed = manager
            .install_cmdline_tools(&archive, ChecksumType::Sha1, &checksum, "11.0")
            .await
            .unwrap();

        assert_eq!(installed, sdk.path().join("cmdline-tools").join("11.0"));
        assert!(installed.join("source.properties").is_file());
        assert!(!installed.join("cmdline-tools").exists());
        assert_eq!(
            manager.find_sdkmanager().unwrap(),
            installed.join("bin").join("sdkmanager")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(installed.join("bin").join("sdkmanager"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        // Reinstalling the same revision replaces it
        std::fs::write(installed.join("stale"), b"").unwrap();
        manager
            .install_cmdline_tools(&archive, ChecksumType::Sha1, &checksum, "11.0")
            .await
            .unwrap();
        assert!(!installed.join("stale").exists());
        assert!(!sdk.path().join("cmdline-tools").join("11.0.backup").exists());
    }

    #[tokio::test]
    async fn test_install_cmdline_tools_checksum_mismatch() {
        let work = tempfile::tempdir().unwrap();
        let sdk = tempfile::tempdir().unwrap();
        let archive = cmdline_tools_zip(work.path());

        let manager = SdkManager::new(sdk.path(), Platform::current()).unwrap();
        let err = manager
            .install_cmdline_tools(&archive, ChecksumType::Sha256, &"0".repeat(64), "11.0")
            .await
            .unwrap_err();

        assert!(matches!(err, ToolsError::ChecksumMismatch { .. }));
        assert!(!sdk.path().join("cmdline-tools").exists());
    }
}
