//! JDK Installer
//!
//! Downloads and installs Microsoft builds of OpenJDK.

use std::path::{Path, PathBuf};
use std::time::Duration;

use android_tools_core::process::find_executable_in_directory;
use android_tools_core::{CancellationToken, HostArch, HostOs, Platform, Result, ToolsError};
use tracing::{debug, info};

use crate::downloader::{self, Downloader, ProgressCallback};
use crate::jdk::JdkInfo;
use crate::manifest::ChecksumType;

/// Installable Microsoft OpenJDK major versions
pub const SUPPORTED_JDK_VERSIONS: &[u32] = &[11, 17, 21];
/// Major version installed when none is requested
pub const DEFAULT_JDK_VERSION: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

/// Where to download a JDK from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JdkInstallInfo {
    pub version: u32,
    pub url: String,
    pub checksum_url: String,
    pub archive_kind: ArchiveKind,
}

/// Download locations of Microsoft OpenJDK `version` for `platform`
pub fn install_info(version: u32, platform: &Platform) -> Result<JdkInstallInfo> {
    if !SUPPORTED_JDK_VERSIONS.contains(&version) {
        return Err(ToolsError::NotSupported(format!(
            "JDK {} (supported: {:?})",
            version, SUPPORTED_JDK_VERSIONS
        )));
    }

    let (os, archive_kind, ext) = match platform.os {
        HostOs::Windows => ("windows", ArchiveKind::Zip, "zip"),
        HostOs::MacOs => ("macOS", ArchiveKind::TarGz, "tar.gz"),
        HostOs::Linux => ("linux", ArchiveKind::TarGz, "tar.gz"),
    };
    let arch = match platform.arch {
        HostArch::X64 => "x64",
        HostArch::Arm64 => "aarch64",
        HostArch::X86 => return Err(ToolsError::NotSupported("JDK downloads for x86 hosts".into())),
    };

    let url = format!(
        "https://aka.ms/download-jdk/microsoft-jdk-{}-{}-{}.{}",
        version, os, arch, ext
    );
    Ok(JdkInstallInfo {
        version,
        checksum_url: format!("{}.sha256sum.txt", url),
        url,
        archive_kind,
    })
}

/// `~/android-toolchain/jdk-<version>`
pub fn default_install_dir(version: u32) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("android-toolchain").join(format!("jdk-{}", version)))
}

/// Extract the hash from a `<hash>  <file name>` checksum file
pub fn parse_checksum_file(contents: &str) -> Option<String> {
    contents
        .split_whitespace()
        .next()
        .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|h| h.to_ascii_lowercase())
}

/// Find the JDK home inside an extracted archive.
///
/// Archives nest the home one or more levels deep, e.g.
/// `jdk-17.0.8+7/Contents/Home` on macOS.
pub fn find_jdk_root(dir: &Path, platform: &Platform, max_depth: usize) -> Option<PathBuf> {
    if find_executable_in_directory(platform, &dir.join("bin"), "java").is_some() {
        return Some(dir.to_path_buf());
    }
    if max_depth == 0 {
        return None;
    }

    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();
    children
        .into_iter()
        .find_map(|child| find_jdk_root(&child, platform, max_depth - 1))
}

/// Installs Microsoft OpenJDK builds
pub struct JdkInstaller {
    platform: Platform,
    downloader: Downloader,
}

impl JdkInstaller {
    pub fn new(platform: Platform) -> Result<Self> {
        Ok(Self {
            platform,
            downloader: Downloader::new(Duration::from_secs(600))?,
        })
    }

    /// Whether `target` holds a valid JDK of major `version`
    pub fn is_valid_install(&self, target: &Path, version: u32) -> bool {
        match JdkInfo::with_platform(target, None, &self.platform) {
            Ok(jdk) => jdk.version().map(|v| v.major() == version).unwrap_or(false),
            Err(e) => {
                debug!("{:?} is not a valid JDK install: {}", target, e);
                false
            }
        }
    }

    /// Download, verify and install JDK `version` into `target`.
    ///
    /// An existing installation at `target` is replaced, and restored if the
    /// new one cannot be moved into place.
    pub async fn install(
        &self,
        version: u32,
        target: &Path,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<JdkInfo> {
        let info = install_info(version, &self.platform)?;
        info!("Installing Microsoft OpenJDK {} into {:?}", version, target);

        let checksum_text = self.downloader.download_string(&info.checksum_url).await?;
        let checksum = parse_checksum_file(&checksum_text).ok_or_else(|| {
            ToolsError::Download(format!("Malformed checksum file at {}", info.checksum_url))
        })?;

        let temp = tempfile::tempdir()?;
        let archive = temp.path().join(match info.archive_kind {
            ArchiveKind::Zip => "jdk.zip",
            ArchiveKind::TarGz => "jdk.tar.gz",
        });
        self.downloader
            .download_file(&info.url, &archive, cancel, progress)
            .await?;

        let jdk = self.install_archive(&archive, info.archive_kind, &checksum, target).await?;
        info!("JDK {} installed to {:?}", version, target);
        Ok(jdk)
    }

    /// Verify a downloaded JDK archive against its SHA-256 and install it
    /// into `target`
    pub async fn install_archive(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        sha256: &str,
        target: &Path,
    ) -> Result<JdkInfo> {
        downloader::verify_checksum(archive, ChecksumType::Sha256, sha256).await?;

        let temp = tempfile::tempdir()?;
        let extracted = temp.path().join("extracted");
        match kind {
            ArchiveKind::Zip => downloader::extract_zip(archive, &extracted).await?,
            ArchiveKind::TarGz => downloader::extract_tar_gz(archive, &extracted).await?,
        }

        let root = find_jdk_root(&extracted, &self.platform, 3)
            .ok_or_else(|| ToolsError::Extraction("No JDK found in downloaded archive".into()))?;
        JdkInfo::with_platform(&root, None, &self.platform)?;

        downloader::move_directory_with_backup(&root, target)?;
        downloader::set_executable_bits(&target.join("bin"))?;

        JdkInfo::with_platform(target, Some("android-toolchain".into()), &self.platform)
    }
}
