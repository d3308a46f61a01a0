//! NDK validation
//!
//! An NDK is usable when it ships `ndk-stack` and its `source.properties`
//! reports a supported major revision.

use std::fmt;
use std::path::{Path, PathBuf};

use android_tools_core::process::find_executable_in_directory;
use android_tools_core::{Platform, Result, ToolsError};
use tracing::{debug, warn};

use crate::locations::Candidate;

/// Oldest supported NDK major revision
pub const MIN_NDK_MAJOR: u32 = 16;
/// Newest supported NDK major revision
pub const MAX_NDK_MAJOR: u32 = 22;

/// `Pkg.Revision` from `source.properties`, e.g. `21.4.7075529`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NdkRevision {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl NdkRevision {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        // Pre-release revisions look like `23.0.7123448-beta2`
        let raw = raw.split(|c| c == '-' || c == ' ').next().unwrap_or(raw);
        let mut parts = raw.split('.').map(|p| p.parse::<u32>());
        let major = parts.next()?.ok()?;
        let minor = match parts.next() {
            Some(p) => p.ok()?,
            None => 0,
        };
        let build = match parts.next() {
            Some(p) => p.ok()?,
            None => 0,
        };
        Some(Self { major, minor, build })
    }

    pub fn is_supported(&self) -> bool {
        (MIN_NDK_MAJOR..=MAX_NDK_MAJOR).contains(&self.major)
    }
}

impl fmt::Display for NdkRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// A validated NDK installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdkInfo {
    pub path: PathBuf,
    pub revision: NdkRevision,
}

/// Read `Pkg.Revision` from `<ndk>/source.properties`
pub fn read_revision(ndk: &Path) -> Result<NdkRevision> {
    let props = ndk.join("source.properties");
    let contents = std::fs::read_to_string(&props)?;

    let raw = contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "Pkg.Revision")
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| ToolsError::NotFound(format!("Pkg.Revision in {:?}", props)))?;

    NdkRevision::parse(&raw)
        .ok_or_else(|| ToolsError::InvalidArgument(format!("Unparsable NDK revision `{}`", raw)))
}

/// Validate the NDK at `path`
pub fn validate_ndk(platform: &Platform, path: &Path) -> Result<NdkInfo> {
    if find_executable_in_directory(platform, path, "ndk-stack").is_none() {
        return Err(ToolsError::NotFound(format!("ndk-stack in {:?}", path)));
    }

    let revision = read_revision(path)?;
    if !revision.is_supported() {
        return Err(ToolsError::NotSupported(format!(
            "NDK {} at {:?} is outside the supported range {}..={}",
            revision, path, MIN_NDK_MAJOR, MAX_NDK_MAJOR
        )));
    }

    Ok(NdkInfo {
        path: path.to_path_buf(),
        revision,
    })
}

/// Validate candidates in order, dropping duplicates and unusable NDKs
pub fn validate_ndks(platform: &Platform, candidates: Vec<Candidate>) -> Vec<NdkInfo> {
    let mut ndks: Vec<NdkInfo> = Vec::new();

    for candidate in candidates {
        if !candidate.path.is_dir() || ndks.iter().any(|n| n.path == candidate.path) {
            continue;
        }
        match validate_ndk(platform, &candidate.path) {
            Ok(ndk) => {
                debug!("Found NDK {} at {:?} via {}", ndk.revision, ndk.path, candidate.source);
                ndks.push(ndk);
            }
            Err(e) => warn!("Skipping NDK at {:?} ({}): {}", candidate.path, candidate.source, e),
        }
    }

    ndks
}
