//! Toolchain Detection
//!
//! Resolves the Android SDK, NDK and JDK to use. Explicit paths win, then
//! persisted preferences, then whatever the host `Locator` finds.

use std::path::{Path, PathBuf};

use android_tools_core::process::find_executable_in_directory;
use android_tools_core::{Platform, Result, ToolsError, UserPreferences};
use tracing::{debug, info, warn};

use crate::jdk::{self, JdkInfo};
use crate::locations::{version_key, Candidate, Locator};
use crate::ndk::{self, NdkInfo};
use crate::versions::{AndroidVersion, AndroidVersions};

/// Inputs to [`AndroidSdkInfo::new`]
#[derive(Debug, Clone, Default)]
pub struct SdkInfoOptions {
    pub android_sdk_path: Option<PathBuf>,
    pub android_ndk_path: Option<PathBuf>,
    pub java_sdk_path: Option<PathBuf>,
    pub preferences: UserPreferences,
    pub platform: Platform,
}

impl SdkInfoOptions {
    /// Options for the current host with preferences loaded from disk
    pub fn from_environment() -> Self {
        let preferences = UserPreferences::load().unwrap_or_else(|e| {
            warn!("Ignoring unreadable preferences: {}", e);
            UserPreferences::default()
        });
        Self {
            preferences,
            ..Default::default()
        }
    }

    pub fn android_sdk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.android_sdk_path = Some(path.into());
        self
    }

    pub fn android_ndk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.android_ndk_path = Some(path.into());
        self
    }

    pub fn java_sdk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.java_sdk_path = Some(path.into());
        self
    }
}

/// Resolved Android SDK, NDK and JDK locations
#[derive(Debug)]
pub struct AndroidSdkInfo {
    platform: Platform,
    android_sdk_path: PathBuf,
    android_ndk_path: Option<PathBuf>,
    java_sdk_path: PathBuf,
    all_sdks: Vec<PathBuf>,
    all_ndks: Vec<NdkInfo>,
}

impl AndroidSdkInfo {
    /// Resolve SDK, NDK and JDK.
    ///
    /// Fails with `NotFound` when no valid SDK or no valid JDK exists; a
    /// missing NDK is not an error.
    pub fn new(options: SdkInfoOptions) -> Result<Self> {
        let SdkInfoOptions {
            android_sdk_path,
            android_ndk_path,
            java_sdk_path,
            preferences,
            platform,
        } = options;
        let locator = Locator::for_platform(&platform);

        let mut sdk_candidates = Vec::new();
        if let Some(path) = android_sdk_path {
            sdk_candidates.push(Candidate::new(path, "explicit"));
        }
        if let Some(path) = &preferences.android_sdk {
            sdk_candidates.push(Candidate::new(path.clone(), "preferences"));
        }
        sdk_candidates.extend(locator.sdk_candidates());

        let all_sdks = validate_sdks(&platform, sdk_candidates);
        let android_sdk_path = all_sdks
            .first()
            .cloned()
            .ok_or_else(|| ToolsError::NotFound("Android SDK".into()))?;
        info!("Using Android SDK at {:?}", android_sdk_path);

        let mut jdk_candidates = Vec::new();
        if let Some(path) = java_sdk_path {
            jdk_candidates.push(Candidate::new(path, "explicit"));
        }
        jdk_candidates.extend(jdk::jdk_candidates(&locator, &preferences));
        let java_sdk_path = first_valid_jdk(&platform, jdk_candidates)
            .ok_or_else(|| ToolsError::NotFound("Java SDK".into()))?;
        info!("Using JDK at {:?}", java_sdk_path);

        let mut ndk_candidates = Vec::new();
        if let Some(path) = android_ndk_path {
            ndk_candidates.push(Candidate::new(path, "explicit"));
        }
        if let Some(path) = &preferences.android_ndk {
            ndk_candidates.push(Candidate::new(path.clone(), "preferences"));
        }
        ndk_candidates.extend(locator.ndk_candidates(&all_sdks));
        let all_ndks = ndk::validate_ndks(&platform, ndk_candidates);
        let android_ndk_path = all_ndks.first().map(|n| n.path.clone());
        match &android_ndk_path {
            Some(path) => info!("Using Android NDK at {:?}", path),
            None => debug!("No supported Android NDK found"),
        }

        Ok(Self {
            platform,
            android_sdk_path,
            android_ndk_path,
            java_sdk_path,
            all_sdks,
            all_ndks,
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn android_sdk_path(&self) -> &Path {
        &self.android_sdk_path
    }

    pub fn android_ndk_path(&self) -> Option<&Path> {
        self.android_ndk_path.as_deref()
    }

    pub fn java_sdk_path(&self) -> &Path {
        &self.java_sdk_path
    }

    pub fn ndk_host_platform(&self) -> &'static str {
        self.platform.ndk_host_platform()
    }

    pub fn platform_tools_path(&self) -> PathBuf {
        self.android_sdk_path.join("platform-tools")
    }

    pub fn adb_path(&self) -> Option<PathBuf> {
        find_executable_in_directory(&self.platform, &self.platform_tools_path(), "adb")
    }

    /// Every valid SDK found, in priority order
    pub fn all_android_sdks(&self) -> &[PathBuf] {
        &self.all_sdks
    }

    /// Every supported NDK found, in priority order
    pub fn all_android_ndks(&self) -> Vec<&Path> {
        self.all_ndks.iter().map(|n| n.path.as_path()).collect()
    }

    /// Directories that may hold build tools (`aapt2`, `zipalign`, ...).
    ///
    /// The preferred version comes first when installed, then the other
    /// `build-tools` versions newest first, then `platform-tools`.
    pub fn build_tools_paths(&self, preferred: Option<&str>) -> Vec<PathBuf> {
        let root = self.android_sdk_path.join("build-tools");
        let mut paths = Vec::new();

        if let Some(preferred) = preferred.filter(|p| !p.is_empty()) {
            let dir = root.join(preferred);
            if dir.is_dir() {
                paths.push(dir);
            }
        }

        let mut versions: Vec<PathBuf> = std::fs::read_dir(&root)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !paths.contains(p))
            .collect();
        versions.sort_by_key(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            std::cmp::Reverse(version_key(&name))
        });
        paths.extend(versions);

        paths.push(self.platform_tools_path());
        paths
    }

    /// `<sdk>/platforms/android-<id>`
    pub fn platform_directory(&self, id: &str) -> PathBuf {
        self.android_sdk_path
            .join("platforms")
            .join(format!("android-{}", id))
    }

    /// Installed platform directory for an API level or id.
    ///
    /// Tries the directory named after the level's id first, then the one
    /// named after the numeric level.
    pub fn platform_directory_from_api_level(
        &self,
        id_or_api_level: &str,
        versions: &AndroidVersions,
    ) -> Option<PathBuf> {
        let id = versions
            .get_id_from_api_level_str(id_or_api_level)
            .unwrap_or_else(|| id_or_api_level.to_string());
        let dir = self.platform_directory(&id);
        if dir.is_dir() {
            return Some(dir);
        }

        let level = versions.get_api_level_from_id(&id)?;
        let dir = self.platform_directory(&level.to_string());
        dir.is_dir().then_some(dir)
    }

    /// Whether `platforms/android-<level>/android.jar` exists
    pub fn is_platform_installed(&self, api_level: u32) -> bool {
        self.platform_directory(&api_level.to_string())
            .join("android.jar")
            .is_file()
    }

    /// Known versions whose platform is installed in this SDK
    pub fn installed_platform_versions(&self, versions: &AndroidVersions) -> Vec<AndroidVersion> {
        let mut installed: Vec<AndroidVersion> = Vec::new();
        let all = versions
            .installed_versions()
            .iter()
            .chain(versions.known_versions().iter());
        for version in all {
            if installed.iter().any(|v| v.api_level == version.api_level) {
                continue;
            }
            let jar = self.platform_directory(&version.id).join("android.jar");
            if jar.is_file() || self.is_platform_installed(version.api_level) {
                installed.push(version.clone());
            }
        }
        installed.sort_by_key(|v| v.api_level);
        installed
    }

    /// Persist a preferred SDK location in `preferences_file`; `None` clears it
    pub fn set_preferred_android_sdk_path(preferences_file: &Path, path: Option<PathBuf>) -> Result<()> {
        update_preferences(preferences_file, |prefs| prefs.android_sdk = path)
    }

    /// Persist a preferred NDK location in `preferences_file`; `None` clears it
    pub fn set_preferred_android_ndk_path(preferences_file: &Path, path: Option<PathBuf>) -> Result<()> {
        update_preferences(preferences_file, |prefs| prefs.android_ndk = path)
    }

    /// Persist a preferred JDK location in `preferences_file`; `None` clears it
    pub fn set_preferred_java_sdk_path(preferences_file: &Path, path: Option<PathBuf>) -> Result<()> {
        update_preferences(preferences_file, |prefs| prefs.java_sdk = path)
    }

    /// Prefer the newest JDK installed on this system
    pub fn detect_and_set_preferred_java_sdk_path_to_latest(
        preferences_file: &Path,
        platform: &Platform,
    ) -> Result<PathBuf> {
        let preferences = load_or_default(preferences_file)?;
        let latest = jdk::latest_jdk(jdk::known_system_jdks(platform, &preferences))
            .ok_or_else(|| ToolsError::NotFound("No JDK with a known version".into()))?;

        let home = latest.home_path().to_path_buf();
        info!(
            "Setting preferred JDK to {:?} ({})",
            home,
            latest.version().map(|v| v.to_string()).unwrap_or_default()
        );
        Self::set_preferred_java_sdk_path(preferences_file, Some(home.clone()))?;
        Ok(home)
    }
}

/// An SDK is valid when it contains `platform-tools/adb`
pub fn is_valid_sdk(platform: &Platform, path: &Path) -> bool {
    find_executable_in_directory(platform, &path.join("platform-tools"), "adb").is_some()
}

fn validate_sdks(platform: &Platform, candidates: Vec<Candidate>) -> Vec<PathBuf> {
    let mut sdks: Vec<PathBuf> = Vec::new();
    for candidate in candidates {
        if sdks.contains(&candidate.path) {
            continue;
        }
        if is_valid_sdk(platform, &candidate.path) {
            debug!("Found Android SDK at {:?} via {}", candidate.path, candidate.source);
            sdks.push(candidate.path);
        } else {
            debug!("Rejected SDK candidate {:?} ({})", candidate.path, candidate.source);
        }
    }
    sdks
}

fn first_valid_jdk(platform: &Platform, candidates: Vec<Candidate>) -> Option<PathBuf> {
    candidates.into_iter().find_map(|candidate| {
        match JdkInfo::with_platform(&candidate.path, Some(candidate.source.clone()), platform) {
            Ok(jdk) => Some(jdk.home_path().to_path_buf()),
            Err(e) => {
                debug!("Rejected JDK candidate {:?} ({}): {}", candidate.path, candidate.source, e);
                None
            }
        }
    })
}

fn load_or_default(file: &Path) -> Result<UserPreferences> {
    if file.exists() {
        UserPreferences::load_from(file)
    } else {
        Ok(UserPreferences::default())
    }
}

fn update_preferences(file: &Path, update: impl FnOnce(&mut UserPreferences)) -> Result<()> {
    let mut preferences = load_or_default(file)?;
    update(&mut preferences);
    preferences.save_to(file)
}
