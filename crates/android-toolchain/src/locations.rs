//! Well-known install locations
//!
//! Each host family knows a different set of places the Android SDK, NDK and
//! JDKs tend to be installed. `Locator` enumerates those candidates; callers
//! validate them.

use std::path::{Path, PathBuf};

use android_tools_core::process::find_executables_in_path;
use android_tools_core::Platform;

use crate::jdk::parse_java_home_plist;
use crate::registry::{self, Hive};

/// A path to try, together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub source: String,
}

impl Candidate {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Host-specific location strategy
#[derive(Debug, Clone)]
pub enum Locator {
    Windows(Platform),
    Unix(Platform),
}

impl Locator {
    pub fn for_platform(platform: &Platform) -> Self {
        if platform.is_windows() {
            Locator::Windows(platform.clone())
        } else {
            Locator::Unix(platform.clone())
        }
    }

    pub fn platform(&self) -> &Platform {
        match self {
            Locator::Windows(p) | Locator::Unix(p) => p,
        }
    }

    /// Android SDK candidates, after explicit and preferred paths
    pub fn sdk_candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    candidates.push(Candidate::new(path, format!("${}", var)));
                }
            }
        }

        match self {
            Locator::Windows(platform) => {
                for hive in [Hive::CurrentUser, Hive::LocalMachine] {
                    for (key, value) in [
                        (r"SOFTWARE\Xamarin\MonoAndroid", "AndroidSdkDirectory"),
                        (r"SOFTWARE\Android SDK Tools", "Path"),
                    ] {
                        if let Some(path) = registry::read_string(hive, key, value) {
                            candidates.push(Candidate::new(path, "registry"));
                        }
                    }
                }

                if let Some(local) = dirs::data_local_dir() {
                    candidates.push(Candidate::new(local.join("Android").join("Sdk"), "well-known"));
                }
                for program_files in platform.program_files_dirs() {
                    candidates.push(Candidate::new(
                        program_files.join("Android").join("android-sdk"),
                        "well-known",
                    ));
                }
            }
            Locator::Unix(platform) => {
                if let Some(home) = dirs::home_dir() {
                    if platform.is_macos() {
                        candidates.push(Candidate::new(home.join("Library/Android/sdk"), "well-known"));
                        candidates.push(Candidate::new(
                            home.join("Library/Developer/Xamarin/android-sdk-macosx"),
                            "well-known",
                        ));
                    } else {
                        candidates.push(Candidate::new(home.join("Android/Sdk"), "well-known"));
                        candidates.push(Candidate::new(home.join("android-sdk"), "well-known"));
                    }
                }
                if platform.is_linux() {
                    for dir in ["/opt/android-sdk", "/usr/local/android-sdk", "/usr/lib/android-sdk"] {
                        candidates.push(Candidate::new(dir, "well-known"));
                    }
                }
            }
        }

        // adb lives in <sdk>/platform-tools
        for adb in find_executables_in_path("adb") {
            let resolved = std::fs::canonicalize(&adb).unwrap_or(adb);
            if let Some(sdk) = resolved.parent().and_then(Path::parent) {
                candidates.push(Candidate::new(sdk, "$PATH"));
            }
        }

        candidates
    }

    /// Android NDK candidates derived from the environment and the given SDKs
    pub fn ndk_candidates(&self, sdks: &[PathBuf]) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for var in ["ANDROID_NDK_HOME", "ANDROID_NDK_ROOT", "NDK_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    candidates.push(Candidate::new(path, format!("${}", var)));
                }
            }
        }

        if let Locator::Windows(_) = self {
            for hive in [Hive::CurrentUser, Hive::LocalMachine] {
                if let Some(path) = registry::read_string(hive, r"SOFTWARE\Xamarin\MonoAndroid", "AndroidNdkDirectory") {
                    candidates.push(Candidate::new(path, "registry"));
                }
            }
        }

        for sdk in sdks {
            // side-by-side installs, newest first
            let mut versions: Vec<PathBuf> = std::fs::read_dir(sdk.join("ndk"))
                .into_iter()
                .flatten()
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            versions.sort_by_key(|p| std::cmp::Reverse(version_key(&file_name(p))));
            candidates.extend(versions.into_iter().map(|p| Candidate::new(p, "sdk/ndk")));

            candidates.push(Candidate::new(sdk.join("ndk-bundle"), "sdk/ndk-bundle"));
        }

        for ndk_stack in find_executables_in_path("ndk-stack") {
            let resolved = std::fs::canonicalize(&ndk_stack).unwrap_or(ndk_stack);
            if let Some(ndk) = resolved.parent() {
                candidates.push(Candidate::new(ndk, "$PATH"));
            }
        }

        candidates
    }

    /// Host-specific JDK candidates, excluding environment variables and `PATH`
    pub fn jdk_candidates(&self) -> Vec<Candidate> {
        match self {
            Locator::Windows(platform) => windows_jdk_candidates(platform),
            Locator::Unix(platform) if platform.is_macos() => macos_jdk_candidates(),
            Locator::Unix(_) => linux_jdk_candidates(),
        }
    }
}

fn windows_jdk_candidates(platform: &Platform) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for hive in [Hive::CurrentUser, Hive::LocalMachine] {
        if let Some(path) = registry::read_string(hive, r"SOFTWARE\Xamarin\MonoAndroid", "JavaSdkDirectory") {
            candidates.push(Candidate::new(path, "registry"));
        }
    }

    // (key, value path below each version subkey, value name)
    let vendor_keys = [
        (r"SOFTWARE\Microsoft\JDK", r"hotspot\MSI", "Path"),
        (r"SOFTWARE\Eclipse Adoptium\JDK", r"hotspot\MSI", "Path"),
        (r"SOFTWARE\Eclipse Foundation\JDK", r"hotspot\MSI", "Path"),
        (r"SOFTWARE\JavaSoft\JDK", "", "JavaHome"),
        (r"SOFTWARE\JavaSoft\Java Development Kit", "", "JavaHome"),
    ];
    for (root, sub, value) in vendor_keys {
        let mut versions = registry::subkey_names(Hive::LocalMachine, root);
        versions.sort_by_key(|v| std::cmp::Reverse(version_key(v)));
        for version in versions {
            let key = if sub.is_empty() {
                format!(r"{}\{}", root, version)
            } else {
                format!(r"{}\{}\{}", root, version, sub)
            };
            if let Some(path) = registry::read_string(Hive::LocalMachine, &key, value) {
                candidates.push(Candidate::new(path, "registry"));
            }
        }
    }

    for program_files in platform.program_files_dirs() {
        for vendor in ["Microsoft", "Eclipse Adoptium", "Java", "Android\\jdk"] {
            candidates.extend(
                jdk_directories_in(&program_files.join(vendor))
                    .into_iter()
                    .map(|p| Candidate::new(p, "well-known")),
            );
        }
    }

    candidates
}

fn macos_jdk_candidates() -> Vec<Candidate> {
    let mut candidates = Vec::new();

    if let Ok(output) = std::process::Command::new("/usr/libexec/java_home").arg("-X").output() {
        if output.status.success() {
            let plist = String::from_utf8_lossy(&output.stdout);
            candidates.extend(
                parse_java_home_plist(&plist)
                    .into_iter()
                    .map(|p| Candidate::new(p, "java_home")),
            );
        }
    }

    let mut roots = vec![PathBuf::from("/Library/Java/JavaVirtualMachines")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Library/Java/JavaVirtualMachines"));
    }
    for root in roots {
        candidates.extend(
            jdk_directories_in(&root)
                .into_iter()
                .map(|p| Candidate::new(p.join("Contents").join("Home"), "well-known")),
        );
    }

    candidates
}

fn linux_jdk_candidates() -> Vec<Candidate> {
    ["/usr/lib/jvm", "/usr/java", "/opt/java"]
        .iter()
        .flat_map(|root| jdk_directories_in(Path::new(root)))
        .map(|p| Candidate::new(p, "well-known"))
        .collect()
}

/// Subdirectories of `root`, newest-looking version first
fn jdk_directories_in(root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(root)
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    found.sort_by_key(|p| std::cmp::Reverse(version_key(&file_name(p))));
    found
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Sort key for directory names containing dotted versions.
///
/// All digit runs are compared numerically, so `jdk-17.0.2` sorts after
/// `jdk-11.0.18` and `34.0.0` after `9.0.0`.
pub(crate) fn version_key(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use android_tools_core::{HostArch, HostOs};

    #[test]
    fn test_version_key_ordering() {
        let mut names = vec!["9.0.0", "34.0.0", "30.0.3", "34.0.0-rc1"];
        names.sort_by_key(|n| version_key(n));
        assert_eq!(names, vec!["9.0.0", "30.0.3", "34.0.0", "34.0.0-rc1"]);
        assert!(version_key("jdk-17.0.2") > version_key("jdk-11.0.18"));
    }

    #[test]
    fn test_locator_selection() {
        let windows = Platform::new(HostOs::Windows, HostArch::X64);
        let mac = Platform::new(HostOs::MacOs, HostArch::Arm64);
        assert!(matches!(Locator::for_platform(&windows), Locator::Windows(_)));
        assert!(matches!(Locator::for_platform(&mac), Locator::Unix(_)));
        assert_eq!(Locator::for_platform(&mac).platform(), &mac);
    }

    #[test]
    fn test_ndk_candidates_from_sdk() {
        let sdk = tempfile::tempdir().unwrap();
        for v in ["21.4.7075529", "25.2.9519653"] {
            std::fs::create_dir_all(sdk.path().join("ndk").join(v)).unwrap();
        }

        let locator = Locator::for_platform(&Platform::new(HostOs::Linux, HostArch::X64));
        let candidates = locator.ndk_candidates(&[sdk.path().to_path_buf()]);
        let from_sdk: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.path.starts_with(sdk.path()))
            .collect();

        assert_eq!(from_sdk.len(), 3);
        assert!(from_sdk[0].path.ends_with("25.2.9519653"));
        assert!(from_sdk[1].path.ends_with("21.4.7075529"));
        assert!(from_sdk[2].path.ends_with("ndk-bundle"));
    }

    #[test]
    fn test_jdk_directories_sorted() {
        let root = tempfile::tempdir().unwrap();
        for name in ["jdk-11.0.18", "jdk-17.0.2", "jdk-8"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        let found = jdk_directories_in(root.path());
        assert!(found[0].ends_with("jdk-17.0.2"));
        assert!(found[2].ends_with("jdk-8"));
    }
}
