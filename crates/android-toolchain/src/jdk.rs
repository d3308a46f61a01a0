//! JDK Discovery
//!
//! Validates JDK installations and reads their version metadata, and
//! enumerates the JDKs installed on the system in priority order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;

use android_tools_core::process::{find_executable_in_directory, find_executables_in_path};
use android_tools_core::{Platform, Result, ToolsError, UserPreferences};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::locations::{Candidate, Locator};

/// A dotted numeric Java version, e.g. 17.0.2.8
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JdkVersion {
    parts: Vec<u32>,
}

impl JdkVersion {
    /// Parse a raw version as printed by `java` or stored in a `release` file.
    ///
    /// `"17"` becomes `17.0`, suffixes after `-`, `+` or a space are dropped and
    /// `_` separators (as in `1.8.0_292`) are treated as dots.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut version = raw.trim().trim_matches('"').to_string();
        if let Some(end) = version.find(|c| c == '-' || c == '+' || c == ' ') {
            version.truncate(end);
        }
        if !version.contains('.') {
            version.push_str(".0");
        }

        let parts: Option<Vec<u32>> = version
            .replace('_', ".")
            .split('.')
            .map(|p| p.parse().ok())
            .collect();
        let parts = parts?;

        if parts.len() < 2 {
            return None;
        }
        Some(Self { parts })
    }

    /// Major version; legacy `1.x` versions report `x`
    pub fn major(&self) -> u32 {
        if self.parts[0] == 1 && self.parts.len() > 1 {
            self.parts[1]
        } else {
            self.parts[0]
        }
    }

    pub fn parts(&self) -> &[u32] {
        &self.parts
    }
}

impl Ord for JdkVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for JdkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for JdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// A validated JDK installation
pub struct JdkInfo {
    home_path: PathBuf,
    locator: Option<String>,
    java_path: PathBuf,
    javac_path: PathBuf,
    jar_path: PathBuf,
    jvm_path: PathBuf,
    include_paths: Vec<PathBuf>,
    release_properties: OnceCell<HashMap<String, String>>,
    java_settings: OnceCell<HashMap<String, Vec<String>>>,
    version: OnceCell<Option<JdkVersion>>,
}

impl JdkInfo {
    /// Validate the JDK at `home_path` for the current host
    pub fn new(home_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_platform(home_path, None, &Platform::current())
    }

    /// Validate the JDK at `home_path`.
    ///
    /// Fails with `InvalidArgument` when `java`, `javac`, `jar` or the JVM
    /// shared library cannot be found. Version metadata is read lazily.
    pub fn with_platform(
        home_path: impl Into<PathBuf>,
        locator: Option<String>,
        platform: &Platform,
    ) -> Result<Self> {
        let home_path = home_path.into();
        if !home_path.is_dir() {
            return Err(ToolsError::InvalidArgument(format!(
                "JDK home `{}` does not exist",
                home_path.display()
            )));
        }

        let bin = home_path.join("bin");
        let require = |name: &str| {
            find_executable_in_directory(platform, &bin, name).ok_or_else(|| missing(name, &home_path))
        };
        let jar_path = require("jar")?;
        let java_path = require("java")?;
        let javac_path = require("javac")?;

        let jvm_path = jvm_library_candidates(platform)
            .into_iter()
            .map(|rel| home_path.join(rel))
            .find(|p| p.is_file())
            .ok_or_else(|| missing(&platform.native_library_name("jvm"), &home_path))?;

        let include = home_path.join("include");
        let mut include_paths = Vec::new();
        if include.is_dir() {
            let native = match platform.os {
                android_tools_core::HostOs::Windows => "win32",
                android_tools_core::HostOs::MacOs => "darwin",
                android_tools_core::HostOs::Linux => "linux",
            };
            include_paths.push(include.join(native));
            include_paths.push(include);
        }

        Ok(Self {
            home_path,
            locator,
            java_path,
            javac_path,
            jar_path,
            jvm_path,
            include_paths,
            release_properties: OnceCell::new(),
            java_settings: OnceCell::new(),
            version: OnceCell::new(),
        })
    }

    pub fn home_path(&self) -> &Path {
        &self.home_path
    }

    /// Where this JDK was found, e.g. `$JAVA_HOME`
    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    pub fn java_path(&self) -> &Path {
        &self.java_path
    }

    pub fn javac_path(&self) -> &Path {
        &self.javac_path
    }

    pub fn jar_path(&self) -> &Path {
        &self.jar_path
    }

    pub fn jvm_path(&self) -> &Path {
        &self.jvm_path
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// `KEY="VALUE"` pairs from `<home>/release`; empty when the file is absent
    pub fn release_properties(&self) -> &HashMap<String, String> {
        self.release_properties.get_or_init(|| {
            let release = self.home_path.join("release");
            match std::fs::read_to_string(&release) {
                Ok(contents) => parse_release_file(&contents),
                Err(_) => HashMap::new(),
            }
        })
    }

    /// Properties reported by `java -XshowSettings:properties -version`
    pub fn java_settings(&self) -> &HashMap<String, Vec<String>> {
        self.java_settings.get_or_init(|| {
            debug!("Reading settings of {:?}", self.java_path);
            match Command::new(&self.java_path)
                .args(["-XshowSettings:properties", "-version"])
                .output()
            {
                Ok(output) => parse_java_settings(&String::from_utf8_lossy(&output.stderr)),
                Err(e) => {
                    warn!("Unable to run {:?}: {}", self.java_path, e);
                    HashMap::new()
                }
            }
        })
    }

    pub fn java_setting(&self, key: &str) -> Option<&str> {
        self.java_settings()
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// JDK version, preferring `JAVA_VERSION` from the `release` file
    pub fn version(&self) -> Option<&JdkVersion> {
        self.version
            .get_or_init(|| {
                let release = self.release_properties();
                if let Some(v) = release.get("JAVA_VERSION").filter(|v| !v.is_empty()) {
                    let raw = match release.get("BUILD_NUMBER").filter(|b| !b.is_empty()) {
                        Some(build) if !v.contains('+') && !v.contains('-') => {
                            let base = JdkVersion::parse(v).map(|p| p.to_string());
                            base.map(|b| format!("{}.{}", b, build))
                        }
                        _ => Some(v.clone()),
                    };
                    if let Some(version) = raw.and_then(|r| JdkVersion::parse(&r)) {
                        return Some(version);
                    }
                }
                self.java_setting("java.version").and_then(JdkVersion::parse)
            })
            .as_ref()
    }

    /// JDK vendor, preferring `IMPLEMENTOR` from the `release` file
    pub fn vendor(&self) -> Option<String> {
        self.release_properties()
            .get("IMPLEMENTOR")
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| self.java_setting("java.vendor").map(String::from))
    }
}

impl PartialEq for JdkInfo {
    fn eq(&self, other: &Self) -> bool {
        self.home_path == other.home_path
    }
}

impl Eq for JdkInfo {}

impl Hash for JdkInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.home_path.hash(state);
    }
}

impl fmt::Debug for JdkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JdkInfo")
            .field("home_path", &self.home_path)
            .field("locator", &self.locator)
            .finish()
    }
}

fn missing(name: &str, home: &Path) -> ToolsError {
    ToolsError::InvalidArgument(format!(
        "Could not find required file `{}` within `{}`; is this a valid JDK?",
        name,
        home.display()
    ))
}

fn jvm_library_candidates(platform: &Platform) -> Vec<PathBuf> {
    let lib = platform.native_library_name("jvm");
    let dirs: &[&str] = match platform.os {
        android_tools_core::HostOs::Windows => &["jre/bin/server", "bin/server"],
        android_tools_core::HostOs::MacOs => &["jre/lib/server", "lib/server"],
        android_tools_core::HostOs::Linux => &[
            "jre/lib/amd64/server",
            "lib/server",
            "lib/amd64/server",
            "jre/lib/aarch64/server",
        ],
    };
    dirs.iter()
        .map(|d| d.split('/').collect::<PathBuf>().join(&lib))
        .collect()
}

/// Parse the `KEY="VALUE"` lines of a JDK `release` file
pub fn parse_release_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .filter(|(key, _)| !key.is_empty() && !key.starts_with('#'))
        .collect()
}

/// Parse the `Property settings:` block printed by `java -XshowSettings:properties`.
///
/// Properties are indented by four spaces; additional values of a
/// multi-valued property follow on lines indented by eight.
pub fn parse_java_settings(output: &str) -> HashMap<String, Vec<String>> {
    let mut properties: HashMap<String, Vec<String>> = HashMap::new();
    let mut last_key: Option<String> = None;

    for line in output.lines() {
        if let (Some(rest), Some(key)) = (line.strip_prefix("        "), last_key.as_ref()) {
            let value = rest.trim();
            if !value.is_empty() {
                properties.entry(key.clone()).or_default().push(value.to_string());
            }
            continue;
        }

        match line.strip_prefix("    ").and_then(|l| l.split_once('=')) {
            Some((key, value)) if !key.starts_with(' ') => {
                let key = key.trim().to_string();
                let value = value.trim();
                let entry = properties.entry(key.clone()).or_default();
                if !value.is_empty() {
                    entry.push(value.to_string());
                }
                last_key = Some(key);
            }
            _ => last_key = None,
        }
    }

    properties
}

/// Parse the plist printed by macOS `/usr/libexec/java_home -X`
pub fn parse_java_home_plist(xml: &str) -> Vec<PathBuf> {
    let doc = match roxmltree::Document::parse(xml) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("Unable to parse java_home output: {}", e);
            return Vec::new();
        }
    };

    doc.descendants()
        .filter(|n| n.has_tag_name("key") && n.text() == Some("JVMHomePath"))
        .filter_map(|key| key.next_sibling_element())
        .filter(|value| value.has_tag_name("string"))
        .filter_map(|value| value.text())
        .map(|text| PathBuf::from(text.trim()))
        .collect()
}

/// Candidate JDK homes, highest priority first
pub fn jdk_candidates(locator: &Locator, preferences: &UserPreferences) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    if let Ok(home) = std::env::var("JI_JAVA_HOME") {
        candidates.push(Candidate::new(home, "$JI_JAVA_HOME"));
    }
    if let Some(preferred) = &preferences.java_sdk {
        candidates.push(Candidate::new(preferred.clone(), "preferences"));
    }
    if let Ok(home) = std::env::var("JAVA_HOME") {
        candidates.push(Candidate::new(home, "$JAVA_HOME"));
    }

    candidates.extend(locator.jdk_candidates());
    candidates.extend(managed_jdk_candidates());

    for java in find_executables_in_path("java") {
        let resolved = std::fs::canonicalize(&java).unwrap_or(java);
        if let Some(home) = resolved.parent().and_then(Path::parent) {
            candidates.push(Candidate::new(home, "$PATH"));
        }
    }

    candidates
}

/// JDKs installed by [`crate::JdkInstaller`] into its default location
fn managed_jdk_candidates() -> Vec<Candidate> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let root = home.join("android-toolchain");
    let mut found: Vec<PathBuf> = std::fs::read_dir(&root)
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("jdk"))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found.reverse();
    found
        .into_iter()
        .map(|p| Candidate::new(p, "android-toolchain"))
        .collect()
}

/// Validate candidates in order, keeping the first JDK per home directory
pub fn validate_jdks(candidates: Vec<Candidate>, platform: &Platform) -> Vec<JdkInfo> {
    let mut jdks: Vec<JdkInfo> = Vec::new();

    for candidate in candidates {
        if jdks.iter().any(|j| j.home_path == candidate.path) {
            continue;
        }
        match JdkInfo::with_platform(&candidate.path, Some(candidate.source.clone()), platform) {
            Ok(jdk) => {
                debug!("Found JDK at {:?} via {}", candidate.path, candidate.source);
                jdks.push(jdk);
            }
            Err(e) => debug!("Rejected JDK candidate {:?} ({}): {}", candidate.path, candidate.source, e),
        }
    }

    jdks
}

/// All JDKs found on this system, in priority order
pub fn known_system_jdks(platform: &Platform, preferences: &UserPreferences) -> Vec<JdkInfo> {
    let locator = Locator::for_platform(platform);
    let jdks = validate_jdks(jdk_candidates(&locator, preferences), platform);
    info!("Found {} JDK installation(s)", jdks.len());
    jdks
}

/// JDKs whose major version lies within `min_major..=max_major`
pub fn supported_jdks(jdks: Vec<JdkInfo>, min_major: u32, max_major: u32) -> Vec<JdkInfo> {
    jdks.into_iter()
        .filter(|jdk| match jdk.version() {
            Some(v) => (min_major..=max_major).contains(&v.major()),
            None => {
                warn!("Skipping JDK {:?}: unknown version", jdk.home_path());
                false
            }
        })
        .collect()
}

/// The JDK with the highest version
pub fn latest_jdk(jdks: Vec<JdkInfo>) -> Option<JdkInfo> {
    jdks.into_iter()
        .filter(|jdk| jdk.version().is_some())
        .max_by(|a, b| a.version().cmp(&b.version()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Lay out the files `JdkInfo` requires under `home`
    pub(crate) fn create_faux_jdk(home: &Path, platform: &Platform, release: Option<&str>) {
        let bin = home.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        for tool in ["java", "javac", "jar"] {
            std::fs::write(bin.join(platform.executable_name(tool)), b"").unwrap();
        }
        let jvm = home.join(&jvm_library_candidates(platform)[1]);
        std::fs::create_dir_all(jvm.parent().unwrap()).unwrap();
        std::fs::write(&jvm, b"").unwrap();
        if let Some(release) = release {
            std::fs::write(home.join("release"), release).unwrap();
        }
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(JdkVersion::parse("17").unwrap().to_string(), "17.0");
        assert_eq!(JdkVersion::parse("\"11.0.4\"").unwrap().to_string(), "11.0.4");
        assert_eq!(JdkVersion::parse("1.8.0_292").unwrap().to_string(), "1.8.0.292");
        assert_eq!(JdkVersion::parse("21-ea").unwrap().to_string(), "21.0");
        assert_eq!(JdkVersion::parse("17.0.9+8").unwrap().to_string(), "17.0.9");
        assert_eq!(JdkVersion::parse("1.8.0_292").unwrap().major(), 8);
        assert!(JdkVersion::parse("garbage").is_none());
        assert!(JdkVersion::parse("17.0").unwrap() < JdkVersion::parse("17.0.1").unwrap());
        assert_eq!(JdkVersion::parse("17.0").unwrap().cmp(&JdkVersion::parse("17.0.0").unwrap()), Ordering::Equal);
    }

    #[test]
    fn test_missing_files_rejected() {
        let platform = Platform::current();
        for missing_tool in ["java", "javac", "jar", "jvm"] {
            let dir = tempfile::tempdir().unwrap();
            create_faux_jdk(dir.path(), &platform, None);
            let victim = if missing_tool == "jvm" {
                dir.path().join(&jvm_library_candidates(&platform)[1])
            } else {
                dir.path().join("bin").join(platform.executable_name(missing_tool))
            };
            std::fs::remove_file(victim).unwrap();

            let err = JdkInfo::with_platform(dir.path(), None, &platform).unwrap_err();
            assert!(matches!(err, ToolsError::InvalidArgument(_)), "{}", missing_tool);
        }
    }

    #[test]
    fn test_release_version_preferred() {
        let platform = Platform::current();
        let dir = tempfile::tempdir().unwrap();
        create_faux_jdk(
            dir.path(),
            &platform,
            Some("IMPLEMENTOR=\"Microsoft\"\nJAVA_VERSION=\"17.0.8\"\nBUILD_NUMBER=\"7\"\n"),
        );

        let jdk = JdkInfo::with_platform(dir.path(), Some("test".into()), &platform).unwrap();
        assert_eq!(jdk.version().unwrap().to_string(), "17.0.8.7");
        assert_eq!(jdk.vendor().as_deref(), Some("Microsoft"));
        assert_eq!(jdk.locator(), Some("test"));
        assert_eq!(jdk.home_path(), dir.path());
    }

    #[test]
    fn test_parse_release_file() {
        let props = parse_release_file("JAVA_VERSION=\"11.0.4\"\nOS_NAME=\"Linux\"\n\nMODULES=\"java.base java.xml\"\n");
        assert_eq!(props.get("JAVA_VERSION").map(String::as_str), Some("11.0.4"));
        assert_eq!(props.get("MODULES").map(String::as_str), Some("java.base java.xml"));
        assert_eq!(props.len(), 3);
    }

    #[test]
    fn test_parse_java_settings() {
        let output = "Property settings:
    awt.toolkit = sun.awt.X11.XToolkit
    java.class.path =
    java.library.path = /usr/java/packages/lib
        /usr/lib64
        /lib64
    java.vendor = Eclipse Adoptium
    java.version = 11.0.4

openjdk version \"11.0.4\" 2019-07-16
";
        let props = parse_java_settings(output);
        assert_eq!(props["java.version"], vec!["11.0.4"]);
        assert_eq!(props["java.vendor"], vec!["Eclipse Adoptium"]);
        assert_eq!(
            props["java.library.path"],
            vec!["/usr/java/packages/lib", "/usr/lib64", "/lib64"]
        );
        assert!(props["java.class.path"].is_empty());
        assert!(!props.contains_key("openjdk version \"11.0.4\" 2019-07-16"));
    }

    #[test]
    fn test_parse_java_home_plist() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<array>
  <dict>
    <key>JVMArch</key><string>arm64</string>
    <key>JVMHomePath</key><string>/Library/Java/JavaVirtualMachines/microsoft-17.jdk/Contents/Home</string>
  </dict>
  <dict>
    <key>JVMHomePath</key><string>/Library/Java/JavaVirtualMachines/zulu-11.jdk/Contents/Home</string>
  </dict>
</array>
</plist>"#;
        let homes = parse_java_home_plist(xml);
        assert_eq!(homes.len(), 2);
        assert!(homes[0].ends_with("microsoft-17.jdk/Contents/Home"));
    }

    #[test]
    fn test_validate_dedups_and_orders() {
        let platform = Platform::current();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        create_faux_jdk(a.path(), &platform, Some("JAVA_VERSION=\"11.0.2\""));
        create_faux_jdk(b.path(), &platform, Some("JAVA_VERSION=\"17.0.1\""));

        let jdks = validate_jdks(
            vec![
                Candidate::new(a.path(), "first"),
                Candidate::new("/does/not/exist", "bogus"),
                Candidate::new(b.path(), "second"),
                Candidate::new(a.path(), "again"),
            ],
            &platform,
        );
        assert_eq!(jdks.len(), 2);
        assert_eq!(jdks[0].locator(), Some("first"));

        let supported = supported_jdks(
            validate_jdks(vec![Candidate::new(a.path(), "a"), Candidate::new(b.path(), "b")], &platform),
            17,
            21,
        );
        assert_eq!(supported.len(), 1);

        let latest = latest_jdk(jdks).unwrap();
        assert_eq!(latest.home_path(), b.path());
    }
}
