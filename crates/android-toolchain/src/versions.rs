//! Android API Levels
//!
//! Maps Android API levels to OS versions, ids and code names, from a
//! built-in table and from `AndroidApiInfo.xml` files shipped with installed
//! framework bindings.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use android_tools_core::{Result, ToolsError};
use tracing::{debug, warn};

/// A single Android API level description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidVersion {
    /// Numeric API level, e.g. 26
    pub api_level: u32,
    /// Full version code as (major, minor); minor releases such as 36.1 share an API level
    pub version_code_full: (u32, u32),
    /// Identifier used in `platforms/android-<id>`
    pub id: String,
    /// Code name, e.g. "Oreo"
    pub code_name: Option<String>,
    /// OS version, e.g. "8.0"
    pub os_version: String,
    /// Whether this API level is final
    pub stable: bool,
    /// Other ids this level is known by, e.g. "O"
    pub alternate_ids: Vec<String>,
}

impl AndroidVersion {
    pub fn new(api_level: u32, os_version: &str) -> Self {
        Self {
            api_level,
            version_code_full: (api_level, 0),
            id: api_level.to_string(),
            code_name: None,
            os_version: os_version.trim_start_matches('v').to_string(),
            stable: true,
            alternate_ids: Vec::new(),
        }
    }

    pub fn with_code_name(mut self, code_name: &str) -> Self {
        self.code_name = Some(code_name.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_alternate_ids(mut self, ids: &[&str]) -> Self {
        self.alternate_ids = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unstable(mut self) -> Self {
        self.stable = false;
        self
    }

    /// Framework version string, e.g. "v8.0"
    pub fn framework_version(&self) -> String {
        format!("v{}", self.os_version)
    }

    /// Whether `id` names this version, either as its id or an alternate id
    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.alternate_ids.iter().any(|a| a == id)
    }

    fn matches_framework_version(&self, framework_version: &str) -> bool {
        let wanted = framework_version.trim().trim_start_matches('v');
        self.os_version == wanted
    }

    fn version_order(&self, other: &Self) -> Ordering {
        self.api_level
            .cmp(&other.api_level)
            .then(self.version_code_full.cmp(&other.version_code_full))
    }

    /// Parse the contents of an `AndroidApiInfo.xml` file
    pub fn load(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if !root.has_tag_name("AndroidApiInfo") {
            return Err(ToolsError::Xml(format!(
                "expected <AndroidApiInfo>, found <{}>",
                root.tag_name().name()
            )));
        }

        let text_of = |name: &str| {
            root.children()
                .find(|n| n.has_tag_name(name))
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        };

        let level = text_of("Level")
            .ok_or_else(|| ToolsError::Xml("missing <Level>".into()))?;
        let api_level: u32 = level
            .parse()
            .map_err(|_| ToolsError::Xml(format!("invalid <Level>: {}", level)))?;
        let version = text_of("Version")
            .ok_or_else(|| ToolsError::Xml("missing <Version>".into()))?;

        let mut result = AndroidVersion::new(api_level, &version);
        if let Some(id) = text_of("Id") {
            result.id = id;
        }
        result.code_name = text_of("Name");
        result.stable = text_of("Stable")
            .map(|s| s.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        if let Some(full) = text_of("VersionCodeFull") {
            result.version_code_full = parse_version_code(&full)
                .ok_or_else(|| ToolsError::Xml(format!("invalid <VersionCodeFull>: {}", full)))?;
        }

        Ok(result)
    }

    /// Load an `AndroidApiInfo.xml` file
    pub fn load_file(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::load(&xml)
    }
}

fn parse_version_code(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    Some((major, minor))
}

/// API levels known to this library, oldest first
pub fn known_versions() -> Vec<AndroidVersion> {
    vec![
        AndroidVersion::new(4, "1.6").with_code_name("Donut"),
        AndroidVersion::new(5, "2.0").with_code_name("Eclair"),
        AndroidVersion::new(6, "2.0.1").with_code_name("Eclair"),
        AndroidVersion::new(7, "2.1").with_code_name("Eclair"),
        AndroidVersion::new(8, "2.2").with_code_name("Froyo"),
        AndroidVersion::new(10, "2.3").with_code_name("Gingerbread"),
        AndroidVersion::new(11, "3.0").with_code_name("Honeycomb").with_alternate_ids(&["H"]),
        AndroidVersion::new(12, "3.1").with_code_name("Honeycomb"),
        AndroidVersion::new(13, "3.2").with_code_name("Honeycomb"),
        AndroidVersion::new(14, "4.0").with_code_name("Ice Cream Sandwich"),
        AndroidVersion::new(15, "4.0.3").with_code_name("Ice Cream Sandwich"),
        AndroidVersion::new(16, "4.1").with_code_name("Jelly Bean"),
        AndroidVersion::new(17, "4.2").with_code_name("Jelly Bean"),
        AndroidVersion::new(18, "4.3").with_code_name("Jelly Bean"),
        AndroidVersion::new(19, "4.4").with_code_name("Kit Kat"),
        AndroidVersion::new(20, "4.4.87").with_code_name("Kit Kat + Wear support"),
        AndroidVersion::new(21, "5.0").with_code_name("Lollipop").with_alternate_ids(&["L"]),
        AndroidVersion::new(22, "5.1").with_code_name("Lollipop"),
        AndroidVersion::new(23, "6.0").with_code_name("Marshmallow").with_alternate_ids(&["M"]),
        AndroidVersion::new(24, "7.0").with_code_name("Nougat").with_alternate_ids(&["N"]),
        AndroidVersion::new(25, "7.1").with_code_name("Nougat").with_alternate_ids(&["N_MR1"]),
        AndroidVersion::new(26, "8.0").with_code_name("Oreo").with_alternate_ids(&["O"]),
        AndroidVersion::new(27, "8.1").with_code_name("Oreo").with_alternate_ids(&["O_MR1"]),
        AndroidVersion::new(28, "9.0").with_code_name("Pie").with_alternate_ids(&["P"]),
        AndroidVersion::new(29, "10.0").with_code_name("Android10").with_alternate_ids(&["Q"]),
        AndroidVersion::new(30, "11.0").with_code_name("R").with_alternate_ids(&["R"]),
        AndroidVersion::new(31, "12.0").with_code_name("S").with_alternate_ids(&["S"]),
        AndroidVersion::new(32, "12.1").with_code_name("Sv2").with_alternate_ids(&["Sv2"]),
        AndroidVersion::new(33, "13.0").with_code_name("Tiramisu").with_alternate_ids(&["Tiramisu"]),
        AndroidVersion::new(34, "14.0")
            .with_code_name("UpsideDownCake")
            .with_alternate_ids(&["UpsideDownCake"]),
        AndroidVersion::new(35, "15.0")
            .with_code_name("VanillaIceCream")
            .with_alternate_ids(&["VanillaIceCream"]),
        AndroidVersion::new(36, "16.0").with_code_name("Baklava").with_alternate_ids(&["Baklava"]),
    ]
}

/// Installed and known Android versions
#[derive(Debug, Clone)]
pub struct AndroidVersions {
    framework_directories: Vec<PathBuf>,
    installed: Vec<AndroidVersion>,
    known: Vec<AndroidVersion>,
    max_stable: Option<AndroidVersion>,
    min_stable: Option<AndroidVersion>,
}

impl AndroidVersions {
    /// Build from an explicit list of installed versions
    pub fn new(installed: Vec<AndroidVersion>) -> Self {
        Self::with_directories(installed, Vec::new())
    }

    fn with_directories(installed: Vec<AndroidVersion>, framework_directories: Vec<PathBuf>) -> Self {
        let stable = || installed.iter().filter(|v| v.stable);
        let max_stable = stable().max_by(|a, b| a.version_order(b)).cloned();
        let min_stable = stable().min_by(|a, b| a.version_order(b)).cloned();

        Self {
            framework_directories,
            installed,
            known: known_versions(),
            max_stable,
            min_stable,
        }
    }

    /// Load every `<dir>/<version>/AndroidApiInfo.xml` below the given framework directories
    pub fn from_framework_directories<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let directories: Vec<PathBuf> = directories.into_iter().map(Into::into).collect();
        let mut installed = Vec::new();

        for dir in &directories {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping framework directory {:?}: {}", dir, e);
                    continue;
                }
            };

            let mut files: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path().join("AndroidApiInfo.xml"))
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for file in files {
                match AndroidVersion::load_file(&file) {
                    Ok(version) => installed.push(version),
                    Err(e) => warn!("Ignoring {:?}: {}", file, e),
                }
            }
        }

        Self::with_directories(installed, directories)
    }

    pub fn framework_directories(&self) -> &[PathBuf] {
        &self.framework_directories
    }

    pub fn installed_versions(&self) -> &[AndroidVersion] {
        &self.installed
    }

    pub fn known_versions(&self) -> &[AndroidVersion] {
        &self.known
    }

    pub fn max_stable_version(&self) -> Option<&AndroidVersion> {
        self.max_stable.as_ref()
    }

    pub fn min_stable_version(&self) -> Option<&AndroidVersion> {
        self.min_stable.as_ref()
    }

    /// Installed versions first, then the built-in table
    fn all(&self) -> impl Iterator<Item = &AndroidVersion> {
        self.installed.iter().chain(self.known.iter())
    }

    pub fn get_api_level_from_framework_version(&self, framework_version: &str) -> Option<u32> {
        self.all()
            .find(|v| v.matches_framework_version(framework_version))
            .map(|v| v.api_level)
    }

    pub fn get_api_level_from_id(&self, id: &str) -> Option<u32> {
        self.all()
            .find(|v| v.matches_id(id))
            .map(|v| v.api_level)
            .or_else(|| id.parse().ok())
    }

    /// Id for an API level; levels with no entry map to their decimal string
    pub fn get_id_from_api_level(&self, api_level: u32) -> String {
        self.all()
            .find(|v| v.api_level == api_level)
            .map(|v| v.id.clone())
            .unwrap_or_else(|| api_level.to_string())
    }

    /// Id for a numeric API level or an (alternate) id
    pub fn get_id_from_api_level_str(&self, api_level: &str) -> Option<String> {
        if let Ok(level) = api_level.trim().parse::<u32>() {
            return Some(self.get_id_from_api_level(level));
        }
        self.all().find(|v| v.matches_id(api_level)).map(|v| v.id.clone())
    }

    pub fn get_id_from_framework_version(&self, framework_version: &str) -> Option<String> {
        self.all()
            .find(|v| v.matches_framework_version(framework_version))
            .map(|v| v.id.clone())
    }

    pub fn get_framework_version_from_api_level(&self, api_level: u32) -> Option<String> {
        self.all()
            .find(|v| v.api_level == api_level)
            .map(|v| v.framework_version())
    }

    pub fn get_framework_version_from_id(&self, id: &str) -> Option<String> {
        self.all().find(|v| v.matches_id(id)).map(|v| v.framework_version())
    }
}

impl Default for AndroidVersions {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
