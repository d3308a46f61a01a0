//! User Preferences
//!
//! Persisted preferred locations of the Android SDK, NDK and JDK. These rank
//! right after explicitly supplied paths during discovery.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ToolsError};

/// Preferred toolchain locations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Preferred Android SDK directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_sdk: Option<PathBuf>,
    /// Preferred Android NDK directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_ndk: Option<PathBuf>,
    /// Preferred JDK home
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_sdk: Option<PathBuf>,
}

impl UserPreferences {
    /// Default preferences file location
    pub fn config_file() -> Option<PathBuf> {
        ProjectDirs::from("", "", "android-tools")
            .map(|dirs| dirs.config_dir().join("preferences.toml"))
    }

    /// Location of the preferences file written by older Xamarin tooling
    pub fn legacy_config_file() -> Option<PathBuf> {
        dirs::home_dir().map(|home| {
            home.join(".config")
                .join("xbuild")
                .join("monodroid-config.xml")
        })
    }

    /// Load preferences from the default location.
    ///
    /// Falls back to the legacy XML file when no TOML file exists; returns
    /// empty preferences when neither exists.
    pub fn load() -> Result<Self> {
        if let Some(file) = Self::config_file() {
            if file.exists() {
                return Self::load_from(&file);
            }
        }

        if let Some(legacy) = Self::legacy_config_file() {
            if legacy.exists() {
                match Self::load_legacy_xml(&legacy) {
                    Ok(prefs) => return Ok(prefs),
                    Err(e) => warn!("Ignoring unreadable {:?}: {}", legacy, e),
                }
            }
        }

        debug!("No preferences file found, using defaults");
        Ok(Self::default())
    }

    /// Load preferences from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading preferences from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let prefs: UserPreferences = toml::from_str(&contents)?;
        Ok(prefs)
    }

    /// Parse a legacy `monodroid-config.xml` file
    pub fn load_legacy_xml(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_legacy_xml(&contents)
    }

    /// Parse the contents of a legacy `monodroid-config.xml` file
    pub fn parse_legacy_xml(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "monodroid" {
            return Err(ToolsError::Config(format!(
                "unexpected root element <{}>",
                root.tag_name().name()
            )));
        }

        let path_of = |element: &str| {
            root.children()
                .find(|n| n.has_tag_name(element))
                .and_then(|n| n.attribute("path"))
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
        };

        Ok(Self {
            android_sdk: path_of("android-sdk"),
            android_ndk: path_of("android-ndk"),
            java_sdk: path_of("java-sdk"),
        })
    }

    /// Save preferences to the default location
    pub fn save(&self) -> Result<()> {
        let file = Self::config_file()
            .ok_or_else(|| ToolsError::Config("Cannot determine config path".into()))?;
        self.save_to(&file)
    }

    /// Save preferences to a TOML file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        info!("Preferences saved to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("preferences.toml");

        let prefs = UserPreferences {
            android_sdk: Some(PathBuf::from("/opt/android-sdk")),
            android_ndk: None,
            java_sdk: Some(PathBuf::from("/usr/lib/jvm/java-17")),
        };
        prefs.save_to(&file).unwrap();

        let loaded = UserPreferences::load_from(&file).unwrap();
        assert_eq!(loaded, prefs);

        let contents = std::fs::read_to_string(&file).unwrap();
        assert!(!contents.contains("android_ndk"));
    }

    #[test]
    fn test_parse_legacy_xml() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<monodroid>
  <android-sdk path="/Users/me/Library/Android/sdk" />
  <java-sdk path="/Library/Java/JavaVirtualMachines/jdk-17/Contents/Home" />
  <android-ndk path="" />
</monodroid>"#;

        let prefs = UserPreferences::parse_legacy_xml(xml).unwrap();
        assert_eq!(prefs.android_sdk, Some(PathBuf::from("/Users/me/Library/Android/sdk")));
        assert_eq!(
            prefs.java_sdk,
            Some(PathBuf::from("/Library/Java/JavaVirtualMachines/jdk-17/Contents/Home"))
        );
        assert_eq!(prefs.android_ndk, None);
    }

    #[test]
    fn test_parse_legacy_xml_wrong_root() {
        assert!(UserPreferences::parse_legacy_xml("<settings/>").is_err());
    }
}
