//! SDK Manifest Feeds
//!
//! Parses the package feeds used to bootstrap the SDK command-line tools.
//! Three dialects are understood and all normalize to the same
//! `SdkManifestComponent` list:
//!
//! * Xamarin XML: `<manifest><cmdline-tools revision=".." path=".."><urls><url host-os=".." ...>URL</url>`
//! * Google repository XML: `<remotePackage path=".."><revision>..</revision><archives>...`
//! * JSON: `{"packages": [{"kind": "..", "archives": [..]}]}`

use std::str::FromStr;

use android_tools_core::{Platform, Result, ToolsError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::locations::version_key;

/// Base URL that relative archive URLs in Google repository feeds resolve against
pub const GOOGLE_REPOSITORY_BASE: &str = "https://dl.google.com/android/repository/";

/// Archive checksum algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Sha1,
    Sha256,
}

impl FromStr for ChecksumType {
    type Err = ToolsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(ChecksumType::Sha1),
            "sha256" => Ok(ChecksumType::Sha256),
            other => Err(ToolsError::NotSupported(format!("checksum type `{}`", other))),
        }
    }
}

/// A downloadable archive of a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkArchive {
    pub url: String,
    /// `None` when usable on every host OS
    pub host_os: Option<String>,
    /// `None` when usable on every architecture
    pub host_arch: Option<String>,
    pub checksum_type: ChecksumType,
    pub checksum: String,
    pub size: Option<u64>,
}

impl SdkArchive {
    pub fn matches(&self, platform: &Platform) -> bool {
        let os_ok = self
            .host_os
            .as_deref()
            .map(|os| os.eq_ignore_ascii_case(platform.feed_os()) || (os == "darwin" && platform.is_macos()))
            .unwrap_or(true);
        let arch_ok = self
            .host_arch
            .as_deref()
            .map(|arch| normalize_arch(arch) == platform.feed_arch())
            .unwrap_or(true);
        os_ok && arch_ok
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" | "amd64" => "x64",
        "arm64" => "aarch64",
        other => other,
    }
}

/// A package listed in a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkManifestComponent {
    /// Element kind, e.g. `cmdline-tools` or `platform-tools`
    pub kind: String,
    pub path: String,
    pub revision: String,
    pub obsolete: bool,
    pub archives: Vec<SdkArchive>,
}

impl SdkManifestComponent {
    /// First archive usable on `platform`
    pub fn archive_for(&self, platform: &Platform) -> Option<&SdkArchive> {
        self.archives.iter().find(|a| a.matches(platform))
    }
}

/// Feed dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    XamarinXml,
    GoogleRepositoryXml,
    Json,
}

impl ManifestFormat {
    pub fn detect(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            ManifestFormat::Json
        } else if trimmed.contains("remotePackage") || trimmed.contains("sdk-repository") {
            ManifestFormat::GoogleRepositoryXml
        } else {
            ManifestFormat::XamarinXml
        }
    }
}

/// A parsed feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestFeed {
    pub components: Vec<SdkManifestComponent>,
}

impl ManifestFeed {
    pub fn parse(text: &str, format: ManifestFormat) -> Result<Self> {
        let components = match format {
            ManifestFormat::XamarinXml => parse_xamarin(text)?,
            ManifestFormat::GoogleRepositoryXml => parse_google(text)?,
            ManifestFormat::Json => parse_json(text)?,
        };
        debug!("Parsed {} components from {:?} feed", components.len(), format);
        Ok(Self { components })
    }

    pub fn parse_auto(text: &str) -> Result<Self> {
        Self::parse(text, ManifestFormat::detect(text))
    }

    /// Download and parse a feed
    pub async fn fetch(client: &Client, url: &str) -> Result<Self> {
        info!("Fetching SDK manifest {}", url);
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolsError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolsError::Download(format!("HTTP {} for {}", response.status(), url)));
        }
        let text = response
            .text()
            .await
            .map_err(|e| ToolsError::Download(e.to_string()))?;
        Self::parse_auto(&text)
    }

    /// Newest non-obsolete command-line tools with an archive for `platform`
    pub fn select_cmdline_tools(&self, platform: &Platform) -> Option<(&SdkManifestComponent, &SdkArchive)> {
        self.components
            .iter()
            .filter(|c| c.kind == "cmdline-tools" && !c.obsolete)
            .filter_map(|c| c.archive_for(platform).map(|a| (c, a)))
            .max_by_key(|(c, _)| version_key(&c.revision))
    }
}

fn parse_bool(value: Option<&str>) -> bool {
    value.map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(false)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

fn parse_xamarin(text: &str) -> Result<Vec<SdkManifestComponent>> {
    let doc = roxmltree::Document::parse(text)?;
    let mut components = Vec::new();

    for element in doc.root_element().children().filter(|n| n.is_element()) {
        let kind = element.tag_name().name().to_string();
        let revision = element.attribute("revision").unwrap_or_default().to_string();
        let path = element
            .attribute("path")
            .map(String::from)
            .unwrap_or_else(|| kind.clone());

        let mut archives = Vec::new();
        for url in element.descendants().filter(|n| n.has_tag_name("url")) {
            let Some(href) = non_empty(url.text()) else {
                continue;
            };
            archives.push(SdkArchive {
                url: href,
                host_os: non_empty(url.attribute("host-os")),
                host_arch: non_empty(url.attribute("host-arch")),
                checksum_type: url.attribute("checksum-type").unwrap_or("sha1").parse()?,
                checksum: url.attribute("checksum").unwrap_or_default().to_ascii_lowercase(),
                size: url.attribute("size").and_then(|s| s.parse().ok()),
            });
        }

        components.push(SdkManifestComponent {
            kind,
            path,
            revision,
            obsolete: parse_bool(element.attribute("obsolete")),
            archives,
        });
    }

    Ok(components)
}

fn parse_google(text: &str) -> Result<Vec<SdkManifestComponent>> {
    let doc = roxmltree::Document::parse(text)?;
    let mut components = Vec::new();

    for package in doc.descendants().filter(|n| n.has_tag_name("remotePackage")) {
        let path = package.attribute("path").unwrap_or_default().to_string();
        let kind = path.split(';').next().unwrap_or_default().to_string();

        let revision = package
            .children()
            .find(|n| n.has_tag_name("revision"))
            .map(|rev| {
                ["major", "minor", "micro", "preview"]
                    .iter()
                    .filter_map(|part| child_text(rev, part))
                    .collect::<Vec<_>>()
                    .join(".")
            })
            .unwrap_or_default();

        let obsolete = parse_bool(package.attribute("obsolete"))
            || parse_bool(child_text(package, "obsolete").as_deref());

        let mut archives = Vec::new();
        for archive in package.descendants().filter(|n| n.has_tag_name("archive")) {
            let Some(complete) = archive.children().find(|n| n.has_tag_name("complete")) else {
                continue;
            };
            let Some(url) = child_text(complete, "url").filter(|u| !u.is_empty()) else {
                continue;
            };
            let checksum = complete.children().find(|n| n.has_tag_name("checksum"));
            let checksum_type = checksum
                .and_then(|c| c.attribute("type"))
                .unwrap_or("sha1")
                .parse()?;

            archives.push(SdkArchive {
                url: resolve_url(&url),
                host_os: child_text(archive, "host-os").filter(|s| !s.is_empty()),
                host_arch: child_text(archive, "host-arch").filter(|s| !s.is_empty()),
                checksum_type,
                checksum: checksum
                    .and_then(|c| c.text())
                    .map(|t| t.trim().to_ascii_lowercase())
                    .unwrap_or_default(),
                size: child_text(complete, "size").and_then(|s| s.parse().ok()),
            });
        }

        components.push(SdkManifestComponent {
            kind,
            path,
            revision,
            obsolete,
            archives,
        });
    }

    Ok(components)
}

fn child_text(parent: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    parent
        .children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

fn resolve_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("{}{}", GOOGLE_REPOSITORY_BASE, url.trim_start_matches('/'))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonFeed {
    #[serde(default)]
    packages: Vec<JsonPackage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonPackage {
    kind: String,
    #[serde(default)]
    path: Option<String>,
    revision: String,
    #[serde(default)]
    obsolete: bool,
    #[serde(default)]
    archives: Vec<JsonArchive>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonArchive {
    url: String,
    #[serde(default)]
    host_os: Option<String>,
    #[serde(default)]
    host_arch: Option<String>,
    checksum: String,
    #[serde(default = "default_checksum_type")]
    checksum_type: ChecksumType,
    #[serde(default)]
    size: Option<u64>,
}

fn default_checksum_type() -> ChecksumType {
    ChecksumType::Sha1
}

fn parse_json(text: &str) -> Result<Vec<SdkManifestComponent>> {
    let feed: JsonFeed = serde_json::from_str(text)?;
    Ok(feed
        .packages
        .into_iter()
        .map(|p| SdkManifestComponent {
            path: p.path.unwrap_or_else(|| p.kind.clone()),
            kind: p.kind,
            revision: p.revision,
            obsolete: p.obsolete,
            archives: p
                .archives
                .into_iter()
                .map(|a| SdkArchive {
                    url: a.url,
                    host_os: a.host_os.filter(|s| !s.is_empty()),
                    host_arch: a.host_arch.filter(|s| !s.is_empty()),
                    checksum_type: a.checksum_type,
                    checksum: a.checksum.to_ascii_lowercase(),
                    size: a.size,
                })
                .collect(),
        })
        .collect())
}
