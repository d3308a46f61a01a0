//! SDK Licenses
//!
//! Parses the pending licenses printed by `sdkmanager --licenses` and records
//! acceptance the same way `sdkmanager` does: the SHA-1 of the license text
//! stored in `<sdk>/licenses/<id>`, one hash per line.

use std::path::{Path, PathBuf};

use android_tools_core::{Result, ToolsError};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

/// A license reported by `sdkmanager --licenses`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkLicense {
    pub id: String,
    pub text: Vec<String>,
}

impl SdkLicense {
    /// License text as hashed by `sdkmanager`
    pub fn normalized_text(&self) -> String {
        self.text.join("\n").trim().to_string()
    }

    /// Lower-case hex SHA-1 of the normalized text
    pub fn hash(&self) -> String {
        hex::encode(Sha1::digest(self.normalized_text().as_bytes()))
    }
}

/// License ids name a file under `<sdk>/licenses`
pub fn is_valid_license_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

/// Parse the licenses section of `sdkmanager --licenses` output.
///
/// Each license is introduced by `[n/m: ]License <id>:` and its text is enclosed in
/// dashed separator lines.
pub fn parse_licenses(output: &str) -> Vec<SdkLicense> {
    let mut licenses = Vec::new();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        let Some(id) = trimmed
            .find("License ")
            .map(|i| &trimmed[i + "License ".len()..])
            .and_then(|rest| rest.strip_suffix(':'))
            .map(str::trim)
            .filter(|id| is_valid_license_id(id))
        else {
            continue;
        };

        // Opening separator
        while let Some(next) = lines.peek() {
            if is_separator(next) {
                lines.next();
                break;
            }
            if next.trim().is_empty() {
                lines.next();
                continue;
            }
            break;
        }

        let mut text = Vec::new();
        for body in lines.by_ref() {
            if is_separator(body) {
                break;
            }
            text.push(body.trim_end().to_string());
        }

        licenses.push(SdkLicense {
            id: id.to_string(),
            text,
        });
    }

    licenses
}

/// `<sdk>/licenses/<id>`
pub fn license_file(sdk: &Path, id: &str) -> PathBuf {
    sdk.join("licenses").join(id)
}

/// Whether the SDK already records acceptance of `license`
pub fn is_license_accepted(sdk: &Path, license: &SdkLicense) -> bool {
    let hash = license.hash();
    std::fs::read_to_string(license_file(sdk, &license.id))
        .map(|contents| contents.lines().any(|l| l.trim().eq_ignore_ascii_case(&hash)))
        .unwrap_or(false)
}

/// Record acceptance of `license`; returns `false` when it was already accepted
pub fn accept_license(sdk: &Path, license: &SdkLicense) -> Result<bool> {
    if !is_valid_license_id(&license.id) {
        return Err(ToolsError::InvalidArgument(format!("license id `{}`", license.id)));
    }
    if is_license_accepted(sdk, license) {
        debug!("License {} already accepted", license.id);
        return Ok(false);
    }

    let file = license_file(sdk, &license.id);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut contents = std::fs::read_to_string(&file).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&license.hash());
    contents.push('\n');
    std::fs::write(&file, contents)?;

    info!("Accepted license {}", license.id);
    Ok(true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const LICENSES_OUTPUT: &str = "\
[=======================================] 100% Computing updates...
2 of 7 SDK package licenses not accepted.
Review licenses that have not been accepted (y/N)? y

1/2: License android-sdk-preview-license:
---------------------------------------
Terms and Conditions

This is the Android SDK Preview License Agreement
---------------------------------------
Accept? (y/N): n
2/2: License intel-android-extra-license:
---------------------------------------
Intel license text.
---------------------------------------
Accept? (y/N): n
";

    #[test]
    fn test_parse_licenses() {
        let licenses = parse_licenses(LICENSES_OUTPUT);
        assert_eq!(licenses.len(), 2);
        assert_eq!(licenses[0].id, "android-sdk-preview-license");
        assert_eq!(
            licenses[0].text,
            vec![
                "Terms and Conditions".to_string(),
                String::new(),
                "This is the Android SDK Preview License Agreement".to_string(),
            ]
        );
        assert_eq!(licenses[1].id, "intel-android-extra-license");
        assert_eq!(licenses[1].text, vec!["Intel license text.".to_string()]);
    }

    #[test]
    fn test_accept_license_writes_sha1_once() {
        let sdk = tempfile::tempdir().unwrap();
        let license = SdkLicense {
            id: "android-sdk-license".into(),
            text: vec!["abc".into()],
        };
        assert_eq!(license.hash(), "a9993e364706816aba3e25717850c26c9cd0d89d");

        std::fs::create_dir_all(sdk.path().join("licenses")).unwrap();
        std::fs::write(license_file(sdk.path(), &license.id), "\n24333f8a63b6825ea9c5514f83c2829b004d1fee").unwrap();

        assert!(!is_license_accepted(sdk.path(), &license));
        assert!(accept_license(sdk.path(), &license).unwrap());
        assert!(is_license_accepted(sdk.path(), &license));
        assert!(!accept_license(sdk.path(), &license).unwrap());

        let contents = std::fs::read_to_string(license_file(sdk.path(), &license.id)).unwrap();
        assert_eq!(
            contents,
            "\n24333f8a63b6825ea9c5514f83c2829b004d1fee\na9993e364706816aba3e25717850c26c9cd0d89d\n"
        );
    }

    #[test]
    fn test_path_like_license_ids_skipped() {
        let output = "\
1/3: License ../../evil:
---------------------------------------
Overwrite something.
---------------------------------------
2/3: License sub/dir:
---------------------------------------
Nested.
---------------------------------------
3/3: License android-sdk-license:
---------------------------------------
Fine.
---------------------------------------
";
        let licenses = parse_licenses(output);
        assert_eq!(licenses.len(), 1);
        assert_eq!(licenses[0].id, "android-sdk-license");

        assert!(!is_valid_license_id("..\\evil"));
        assert!(!is_valid_license_id("."));
        assert!(is_valid_license_id("android-sdk-preview-license"));
    }

    #[test]
    fn test_accept_license_rejects_path_like_id() {
        let sdk = tempfile::tempdir().unwrap();
        let license = SdkLicense {
            id: "../escape".into(),
            text: vec!["abc".into()],
        };
        let err = accept_license(sdk.path(), &license).unwrap_err();
        assert!(matches!(err, ToolsError::InvalidArgument(_)));
        assert!(!sdk.path().join("escape").exists());
        assert!(!sdk.path().join("licenses").exists());
    }
}
