//! Downloader
//!
//! Downloads archives, verifies their checksums, extracts them and moves
//! the result into place.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use android_tools_core::{CancellationToken, Result, ToolsError};
use futures::StreamExt;
use reqwest::Client;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::manifest::ChecksumType;

/// Download progress callback, `(downloaded, total)`
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP downloader
#[derive(Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolsError::Download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download `url` to `target`, returning the number of bytes written.
    ///
    /// A partially written file is removed on failure or cancellation.
    pub async fn download_file(
        &self,
        url: &str,
        target: &Path,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64> {
        info!("Downloading {} to {:?}", url, target);

        let result = self.download_inner(url, target, cancel, progress).await;
        if result.is_err() && target.exists() {
            if let Err(e) = tokio::fs::remove_file(target).await {
                warn!("Unable to remove partial download {:?}: {}", target, e);
            }
        }
        result
    }

    async fn download_inner(
        &self,
        url: &str,
        target: &Path,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<u64> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolsError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolsError::Download(format!("HTTP {} for {}", response.status(), url)));
        }

        let total = response.content_length().unwrap_or(0);
        let mut downloaded: u64 = 0;
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(ToolsError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk.map_err(|e| ToolsError::Download(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(callback) = progress {
                callback(downloaded, total);
            }
        }

        file.flush().await?;
        debug!("Downloaded {} bytes to {:?}", downloaded, target);
        Ok(downloaded)
    }

    /// Download the text body of `url`
    pub async fn download_string(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolsError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolsError::Download(format!("HTTP {} for {}", response.status(), url)));
        }
        response.text().await.map_err(|e| ToolsError::Download(e.to_string()))
    }
}

/// Lower-case hex digest of a file
pub fn file_digest(path: &Path, checksum_type: ChecksumType) -> Result<String> {
    fn digest<D: Digest>(mut file: File) -> Result<String> {
        let mut hasher = D::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    let file = File::open(path)?;
    match checksum_type {
        ChecksumType::Sha1 => digest::<Sha1>(file),
        ChecksumType::Sha256 => digest::<Sha256>(file),
    }
}

/// Fail with `ChecksumMismatch` unless `path` hashes to `expected`
pub async fn verify_checksum(path: &Path, checksum_type: ChecksumType, expected: &str) -> Result<()> {
    debug!("Verifying {:?} checksum for {:?}", checksum_type, path);

    let owned = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || file_digest(&owned, checksum_type))
        .await
        .map_err(|e| ToolsError::Extraction(e.to_string()))??;

    let expected = expected.trim().to_ascii_lowercase();
    if actual == expected {
        debug!("Checksum verified");
        Ok(())
    } else {
        Err(ToolsError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        })
    }
}

/// Extract a ZIP archive into `target_dir`
pub async fn extract_zip(archive: &Path, target_dir: &Path) -> Result<()> {
    info!("Extracting {:?} to {:?}", archive, target_dir);

    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| ToolsError::Extraction(e.to_string()))?;

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| ToolsError::Extraction(e.to_string()))?;

            // Entries escaping the target directory are skipped
            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                warn!("Skipping unsafe zip entry {:?}", entry.name());
                continue;
            };
            let outpath = target_dir.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = File::create(&outpath)?;
                std::io::copy(&mut entry, &mut outfile)?;
            }

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
                }
            }
        }

        Ok(())
    })
    .await
    .map_err(|e| ToolsError::Extraction(e.to_string()))?
}

/// Extract a `.tar.gz` archive into `target_dir`
pub async fn extract_tar_gz(archive: &Path, target_dir: &Path) -> Result<()> {
    info!("Extracting {:?} to {:?}", archive, target_dir);

    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = File::open(&archive)?;
        let gz = flate2::read::GzDecoder::new(file);
        let mut tar = tar::Archive::new(gz);

        std::fs::create_dir_all(&target_dir)?;
        tar.unpack(&target_dir)
            .map_err(|e| ToolsError::Extraction(e.to_string()))?;

        Ok(())
    })
    .await
    .map_err(|e| ToolsError::Extraction(e.to_string()))?
}

/// Move `source` to `destination`, replacing any existing directory.
///
/// An existing destination is renamed to a backup first and restored if the
/// move fails; the backup is deleted after a successful move.
pub fn move_directory_with_backup(source: &Path, destination: &Path) -> Result<()> {
    let backup = backup_path(destination);

    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }
    let had_existing = destination.exists();
    if had_existing {
        debug!("Backing up {:?} to {:?}", destination, backup);
        std::fs::rename(destination, &backup)?;
    } else if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match move_directory(source, destination) {
        Ok(()) => {
            if had_existing {
                if let Err(e) = std::fs::remove_dir_all(&backup) {
                    warn!("Unable to remove backup {:?}: {}", backup, e);
                }
            }
            info!("Installed {:?}", destination);
            Ok(())
        }
        Err(e) => {
            warn!("Moving {:?} to {:?} failed: {}", source, destination, e);
            if destination.exists() {
                std::fs::remove_dir_all(destination).ok();
            }
            if had_existing {
                std::fs::rename(&backup, destination)?;
            }
            Err(e)
        }
    }
}

fn backup_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".backup");
    destination.with_file_name(name)
}

// rename, falling back to copy + delete across file systems
fn move_directory(source: &Path, destination: &Path) -> Result<()> {
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_directory(source, destination)?;
    std::fs::remove_dir_all(source)?;
    Ok(())
}

// Symlinks are recreated rather than followed
fn copy_directory(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| ToolsError::InvalidOperation(e.to_string()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let points_to = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)?;
    Ok(())
}

// Creating symlinks needs extra privileges on Windows; copy what they point at
#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    if link.is_dir() {
        copy_directory(link, target)
    } else {
        std::fs::copy(link, target)?;
        Ok(())
    }
}

/// Mark every file directly inside `dir` executable; no-op off Unix
pub fn set_executable_bits(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                let mut perms = std::fs::metadata(&path)?.permissions();
                perms.set_mode(perms.mode() | 0o755);
                std::fs::set_permissions(&path, perms)?;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Zip the contents of `dir` into `archive`, paths relative to `dir`
    pub(crate) fn zip_directory(dir: &Path, archive: &Path) {
        let mut zip = zip::ZipWriter::new(File::create(archive).unwrap());
        let options = zip::write::FileOptions::default();
        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let entry = entry.unwrap();
            let name = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/", name), options).unwrap();
            } else {
                zip.start_file(name, options).unwrap();
                zip.write_all(&std::fs::read(entry.path()).unwrap()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_verify_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.bin");
        std::fs::write(&file, b"abc").unwrap();

        verify_checksum(&file, ChecksumType::Sha1, "A9993E364706816ABA3E25717850C26C9CD0D89D")
            .await
            .unwrap();
        verify_checksum(
            &file,
            ChecksumType::Sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        )
        .await
        .unwrap();

        let err = verify_checksum(&file, ChecksumType::Sha1, "00").await.unwrap_err();
        assert!(matches!(err, ToolsError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tools.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::FileOptions::default();
            zip.add_directory("cmdline-tools/bin/", options).unwrap();
            zip.start_file("cmdline-tools/bin/sdkmanager", options).unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.start_file("../escape.txt", options).unwrap();
            zip.write_all(b"nope").unwrap();
            zip.finish().unwrap();
        }

        let out = dir.path().join("out");
        extract_zip(&archive, &out).await.unwrap();
        assert!(out.join("cmdline-tools/bin/sdkmanager").is_file());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("jdk.tar.gz");
        {
            let gz = flate2::write::GzEncoder::new(File::create(&archive).unwrap(), flate2::Compression::default());
            let mut builder = tar::Builder::new(gz);
            let data = b"JAVA_VERSION=\"17.0.8\"\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "jdk-17.0.8+7/release", &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let out = dir.path().join("out");
        extract_tar_gz(&archive, &out).await.unwrap();
        assert!(out.join("jdk-17.0.8+7").join("release").is_file());
    }

    #[test]
    fn test_move_directory_with_backup_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("new");
        let dest = dir.path().join("cmdline-tools").join("11.0");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("marker"), b"new").unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("marker"), b"old").unwrap();

        move_directory_with_backup(&source, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("marker")).unwrap(), b"new");
        assert!(!source.exists());
        assert!(!backup_path(&dest).exists());
    }

    #[test]
    fn test_move_directory_restores_backup_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("jdk");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("marker"), b"old").unwrap();

        let missing = dir.path().join("does-not-exist");
        assert!(move_directory_with_backup(&missing, &dest).is_err());
        assert_eq!(std::fs::read(dest.join("marker")).unwrap(), b"old");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_directory_keeps_symlinked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("jdk");
        std::fs::create_dir_all(src.join("legal/java.base")).unwrap();
        std::fs::write(src.join("legal/java.base/LICENSE"), b"GPLv2").unwrap();
        std::os::unix::fs::symlink("legal/java.base", src.join("link")).unwrap();

        let dst = dir.path().join("other").join("out");
        copy_directory(&src, &dst).unwrap();

        let link = dst.join("link");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("legal/java.base"));
        assert_eq!(std::fs::read(link.join("LICENSE")).unwrap(), b"GPLv2");
        assert_eq!(std::fs::read(dst.join("legal/java.base/LICENSE")).unwrap(), b"GPLv2");
    }

    #[cfg(unix)]
    #[test]
    fn test_set_executable_bits() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("sdkmanager");
        std::fs::write(&tool, b"").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();

        set_executable_bits(dir.path()).unwrap();
        assert_eq!(std::fs::metadata(&tool).unwrap().permissions().mode() & 0o111, 0o111);
    }
}
