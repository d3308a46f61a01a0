//! File Utilities
//!
//! Copy-if-changed helpers that leave the destination untouched when its
//! content already matches, so incremental builds keep their timestamps.
//! Content is compared by CRC-64/ECMA-182 hash. Writes are retried while
//! another process holds the destination open.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use crc::{Crc, CRC_64_ECMA_182};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::{Result, TaskError};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub const RETRY_ATTEMPTS_VAR: &str = "DOTNET_ANDROID_FILE_WRITE_RETRY_ATTEMPTS";
pub const RETRY_DELAY_VAR: &str = "DOTNET_ANDROID_FILE_WRITE_RETRY_DELAY_MS";

const DEFAULT_RETRY_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const MAX_ENTRY_PREALLOCATION: u64 = 1 << 20;

/// How often, and how patiently, a blocked write is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Read the policy from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build the policy from a variable lookup; unset or unparsable values
    /// fall back to the defaults
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let attempts = lookup(RETRY_ATTEMPTS_VAR)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        let delay = lookup(RETRY_DELAY_VAR)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);
        Self {
            attempts,
            delay: Duration::from_millis(delay),
        }
    }
}

/// Whether `err` means another process currently holds the file
pub fn is_retryable(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    // ERROR_ACCESS_DENIED, ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    cfg!(windows) && matches!(err.raw_os_error(), Some(5 | 32 | 33))
}

/// Hash of everything readable from `reader`
pub fn hash_stream<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut digest = CRC64.digest();
    let mut buffer = [0u8; 8192];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(digest.finalize())
}

pub fn hash_file(path: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    hash_stream(&mut reader)
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Hash of the UTF-8 encoding of `text`
pub fn hash_string(text: &str) -> u64 {
    hash_bytes(text.as_bytes())
}

/// 16 lower-case hex digits
pub fn to_hex(hash: u64) -> String {
    format!("{:016x}", hash)
}

/// Clear the read-only flag on `path` if it exists
pub fn set_writable(path: &Path) -> io::Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let mut permissions = metadata.permissions();
    if !permissions.readonly() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o200);
    }
    #[cfg(not(unix))]
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);

    fs::set_permissions(path, permissions)
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Whether `dest` already holds exactly `len` bytes hashing to `hash`
fn matches_existing(dest: &Path, len: u64, hash: u64) -> bool {
    match fs::metadata(dest) {
        Ok(m) if m.is_file() && m.len() == len => hash_file(dest).map(|h| h == hash).unwrap_or(false),
        _ => false,
    }
}

/// Archive extraction settings
#[derive(Default)]
pub struct ExtractOptions<'a> {
    /// Maps an entry name to the relative path it is written to
    pub modify: Option<Box<dyn Fn(&str) -> String + 'a>>,
    /// Entries for which this returns `true` are not extracted
    pub skip: Option<Box<dyn Fn(&str) -> bool + 'a>>,
    /// When set, files under the destination that the archive did not
    /// produce are deleted if this returns `true` for them
    pub delete_stale: Option<Box<dyn Fn(&Path) -> bool + 'a>>,
    /// Write every entry even when the content is unchanged
    pub force_update: bool,
}

/// Relative path for an archive entry, rejecting anything that would land
/// outside the destination
fn entry_relative_path(name: &str) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TaskError::UnsafeEntry(name.to_string()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(TaskError::UnsafeEntry(name.to_string()));
    }
    Ok(relative)
}

/// Copy-if-changed and extraction helpers sharing one retry policy
#[derive(Debug, Clone, Default)]
pub struct Files {
    retry: RetryPolicy,
}

impl Files {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `op`, retrying while the file is locked by someone else
    pub(crate) fn with_retry<T, F>(&self, path: &Path, mut op: F) -> io::Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(
                        "Could not write {:?} (attempt {}/{}): {}; retrying in {:?}",
                        path, attempt, attempts, e, self.retry.delay
                    );
                    thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        ensure_parent(dest)?;
        set_writable(dest)?;
        self.with_retry(dest, || fs::write(dest, bytes))?;
        Ok(())
    }

    /// Copy `source` over `dest` unless both already hold the same content.
    /// Returns whether `dest` was written.
    pub fn copy_if_changed(&self, source: &Path, dest: &Path) -> Result<bool> {
        let metadata = match fs::metadata(source) {
            Ok(m) if m.is_file() => m,
            _ => return Err(TaskError::FileNotFound(source.to_path_buf())),
        };

        if matches_existing(dest, metadata.len(), hash_file(source)?) {
            debug!("Skipping copy of {:?}, {:?} is up to date", source, dest);
            return Ok(false);
        }

        ensure_parent(dest)?;
        set_writable(dest)?;
        self.with_retry(dest, || fs::copy(source, dest))?;
        debug!("Copied {:?} to {:?}", source, dest);
        Ok(true)
    }

    pub fn copy_if_string_changed(&self, contents: &str, dest: &Path) -> Result<bool> {
        self.copy_if_bytes_changed(contents.as_bytes(), dest)
    }

    pub fn copy_if_bytes_changed(&self, bytes: &[u8], dest: &Path) -> Result<bool> {
        if matches_existing(dest, bytes.len() as u64, hash_bytes(bytes)) {
            debug!("Skipping write of {:?}, content is unchanged", dest);
            return Ok(false);
        }
        self.write_bytes(bytes, dest)?;
        debug!("Wrote {} bytes to {:?}", bytes.len(), dest);
        Ok(true)
    }

    /// Write the whole of `stream`, from its start, to `dest` if it differs
    pub fn copy_if_stream_changed<S: Read + Seek>(&self, stream: &mut S, dest: &Path) -> Result<bool> {
        stream.seek(SeekFrom::Start(0))?;
        let hash = hash_stream(stream)?;
        let len = stream.stream_position()?;
        if matches_existing(dest, len, hash) {
            debug!("Skipping write of {:?}, stream is unchanged", dest);
            return Ok(false);
        }

        ensure_parent(dest)?;
        set_writable(dest)?;
        self.with_retry(dest, || {
            stream.seek(SeekFrom::Start(0))?;
            let mut file = File::create(dest)?;
            io::copy(stream, &mut file)?;
            file.flush()
        })?;
        Ok(true)
    }

    /// Extract every file in the archive at `zip` below `destination`.
    /// Returns whether anything under `destination` was written or deleted.
    pub fn extract_all(&self, zip: &Path, destination: &Path, options: &ExtractOptions<'_>) -> Result<bool> {
        if !zip.is_file() {
            return Err(TaskError::FileNotFound(zip.to_path_buf()));
        }
        let mut archive = ZipArchive::new(BufReader::new(File::open(zip)?))?;
        fs::create_dir_all(destination)?;

        let mut changed = false;
        let mut produced = HashSet::new();

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            if options.skip.as_ref().map(|skip| skip(&name)).unwrap_or(false) {
                debug!("Skipping archive entry {}", name);
                continue;
            }
            let name = match &options.modify {
                Some(modify) => modify(&name),
                None => name,
            };

            let target = destination.join(entry_relative_path(&name)?);
            // The declared size comes from the archive and is only a hint
            let mut bytes = Vec::with_capacity(entry.size().min(MAX_ENTRY_PREALLOCATION) as usize);
            entry.read_to_end(&mut bytes)?;

            if options.force_update {
                self.write_bytes(&bytes, &target)?;
                changed = true;
            } else {
                changed |= self.copy_if_bytes_changed(&bytes, &target)?;
            }
            produced.insert(target);
        }

        if let Some(should_delete) = &options.delete_stale {
            let stale: Vec<PathBuf> = WalkDir::new(destination)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| !produced.contains(p) && should_delete(p.as_path()))
                .collect();
            for path in stale {
                debug!("Deleting stale file {:?}", path);
                set_writable(&path)?;
                self.with_retry(&path, || fs::remove_file(&path))?;
                changed = true;
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::io::Cursor;
    use zip::write::FileOptions;

    fn no_wait(attempts: u32) -> Files {
        Files::new(RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        })
    }

    #[test]
    fn test_retry_policy_from_vars() {
        let none = RetryPolicy::from_vars(|_| None);
        assert_eq!(none, RetryPolicy::default());
        assert_eq!(none.attempts, 10);
        assert_eq!(none.delay, Duration::from_millis(1000));

        let vars: HashMap<&str, &str> = [(RETRY_ATTEMPTS_VAR, "3"), (RETRY_DELAY_VAR, " 25 ")].into();
        let policy = RetryPolicy::from_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(25));

        let bad = RetryPolicy::from_vars(|_| Some("lots".into()));
        assert_eq!(bad, RetryPolicy::default());
    }

    #[test]
    fn test_crc64_check_value() {
        assert_eq!(hash_string("123456789"), 0x6C40_DF5F_0B49_7347);
        assert_eq!(to_hex(hash_string("123456789")), "6c40df5f0b497347");
        assert_eq!(to_hex(0), "0000000000000000");
        assert_eq!(
            hash_stream(&mut Cursor::new(b"123456789".to_vec())).unwrap(),
            hash_bytes(b"123456789")
        );
    }

    #[test]
    fn test_copy_if_changed_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.txt");
        let dest = dir.path().join("out").join("dest.txt");
        fs::write(&source, "hello").unwrap();

        let files = no_wait(1);
        assert!(files.copy_if_changed(&source, &dest).unwrap());
        assert!(!files.copy_if_changed(&source, &dest).unwrap());
        assert_eq!(hash_file(&dest).unwrap(), hash_string("hello"));

        fs::write(&source, "hello world").unwrap();
        assert!(files.copy_if_changed(&source, &dest).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello world");
    }

    #[test]
    fn test_copy_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = no_wait(1)
            .copy_if_changed(&dir.path().join("missing"), &dir.path().join("dest"))
            .unwrap_err();
        assert!(matches!(err, TaskError::FileNotFound(_)));
    }

    #[test]
    fn test_copy_if_string_and_stream_changed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.txt");
        let files = no_wait(1);

        assert!(files.copy_if_string_changed("abc", &dest).unwrap());
        assert!(!files.copy_if_string_changed("abc", &dest).unwrap());

        let mut stream = Cursor::new(b"abc".to_vec());
        stream.set_position(2);
        assert!(!files.copy_if_stream_changed(&mut stream, &dest).unwrap());

        let mut stream = Cursor::new(b"abcd".to_vec());
        assert!(files.copy_if_stream_changed(&mut stream, &dest).unwrap());
        assert_eq!(fs::read(&dest).unwrap(), b"abcd");
    }

    #[test]
    fn test_set_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readonly.txt");
        fs::write(&path, "x").unwrap();

        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&path, permissions).unwrap();

        set_writable(&path).unwrap();
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());
        set_writable(&dir.path().join("absent")).unwrap();
    }

    #[test]
    fn test_retry_stops_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Cell::new(0);
        let result: io::Result<()> = no_wait(3).with_retry(dir.path(), || {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);

        calls.set(0);
        let result: io::Result<()> = no_wait(3).with_retry(dir.path(), || {
            calls.set(calls.get() + 1);
            Err(io::Error::from(io::ErrorKind::NotFound))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);

        calls.set(0);
        let result = no_wait(5).with_retry(dir.path(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_extract_all() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("lib.zip");
        write_zip(
            &archive,
            &[("a.txt", "A"), ("res/b.txt", "B"), ("skip.me", "S")],
        );

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        let options = ExtractOptions {
            modify: Some(Box::new(|name: &str| name.replace("res/", "renamed/"))),
            skip: Some(Box::new(|name: &str| name.ends_with(".me"))),
            delete_stale: Some(Box::new(|_: &Path| true)),
            force_update: false,
        };

        let files = no_wait(1);
        assert!(files.extract_all(&archive, &dest, &options).unwrap());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "A");
        assert_eq!(fs::read_to_string(dest.join("renamed").join("b.txt")).unwrap(), "B");
        assert!(!dest.join("skip.me").exists());
        assert!(!dest.join("stale.txt").exists());

        assert!(!files.extract_all(&archive, &dest, &options).unwrap());
    }

    #[test]
    fn test_extract_ignores_declared_entry_size() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("lying.zip");
        write_zip(&archive, &[("a.txt", "A")]);

        // Claim ~4 GiB uncompressed in the central directory
        let mut raw = fs::read(&archive).unwrap();
        let central = raw
            .windows(4)
            .rposition(|w| w == b"PK\x01\x02")
            .unwrap();
        raw[central + 24..central + 28].copy_from_slice(&0xFFFF_FF00u32.to_le_bytes());
        fs::write(&archive, raw).unwrap();

        let dest = dir.path().join("out");
        assert!(no_wait(1)
            .extract_all(&archive, &dest, &ExtractOptions::default())
            .unwrap());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "A");
    }

    #[test]
    fn test_extract_rejects_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.txt", "x")]);

        let dest = dir.path().join("out");
        let err = no_wait(1)
            .extract_all(&archive, &dest, &ExtractOptions::default())
            .unwrap_err();
        assert!(matches!(err, TaskError::UnsafeEntry(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }
}
