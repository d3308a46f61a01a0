//! Host Platform
//!
//! Describes the operating system and architecture the tools run on, and
//! the naming conventions that follow from it. A `Platform` is a plain value
//! constructed once by the caller and passed to whatever needs it.

use std::env;
use std::path::PathBuf;

/// Host operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
}

/// Host CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostArch {
    X86,
    X64,
    Arm64,
}

/// Host platform description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: HostOs,
    pub arch: HostArch,
    exe_extensions: Vec<String>,
}

impl Platform {
    /// Detect the platform of the running process
    pub fn current() -> Self {
        let os = if cfg!(windows) {
            HostOs::Windows
        } else if cfg!(target_os = "macos") {
            HostOs::MacOs
        } else {
            HostOs::Linux
        };

        let arch = if cfg!(target_arch = "aarch64") {
            HostArch::Arm64
        } else if cfg!(target_arch = "x86") {
            HostArch::X86
        } else {
            HostArch::X64
        };

        Self::new(os, arch)
    }

    /// Create a platform description for an explicit OS and architecture
    pub fn new(os: HostOs, arch: HostArch) -> Self {
        let exe_extensions = match os {
            HostOs::Windows => {
                let pathext = env::var("PATHEXT").unwrap_or_default();
                Self::parse_pathext(&pathext)
            }
            _ => vec![String::new()],
        };

        Self {
            os,
            arch,
            exe_extensions,
        }
    }

    /// Split a `PATHEXT` value into lower-case extensions
    pub fn parse_pathext(pathext: &str) -> Vec<String> {
        let extensions: Vec<String> = pathext
            .split(';')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        if extensions.is_empty() {
            vec![".exe".to_string(), ".bat".to_string(), ".cmd".to_string()]
        } else {
            extensions
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == HostOs::Windows
    }

    pub fn is_macos(&self) -> bool {
        self.os == HostOs::MacOs
    }

    pub fn is_linux(&self) -> bool {
        self.os == HostOs::Linux
    }

    /// Executable extensions, including `""` on Unix
    pub fn exe_extensions(&self) -> &[String] {
        &self.exe_extensions
    }

    /// All file names an executable called `name` may have on this host
    pub fn executable_names(&self, name: &str) -> Vec<String> {
        self.exe_extensions
            .iter()
            .map(|ext| format!("{}{}", name, ext))
            .collect()
    }

    /// The primary file name of a native executable (`adb.exe`, `adb`)
    pub fn executable_name(&self, name: &str) -> String {
        if self.is_windows() {
            format!("{}.exe", name)
        } else {
            name.to_string()
        }
    }

    /// The file name of a script wrapper (`sdkmanager.bat`, `ndk-stack.cmd`)
    pub fn script_name(&self, name: &str, windows_ext: &str) -> String {
        if self.is_windows() {
            format!("{}{}", name, windows_ext)
        } else {
            name.to_string()
        }
    }

    /// File name of the `sdkmanager` launcher script
    pub fn sdkmanager_name(&self) -> String {
        self.script_name("sdkmanager", ".bat")
    }

    /// Shared library file name for a library stem
    pub fn native_library_name(&self, stem: &str) -> String {
        match self.os {
            HostOs::Windows => format!("{}.dll", stem),
            HostOs::MacOs => format!("lib{}.dylib", stem),
            HostOs::Linux => format!("lib{}.so", stem),
        }
    }

    /// NDK prebuilt host directory name
    pub fn ndk_host_platform(&self) -> &'static str {
        match self.os {
            HostOs::Windows => "windows-x86_64",
            HostOs::MacOs => "darwin-x86_64",
            HostOs::Linux => "linux-x86_64",
        }
    }

    /// Host OS name as used by SDK manifest feeds
    pub fn feed_os(&self) -> &'static str {
        match self.os {
            HostOs::Windows => "windows",
            HostOs::MacOs => "macosx",
            HostOs::Linux => "linux",
        }
    }

    /// Host architecture name as used by SDK manifest feeds
    pub fn feed_arch(&self) -> &'static str {
        match self.arch {
            HostArch::X86 => "x86",
            HostArch::X64 => "x64",
            HostArch::Arm64 => "aarch64",
        }
    }

    /// `PATH` list separator
    pub fn path_separator(&self) -> char {
        if self.is_windows() {
            ';'
        } else {
            ':'
        }
    }

    /// Directories listed in `PATH`, in order
    pub fn path_directories(&self) -> Vec<PathBuf> {
        let path = env::var_os("PATH").unwrap_or_default();
        env::split_paths(&path).filter(|p| !p.as_os_str().is_empty()).collect()
    }

    /// `Program Files` directories, 32-bit first
    pub fn program_files_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for var in ["ProgramFiles(x86)", "ProgramFiles", "ProgramW6432"] {
            if let Ok(dir) = env::var(var) {
                let dir = PathBuf::from(dir);
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_library_names() {
        let linux = Platform::new(HostOs::Linux, HostArch::X64);
        let mac = Platform::new(HostOs::MacOs, HostArch::Arm64);
        assert_eq!(linux.native_library_name("jvm"), "libjvm.so");
        assert_eq!(mac.native_library_name("jvm"), "libjvm.dylib");
        assert_eq!(mac.ndk_host_platform(), "darwin-x86_64");
        assert_eq!(mac.feed_arch(), "aarch64");
    }

    #[test]
    fn test_pathext() {
        assert_eq!(Platform::parse_pathext(".COM;.EXE;;.Bat"), vec![".com", ".exe", ".bat"]);
        assert_eq!(Platform::parse_pathext(""), vec![".exe", ".bat", ".cmd"]);
    }

    #[test]
    fn test_unix_executable_names() {
        let linux = Platform::new(HostOs::Linux, HostArch::X64);
        assert_eq!(linux.executable_names("adb"), vec!["adb".to_string()]);
        assert_eq!(linux.sdkmanager_name(), "sdkmanager");
        assert_eq!(Platform::new(HostOs::Windows, HostArch::X64).sdkmanager_name(), "sdkmanager.bat");
    }
}
