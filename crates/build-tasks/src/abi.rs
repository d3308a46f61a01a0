//! Runtime identifier and ABI mapping

use std::fmt;

/// Android native ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Abi {
    ArmeabiV7a,
    Arm64V8a,
    X86,
    X86_64,
}

/// CPU architecture a build targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AndroidTargetArch {
    Arm,
    Arm64,
    X86,
    X86_64,
}

impl Abi {
    pub const ALL: [Abi; 4] = [Abi::ArmeabiV7a, Abi::Arm64V8a, Abi::X86, Abi::X86_64];

    /// Directory name under `lib/` in an APK
    pub fn name(self) -> &'static str {
        match self {
            Abi::ArmeabiV7a => "armeabi-v7a",
            Abi::Arm64V8a => "arm64-v8a",
            Abi::X86 => "x86",
            Abi::X86_64 => "x86_64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Abi::ALL.into_iter().find(|abi| abi.name() == name)
    }

    /// `android-<arch>` runtime identifier
    pub fn runtime_identifier(self) -> &'static str {
        match self {
            Abi::ArmeabiV7a => "android-arm",
            Abi::Arm64V8a => "android-arm64",
            Abi::X86 => "android-x86",
            Abi::X86_64 => "android-x64",
        }
    }

    pub fn target_arch(self) -> AndroidTargetArch {
        match self {
            Abi::ArmeabiV7a => AndroidTargetArch::Arm,
            Abi::Arm64V8a => AndroidTargetArch::Arm64,
            Abi::X86 => AndroidTargetArch::X86,
            Abi::X86_64 => AndroidTargetArch::X86_64,
        }
    }

    /// NDK clang target prefix
    pub fn ndk_triple(self) -> &'static str {
        match self {
            Abi::ArmeabiV7a => "armv7a-linux-androideabi",
            Abi::Arm64V8a => "aarch64-linux-android",
            Abi::X86 => "i686-linux-android",
            Abi::X86_64 => "x86_64-linux-android",
        }
    }

    /// ABI for a runtime identifier such as `android-arm64`. Only the last
    /// `-` separated segment is inspected.
    pub fn from_runtime_identifier(rid: &str) -> Option<Self> {
        let arch = rid.rsplit('-').next()?;
        match arch {
            "arm" => Some(Abi::ArmeabiV7a),
            "arm64" => Some(Abi::Arm64V8a),
            "x86" => Some(Abi::X86),
            "x64" => Some(Abi::X86_64),
            _ => None,
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ABI name for `rid`, or `""` when it is not an Android RID we know
pub fn runtime_identifier_to_abi(rid: &str) -> &'static str {
    Abi::from_runtime_identifier(rid).map(Abi::name).unwrap_or("")
}

pub fn abi_to_runtime_identifier(abi: &str) -> Option<&'static str> {
    Abi::from_name(abi).map(Abi::runtime_identifier)
}

pub fn abi_to_target_arch(abi: &str) -> Option<AndroidTargetArch> {
    Abi::from_name(abi).map(Abi::target_arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_identifier_to_abi() {
        assert_eq!(runtime_identifier_to_abi("android-arm"), "armeabi-v7a");
        assert_eq!(runtime_identifier_to_abi("android-arm64"), "arm64-v8a");
        assert_eq!(runtime_identifier_to_abi("android-x86"), "x86");
        assert_eq!(runtime_identifier_to_abi("android-x64"), "x86_64");
        assert_eq!(runtime_identifier_to_abi("android-mips"), "");
        assert_eq!(runtime_identifier_to_abi(""), "");
    }

    #[test]
    fn test_abi_lookups() {
        assert_eq!(abi_to_runtime_identifier("arm64-v8a"), Some("android-arm64"));
        assert_eq!(abi_to_runtime_identifier("mips"), None);
        assert_eq!(abi_to_target_arch("x86_64"), Some(AndroidTargetArch::X86_64));
        assert_eq!(abi_to_target_arch("armeabi"), None);

        for abi in Abi::ALL {
            assert_eq!(runtime_identifier_to_abi(abi.runtime_identifier()), abi.name());
        }
        assert_eq!(Abi::X86.to_string(), "x86");
    }
}
