//! Windows registry lookups
//!
//! On other hosts every lookup comes back empty.

/// Registry root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hive {
    CurrentUser,
    LocalMachine,
}

#[cfg(windows)]
mod imp {
    use super::Hive;
    use tracing::trace;
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY};
    use winreg::RegKey;

    fn root(hive: Hive) -> RegKey {
        match hive {
            Hive::CurrentUser => RegKey::predef(HKEY_CURRENT_USER),
            Hive::LocalMachine => RegKey::predef(HKEY_LOCAL_MACHINE),
        }
    }

    // Both registry views are consulted, 64-bit first
    fn open(hive: Hive, key: &str) -> Vec<RegKey> {
        [KEY_WOW64_64KEY, KEY_WOW64_32KEY]
            .into_iter()
            .filter_map(|view| root(hive).open_subkey_with_flags(key, KEY_READ | view).ok())
            .collect()
    }

    pub fn read_string(hive: Hive, key: &str, value: &str) -> Option<String> {
        let found = open(hive, key)
            .into_iter()
            .find_map(|k| k.get_value::<String, _>(value).ok())
            .filter(|v| !v.trim().is_empty());
        trace!("registry {:?}\\{}@{} = {:?}", hive, key, value, found);
        found
    }

    pub fn subkey_names(hive: Hive, key: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for k in open(hive, key) {
            for name in k.enum_keys().flatten() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

#[cfg(not(windows))]
mod imp {
    use super::Hive;

    pub fn read_string(_hive: Hive, _key: &str, _value: &str) -> Option<String> {
        None
    }

    pub fn subkey_names(_hive: Hive, _key: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Read a non-empty string value
pub fn read_string(hive: Hive, key: &str, value: &str) -> Option<String> {
    imp::read_string(hive, key, value)
}

/// Names of the direct subkeys of `key`
pub fn subkey_names(hive: Hive, key: &str) -> Vec<String> {
    imp::subkey_names(hive, key)
}
