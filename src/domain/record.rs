//! Key paths and the record emitted for each matched key.

use serde::Serialize;
use std::fmt;

use super::Hive;

/// Separator between key names in a registry path.
pub const SEPARATOR: char = '\\';

/// Normalize a requested key path: drop leading, trailing and repeated separators.
///
/// An empty result denotes the hive root.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Join a parent path and a child name.
///
/// Children of the hive root have no parent prefix.
#[must_use]
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_owned()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Registry key names compare case-insensitively.
#[must_use]
pub fn same_key_name(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right) || left.to_lowercase() == right.to_lowercase()
}

/// Descriptor of one matched key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyRecord {
    /// Host the key was read from.
    pub computer_name: String,
    /// Hive the key lives in.
    pub hive: Hive,
    /// Full path relative to the hive root.
    pub key: String,
    /// Number of direct subkeys.
    pub sub_key_count: usize,
    /// Number of named values.
    pub value_count: usize,
}

impl KeyRecord {
    /// Name of the key itself (last path segment).
    #[must_use]
    pub fn name(&self) -> &str {
        self.key.rsplit(SEPARATOR).next().unwrap_or(&self.key)
    }

    /// Path of the key's parent, empty for direct children of the hive root.
    #[must_use]
    pub fn parent(&self) -> &str {
        self.key
            .rsplit_once(SEPARATOR)
            .map_or("", |(parent, _)| parent)
    }
}

impl fmt::Display for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}\\{}", self.computer_name, self.hive, self.key)
    }
}
