//! Predefined registry roots.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Top-level root of a machine's registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Hive {
    /// `HKEY_CLASSES_ROOT`.
    ClassesRoot,
    /// `HKEY_CURRENT_USER`.
    CurrentUser,
    /// `HKEY_LOCAL_MACHINE`.
    #[default]
    LocalMachine,
    /// `HKEY_USERS`.
    Users,
    /// `HKEY_PERFORMANCE_DATA`.
    PerformanceData,
    /// `HKEY_CURRENT_CONFIG`.
    CurrentConfig,
    /// `HKEY_DYN_DATA`.
    DynData,
}

/// Error when a hive name is not one of the known selectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hive: {0} (expected e.g. LocalMachine, HKEY_LOCAL_MACHINE or HKLM)")]
pub struct UnknownHive(
    /// The rejected input.
    pub String,
);

impl Hive {
    /// Every hive, in declaration order.
    pub const ALL: [Hive; 7] = [
        Hive::ClassesRoot,
        Hive::CurrentUser,
        Hive::LocalMachine,
        Hive::Users,
        Hive::PerformanceData,
        Hive::CurrentConfig,
        Hive::DynData,
    ];

    /// Selector name, e.g. `LocalMachine`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Hive::ClassesRoot => "ClassesRoot",
            Hive::CurrentUser => "CurrentUser",
            Hive::LocalMachine => "LocalMachine",
            Hive::Users => "Users",
            Hive::PerformanceData => "PerformanceData",
            Hive::CurrentConfig => "CurrentConfig",
            Hive::DynData => "DynData",
        }
    }

    /// Win32 name of the predefined root key (e.g. `HKEY_LOCAL_MACHINE`).
    #[must_use]
    pub fn root_name(self) -> &'static str {
        match self {
            Hive::ClassesRoot => "HKEY_CLASSES_ROOT",
            Hive::CurrentUser => "HKEY_CURRENT_USER",
            Hive::LocalMachine => "HKEY_LOCAL_MACHINE",
            Hive::Users => "HKEY_USERS",
            Hive::PerformanceData => "HKEY_PERFORMANCE_DATA",
            Hive::CurrentConfig => "HKEY_CURRENT_CONFIG",
            Hive::DynData => "HKEY_DYN_DATA",
        }
    }

    /// Abbreviation used by shells, e.g. `HKLM`.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Hive::ClassesRoot => "HKCR",
            Hive::CurrentUser => "HKCU",
            Hive::LocalMachine => "HKLM",
            Hive::Users => "HKU",
            Hive::PerformanceData => "HKPD",
            Hive::CurrentConfig => "HKCC",
            Hive::DynData => "HKDD",
        }
    }

    /// Returns true if `name` is any of the accepted spellings of this hive.
    #[must_use]
    pub fn is_named(self, name: &str) -> bool {
        [self.as_str(), self.root_name(), self.short_name()]
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hive {
    type Err = UnknownHive;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_end_matches(':');
        Hive::ALL
            .into_iter()
            .find(|hive| hive.is_named(name))
            .ok_or_else(|| UnknownHive(s.to_owned()))
    }
}
