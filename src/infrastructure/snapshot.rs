//! Key store backed by one TOML snapshot file per machine.

use log::debug;
use std::error::Error as _;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use toml::{Table, Value};

use crate::domain::{Connection, Hive, Provider, RegistryKey, StoreError, same_key_name};

/// Extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "toml";

/// Errors that can occur when loading a registry snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No file in the directory is named after the host.
    #[error("no snapshot for host {host} in {}", dir.display())]
    HostNotFound {
        /// Requested host.
        host: String,
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// The directory could not be listed.
    #[error("failed to read snapshot directory: {}", dir.display())]
    ReadDir {
        /// Snapshot directory.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be read.
    #[error("failed to read snapshot: {}", path.display())]
    Read {
        /// Snapshot file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("failed to parse snapshot: {}", path.display())]
    Parse {
        /// Snapshot file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// The file has no top-level table for the hive.
    #[error("hive {hive} is not present in snapshot {}", path.display())]
    MissingHive {
        /// Requested hive.
        hive: Hive,
        /// Snapshot file.
        path: PathBuf,
    },
}

impl From<SnapshotError> for StoreError {
    fn from(error: SnapshotError) -> Self {
        let mut reason = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            reason.push_str(": ");
            reason.push_str(&cause.to_string());
            source = cause.source();
        }
        StoreError::unavailable(reason)
    }
}

/// Registry snapshots stored as one `<host>.toml` file per machine.
///
/// Top-level tables are hives (`LocalMachine`, `HKEY_LOCAL_MACHINE` or
/// `HKLM`), nested tables are subkeys and every other entry is a value:
///
/// ```toml
/// [HKLM.SOFTWARE.Vendor.App1]
/// Version = "1.2"
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    /// Directory holding `<host>.toml` files.
    dir: PathBuf,
}

impl SnapshotProvider {
    /// Provider reading snapshots from `dir`.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Directory holding the snapshots.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Find the snapshot file of `host`, matching its name case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::HostNotFound`] if no file exists for the host.
    pub fn snapshot_path(&self, host: &str) -> Result<PathBuf, SnapshotError> {
        let exact = self.dir.join(format!("{host}.{SNAPSHOT_EXTENSION}"));
        if exact.is_file() {
            return Ok(exact);
        }

        let entries = fs::read_dir(&self.dir).map_err(|source| SnapshotError::ReadDir {
            dir: self.dir.clone(),
            source,
        })?;
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.extension().is_some_and(|ext| ext == SNAPSHOT_EXTENSION)
                    && path
                        .file_stem()
                        .and_then(OsStr::to_str)
                        .is_some_and(|stem| same_key_name(stem, host))
            })
            .ok_or_else(|| SnapshotError::HostNotFound {
                host: host.to_owned(),
                dir: self.dir.clone(),
            })
    }

    /// Load the tree of one hive of `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is missing, unreadable, invalid TOML
    /// or has no table for `hive`.
    pub fn load_hive(&self, host: &str, hive: Hive) -> Result<Table, SnapshotError> {
        let path = self.snapshot_path(host)?;
        debug!("Loading {hive} of {host} from {}", path.display());

        let content = fs::read_to_string(&path).map_err(|source| SnapshotError::Read {
            path: path.clone(),
            source,
        })?;
        let mut document: Table =
            toml::from_str(&content).map_err(|source| SnapshotError::Parse {
                path: path.clone(),
                source: Box::new(source),
            })?;

        let hive_table = document
            .iter()
            .find(|(name, value)| value.is_table() && hive.is_named(name))
            .map(|(name, _)| name.clone());
        if let Some(Value::Table(root)) = hive_table.and_then(|name| document.remove(&name)) {
            Ok(root)
        } else {
            Err(SnapshotError::MissingHive { hive, path })
        }
    }
}

impl Provider for SnapshotProvider {
    type Connection = SnapshotConnection;

    fn connect(&self, host: &str, hive: Hive) -> Result<SnapshotConnection, StoreError> {
        let root = self.load_hive(host, hive)?;
        Ok(SnapshotConnection {
            root: Arc::new(root),
        })
    }
}

/// One hive of a loaded snapshot.
#[derive(Debug)]
pub struct SnapshotConnection {
    /// Hive table, shared with every key.
    root: Arc<Table>,
}

/// Table at `path`, matching names case-insensitively and skipping values.
fn lookup<'tree>(root: &'tree Table, path: &[String]) -> Option<&'tree Table> {
    path.iter().try_fold(root, |table, name| {
        table
            .iter()
            .find(|(child, _)| same_key_name(child, name))
            .and_then(|(_, value)| value.as_table())
    })
}

impl Connection for SnapshotConnection {
    type Key = SnapshotKey;

    fn open(&self, path: &str) -> Result<SnapshotKey, StoreError> {
        let segments: Vec<String> = path
            .split('\\')
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .collect();
        lookup(&self.root, &segments).ok_or(StoreError::NotFound)?;
        Ok(SnapshotKey {
            root: Arc::clone(&self.root),
            path: segments,
        })
    }
}

/// Key inside a loaded snapshot.
#[derive(Debug)]
pub struct SnapshotKey {
    /// Hive table.
    root: Arc<Table>,
    /// Canonical segments from the hive root.
    path: Vec<String>,
}

impl SnapshotKey {
    /// Table of this key.
    fn table(&self) -> Result<&Table, StoreError> {
        lookup(&self.root, &self.path).ok_or(StoreError::NotFound)
    }
}

impl RegistryKey for SnapshotKey {
    fn subkey_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .table()?
            .iter()
            .filter(|(_, value)| value.is_table())
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn open_subkey(&self, name: &str) -> Result<SnapshotKey, StoreError> {
        let canonical = self
            .table()?
            .iter()
            .find(|(child, value)| value.is_table() && same_key_name(child, name))
            .map(|(child, _)| child.clone())
            .ok_or(StoreError::NotFound)?;

        let mut path = self.path.clone();
        path.push(canonical);
        Ok(SnapshotKey {
            root: Arc::clone(&self.root),
            path,
        })
    }

    fn subkey_count(&self) -> Result<usize, StoreError> {
        Ok(self.table()?.values().filter(|value| value.is_table()).count())
    }

    fn value_count(&self) -> Result<usize, StoreError> {
        Ok(self.table()?.values().filter(|value| !value.is_table()).count())
    }
}
