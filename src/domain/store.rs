//! Seams between the walk and a concrete key store.

use thiserror::Error;

use super::Hive;

/// Errors reported by a key store for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key does not exist.
    #[error("key not found")]
    NotFound,

    /// The caller may not open or read the key.
    #[error("access denied")]
    AccessDenied,

    /// Any other failure, e.g. a dropped RPC session.
    #[error("{reason}")]
    Unavailable {
        /// Message from the store.
        reason: String,
    },
}

impl StoreError {
    /// Build an [`StoreError::Unavailable`] from any message.
    #[must_use]
    pub fn unavailable<R: Into<String>>(reason: R) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// An open key. Dropping the value closes the handle.
pub trait RegistryKey: Sized {
    /// Names of the direct subkeys, in the order the store returns them.
    ///
    /// # Errors
    ///
    /// Returns an error if the key vanished or cannot be enumerated.
    fn subkey_names(&self) -> Result<Vec<String>, StoreError>;

    /// Open a direct subkey by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the subkey does not exist and
    /// [`StoreError::AccessDenied`] if it cannot be opened.
    fn open_subkey(&self, name: &str) -> Result<Self, StoreError>;

    /// Number of direct subkeys.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be queried.
    fn subkey_count(&self) -> Result<usize, StoreError>;

    /// Number of named values held directly by the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be queried.
    fn value_count(&self) -> Result<usize, StoreError>;
}

/// Session with one hive on one machine. Dropping the value closes the session.
pub trait Connection {
    /// Handle type for keys opened through this session.
    type Key: RegistryKey;

    /// Open a key by its path relative to the hive root. The empty path opens the root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the path does not exist.
    fn open(&self, path: &str) -> Result<Self::Key, StoreError>;
}

/// Opens connections to the registry of local or remote machines.
pub trait Provider: Sync {
    /// Session type returned by [`Provider::connect`].
    type Connection: Connection;

    /// Open the root of `hive` on `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is unreachable, access is denied or the
    /// hive cannot be opened.
    fn connect(&self, host: &str, hive: Hive) -> Result<Self::Connection, StoreError>;
}
