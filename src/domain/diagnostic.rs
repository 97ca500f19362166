//! Non-fatal failures and where they are delivered.

use log::{debug, error, warn};
use std::error::Error as _;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use super::{Hive, StoreError};

/// Failures that can occur while enumerating keys.
///
/// None of them aborts a batch: they are turned into [`Diagnostic`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerateError {
    /// The reachability check failed, the host was skipped.
    #[error("host {host} is not reachable")]
    Unreachable {
        /// Host that did not answer.
        host: String,
    },

    /// The hive could not be opened on the host.
    #[error("failed to open {hive} on {host}")]
    Connection {
        /// Host that was being opened.
        host: String,
        /// Hive that was requested.
        hive: Hive,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// A key vanished or never existed.
    #[error("key not found: {path}")]
    KeyNotFound {
        /// Path of the missing key.
        path: String,
    },

    /// A key could not be opened or read.
    #[error("access denied: {path}")]
    AccessDenied {
        /// Path of the protected key.
        path: String,
    },

    /// Any other store failure on a key.
    #[error("failed to read key: {path}")]
    Store {
        /// Path of the failing key.
        path: String,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// The filter could not be compiled and matched nothing.
    #[error("malformed filter {pattern:?} matches nothing: {reason}")]
    MalformedPattern {
        /// Pattern as given.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// The batch was cancelled before it finished.
    #[error("enumeration cancelled")]
    Cancelled,
}

impl EnumerateError {
    /// Classify a store failure that happened on `path`.
    #[must_use]
    pub fn at_path(path: &str, error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::KeyNotFound {
                path: path.to_owned(),
            },
            StoreError::AccessDenied => Self::AccessDenied {
                path: path.to_owned(),
            },
            source @ StoreError::Unavailable { .. } => Self::Store {
                path: path.to_owned(),
                source,
            },
        }
    }

    /// Warnings are expected conditions, errors are failed reads.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Unreachable { .. } | Self::MalformedPattern { .. } | Self::Cancelled => {
                Severity::Warning
            }
            Self::Connection { .. }
            | Self::KeyNotFound { .. }
            | Self::AccessDenied { .. }
            | Self::Store { .. } => Severity::Error,
        }
    }
}

/// How loudly a diagnostic is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged with `warn!`.
    Warning,
    /// Logged with `error!`.
    Error,
}

/// A non-fatal failure tagged with the host it happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Host the failure happened on.
    pub host: String,
    /// What failed.
    pub error: EnumerateError,
}

impl Diagnostic {
    /// Tag `error` with `host`.
    #[must_use]
    pub fn new<H: Into<String>>(host: H, error: EnumerateError) -> Self {
        Self {
            host: host.into(),
            error,
        }
    }

    /// Severity of the underlying error.
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.error.severity()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.error)?;
        let mut source = self.error.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Out-of-band channel receiving diagnostics while records are produced.
pub trait Reporter: Sync {
    /// Deliver one diagnostic. Must not fail.
    fn report(&self, diagnostic: Diagnostic);
}

/// Writes diagnostics to the log: warnings with `warn!`, errors with `error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => warn!("{diagnostic}"),
            Severity::Error => error!("{diagnostic}"),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    /// Everything reported, in arrival order.
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingReporter {
    /// Reporter with nothing collected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain everything reported so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(
            &mut *self
                .diagnostics
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}

impl Reporter for Sender<Diagnostic> {
    fn report(&self, diagnostic: Diagnostic) {
        if let Err(unsent) = self.send(diagnostic) {
            debug!("Diagnostic receiver is gone, dropping: {}", unsent.0);
        }
    }
}
