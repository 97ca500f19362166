//! Lazy depth-first walk below one key.

use log::debug;

use super::{
    CancellationToken, Connection, Diagnostic, EnumerateError, Hive, KeyFilter, KeyRecord,
    RegistryKey, Reporter, join_path, normalize_path,
};

/// Immutable inputs of one walk, shared by every frame.
#[derive(Debug, Clone)]
pub struct WalkContext {
    /// Host stamped on every record and diagnostic.
    pub host: String,
    /// Hive stamped on every record.
    pub hive: Hive,
    /// Filter applied to every child name.
    pub filter: KeyFilter,
    /// Descend into every child, matched or not.
    pub recurse: bool,
}

/// An open key whose children are still being visited.
struct Frame<K> {
    /// Handle kept open until the last child is done.
    key: K,
    /// Path of `key` relative to the hive root.
    path: String,
    /// Children not visited yet.
    children: std::vec::IntoIter<String>,
}

/// Lazy depth-first enumeration of the keys below one path.
///
/// Every child is tested against the filter; a match yields a [`KeyRecord`]
/// before its own subtree is visited. With `recurse`, every child is
/// descended into whether it matched or not. Failures on a child are
/// reported and its siblings are still visited.
///
/// Frames live on an explicit stack: a parent handle stays open until its
/// last child is done, and the connection is closed after every key handle.
pub struct Walker<'rep, C: Connection> {
    /// Open keys, innermost last.
    stack: Vec<Frame<C::Key>>,
    /// Inputs shared by every frame.
    context: WalkContext,
    /// Receives failures on individual keys.
    reporter: &'rep dyn Reporter,
    /// Checked before every step.
    cancel: CancellationToken,
    /// Set when the walk stopped on cancellation.
    interrupted: bool,
    /// Declared last so it drops after every key handle.
    connection: C,
}

impl<'rep, C: Connection> Walker<'rep, C> {
    /// Open `path` on `connection` and prepare to enumerate below it.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerateError::KeyNotFound`] if `path` does not exist, or
    /// another [`EnumerateError`] if it cannot be opened or enumerated. The
    /// connection is closed before returning the error.
    pub fn start(
        connection: C,
        path: &str,
        context: WalkContext,
        reporter: &'rep dyn Reporter,
        cancel: CancellationToken,
    ) -> Result<Self, EnumerateError> {
        let start = normalize_path(path);

        if let Some(reason) = context.filter.error() {
            reporter.report(Diagnostic::new(
                &context.host,
                EnumerateError::MalformedPattern {
                    pattern: context.filter.pattern().to_owned(),
                    reason: reason.to_owned(),
                },
            ));
        }

        let key = connection
            .open(&start)
            .map_err(|e| EnumerateError::at_path(&start, e))?;
        let children = key
            .subkey_names()
            .map_err(|e| EnumerateError::at_path(&start, e))?;

        debug!(
            "Walking {}\\{}\\{start} ({} children)",
            context.host,
            context.hive,
            children.len()
        );

        Ok(Self {
            stack: vec![Frame {
                key,
                path: start,
                children: children.into_iter(),
            }],
            context,
            reporter,
            cancel,
            interrupted: false,
            connection,
        })
    }

    /// Host this walk reads from.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.context.host
    }

    /// Session the walk owns; it closes when the walker is dropped.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Returns true if the walk stopped because its token was cancelled.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Tag `error` with this walk's host and deliver it.
    fn report(&self, error: EnumerateError) {
        self.reporter.report(Diagnostic::new(&self.context.host, error));
    }

    /// Build the record of an opened key. Fails if either count cannot be read.
    fn describe(&self, key: &C::Key, path: &str) -> Result<KeyRecord, EnumerateError> {
        let sub_key_count = key
            .subkey_count()
            .map_err(|e| EnumerateError::at_path(path, e))?;
        let value_count = key
            .value_count()
            .map_err(|e| EnumerateError::at_path(path, e))?;

        Ok(KeyRecord {
            computer_name: self.context.host.clone(),
            hive: self.context.hive,
            key: path.to_owned(),
            sub_key_count,
            value_count,
        })
    }

    /// Close handles innermost first.
    fn close_all(&mut self) {
        while self.stack.pop().is_some() {}
    }
}

impl<C: Connection> Iterator for Walker<'_, C> {
    type Item = KeyRecord;

    fn next(&mut self) -> Option<KeyRecord> {
        loop {
            if self.cancel.is_cancelled() {
                if !self.stack.is_empty() {
                    debug!("Walk on {} cancelled", self.context.host);
                    self.interrupted = true;
                    self.close_all();
                }
                return None;
            }

            let frame = self.stack.last_mut()?;
            let Some(name) = frame.children.next() else {
                self.stack.pop();
                continue;
            };
            let path = join_path(&frame.path, &name);

            let matched = self.context.filter.matches(&name);
            if !matched && !self.context.recurse {
                continue;
            }

            let child = match frame.key.open_subkey(&name) {
                Ok(child) => child,
                Err(e) => {
                    self.report(EnumerateError::at_path(&path, e));
                    continue;
                }
            };

            let record = if matched {
                match self.describe(&child, &path) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        self.report(e);
                        None
                    }
                }
            } else {
                None
            };

            if self.context.recurse {
                match child.subkey_names() {
                    Ok(names) => self.stack.push(Frame {
                        key: child,
                        path,
                        children: names.into_iter(),
                    }),
                    Err(e) => self.report(EnumerateError::at_path(&path, e)),
                }
            }

            if record.is_some() {
                return record;
            }
        }
    }
}

impl<C: Connection> Drop for Walker<'_, C> {
    fn drop(&mut self) {
        self.close_all();
    }
}
