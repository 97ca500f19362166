//! In-memory key store for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::{Connection, Hive, Provider, RegistryKey, StoreError, same_key_name};

/// Counts of opened and closed handles across every connection of a provider.
#[derive(Debug, Default)]
pub struct HandleStats {
    /// Key handles handed out.
    keys_opened: AtomicUsize,
    /// Key handles dropped.
    keys_closed: AtomicUsize,
    /// Connections handed out.
    connections_opened: AtomicUsize,
    /// Connections dropped.
    connections_closed: AtomicUsize,
}

impl HandleStats {
    /// Key handles opened so far.
    #[must_use]
    pub fn keys_opened(&self) -> usize {
        self.keys_opened.load(Ordering::SeqCst)
    }

    /// Key handles closed so far.
    #[must_use]
    pub fn keys_closed(&self) -> usize {
        self.keys_closed.load(Ordering::SeqCst)
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far.
    #[must_use]
    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    /// Returns true if every handle that was opened has been closed.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.keys_opened() == self.keys_closed()
            && self.connections_opened() == self.connections_closed()
    }
}

/// One key and its subtree.
#[derive(Debug, Default)]
struct Node {
    /// Number of named values.
    values: usize,
    /// Opening fails with access denied.
    denied: bool,
    /// Both counts fail while enumeration still works.
    unreadable: bool,
    /// Subkeys in insertion order.
    children: Vec<(String, Node)>,
}

impl Node {
    /// Direct child by case-insensitive name.
    fn child(&self, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|(child, _)| same_key_name(child, name))
            .map(|(_, node)| node)
    }

    /// Mutable direct child by case-insensitive name.
    fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|(child, _)| same_key_name(child, name))
            .map(|(_, node)| node)
    }

    /// Direct child by name, appended if missing.
    fn child_or_insert(&mut self, name: &str) -> Option<&mut Node> {
        let existing = self
            .children
            .iter()
            .position(|(child, _)| same_key_name(child, name));
        let entry = match existing {
            Some(index) => self.children.get_mut(index),
            None => {
                self.children.push((name.to_owned(), Node::default()));
                self.children.last_mut()
            }
        };
        entry.map(|(_, node)| node)
    }

    /// Node at `path` below this one.
    fn descend(&self, path: &[String]) -> Option<&Node> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Mutable node at `path` below this one.
    fn descend_mut(&mut self, path: &[String]) -> Option<&mut Node> {
        path.iter().try_fold(self, |node, name| node.child_mut(name))
    }

    /// Node at `path`, creating it and its missing parents.
    fn descend_or_insert(&mut self, path: &[String]) -> Option<&mut Node> {
        path.iter()
            .try_fold(self, |node, name| node.child_or_insert(name))
    }
}

/// One simulated machine.
#[derive(Debug, Default)]
struct Machine {
    /// Every connection attempt fails.
    offline: bool,
    /// Root node of each hive that exists.
    hives: HashMap<Hive, Node>,
}

/// Machines keyed by lowercase host name, shared with open handles.
type Machines = Arc<RwLock<HashMap<String, Machine>>>;

/// Path segments, ignoring empty ones.
fn split(path: &str) -> Vec<String> {
    path.split('\\')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}

/// In-memory registry of any number of machines.
///
/// Keys are looked up again on every operation, so removing a key while a
/// walk is running makes open handles fail with [`StoreError::NotFound`],
/// like a key deleted on a live machine.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    /// Shared tree of every machine.
    machines: Machines,
    /// Shared with every connection and key.
    stats: Arc<HandleStats>,
}

impl MemoryProvider {
    /// Provider with no machines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle counters of every connection made so far.
    #[must_use]
    pub fn stats(&self) -> &HandleStats {
        &self.stats
    }

    /// Run `change` on the machine named `host`, creating it if needed.
    fn update<T, F: FnOnce(&mut Machine) -> T>(&self, host: &str, change: F) -> T {
        let mut machines = self.machines.write().unwrap_or_else(PoisonError::into_inner);
        change(machines.entry(host.to_lowercase()).or_default())
    }

    /// Run `change` on the key at `path`, creating it and its parents.
    fn edit<F: FnOnce(&mut Node)>(&self, host: &str, hive: Hive, path: &str, change: F) {
        self.update(host, |machine| {
            if let Some(node) = machine
                .hives
                .entry(hive)
                .or_default()
                .descend_or_insert(&split(path))
            {
                change(node);
            }
        });
    }

    /// Create a key and any missing parents.
    pub fn add_key(&self, host: &str, hive: Hive, path: &str) {
        self.edit(host, hive, path, |_| {});
    }

    /// Set the number of values held by a key, creating it if needed.
    pub fn set_values(&self, host: &str, hive: Hive, path: &str, count: usize) {
        self.edit(host, hive, path, |node| node.values = count);
    }

    /// Make opening a key fail with [`StoreError::AccessDenied`].
    pub fn deny(&self, host: &str, hive: Hive, path: &str) {
        self.edit(host, hive, path, |node| node.denied = true);
    }

    /// Make the subkey and value counts of a key fail while it can still be
    /// opened and enumerated.
    pub fn set_unreadable(&self, host: &str, hive: Hive, path: &str) {
        self.edit(host, hive, path, |node| node.unreadable = true);
    }

    /// Delete a key and its subtree. Returns false if it did not exist.
    pub fn remove_key(&self, host: &str, hive: Hive, path: &str) -> bool {
        let segments = split(path);
        let Some((name, parents)) = segments.split_last() else {
            return false;
        };
        self.update(host, |machine| {
            let Some(parent) = machine
                .hives
                .get_mut(&hive)
                .and_then(|root| root.descend_mut(parents))
            else {
                return false;
            };
            let before = parent.children.len();
            parent
                .children
                .retain(|(child, _)| !same_key_name(child, name));
            parent.children.len() != before
        })
    }

    /// Make every connection to `host` fail as if the machine were down.
    pub fn set_offline(&self, host: &str, offline: bool) {
        self.update(host, |machine| machine.offline = offline);
    }
}

impl Provider for MemoryProvider {
    type Connection = MemoryConnection;

    fn connect(&self, host: &str, hive: Hive) -> Result<MemoryConnection, StoreError> {
        let machines = self.machines.read().unwrap_or_else(PoisonError::into_inner);
        let machine = machines
            .get(&host.to_lowercase())
            .ok_or_else(|| StoreError::unavailable("the network path was not found"))?;
        if machine.offline {
            return Err(StoreError::unavailable("the RPC server is unavailable"));
        }
        if !machine.hives.contains_key(&hive) {
            return Err(StoreError::unavailable(format!("hive {hive} is not available")));
        }

        self.stats.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            machines: Arc::clone(&self.machines),
            stats: Arc::clone(&self.stats),
            host: host.to_lowercase(),
            hive,
        })
    }
}

/// Open session with one hive of one in-memory machine.
#[derive(Debug)]
pub struct MemoryConnection {
    /// Shared tree of every machine.
    machines: Machines,
    /// Shared handle counters.
    stats: Arc<HandleStats>,
    /// Lowercase host name.
    host: String,
    /// Hive this session reads.
    hive: Hive,
}

impl MemoryConnection {
    /// Hand out a counted handle for `path`.
    fn key(&self, path: Vec<String>) -> MemoryKey {
        self.stats.keys_opened.fetch_add(1, Ordering::SeqCst);
        MemoryKey {
            machines: Arc::clone(&self.machines),
            stats: Arc::clone(&self.stats),
            host: self.host.clone(),
            hive: self.hive,
            path,
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.stats.connections_closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Connection for MemoryConnection {
    type Key = MemoryKey;

    fn open(&self, path: &str) -> Result<MemoryKey, StoreError> {
        let segments = split(path);
        {
            let machines = self.machines.read().unwrap_or_else(PoisonError::into_inner);
            let node = machines
                .get(&self.host)
                .and_then(|machine| machine.hives.get(&self.hive))
                .and_then(|root| root.descend(&segments))
                .ok_or(StoreError::NotFound)?;
            if node.denied {
                return Err(StoreError::AccessDenied);
            }
        }
        Ok(self.key(segments))
    }
}

/// Open handle to one in-memory key.
#[derive(Debug)]
pub struct MemoryKey {
    /// Shared tree of every machine.
    machines: Machines,
    /// Shared handle counters.
    stats: Arc<HandleStats>,
    /// Lowercase host name.
    host: String,
    /// Hive the key lives in.
    hive: Hive,
    /// Canonical segments from the hive root.
    path: Vec<String>,
}

impl MemoryKey {
    /// Look the key up again and read it, or fail if it vanished.
    fn with_node<T, F: FnOnce(&Node) -> T>(&self, read: F) -> Result<T, StoreError> {
        let machines = self.machines.read().unwrap_or_else(PoisonError::into_inner);
        machines
            .get(&self.host)
            .and_then(|machine| machine.hives.get(&self.hive))
            .and_then(|root| root.descend(&self.path))
            .map(read)
            .ok_or(StoreError::NotFound)
    }

    /// Like [`MemoryKey::with_node`], failing for keys marked unreadable.
    fn query_info<T, F: FnOnce(&Node) -> T>(&self, read: F) -> Result<T, StoreError> {
        self.with_node(|node| (!node.unreadable).then(|| read(node)))?
            .ok_or_else(|| StoreError::unavailable("the key information could not be queried"))
    }
}

impl Drop for MemoryKey {
    fn drop(&mut self) {
        self.stats.keys_closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl RegistryKey for MemoryKey {
    fn subkey_names(&self) -> Result<Vec<String>, StoreError> {
        self.with_node(|node| node.children.iter().map(|(name, _)| name.clone()).collect())
    }

    fn open_subkey(&self, name: &str) -> Result<MemoryKey, StoreError> {
        let canonical = self
            .with_node(|node| {
                node.children
                    .iter()
                    .find(|(child, _)| same_key_name(child, name))
                    .map(|(child, node)| (child.clone(), node.denied))
            })?
            .ok_or(StoreError::NotFound)?;

        match canonical {
            (_, true) => Err(StoreError::AccessDenied),
            (child, false) => {
                let mut path = self.path.clone();
                path.push(child);
                self.stats.keys_opened.fetch_add(1, Ordering::SeqCst);
                Ok(MemoryKey {
                    machines: Arc::clone(&self.machines),
                    stats: Arc::clone(&self.stats),
                    host: self.host.clone(),
                    hive: self.hive,
                    path,
                })
            }
        }
    }

    fn subkey_count(&self) -> Result<usize, StoreError> {
        self.query_info(|node| node.children.len())
    }

    fn value_count(&self) -> Result<usize, StoreError> {
        self.query_info(|node| node.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.add_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1\\A");
        provider.add_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1\\B");
        provider.set_values("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App2", 3);
        provider
    }

    #[test]
    fn open_is_case_insensitive() {
        let provider = provider();
        let connection = provider.connect("PC1", Hive::LocalMachine).unwrap();
        let key = connection.open("software\\VENDOR").unwrap();
        assert_eq!(key.subkey_names().unwrap(), ["App1", "App2"]);
    }

    #[test]
    fn counts_children_and_values() {
        let provider = provider();
        let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
        let vendor = connection.open("SOFTWARE\\Vendor").unwrap();

        let app1 = vendor.open_subkey("app1").unwrap();
        assert_eq!(app1.subkey_count().unwrap(), 2);
        assert_eq!(app1.value_count().unwrap(), 0);

        let app2 = vendor.open_subkey("App2").unwrap();
        assert_eq!(app2.subkey_count().unwrap(), 0);
        assert_eq!(app2.value_count().unwrap(), 3);
    }

    #[test]
    fn missing_key_is_not_found() {
        let provider = provider();
        let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
        assert_eq!(connection.open("SOFTWARE\\Nope").err(), Some(StoreError::NotFound));

        let vendor = connection.open("SOFTWARE\\Vendor").unwrap();
        assert_eq!(vendor.open_subkey("App3").err(), Some(StoreError::NotFound));
    }

    #[test]
    fn denied_key_cannot_be_opened() {
        let provider = provider();
        provider.deny("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1");
        let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
        let vendor = connection.open("SOFTWARE\\Vendor").unwrap();

        assert_eq!(vendor.open_subkey("App1").err(), Some(StoreError::AccessDenied));
        assert_eq!(
            connection.open("SOFTWARE\\Vendor\\App1").err(),
            Some(StoreError::AccessDenied)
        );
    }

    #[test]
    fn unknown_offline_or_missing_hive_fails_to_connect() {
        let provider = provider();
        assert!(matches!(
            provider.connect("pc2", Hive::LocalMachine),
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            provider.connect("pc1", Hive::CurrentUser),
            Err(StoreError::Unavailable { .. })
        ));

        provider.set_offline("pc1", true);
        assert!(matches!(
            provider.connect("pc1", Hive::LocalMachine),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn unreadable_key_opens_and_lists_but_cannot_count() {
        let provider = provider();
        provider.set_unreadable("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1");
        let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
        let app1 = connection.open("SOFTWARE\\Vendor\\App1").unwrap();

        assert_eq!(app1.subkey_names().unwrap(), ["A", "B"]);
        assert!(matches!(app1.subkey_count(), Err(StoreError::Unavailable { .. })));
        assert!(matches!(app1.value_count(), Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn removed_key_vanishes_from_open_handles() {
        let provider = provider();
        let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
        let app1 = connection.open("SOFTWARE\\Vendor\\App1").unwrap();

        assert!(provider.remove_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1"));
        assert_eq!(app1.subkey_names().err(), Some(StoreError::NotFound));
        assert!(!provider.remove_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1"));
    }

    #[test]
    fn handles_are_counted() {
        let provider = provider();
        {
            let connection = provider.connect("pc1", Hive::LocalMachine).unwrap();
            let vendor = connection.open("SOFTWARE\\Vendor").unwrap();
            let _app = vendor.open_subkey("App1").unwrap();
            assert_eq!(provider.stats().keys_opened(), 2);
            assert_eq!(provider.stats().keys_closed(), 0);
            assert!(!provider.stats().is_balanced());
        }
        assert_eq!(provider.stats().keys_closed(), 2);
        assert_eq!(provider.stats().connections_closed(), 1);
        assert!(provider.stats().is_balanced());
    }
}
