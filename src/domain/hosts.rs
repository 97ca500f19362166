//! Host batches: probing, connecting and walking each target machine.

use log::debug;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use super::{
    CancellationToken, Diagnostic, EnumerateError, Hive, KeyFilter, KeyRecord, Provider,
    Reporter, WalkContext, Walker,
};

/// Host name used when no host is given.
pub const FALLBACK_HOST: &str = "localhost";

/// Name of this machine: `COMPUTERNAME`, then `HOSTNAME`, then `localhost`.
#[must_use]
pub fn local_machine_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|name| name.trim().to_owned())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST.to_owned())
}

/// Resolve an empty host to the local machine name.
#[must_use]
pub fn resolve_host(host: &str) -> String {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        local_machine_name()
    } else {
        trimmed.to_owned()
    }
}

/// Reachability check run before connecting to a host.
pub trait Probe: Sync {
    /// Whether `host` answers. A false result skips the host.
    fn is_reachable(&self, host: &str) -> bool;
}

impl<F> Probe for F
where
    F: Fn(&str) -> bool + Sync,
{
    fn is_reachable(&self, host: &str) -> bool {
        self(host)
    }
}

/// What to enumerate, on which machines.
#[derive(Debug, Clone)]
pub struct KeyQuery {
    /// Target machines; empty means the local machine.
    pub hosts: Vec<String>,
    /// Hive opened on every host.
    pub hive: Hive,
    /// Start key, relative to the hive root.
    pub path: String,
    /// Applied to every child name.
    pub filter: KeyFilter,
    /// Walk whole subtrees instead of direct children.
    pub recurse: bool,
}

impl KeyQuery {
    /// Query for the direct children of `path` under `LocalMachine` on this machine.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            hosts: Vec::new(),
            hive: Hive::LocalMachine,
            path: path.to_owned(),
            filter: KeyFilter::any(),
            recurse: false,
        }
    }

    /// Replace the target machines.
    #[must_use]
    pub fn with_hosts<S: AsRef<str>>(mut self, hosts: &[S]) -> Self {
        self.hosts = hosts.iter().map(|h| h.as_ref().to_owned()).collect();
        self
    }

    /// Select the hive.
    #[must_use]
    pub fn with_hive(mut self, hive: Hive) -> Self {
        self.hive = hive;
        self
    }

    /// Compile `pattern` as the child filter.
    #[must_use]
    pub fn with_filter(mut self, pattern: &str) -> Self {
        self.filter = KeyFilter::new(pattern);
        self
    }

    /// Walk whole subtrees.
    #[must_use]
    pub fn with_recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    /// Hosts to visit, in input order.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        if self.hosts.is_empty() {
            vec![String::new()]
        } else {
            self.hosts.clone()
        }
    }
}

/// Runs a [`KeyQuery`] against many hosts, isolating per-host failures.
///
/// Unreachable hosts, failed connections and missing start keys are
/// reported to the [`Reporter`] and the next host is processed.
pub struct Enumerator<'env, P: Provider> {
    /// Opens one connection per host.
    provider: &'env P,
    /// Receives every diagnostic of the batch.
    reporter: &'env dyn Reporter,
    /// Optional reachability check.
    probe: Option<&'env dyn Probe>,
    /// Shared with every walk started here.
    cancel: CancellationToken,
}

impl<'env, P: Provider> Enumerator<'env, P> {
    /// Enumerator without probe or cancellation.
    #[must_use]
    pub fn new(provider: &'env P, reporter: &'env dyn Reporter) -> Self {
        Self {
            provider,
            reporter,
            probe: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Check every host with `probe` before connecting to it.
    #[must_use]
    pub fn with_probe(mut self, probe: &'env dyn Probe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Stop the batch when `cancel` is triggered.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Probe, connect and start walking one host.
    ///
    /// Returns `None` after reporting the failure if any step fails.
    pub fn open_host(&self, host: &str, query: &KeyQuery) -> Option<Walker<'env, P::Connection>> {
        let name = resolve_host(host);

        if let Some(probe) = self.probe
            && !probe.is_reachable(&name)
        {
            self.reporter.report(Diagnostic::new(
                &name,
                EnumerateError::Unreachable { host: name.clone() },
            ));
            return None;
        }

        debug!("Connecting to {} on {name}", query.hive);
        let connection = match self.provider.connect(&name, query.hive) {
            Ok(connection) => connection,
            Err(source) => {
                self.reporter.report(Diagnostic::new(
                    &name,
                    EnumerateError::Connection {
                        host: name.clone(),
                        hive: query.hive,
                        source,
                    },
                ));
                return None;
            }
        };

        let context = WalkContext {
            host: name.clone(),
            hive: query.hive,
            filter: query.filter.clone(),
            recurse: query.recurse,
        };
        match Walker::start(
            connection,
            &query.path,
            context,
            self.reporter,
            self.cancel.clone(),
        ) {
            Ok(walker) => Some(walker),
            Err(e) => {
                self.reporter.report(Diagnostic::new(name, e));
                None
            }
        }
    }

    /// Lazily enumerate every host of `query` in input order.
    pub fn enumerate<'query>(
        &'query self,
        query: &'query KeyQuery,
    ) -> HostRecords<'env, 'query, P> {
        HostRecords {
            enumerator: self,
            query,
            hosts: query.targets().into_iter(),
            current: None,
            finished: false,
        }
    }

    /// Enumerate hosts concurrently with a pool of at most `workers` threads.
    ///
    /// Each worker takes the next unclaimed host as soon as it is free, so a
    /// slow host holds up one worker only. Each host's records are buffered
    /// in its own slot and the result keeps them grouped per host, in input
    /// order. Diagnostics are reported as they occur.
    pub fn enumerate_parallel(&self, query: &KeyQuery, workers: usize) -> Vec<KeyRecord> {
        let hosts = query.targets();
        let slots: Vec<Mutex<Vec<KeyRecord>>> = hosts.iter().map(|_| Mutex::default()).collect();
        let jobs: Vec<(&String, &Mutex<Vec<KeyRecord>>)> = hosts.iter().zip(&slots).collect();
        let next = AtomicUsize::new(0);
        let cancel_reported = AtomicBool::new(false);
        let pool = workers.clamp(1, jobs.len().max(1));
        debug!("Enumerating {} hosts with {pool} workers", jobs.len());

        thread::scope(|scope| {
            for _ in 0..pool {
                scope.spawn(|| {
                    while let Some((host, slot)) = jobs.get(next.fetch_add(1, Ordering::SeqCst)) {
                        let records = self.collect_host(host, query, &cancel_reported);
                        *slot.lock().unwrap_or_else(PoisonError::into_inner) = records;
                    }
                });
            }
        });

        slots
            .into_iter()
            .flat_map(|slot| slot.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }

    /// Walk one host to completion, or report cancellation once per batch.
    fn collect_host(
        &self,
        host: &str,
        query: &KeyQuery,
        cancel_reported: &AtomicBool,
    ) -> Vec<KeyRecord> {
        if self.cancel.is_cancelled() {
            self.report_cancelled_once(host, cancel_reported);
            return Vec::new();
        }

        let Some(mut walker) = self.open_host(host, query) else {
            return Vec::new();
        };
        let records: Vec<KeyRecord> = walker.by_ref().collect();
        if walker.is_interrupted() {
            self.report_cancelled_once(walker.host(), cancel_reported);
        }
        records
    }

    /// Report [`EnumerateError::Cancelled`] unless a worker already did.
    fn report_cancelled_once(&self, host: &str, reported: &AtomicBool) {
        if !reported.swap(true, Ordering::SeqCst) {
            self.reporter
                .report(Diagnostic::new(resolve_host(host), EnumerateError::Cancelled));
        }
    }
}

/// Lazy sequence of records across all hosts of a query.
///
/// At most one host is connected at a time; its connection is closed as
/// soon as its walk ends.
pub struct HostRecords<'env, 'query, P: Provider> {
    /// Source of connections, probe and reporter.
    enumerator: &'query Enumerator<'env, P>,
    /// Query being run.
    query: &'query KeyQuery,
    /// Hosts not started yet.
    hosts: std::vec::IntoIter<String>,
    /// Walk of the host being read.
    current: Option<Walker<'env, P::Connection>>,
    /// Set after the last host or on cancellation.
    finished: bool,
}

impl<P: Provider> HostRecords<'_, '_, P> {
    /// End the sequence and report the cancellation once.
    fn stop_cancelled(&mut self, host: &str) {
        self.finished = true;
        self.enumerator
            .reporter
            .report(Diagnostic::new(resolve_host(host), EnumerateError::Cancelled));
    }
}

impl<P: Provider> Iterator for HostRecords<'_, '_, P> {
    type Item = KeyRecord;

    fn next(&mut self) -> Option<KeyRecord> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(walker) = self.current.as_mut() {
                if let Some(record) = walker.next() {
                    return Some(record);
                }
                let interrupted = walker.is_interrupted();
                let host = walker.host().to_owned();
                self.current = None;
                debug!("Finished {host}");
                if interrupted {
                    self.stop_cancelled(&host);
                    return None;
                }
            }

            let Some(host) = self.hosts.next() else {
                self.finished = true;
                return None;
            };
            if self.enumerator.cancel.is_cancelled() {
                self.stop_cancelled(&host);
                return None;
            }
            self.current = self.enumerator.open_host(&host, self.query);
        }
    }
}
