//! `keys` command: enumerate, render and summarize.

use log::{info, warn};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::domain::{
    CancellationToken, Diagnostic, Enumerator, KeyQuery, KeyRecord, LogReporter, Probe, Provider,
    Reporter, Severity,
};

use super::render::{OutputFormat, RenderError, write_records, write_yaml};

/// Errors that can occur while running the keys command.
#[derive(Debug, Error)]
pub enum KeysError {
    /// The records could not be written.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// How the keys command runs a query.
#[derive(Default)]
pub struct KeysOptions<'opts> {
    /// Skip hosts this check rejects.
    pub probe: Option<&'opts dyn Probe>,
    /// Enumerate this many hosts at a time instead of one after the other.
    pub workers: Option<usize>,
    /// Output format.
    pub format: OutputFormat,
    /// Stops the batch early.
    pub cancel: CancellationToken,
}

/// Totals of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Records written.
    pub records: usize,
    /// Warning diagnostics.
    pub warnings: usize,
    /// Error diagnostics.
    pub errors: usize,
}

/// Logs every diagnostic and counts them by severity.
#[derive(Debug, Default)]
pub struct SummaryReporter {
    /// Warnings seen.
    warnings: AtomicUsize,
    /// Errors seen.
    errors: AtomicUsize,
}

impl SummaryReporter {
    /// Warnings reported so far.
    #[must_use]
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Errors reported so far.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Reporter for SummaryReporter {
    fn report(&self, diagnostic: Diagnostic) {
        let counter = match diagnostic.severity() {
            Severity::Warning => &self.warnings,
            Severity::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        LogReporter.report(diagnostic);
    }
}

/// Run `query` against `provider` and write the records to `out`.
///
/// Sequential YAML output is written record by record while hosts are still
/// being read. Table output and parallel runs are buffered until every host
/// is done. Per-host failures are logged and counted in the returned
/// [`Summary`]; they never fail the command.
///
/// # Errors
///
/// Returns [`KeysError::Render`] if the output cannot be written.
pub fn run<P: Provider>(
    provider: &P,
    query: &KeyQuery,
    options: KeysOptions<'_>,
    out: &mut dyn Write,
) -> Result<Summary, KeysError> {
    let reporter = SummaryReporter::default();
    let mut enumerator = Enumerator::new(provider, &reporter).with_cancellation(options.cancel);
    if let Some(probe) = options.probe {
        enumerator = enumerator.with_probe(probe);
    }

    let written = match (options.workers, options.format) {
        (None, OutputFormat::Yaml) => write_yaml(enumerator.enumerate(query), out)?,
        (None, OutputFormat::Table) => {
            let records: Vec<KeyRecord> = enumerator.enumerate(query).collect();
            write_records(&records, OutputFormat::Table, out)?;
            records.len()
        }
        (Some(workers), format) => {
            let records = enumerator.enumerate_parallel(query, workers);
            write_records(&records, format, out)?;
            records.len()
        }
    };

    let summary = Summary {
        records: written,
        warnings: reporter.warnings(),
        errors: reporter.errors(),
    };
    if summary.errors > 0 {
        warn!(
            "{} keys found, {} errors and {} warnings reported",
            summary.records, summary.errors, summary.warnings
        );
    } else if summary.records == 0 {
        info!("No matching keys found");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnumerateError, Hive};
    use crate::infrastructure::{HandleStats, MemoryProvider};
    use std::io;

    /// Output that notes how many connections were open at every write.
    struct Watched<'stats> {
        stats: &'stats HandleStats,
        connections_at_write: Vec<usize>,
        bytes: Vec<u8>,
    }

    impl Write for Watched<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.connections_at_write
                .push(self.stats.connections_opened());
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn provider() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.add_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App1\\Sub1");
        provider.add_key("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App2");
        provider.set_values("pc1", Hive::LocalMachine, "SOFTWARE\\Vendor\\App2", 3);
        provider
    }

    #[test]
    fn writes_records_and_counts_them() {
        let provider = provider();
        let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["pc1"]);
        let mut out = Vec::new();

        let summary = run(&provider, &query, KeysOptions::default(), &mut out).unwrap();

        assert_eq!(summary, Summary {
            records: 2,
            warnings: 0,
            errors: 0
        });
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("SOFTWARE\\Vendor\\App1"));
        assert!(output.contains("SOFTWARE\\Vendor\\App2"));
    }

    #[test]
    fn failed_hosts_are_counted_not_raised() {
        let provider = provider();
        let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["ghost", "pc1"]);
        let options = KeysOptions {
            workers: Some(2),
            format: OutputFormat::Yaml,
            ..KeysOptions::default()
        };
        let mut out = Vec::new();

        let summary = run(&provider, &query, options, &mut out).unwrap();

        assert_eq!(summary.records, 2);
        assert_eq!(summary.errors, 1);
        assert!(String::from_utf8(out).unwrap().contains("ComputerName: pc1"));
    }

    #[test]
    fn unreachable_hosts_are_warnings() {
        let provider = provider();
        let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["pc1"]);
        let probe = |_: &str| false;
        let options = KeysOptions {
            probe: Some(&probe),
            ..KeysOptions::default()
        };
        let mut out = Vec::new();

        let summary = run(&provider, &query, options, &mut out).unwrap();

        assert_eq!(summary, Summary {
            records: 0,
            warnings: 1,
            errors: 0
        });
        assert!(out.is_empty());
    }

    #[test]
    fn sequential_yaml_is_written_before_later_hosts_are_read() {
        let provider = provider();
        provider.add_key("pc2", Hive::LocalMachine, "SOFTWARE\\Vendor\\App3");
        let query = KeyQuery::new("SOFTWARE\\Vendor").with_hosts(&["pc1", "pc2"]);
        let options = KeysOptions {
            format: OutputFormat::Yaml,
            ..KeysOptions::default()
        };
        let mut out = Watched {
            stats: provider.stats(),
            connections_at_write: Vec::new(),
            bytes: Vec::new(),
        };

        let summary = run(&provider, &query, options, &mut out).unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(out.connections_at_write.first(), Some(&1));
        assert_eq!(out.connections_at_write.last(), Some(&2));
        let output = String::from_utf8(out.bytes).unwrap();
        assert!(output.contains("ComputerName: pc2"));
    }

    #[test]
    fn empty_yaml_result_is_an_empty_sequence() {
        let provider = provider();
        let query = KeyQuery::new("SOFTWARE\\Vendor")
            .with_hosts(&["pc1"])
            .with_filter("Nothing*");
        let options = KeysOptions {
            format: OutputFormat::Yaml,
            ..KeysOptions::default()
        };
        let mut out = Vec::new();

        let summary = run(&provider, &query, options, &mut out).unwrap();

        assert_eq!(summary.records, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "[]\n");
    }

    #[test]
    fn reporter_counts_by_severity() {
        let reporter = SummaryReporter::default();
        reporter.report(Diagnostic::new("h", EnumerateError::Cancelled));
        reporter.report(Diagnostic::new(
            "h",
            EnumerateError::KeyNotFound {
                path: "X".to_owned(),
            },
        ));

        assert_eq!(reporter.warnings(), 1);
        assert_eq!(reporter.errors(), 1);
    }
}
