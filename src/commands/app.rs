//! Wires configuration and command-line requests to the commands.

use log::debug;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::domain::{CancellationToken, Hive, KeyQuery, Probe, Provider};
#[cfg(windows)]
use crate::infrastructure::RegistryProvider;
use crate::infrastructure::{HttpOrchestrator, OrchestratorError, SnapshotProvider, TcpProbe};

use super::job::JobError;
use super::keys::{KeysError, KeysOptions, Summary};
use super::render::OutputFormat;

/// Errors that can occur during command orchestration.
#[derive(Debug, Error)]
pub enum AppError {
    /// No snapshot directory is configured and this platform has no native registry.
    #[error(
        "this platform has no native registry: pass --snapshot-dir or set REGWALK_SNAPSHOT_DIR"
    )]
    NoSnapshotDir,

    /// The snapshot directory does not exist.
    #[error("snapshot directory not found: {}", .0.display())]
    SnapshotDirNotFound(PathBuf),

    /// The orchestration service address is not configured.
    #[error("no service URL configured: pass --service-url or set REGWALK_SERVICE_URL")]
    NoServiceUrl,

    /// The keys command failed.
    #[error(transparent)]
    Keys(#[from] KeysError),

    /// The job command failed.
    #[error(transparent)]
    Job(#[from] JobError),

    /// The orchestration client could not be created.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Everything the keys command was asked for on the command line.
#[derive(Debug, Clone)]
pub struct KeysRequest {
    /// Start key path.
    pub path: String,
    /// Machines to query; empty means this machine.
    pub computers: Vec<String>,
    /// Hive to open.
    pub hive: Hive,
    /// Glob matched against subkey names.
    pub filter: String,
    /// Descend below matching keys.
    pub recurse: bool,
    /// Skip machines that fail the reachability check.
    pub ping: bool,
    /// Query several machines at once.
    pub parallel: bool,
    /// Pool size for parallel runs, overriding the configured one.
    pub workers: Option<usize>,
    /// Output format.
    pub format: OutputFormat,
    /// Read snapshots from here instead of the live registry.
    pub snapshot_dir: Option<PathBuf>,
}

impl KeysRequest {
    /// The query this request describes.
    #[must_use]
    pub fn query(&self) -> KeyQuery {
        KeyQuery::new(&self.path)
            .with_hosts(&self.computers)
            .with_hive(self.hive)
            .with_filter(&self.filter)
            .with_recurse(self.recurse)
    }
}

/// Run the keys command and print to stdout.
///
/// Snapshots are read when a snapshot directory is configured, the live
/// registry otherwise.
///
/// # Errors
///
/// Returns [`AppError::NoSnapshotDir`] if no snapshot directory is configured
/// on a platform without a native registry.
/// Returns [`AppError::SnapshotDirNotFound`] if the directory does not exist.
/// Returns [`AppError::Keys`] if the output cannot be written.
pub fn keys(config: &Config, request: &KeysRequest) -> Result<Summary, AppError> {
    let probe = TcpProbe::new(
        config.probe.port,
        Duration::from_millis(config.probe.timeout_ms),
    );
    let probe_ref: &dyn Probe = &probe;
    let options = KeysOptions {
        probe: request.ping.then_some(probe_ref),
        workers: request
            .parallel
            .then(|| request.workers.unwrap_or(config.workers)),
        format: request.format,
        cancel: CancellationToken::new(),
    };
    let query = request.query();

    match request.snapshot_dir.as_ref().or(config.snapshot_dir.as_ref()) {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(AppError::SnapshotDirNotFound(dir.clone()));
            }
            debug!("Reading registry snapshots from {}", dir.display());
            write_keys(&SnapshotProvider::new(dir), &query, options)
        }
        #[cfg(windows)]
        None => {
            debug!("Reading the live registry");
            write_keys(&RegistryProvider, &query, options)
        }
        #[cfg(not(windows))]
        None => Err(AppError::NoSnapshotDir),
    }
}

/// Run the keys command against `provider`, writing to stdout.
fn write_keys<P: Provider>(
    provider: &P,
    query: &KeyQuery,
    options: KeysOptions<'_>,
) -> Result<Summary, AppError> {
    let mut out = io::stdout().lock();
    let summary = super::keys::run(provider, query, options, &mut out)?;
    out.flush().map_err(|e| KeysError::Render(e.into()))?;
    Ok(summary)
}

/// Run the job command against the configured orchestration service.
///
/// # Errors
///
/// Returns [`AppError::NoServiceUrl`] if no service URL is configured.
/// Returns [`AppError::Orchestrator`] if the HTTP client cannot be created.
/// Returns [`AppError::Job`] if the job cannot be fetched or printed.
pub fn job(config: &Config, job_id: &str) -> Result<(), AppError> {
    let service_url = config
        .orchestrator
        .service_url
        .as_deref()
        .ok_or(AppError::NoServiceUrl)?;
    let service = HttpOrchestrator::new(service_url, config.orchestrator.credentials())?;

    let mut out = io::stdout().lock();
    super::job::run(&service, job_id, &mut out)?;
    Ok(())
}
