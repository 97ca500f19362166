//! `job` command: show an orchestration job and its runbook instances.

use log::{debug, info};
use std::io::{self, Write};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::infrastructure::{Job, OrchestratorError, OrchestratorService, RunbookInstance};

use super::render::{RenderError, Table};

/// Column headers of the runbook instance table.
pub const INSTANCE_COLUMNS: [&str; 5] = [
    "Id",
    "RunbookServerId",
    "Status",
    "CreationTime",
    "CompletionTime",
];

/// Errors that can occur while running the job command.
#[derive(Debug, Error)]
pub enum JobError {
    /// The service request failed.
    #[error(transparent)]
    Service(#[from] OrchestratorError),

    /// The output could not be written.
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// RFC 3339 text, or empty when unset.
fn timestamp(value: Option<OffsetDateTime>) -> String {
    value
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// The value, or `-` when unset.
fn text(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

/// Print the job as aligned `name : value` lines.
fn write_job(job: &Job, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "Id               : {}", job.id)?;
    writeln!(out, "RunbookId        : {}", text(job.runbook_id.as_deref()))?;
    writeln!(out, "Status           : {}", text(job.status.as_deref()))?;
    writeln!(out, "CreationTime     : {}", timestamp(job.creation_time))?;
    writeln!(out, "LastModifiedTime : {}", timestamp(job.last_modified_time))?;
    Ok(())
}

/// One row per runbook instance.
fn instances_table(instances: &[RunbookInstance]) -> Table {
    let mut table = Table::new(&INSTANCE_COLUMNS);
    for instance in instances {
        table.push(vec![
            instance.id.clone(),
            text(instance.runbook_server_id.as_deref()).to_owned(),
            text(instance.status.as_deref()).to_owned(),
            timestamp(instance.creation_time),
            timestamp(instance.completion_time),
        ]);
    }
    table
}

/// Fetch `job_id` and the runbook instances it started, and print them.
///
/// # Errors
///
/// Returns [`JobError::Service`] if the job or its instances cannot be fetched.
/// Returns [`JobError::Render`] if the output cannot be written.
pub fn run<S: OrchestratorService>(
    service: &S,
    job_id: &str,
    out: &mut dyn Write,
) -> Result<Vec<RunbookInstance>, JobError> {
    let job = service.get_job(job_id)?;
    debug!("Job {} is {}", job.id, text(job.status.as_deref()));
    write_job(&job, out).map_err(RenderError::from)?;

    let instances = service.get_runbook_instances(&job)?;
    if instances.is_empty() {
        info!("Job {} has no runbook instances", job.id);
    } else {
        writeln!(out).map_err(RenderError::from)?;
        instances_table(&instances)
            .write(out)
            .map_err(RenderError::from)?;
    }
    Ok(instances)
}
