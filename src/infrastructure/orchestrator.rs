//! Client of the orchestration web service (`OData` over HTTP).

use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Sent with every request.
const USER_AGENT: &str = "regwalk";
/// Whole-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur when talking to the orchestration web service.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The HTTP client could not be built.
    #[error("failed to create HTTP client")]
    Client(#[source] reqwest::Error),

    /// The job id is not a GUID.
    #[error("invalid job id {id:?}: expected a GUID")]
    InvalidJobId {
        /// Rejected id.
        id: String,
    },

    /// The request could not be sent or its body read.
    #[error("request to {url} failed")]
    Request {
        /// Requested URL.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{url} returned status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body is not the expected JSON.
    #[error("failed to decode response from {url}")]
    Decode {
        /// Requested URL.
        url: String,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Credentials sent with every request (HTTP basic authentication).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password, if any.
    pub password: Option<String>,
}

/// An orchestration job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Job GUID.
    pub id: String,
    /// Entity URL.
    pub url: Option<String>,
    /// Runbook the job runs.
    pub runbook_id: Option<String>,
    /// Status as reported by the service.
    pub status: Option<String>,
    /// When the job was created.
    pub creation_time: Option<OffsetDateTime>,
    /// When the job last changed.
    pub last_modified_time: Option<OffsetDateTime>,
}

/// One run of a runbook started by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunbookInstance {
    /// Entity URL.
    pub url: Option<String>,
    /// Root URL of the service the instance was read from.
    pub url_service: String,
    /// Link to the runbook.
    pub url_runbook: Option<String>,
    /// Link to the job.
    pub url_job: Option<String>,
    /// Link to the parameters.
    pub url_parameters: Option<String>,
    /// Link to the activity instances.
    pub url_activity_instances: Option<String>,
    /// Link to the runbook server.
    pub url_runbook_server: Option<String>,
    /// Publication time of the entity.
    pub published: Option<OffsetDateTime>,
    /// Last update of the entity.
    pub updated: Option<OffsetDateTime>,
    /// Entity type name.
    pub category: Option<String>,
    /// Instance GUID.
    pub id: String,
    /// Runbook GUID.
    pub runbook_id: Option<String>,
    /// Job GUID.
    pub job_id: Option<String>,
    /// Runbook server GUID.
    pub runbook_server_id: Option<String>,
    /// Status as reported by the service.
    pub status: Option<String>,
    /// When the instance started.
    pub creation_time: Option<OffsetDateTime>,
    /// When the instance finished.
    pub completion_time: Option<OffsetDateTime>,
}

/// Read access to jobs and their runbook instances.
pub trait OrchestratorService {
    /// Fetch one job by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is not a GUID, the request fails or the
    /// response cannot be decoded.
    fn get_job(&self, job_id: &str) -> Result<Job, OrchestratorError>;

    /// Fetch every runbook instance started by `job`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be decoded.
    fn get_runbook_instances(
        &self,
        job: &Job,
    ) -> Result<Vec<RunbookInstance>, OrchestratorError>;
}

/// `{"d": ...}` wrapper of every response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    /// Payload.
    d: T,
}

/// Entity sets come either wrapped in `results` or as a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Collection<T> {
    /// `{"results": [...]}`.
    Wrapped {
        /// Entities.
        results: Vec<T>,
    },
    /// `[...]`.
    Bare(Vec<T>),
}

impl<T> Collection<T> {
    /// Entities in either shape.
    fn into_vec(self) -> Vec<T> {
        match self {
            Collection::Wrapped { results } => results,
            Collection::Bare(items) => items,
        }
    }
}

/// `__metadata` of an entity.
#[derive(Debug, Default, Deserialize)]
struct Metadata {
    /// Entity URL.
    uri: Option<String>,
    /// Entity type name.
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Navigation property that was not expanded.
#[derive(Debug, Deserialize)]
struct Deferred {
    /// Where to fetch it.
    #[serde(rename = "__deferred")]
    deferred: Link,
}

/// URL of a deferred property.
#[derive(Debug, Deserialize)]
struct Link {
    /// Absolute URL.
    uri: String,
}

/// URL of a deferred navigation property.
fn link(deferred: Option<Deferred>) -> Option<String> {
    deferred.map(|d| d.deferred.uri)
}

/// Job entity as sent by the service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JobEntry {
    /// Entity URL and type.
    #[serde(rename = "__metadata", default)]
    metadata: Metadata,
    /// Job GUID.
    id: String,
    /// Runbook GUID.
    runbook_id: Option<String>,
    /// Status text.
    status: Option<String>,
    /// Raw timestamp.
    creation_time: Option<String>,
    /// Raw timestamp.
    last_modified_time: Option<String>,
}

/// Runbook instance entity as sent by the service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceEntry {
    /// Entity URL and type.
    #[serde(rename = "__metadata", default)]
    metadata: Metadata,
    /// Instance GUID.
    id: String,
    /// Runbook GUID.
    runbook_id: Option<String>,
    /// Job GUID.
    job_id: Option<String>,
    /// Runbook server GUID.
    runbook_server_id: Option<String>,
    /// Status text.
    status: Option<String>,
    /// Raw timestamp.
    creation_time: Option<String>,
    /// Raw timestamp.
    completion_time: Option<String>,
    /// Raw timestamp.
    published: Option<String>,
    /// Raw timestamp.
    updated: Option<String>,
    /// Deferred runbook.
    runbook: Option<Deferred>,
    /// Deferred job.
    job: Option<Deferred>,
    /// Deferred parameters.
    parameters: Option<Deferred>,
    /// Deferred activity instances.
    activity_instances: Option<Deferred>,
    /// Deferred runbook server.
    runbook_server: Option<Deferred>,
}

/// Parse an `OData` timestamp: `/Date(1700000000000)/`, optionally with an
/// offset suffix, or RFC 3339.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    if let Some(inner) = value
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        let millis_end = inner
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map_or(inner.len(), |(i, _)| i);
        let millis: i64 = inner.get(..millis_end)?.parse().ok()?;
        let nanos = i128::from(millis).checked_mul(1_000_000)?;
        return OffsetDateTime::from_unix_timestamp_nanos(nanos).ok();
    }
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// Parse an optional raw timestamp, dropping unparseable ones.
fn timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    value.and_then(parse_timestamp)
}

impl From<JobEntry> for Job {
    fn from(entry: JobEntry) -> Self {
        Self {
            creation_time: timestamp(entry.creation_time.as_deref()),
            last_modified_time: timestamp(entry.last_modified_time.as_deref()),
            id: entry.id,
            url: entry.metadata.uri,
            runbook_id: entry.runbook_id,
            status: entry.status,
        }
    }
}

/// Convert a wire entity, remembering which service it came from.
fn instance(entry: InstanceEntry, service_url: &str) -> RunbookInstance {
    RunbookInstance {
        url: entry.metadata.uri,
        url_service: service_url.to_owned(),
        url_runbook: link(entry.runbook),
        url_job: link(entry.job),
        url_parameters: link(entry.parameters),
        url_activity_instances: link(entry.activity_instances),
        url_runbook_server: link(entry.runbook_server),
        published: timestamp(entry.published.as_deref()),
        updated: timestamp(entry.updated.as_deref()),
        category: entry.metadata.kind,
        id: entry.id,
        runbook_id: entry.runbook_id,
        job_id: entry.job_id,
        runbook_server_id: entry.runbook_server_id,
        status: entry.status,
        creation_time: timestamp(entry.creation_time.as_deref()),
        completion_time: timestamp(entry.completion_time.as_deref()),
    }
}

/// Decode a single-entity response body.
///
/// # Errors
///
/// Returns [`OrchestratorError::Decode`] if the body is not a job entity.
pub fn decode_job(url: &str, body: &str) -> Result<Job, OrchestratorError> {
    let envelope: Envelope<JobEntry> = decode(url, body)?;
    Ok(Job::from(envelope.d))
}

/// Decode a runbook-instance collection response body.
///
/// # Errors
///
/// Returns [`OrchestratorError::Decode`] if the body is not a collection of instances.
pub fn decode_instances(
    url: &str,
    body: &str,
    service_url: &str,
) -> Result<Vec<RunbookInstance>, OrchestratorError> {
    let envelope: Envelope<Collection<InstanceEntry>> = decode(url, body)?;
    Ok(envelope
        .d
        .into_vec()
        .into_iter()
        .map(|entry| instance(entry, service_url))
        .collect())
}

/// Parse a JSON body, naming `url` on failure.
fn decode<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, OrchestratorError> {
    serde_json::from_str(body).map_err(|source| OrchestratorError::Decode {
        url: url.to_owned(),
        source,
    })
}

/// Whether `id` has the 8-4-4-4-12 hex digit shape of a GUID.
fn is_guid(id: &str) -> bool {
    id.split('-').map(str::len).eq([8, 4, 4, 4, 12])
        && id.chars().all(|c| c == '-' || c.is_ascii_hexdigit())
}

/// Client of the orchestration web service `OData` endpoint.
pub struct HttpOrchestrator {
    /// Blocking client with user agent and timeout set.
    client: reqwest::blocking::Client,
    /// Service root without a trailing slash.
    service_url: String,
    /// Basic authentication, if configured.
    credentials: Option<Credentials>,
}

impl HttpOrchestrator {
    /// Create a client for the service rooted at `service_url`
    /// (e.g. `http://orchestrator:81/Orchestrator2012/Orchestrator.svc`).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Client`] if the HTTP client cannot be built.
    pub fn new(
        service_url: &str,
        credentials: Option<Credentials>,
    ) -> Result<Self, OrchestratorError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(OrchestratorError::Client)?;

        Ok(Self {
            client,
            service_url: service_url.trim_end_matches('/').to_owned(),
            credentials,
        })
    }

    /// Service root without a trailing slash.
    #[must_use]
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Entity URL of one job.
    fn job_url(&self, job_id: &str) -> String {
        format!("{}/Jobs(guid'{job_id}')", self.service_url)
    }

    /// GET `url` as JSON and return the body of a successful response.
    fn fetch(&self, url: &str) -> Result<String, OrchestratorError> {
        debug!("GET {url}");
        let mut request = self
            .client
            .get(format!("{url}?$format=json"))
            .header("Accept", "application/json");

        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.user, credentials.password.as_deref());
        }

        let response = request.send().map_err(|source| OrchestratorError::Request {
            url: url.to_owned(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(OrchestratorError::Status {
                url: url.to_owned(),
                status: response.status().as_u16(),
            });
        }

        response.text().map_err(|source| OrchestratorError::Request {
            url: url.to_owned(),
            source,
        })
    }
}

impl OrchestratorService for HttpOrchestrator {
    fn get_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        if !is_guid(job_id) {
            return Err(OrchestratorError::InvalidJobId {
                id: job_id.to_owned(),
            });
        }
        let url = self.job_url(job_id);
        let body = self.fetch(&url)?;
        decode_job(&url, &body)
    }

    fn get_runbook_instances(
        &self,
        job: &Job,
    ) -> Result<Vec<RunbookInstance>, OrchestratorError> {
        let url = format!("{}/RunbookInstances", self.job_url(&job.id));
        let body = self.fetch(&url)?;
        decode_instances(&url, &body, &self.service_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_ID: &str = "4c5dd8ab-ce79-4b3d-a4b3-4e2bd1a0e1d2";

    #[test]
    fn parses_odata_dates() {
        let date = parse_timestamp("/Date(1700000000000)/").unwrap();
        assert_eq!(date.unix_timestamp(), 1_700_000_000);

        let with_offset = parse_timestamp("/Date(1700000000000+0000)/").unwrap();
        assert_eq!(with_offset, date);
    }

    #[test]
    fn parses_rfc3339_dates() {
        let date = parse_timestamp("2023-11-14T22:13:20Z").unwrap();
        assert_eq!(date.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("/Date(abc)/").is_none());
    }

    #[test]
    fn validates_guid_job_ids() {
        assert!(is_guid(JOB_ID));
        assert!(!is_guid("42"));
        assert!(!is_guid("4c5dd8ab-ce79-4b3d-a4b3-4e2bd1a0e1dz"));
    }

    #[test]
    fn decodes_job_entity() {
        let body = format!(
            r#"{{"d": {{
                "__metadata": {{"uri": "http://svc/Jobs(guid'{JOB_ID}')", "type": "Job"}},
                "Id": "{JOB_ID}",
                "RunbookId": "11111111-2222-3333-4444-555555555555",
                "Status": "Completed",
                "CreationTime": "/Date(1700000000000)/",
                "LastModifiedTime": null
            }}}}"#
        );
        let job = decode_job("http://svc", &body).unwrap();

        assert_eq!(job.id, JOB_ID);
        assert_eq!(job.status.as_deref(), Some("Completed"));
        assert_eq!(job.creation_time.map(|t| t.unix_timestamp()), Some(1_700_000_000));
        assert!(job.last_modified_time.is_none());
        assert!(job.url.unwrap().ends_with(&format!("guid'{JOB_ID}')")));
    }

    #[test]
    fn decodes_wrapped_and_bare_collections() {
        let entry = r#"{
            "__metadata": {
                "uri": "http://svc/RunbookInstances(guid'a')",
                "type": "RunbookInstance"
            },
            "Id": "a",
            "JobId": "j",
            "Status": "Success",
            "Runbook": {"__deferred": {"uri": "http://svc/RunbookInstances(guid'a')/Runbook"}},
            "ActivityInstances": {
                "__deferred": {"uri": "http://svc/RunbookInstances(guid'a')/ActivityInstances"}
            }
        }"#;

        let wrapped = format!(r#"{{"d": {{"results": [{entry}]}}}}"#);
        let bare = format!(r#"{{"d": [{entry}, {entry}]}}"#);

        let instances = decode_instances("u", &wrapped, "http://svc").unwrap();
        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.id, "a");
        assert_eq!(instance.url_service, "http://svc");
        assert_eq!(instance.category.as_deref(), Some("RunbookInstance"));
        assert!(instance.url_runbook.as_deref().unwrap().ends_with("/Runbook"));
        assert!(instance.url_parameters.is_none());

        assert_eq!(decode_instances("u", &bare, "http://svc").unwrap().len(), 2);
    }

    #[test]
    fn decode_failure_names_the_url() {
        let err = decode_job("http://svc/Jobs", "not json").unwrap_err();
        assert!(matches!(
            &err,
            OrchestratorError::Decode { url, .. } if url == "http://svc/Jobs"
        ));
    }

    #[test]
    fn invalid_job_id_is_rejected_before_any_request() {
        let client = HttpOrchestrator::new("http://127.0.0.1:9/", None).unwrap();
        assert_eq!(client.service_url(), "http://127.0.0.1:9");

        let err = client.get_job("not-a-guid").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidJobId { .. }));
    }
}
