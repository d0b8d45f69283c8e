// crates/seqrun-client/src/api.rs
// ============================================================================
// Module: seqrun Job Service API
// Description: Typed client for the remote job service protocol.
// Purpose: Create jobs, register inputs, and track remote status over HTTP.
// Dependencies: reqwest, serde, seqrun-core
// ============================================================================

//! ## Overview
//! [`RemoteJobApi`] is the seam between the job state machine and the remote
//! service. [`HttpJobApi`] implements it with a blocking `reqwest` client that
//! sends the API key as a bearer token on every request. Status codes 401 and
//! 403 are reported as [`TransportError::Unauthorized`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use seqrun_config::ApiKey;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteStatus;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::TransportError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of response body characters kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Body of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Tool identifier.
    pub tool_name: String,
    /// Tool version.
    pub tool_version: String,
    /// Sanitized argument string.
    pub tool_args: String,
    /// Database name or custom database location.
    pub database_name: String,
    /// Database version (empty for custom databases).
    pub database_version: String,
    /// Remote output file name.
    pub output_file_name: String,
    /// Optional execution instance size hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_size: Option<String>,
}

/// Response of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedJob {
    /// Remote job identifier.
    pub id: RemoteJobId,
    /// Job-level upload location, when the service provides one.
    #[serde(default)]
    pub upload_location: Option<String>,
}

/// Body of `POST /jobs/{id}/input-files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFileRequest {
    /// File name, or the URI of a remote-resident input.
    pub file_name: String,
    /// Remote-side flag for positional inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix: Option<String>,
    /// Position of the input within its group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix_order: Option<usize>,
}

/// Response of `POST /jobs/{id}/input-files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Where the file's bytes are sent.
    pub upload_location: String,
}

/// Body of `PUT /jobs/{id}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// New remote status.
    pub status: RemoteStatus,
}

/// Response of `GET /jobs/{id}/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current remote status.
    pub status: RemoteStatus,
    /// Optional service message (set on failure).
    #[serde(default)]
    pub message: Option<String>,
}

/// One entry of `GET /jobs/{id}/downloads`.
///
/// Either `signed_url` is set, or `bucket` and `object_name` together with
/// short-lived delegated credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    /// Pre-signed HTTP(S) URL.
    #[serde(default)]
    pub signed_url: Option<String>,
    /// Bucket holding the object.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Delegated access key id.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Delegated secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Delegated session token.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Object key inside the bucket.
    #[serde(default)]
    pub object_name: Option<String>,
    /// True when the object is a compressed archive.
    #[serde(default)]
    pub is_compressed: bool,
}

impl DownloadTarget {
    /// Returns the local file name implied by the target, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let from_object = self.object_name.as_deref().and_then(base_name);
        from_object.or_else(|| {
            let url = Url::parse(self.signed_url.as_deref()?).ok()?;
            url.path_segments()?.next_back().and_then(base_name)
        })
    }

    /// Returns the remote location recorded on the output handle.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        if let Some(url) = &self.signed_url {
            return Some(url.clone());
        }
        match (&self.bucket, &self.object_name) {
            (Some(bucket), Some(object)) => Some(format!("s3://{bucket}/{object}")),
            _ => None,
        }
    }
}

/// Returns the last path component of `name` when it is a plain file name.
fn base_name(name: &str) -> Option<String> {
    let file = Path::new(name).file_name()?.to_str()?;
    if file.is_empty() || file == "." || file == ".." {
        return None;
    }
    Some(file.to_string())
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Remote job service operations.
pub trait RemoteJobApi: Send + Sync {
    /// Confirms the API key is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unauthorized`] for rejected keys.
    fn validate_key(&self) -> Result<(), TransportError>;

    /// Creates a remote job.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or service failure.
    fn create_job(&self, request: &CreateJobRequest) -> Result<CreatedJob, TransportError>;

    /// Registers one input file and returns its upload target.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or service failure.
    fn register_input(
        &self,
        job_id: &RemoteJobId,
        request: &InputFileRequest,
    ) -> Result<UploadTarget, TransportError>;

    /// Reports a status transition.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or service failure.
    fn set_status(&self, job_id: &RemoteJobId, status: RemoteStatus)
    -> Result<(), TransportError>;

    /// Reads the current remote status.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or service failure.
    fn status(&self, job_id: &RemoteJobId) -> Result<JobStatus, TransportError>;

    /// Lists download targets for the job outputs.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or service failure.
    fn downloads(&self, job_id: &RemoteJobId) -> Result<Vec<DownloadTarget>, TransportError>;
}

// ============================================================================
// SECTION: HTTP Implementation
// ============================================================================

/// Blocking HTTP client for the job service.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    /// HTTP client.
    client: Client,
    /// Base URL without a trailing slash.
    base_url: String,
    /// Bearer credential.
    api_key: ApiKey,
}

impl HttpJobApi {
    /// Builds a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] when the client cannot be constructed.
    pub fn new(base_url: &Url, api_key: ApiKey, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Returns the absolute URL of `path`.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Sends an authenticated request and checks its status.
    fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .bearer_auth(self.api_key.expose())
            .send()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        check_response(response)
    }
}

impl RemoteJobApi for HttpJobApi {
    fn validate_key(&self) -> Result<(), TransportError> {
        self.send(self.client.get(self.endpoint("auth/validate"))).map(drop)
    }

    fn create_job(&self, request: &CreateJobRequest) -> Result<CreatedJob, TransportError> {
        let response = self.send(self.client.post(self.endpoint("jobs")).json(request))?;
        decode(response)
    }

    fn register_input(
        &self,
        job_id: &RemoteJobId,
        request: &InputFileRequest,
    ) -> Result<UploadTarget, TransportError> {
        let url = self.endpoint(&format!("jobs/{job_id}/input-files"));
        decode(self.send(self.client.post(url).json(request))?)
    }

    fn set_status(
        &self,
        job_id: &RemoteJobId,
        status: RemoteStatus,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&format!("jobs/{job_id}/status"));
        let body = StatusUpdate {
            status,
        };
        self.send(self.client.put(url).json(&body)).map(drop)
    }

    fn status(&self, job_id: &RemoteJobId) -> Result<JobStatus, TransportError> {
        let url = self.endpoint(&format!("jobs/{job_id}/status"));
        decode(self.send(self.client.get(url))?)
    }

    fn downloads(&self, job_id: &RemoteJobId) -> Result<Vec<DownloadTarget>, TransportError> {
        let url = self.endpoint(&format!("jobs/{job_id}/downloads"));
        decode(self.send(self.client.get(url))?)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps non-success statuses to errors.
pub(crate) fn check_response(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::Unauthorized(format!("http status {}", status.as_u16())));
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(TransportError::Status {
            code: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    Ok(response)
}

/// Decodes a JSON response body.
fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response.json::<T>().map_err(|err| TransportError::Decode(err.to_string()))
}
