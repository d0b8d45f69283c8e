// crates/seqrun-client/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared fakes and fixtures for seqrun-client tests.
// Purpose: Provide an in-memory job service plus an HTTP mock service.
// Dependencies: seqrun-client, seqrun-core, flate2, serde_json, tar, tiny_http
// ============================================================================

//! ## Overview
//! [`FakeService`] implements both the job API and file transfer in memory so
//! runner tests can script remote behavior without sockets. [`MockHttpService`]
//! speaks the real wire protocol over `tiny_http` for transport tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    unused_imports,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use seqrun_client::DownloadTarget;
use seqrun_client::FileTransfer;
use seqrun_client::JobStatus;
use seqrun_client::MemoryEventSink;
use seqrun_client::RemoteJobApi;
use seqrun_client::RunnerSettings;
use seqrun_client::SeqrunClient;
use seqrun_client::TransportError;
use seqrun_client::api::CreateJobRequest;
use seqrun_client::api::CreatedJob;
use seqrun_client::api::InputFileRequest;
use seqrun_client::api::UploadTarget;
use seqrun_core::ArgArity;
use seqrun_core::ArgsPolicy;
use seqrun_core::IoPolicy;
use seqrun_core::MergeStrategy;
use seqrun_core::OutputPackaging;
use seqrun_core::OutputPolicy;
use seqrun_core::PollMode;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteStatus;
use seqrun_core::ToolName;
use seqrun_core::ToolRecord;
use seqrun_core::ToolRegistry;
use tiny_http::Header;
use tiny_http::Method;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Name of the test tool that echoes its inputs back as output.
pub const ECHO_TOOL: &str = "echo";
/// Output file produced by the echo tool.
pub const ECHO_OUTPUT: &str = "echo_output.txt";

/// Builds the echo tool record.
pub fn echo_tool(parallel: bool, parallel_max_bytes: u64) -> ToolRecord {
    ToolRecord {
        name: ToolName::new(ECHO_TOOL),
        version: "1.0".to_string(),
        args: ArgsPolicy::default()
            .allow("--fast", ArgArity::Fixed(0))
            .allow("--keep-temp", ArgArity::Fixed(1))
            .danger("--keep-temp")
            .deny("-o"),
        io: IoPolicy {
            parallel,
            parallel_max_bytes,
            ..IoPolicy::default()
        },
        output: OutputPolicy {
            packaging: OutputPackaging::Files,
            expected_outputs: vec![ECHO_OUTPUT.to_string()],
            merge: MergeStrategy::Concatenate,
            validate: true,
        },
    }
}

/// Builds a paired variant of the echo tool taking `-1`/`-2` inputs.
pub fn paired_echo_tool(parallel_max_bytes: u64) -> ToolRecord {
    let mut record = echo_tool(true, parallel_max_bytes);
    record.io.paired = true;
    record.io.max_inputs = 2;
    record.io.positional_prefixes = vec!["-1".to_string(), "-2".to_string()];
    record
}

/// Builds a registry holding only `record`.
pub fn registry_with(record: ToolRecord) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(record).expect("register tool");
    registry
}

/// Fast runner settings writing scratch files under `work_dir`.
pub fn fast_settings(work_dir: &Path) -> RunnerSettings {
    RunnerSettings {
        poll_interval: Duration::from_millis(10),
        poll_mode: PollMode::Remainder,
        supervise_interval: Duration::from_millis(10),
        spawn_stagger: Duration::ZERO,
        max_workers: 4,
        work_dir: work_dir.to_path_buf(),
    }
}

/// Builds FASTQ content with `records` four-line records of 16 bytes each.
pub fn fastq_records(records: usize) -> String {
    (0 .. records).map(|index| format!("@r{index}\nACGT\n+\nIIII\n")).collect()
}

/// Builds a client over `service` with an in-memory event sink.
pub fn client_for(
    service: &Arc<FakeService>,
    registry: ToolRegistry,
    settings: RunnerSettings,
) -> (SeqrunClient, Arc<MemoryEventSink>) {
    let events = Arc::new(MemoryEventSink::new());
    let client = SeqrunClient::builder(
        Arc::clone(service) as Arc<dyn RemoteJobApi>,
        Arc::clone(service) as Arc<dyn FileTransfer>,
    )
    .events(Arc::clone(&events) as Arc<dyn seqrun_client::EventSink>)
    .registry(registry)
    .settings(settings)
    .build();
    (client, events)
}

// ============================================================================
// SECTION: In-Memory Service
// ============================================================================

/// Scripted remote behavior.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Reject the API key.
    pub reject_key: bool,
    /// A job whose input name contains the text reports `failed` once at
    /// least the given number of jobs exist.
    pub fail_input: Option<(String, usize)>,
    /// Number of `executing` polls before outputs are ready.
    pub polls_before_ready: usize,
    /// Uploads of inputs whose location contains the text fail.
    pub fail_upload: Option<String>,
    /// Outputs are listed under this object name and flagged compressed.
    pub compressed_output: Option<String>,
    /// Every status call blocks this long before answering.
    pub stall_status: Option<Duration>,
}

/// One job as seen by the fake service.
#[derive(Debug, Clone, Default)]
pub struct FakeJob {
    /// Creation request.
    pub request: Option<CreateJobRequest>,
    /// Registered inputs.
    pub inputs: Vec<InputFileRequest>,
    /// Concatenated uploaded bytes.
    pub uploads: Vec<u8>,
    /// Statuses reported by the client, in order.
    pub statuses: Vec<RemoteStatus>,
    /// Status polls answered so far.
    polls: usize,
}

/// In-memory job service implementing both client seams.
#[derive(Debug, Default)]
pub struct FakeService {
    /// Scripted behavior.
    behavior: Mutex<Behavior>,
    /// Jobs keyed by id.
    jobs: Mutex<BTreeMap<String, FakeJob>>,
}

impl FakeService {
    /// Creates a service with `behavior`.
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            jobs: Mutex::new(BTreeMap::new()),
        })
    }

    /// Replaces the scripted behavior.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Returns a snapshot of every job.
    pub fn jobs(&self) -> BTreeMap<String, FakeJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Returns one job.
    pub fn job(&self, job_id: &str) -> FakeJob {
        self.jobs.lock().unwrap().get(job_id).cloned().expect("job exists")
    }

    /// Marks `job_id` ready for download.
    pub fn make_ready(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(job_id).expect("job exists");
        job.polls = usize::MAX;
    }

    fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }
}

/// Extracts the job id from a `mem://{job}/...` location.
fn job_of(location: &str) -> Result<String, TransportError> {
    location
        .strip_prefix("mem://")
        .and_then(|rest| rest.split('/').next())
        .map(str::to_string)
        .ok_or_else(|| TransportError::InvalidUri(location.to_string()))
}

impl RemoteJobApi for FakeService {
    fn validate_key(&self) -> Result<(), TransportError> {
        if self.behavior().reject_key {
            return Err(TransportError::Unauthorized("http status 401".to_string()));
        }
        Ok(())
    }

    fn create_job(&self, request: &CreateJobRequest) -> Result<CreatedJob, TransportError> {
        let mut jobs = self.jobs.lock().unwrap();
        let id = format!("job-{}", jobs.len() + 1);
        jobs.insert(
            id.clone(),
            FakeJob {
                request: Some(request.clone()),
                ..FakeJob::default()
            },
        );
        Ok(CreatedJob {
            id: RemoteJobId::new(id),
            upload_location: None,
        })
    }

    fn register_input(
        &self,
        job_id: &RemoteJobId,
        request: &InputFileRequest,
    ) -> Result<UploadTarget, TransportError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(job_id.as_str()).expect("job exists");
        job.inputs.push(request.clone());
        Ok(UploadTarget {
            upload_location: format!("mem://{job_id}/in/{}", request.file_name),
        })
    }

    fn set_status(
        &self,
        job_id: &RemoteJobId,
        status: RemoteStatus,
    ) -> Result<(), TransportError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(job_id.as_str()).expect("job exists");
        job.statuses.push(status);
        Ok(())
    }

    fn status(&self, job_id: &RemoteJobId) -> Result<JobStatus, TransportError> {
        let behavior = self.behavior();
        if let Some(stall) = behavior.stall_status {
            std::thread::sleep(stall);
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job_count = jobs.len();
        let job = jobs.get_mut(job_id.as_str()).expect("job exists");
        if let Some(last) = job.statuses.last()
            && matches!(last, RemoteStatus::Failed | RemoteStatus::TransferredToClient)
        {
            return Ok(JobStatus {
                status: *last,
                message: None,
            });
        }
        if let Some((text, after)) = &behavior.fail_input
            && job_count >= *after
            && job.inputs.iter().any(|input| input.file_name.contains(text.as_str()))
        {
            return Ok(JobStatus {
                status: RemoteStatus::Failed,
                message: Some("simulated tool failure".to_string()),
            });
        }
        if job.statuses.last() != Some(&RemoteStatus::TransferredFromClient) {
            return Ok(JobStatus {
                status: RemoteStatus::TransferringFromClient,
                message: None,
            });
        }
        if job.polls < behavior.polls_before_ready {
            job.polls += 1;
            return Ok(JobStatus {
                status: RemoteStatus::Executing,
                message: None,
            });
        }
        Ok(JobStatus {
            status: RemoteStatus::ReadyToTransferToClient,
            message: None,
        })
    }

    fn downloads(&self, job_id: &RemoteJobId) -> Result<Vec<DownloadTarget>, TransportError> {
        let jobs = self.jobs.lock().unwrap();
        let job = jobs.get(job_id.as_str()).expect("job exists");
        let name = job
            .request
            .as_ref()
            .map_or_else(|| "output".to_string(), |request| request.output_file_name.clone());
        if let Some(object) = self.behavior().compressed_output {
            return Ok(vec![DownloadTarget {
                signed_url: Some(format!("mem://{job_id}/out/{object}")),
                object_name: Some(object),
                is_compressed: true,
                ..DownloadTarget::default()
            }]);
        }
        Ok(vec![DownloadTarget {
            signed_url: Some(format!("mem://{job_id}/out/{name}")),
            ..DownloadTarget::default()
        }])
    }
}

impl FileTransfer for FakeService {
    fn upload(&self, upload_location: &str, source: &Path) -> Result<(), TransportError> {
        if let Some(text) = self.behavior().fail_upload
            && upload_location.contains(text.as_str())
        {
            return Err(TransportError::Http("simulated upload failure".to_string()));
        }
        let job_id = job_of(upload_location)?;
        let bytes = fs::read(source).map_err(|err| TransportError::Io(err.to_string()))?;
        let mut jobs = self.jobs.lock().unwrap();
        jobs.get_mut(&job_id).expect("job exists").uploads.extend_from_slice(&bytes);
        Ok(())
    }

    fn download(&self, target: &DownloadTarget, dest: &Path) -> Result<u64, TransportError> {
        let location = target.signed_url.clone().unwrap_or_default();
        let job_id = job_of(&location)?;
        let bytes = self.job(&job_id).uploads;
        let bytes = if bytes.is_empty() { b"remote output\n".to_vec() } else { bytes };
        let is_archive = target.is_compressed || dest.to_string_lossy().ends_with(".tar.gz");
        if is_archive {
            write_archive(dest, ECHO_OUTPUT, &bytes);
        } else {
            fs::write(dest, &bytes).map_err(|err| TransportError::Io(err.to_string()))?;
        }
        Ok(fs::metadata(dest).map_err(|err| TransportError::Io(err.to_string()))?.len())
    }
}

/// Writes a gzip-compressed tar holding one member.
fn write_archive(dest: &Path, name: &str, bytes: &[u8]) {
    let encoder = GzEncoder::new(File::create(dest).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

// ============================================================================
// SECTION: HTTP Mock Service
// ============================================================================

/// Requests observed by [`MockHttpService`].
#[derive(Debug, Default)]
pub struct HttpLog {
    /// `METHOD path` lines in arrival order.
    pub requests: Vec<String>,
    /// Authorization header of each API request.
    pub authorizations: Vec<String>,
    /// JSON bodies of status updates.
    pub statuses: Vec<String>,
    /// Last create-job body.
    pub created: Option<serde_json::Value>,
    /// Uploaded blobs keyed by path.
    pub blobs: BTreeMap<String, Vec<u8>>,
}

/// Job service over `tiny_http` that serves one job, `job-1`.
pub struct MockHttpService {
    /// Server handle.
    server: Arc<Server>,
    /// Request log shared with the server thread.
    log: Arc<Mutex<HttpLog>>,
    /// Server thread.
    thread: Option<JoinHandle<()>>,
}

impl MockHttpService {
    /// Starts the mock accepting `api_key`.
    pub fn start(api_key: &str) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("http server"));
        let log = Arc::new(Mutex::new(HttpLog::default()));
        let base = format!("http://{}", server.server_addr());
        let expected = format!("Bearer {api_key}");
        let thread_server = Arc::clone(&server);
        let thread_log = Arc::clone(&log);
        let thread = std::thread::spawn(move || {
            while let Ok(request) = thread_server.recv() {
                handle(request, &base, &expected, &thread_log);
            }
        });
        Self {
            server,
            log,
            thread: Some(thread),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server.server_addr())
    }

    /// Returns the request log.
    pub fn log(&self) -> std::sync::MutexGuard<'_, HttpLog> {
        self.log.lock().unwrap()
    }
}

impl Drop for MockHttpService {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Serves one request.
fn handle(mut request: tiny_http::Request, base: &str, expected: &str, log: &Mutex<HttpLog>) {
    let method = request.method().clone();
    let path = request.url().to_string();
    let mut body = Vec::new();
    let _ = request.as_reader().read_to_end(&mut body);
    let authorization = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Authorization"))
        .map(|header| header.value.as_str().to_string())
        .unwrap_or_default();

    let mut log = log.lock().unwrap();
    log.requests.push(format!("{method} {path}"));
    let is_blob = path.starts_with("/upload/") || path.starts_with("/blob/");
    if !is_blob {
        log.authorizations.push(authorization.clone());
        if authorization != expected {
            let _ = request.respond(Response::from_string("denied").with_status_code(401));
            return;
        }
    }

    let json = |value: serde_json::Value| {
        Response::from_string(value.to_string())
            .with_header(Header::from_bytes("Content-Type", "application/json").unwrap())
    };
    let response = match (&method, path.as_str()) {
        (Method::Get, "/auth/validate") => json(serde_json::json!({})),
        (Method::Post, "/jobs") => {
            log.created = serde_json::from_slice(&body).ok();
            json(serde_json::json!({ "id": "job-1" }))
        }
        (Method::Put, "/jobs/job-1/status") => {
            log.statuses.push(String::from_utf8_lossy(&body).into_owned());
            json(serde_json::json!({}))
        }
        (Method::Post, "/jobs/job-1/input-files") => {
            let input: serde_json::Value = serde_json::from_slice(&body).unwrap();
            let name = input["file_name"].as_str().unwrap_or("input").to_string();
            json(serde_json::json!({ "upload_location": format!("{base}/upload/{name}") }))
        }
        (Method::Get, "/jobs/job-1/status") => {
            json(serde_json::json!({ "status": "ready_to_transfer_to_client" }))
        }
        (Method::Get, "/jobs/job-1/downloads") => json(serde_json::json!([
            { "signed_url": format!("{base}/blob/{ECHO_OUTPUT}") }
        ])),
        (Method::Get, "/jobs/missing/status") => {
            Response::from_string("no such job").with_status_code(404)
        }
        (Method::Put, upload) if upload.starts_with("/upload/") => {
            log.blobs.insert(upload.to_string(), body);
            Response::from_string("")
        }
        (Method::Get | Method::Head, blob) if blob.starts_with("/blob/") => {
            let bytes: Vec<u8> = log.blobs.values().flatten().copied().collect();
            Response::from_data(bytes)
        }
        _ => Response::from_string("not found").with_status_code(404),
    };
    let _ = request.respond(response);
}
