// crates/seqrun-client/src/job.rs
// ============================================================================
// Module: seqrun Remote Job
// Description: Per-worker protocol state machine for one job execution.
// Purpose: Drive create, upload, wait, and download against the job service.
// Dependencies: seqrun-core, crate::{api, events, transfer}
// ============================================================================

//! ## Overview
//! A [`RemoteJob`] walks one job execution through
//! `initialized -> uploading -> executing -> downloading -> complete`, writing
//! each local transition to the shared [`StatusBoard`]. It checks for
//! cooperative interruption between network calls, never during one.
//!
//! Invariants:
//! - Once the remote job exists, a "mark failed on exit" flag is armed. It is
//!   cleared when the remote side is known to be terminal (download
//!   acknowledged, failure reported, or detached after execution started).
//! - Dropping a job while the flag is armed sends a best-effort `failed`
//!   status to the service, so client crashes are visible remotely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use seqrun_core::CancellationToken;
use seqrun_core::DatabaseRef;
use seqrun_core::InputFile;
use seqrun_core::JobError;
use seqrun_core::JobSpec;
use seqrun_core::LocalStatus;
use seqrun_core::OutputHandle;
use seqrun_core::PollMode;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteStatus;
use seqrun_core::StatusBoard;
use seqrun_core::WorkerId;
use seqrun_core::assemble::is_archive;
use seqrun_core::next_poll_delay;
use seqrun_core::unpack_archive;
use seqrun_core::unpack_compressed;

use crate::api::CreateJobRequest;
use crate::api::InputFileRequest;
use crate::api::RemoteJobApi;
use crate::error::TransportError;
use crate::events::EventSink;
use crate::events::RunEvent;
use crate::transfer::FileTransfer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Longest uninterrupted sleep while waiting between polls.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

// ============================================================================
// SECTION: Context
// ============================================================================

/// Collaborators shared by every worker of a run.
#[derive(Clone)]
pub struct JobContext {
    /// Job service client.
    pub api: Arc<dyn RemoteJobApi>,
    /// Byte transfer.
    pub transfer: Arc<dyn FileTransfer>,
    /// Shared worker status map.
    pub board: StatusBoard,
    /// Run-wide cancellation flag.
    pub token: CancellationToken,
    /// Event sink.
    pub events: Arc<dyn EventSink>,
    /// Status poll interval.
    pub poll_interval: Duration,
    /// Status poll delay formula.
    pub poll_mode: PollMode,
}

// ============================================================================
// SECTION: Remote Job
// ============================================================================

/// One job execution and its protocol state.
pub struct RemoteJob {
    /// Shared collaborators.
    ctx: JobContext,
    /// Worker identity on the status board.
    worker: WorkerId,
    /// Job specification.
    spec: Arc<JobSpec>,
    /// Inputs uploaded together, in order.
    inputs: Vec<InputFile>,
    /// Directory receiving the outputs.
    output_dir: PathBuf,
    /// Optional instance size hint.
    instance_size: Option<String>,
    /// Output handle owned by this execution.
    handle: OutputHandle,
    /// Remote identifier once created.
    job_id: Option<RemoteJobId>,
    /// Armed while the remote job could be left dangling.
    mark_failed_on_exit: bool,
}

impl RemoteJob {
    /// Creates a job for `worker`. The worker must already be registered on
    /// the board.
    #[must_use]
    pub fn new(
        ctx: JobContext,
        worker: WorkerId,
        spec: Arc<JobSpec>,
        inputs: Vec<InputFile>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            ctx,
            worker,
            spec,
            inputs,
            handle: OutputHandle::new(output_dir.clone()),
            output_dir,
            instance_size: None,
            job_id: None,
            mark_failed_on_exit: false,
        }
    }

    /// Sets the instance size hint sent on creation.
    #[must_use]
    pub fn with_instance_size(mut self, instance_size: Option<String>) -> Self {
        self.instance_size = instance_size;
        self
    }

    /// Runs the full lifecycle. With `detach`, returns once the remote job is
    /// executing.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] for any failed transition; the worker's board
    /// entry is `failed` afterwards.
    pub fn run(mut self, detach: bool) -> Result<OutputHandle, JobError> {
        match self.drive(detach) {
            Ok(()) => Ok(std::mem::take(&mut self.handle)),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Executes the transitions in order.
    fn drive(&mut self, detach: bool) -> Result<(), JobError> {
        self.create()?;
        self.upload()?;
        if detach {
            self.mark_failed_on_exit = false;
            return Ok(());
        }
        self.wait_until_ready()?;
        self.download()
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Submits the job specification.
    fn create(&mut self) -> Result<(), JobError> {
        self.checkpoint()?;
        let (database_name, database_version) =
            self.spec.database().map(DatabaseRef::wire_fields).unwrap_or_default();
        let request = CreateJobRequest {
            tool_name: self.spec.tool().to_string(),
            tool_version: self.spec.version().to_string(),
            tool_args: self.spec.args().to_string(),
            database_name,
            database_version,
            output_file_name: self.spec.output_file_name(),
            instance_size: self.instance_size.clone(),
        };
        let created = self.ctx.api.create_job(&request).map_err(|err| remote_error(&err, ""))?;
        self.ctx.board.set_job_id(self.worker, created.id.clone());
        self.handle.set_job_id(created.id.clone());
        self.handle.set_identity(
            self.spec.tool().clone(),
            self.spec.version(),
            self.spec.database().cloned(),
        );
        self.job_id = Some(created.id);
        self.mark_failed_on_exit = true;
        Ok(())
    }

    /// Registers and transfers every input.
    fn upload(&mut self) -> Result<(), JobError> {
        self.checkpoint()?;
        self.transition(LocalStatus::Uploading)?;
        let job_id = self.require_job_id()?;
        if let Err(err) = self.ctx.api.set_status(&job_id, RemoteStatus::TransferringFromClient) {
            return Err(self.abort(upload_error(&err, &job_id)));
        }
        let inputs = self.inputs.clone();
        for input in &inputs {
            self.checkpoint()?;
            let request = InputFileRequest {
                file_name: input.location.file_name(),
                tool_prefix: input.tag.as_ref().map(|tag| tag.prefix.clone()),
                tool_prefix_order: input.tag.as_ref().map(|tag| tag.order),
            };
            let sent = self.ctx.api.register_input(&job_id, &request).and_then(|target| {
                // Remote-resident inputs are registered by URI only.
                match input.local_path() {
                    Some(path) => self.ctx.transfer.upload(&target.upload_location, path),
                    None => Ok(()),
                }
            });
            if let Err(err) = sent {
                return Err(self.abort(upload_error(&err, &job_id)));
            }
        }
        if let Err(err) = self.ctx.api.set_status(&job_id, RemoteStatus::TransferredFromClient) {
            return Err(self.abort(upload_error(&err, &job_id)));
        }
        self.transition(LocalStatus::Executing)
    }

    /// Polls until outputs are ready or the job fails.
    fn wait_until_ready(&mut self) -> Result<(), JobError> {
        let job_id = self.require_job_id()?;
        let started = Instant::now();
        loop {
            self.checkpoint()?;
            let status = self
                .ctx
                .api
                .status(&job_id)
                .map_err(|err| remote_error(&err, job_id.as_str()))?;
            match status.status {
                RemoteStatus::ReadyToTransferToClient => return Ok(()),
                RemoteStatus::Failed => {
                    self.mark_failed_on_exit = false;
                    return Err(JobError::RemoteJob {
                        job_id: job_id.to_string(),
                        message: status
                            .message
                            .unwrap_or_else(|| "service reported the job as failed".to_string()),
                    });
                }
                _ => {}
            }
            self.pause(next_poll_delay(
                started.elapsed(),
                self.ctx.poll_interval,
                self.ctx.poll_mode,
            ));
        }
    }

    /// Downloads, acknowledges, and unpacks the outputs.
    fn download(&mut self) -> Result<(), JobError> {
        self.checkpoint()?;
        self.transition(LocalStatus::Downloading)?;
        let job_id = self.require_job_id()?;
        if let Err(err) = self.ctx.api.set_status(&job_id, RemoteStatus::TransferringToClient) {
            return Err(self.abort(download_error(&err, &job_id)));
        }
        let fallback = self.spec.output_file_name();
        let compressed = match download_targets(
            self.ctx.api.as_ref(),
            self.ctx.transfer.as_ref(),
            &job_id,
            &self.output_dir,
            &fallback,
            &mut self.handle,
        ) {
            Ok(compressed) => compressed,
            Err(err) => return Err(self.abort(err)),
        };
        if let Err(err) = self.ctx.api.set_status(&job_id, RemoteStatus::TransferredToClient) {
            return Err(self.abort(download_error(&err, &job_id)));
        }
        self.mark_failed_on_exit = false;
        unpack_outputs(&mut self.handle, &self.output_dir, &compressed)?;
        self.transition(LocalStatus::Complete)
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    /// Returns an interruption error when a stop was requested.
    fn checkpoint(&self) -> Result<(), JobError> {
        if self.stop_requested() {
            return Err(self.interrupted());
        }
        Ok(())
    }

    /// Returns true when the run is cancelled or this worker is interrupting.
    fn stop_requested(&self) -> bool {
        self.ctx.token.is_cancelled() || self.ctx.board.is_interrupting(self.worker)
    }

    /// Builds the interruption error for this worker.
    fn interrupted(&self) -> JobError {
        JobError::Interrupted(format!("worker {} stopped at check-in", self.worker))
    }

    /// Writes a local status. A refused write means the supervisor
    /// interrupted the worker.
    fn transition(&self, status: LocalStatus) -> Result<(), JobError> {
        if !self.ctx.board.set(self.worker, status) {
            return Err(self.interrupted());
        }
        self.emit(RunEvent::new("worker_status").status(status.as_str()));
        Ok(())
    }

    /// Marks the worker failed locally and reports why.
    fn fail(&self, err: &JobError) {
        if self.ctx.board.set(self.worker, LocalStatus::Failed) {
            self.emit(RunEvent::new("worker_status").status(LocalStatus::Failed.as_str()));
        }
        self.emit(RunEvent::new("worker_failed").message(err.to_string()));
    }

    /// Reports remote failure now and returns `err`.
    fn abort(&mut self, err: JobError) -> JobError {
        if let Some(job_id) = &self.job_id {
            let _ = self.ctx.api.set_status(job_id, RemoteStatus::Failed);
        }
        self.mark_failed_on_exit = false;
        err
    }

    /// Sleeps up to `delay`, returning early when a stop is requested.
    fn pause(&self, delay: Duration) {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            thread::sleep(PAUSE_SLICE);
            return;
        };
        while !self.stop_requested() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }

    /// Returns the remote id or an error before creation.
    fn require_job_id(&self) -> Result<RemoteJobId, JobError> {
        self.job_id.clone().ok_or_else(|| JobError::RemoteJob {
            job_id: String::new(),
            message: "remote job was not created".to_string(),
        })
    }

    /// Records an event tagged with this worker's identity.
    fn emit(&self, event: RunEvent) {
        let event = event.tool(self.spec.tool()).worker(self.worker).job_id(self.job_id.as_ref());
        self.ctx.events.record(&event);
    }
}

impl Drop for RemoteJob {
    fn drop(&mut self) {
        if self.mark_failed_on_exit
            && let Some(job_id) = &self.job_id
        {
            let _ = self.ctx.api.set_status(job_id, RemoteStatus::Failed);
            self.emit(RunEvent::new("remote_marked_failed"));
        }
    }
}

// ============================================================================
// SECTION: Manual Download
// ============================================================================

/// Downloads the outputs of an existing job into `output_dir`.
///
/// Acknowledges the transfer when the job was still waiting for the client.
///
/// # Errors
///
/// Returns [`JobError::RemoteJob`] when outputs are not ready and
/// [`JobError::Download`] on transfer failure.
pub fn download_outputs(
    api: &dyn RemoteJobApi,
    transfer: &dyn FileTransfer,
    job_id: &RemoteJobId,
    output_dir: &Path,
) -> Result<OutputHandle, JobError> {
    let status = api.status(job_id).map_err(|err| remote_error(&err, job_id.as_str()))?;
    match status.status {
        RemoteStatus::ReadyToTransferToClient
        | RemoteStatus::TransferringToClient
        | RemoteStatus::TransferredToClient => {}
        other => {
            return Err(JobError::RemoteJob {
                job_id: job_id.to_string(),
                message: status.message.unwrap_or_else(|| format!("outputs not ready ({other})")),
            });
        }
    }
    let mut handle = OutputHandle::new(output_dir);
    handle.set_job_id(job_id.clone());
    let fallback = format!("{job_id}_output");
    let compressed =
        download_targets(api, transfer, job_id, output_dir, &fallback, &mut handle)?;
    if status.status == RemoteStatus::ReadyToTransferToClient {
        api.set_status(job_id, RemoteStatus::TransferredToClient)
            .map_err(|err| download_error(&err, job_id))?;
    }
    unpack_outputs(&mut handle, output_dir, &compressed)?;
    Ok(handle)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Transfers every listed output into `output_dir` and records it on `handle`.
/// Returns the local paths of outputs the service flagged as compressed.
fn download_targets(
    api: &dyn RemoteJobApi,
    transfer: &dyn FileTransfer,
    job_id: &RemoteJobId,
    output_dir: &Path,
    fallback_name: &str,
    handle: &mut OutputHandle,
) -> Result<Vec<PathBuf>, JobError> {
    let targets = api.downloads(job_id).map_err(|err| download_error(&err, job_id))?;
    if targets.is_empty() {
        return Err(JobError::Download {
            job_id: job_id.to_string(),
            message: "service listed no outputs".to_string(),
        });
    }
    fs::create_dir_all(output_dir).map_err(JobError::io)?;
    let mut compressed = Vec::new();
    for (index, target) in targets.iter().enumerate() {
        let name = target.file_name().unwrap_or_else(|| {
            if index == 0 { fallback_name.to_string() } else { format!("{fallback_name}.{index}") }
        });
        let dest = output_dir.join(name);
        transfer.download(target, &dest).map_err(|err| download_error(&err, job_id))?;
        if let Some(location) = target.location() {
            handle.add_remote_location(location);
        }
        if target.is_compressed {
            compressed.push(dest.clone());
        }
        handle.add_local_path(dest);
    }
    Ok(compressed)
}

/// Replaces downloaded archives on `handle` with their extracted files.
/// Outputs in `compressed` are unpacked whatever their name; others only when
/// their suffix names an archive.
fn unpack_outputs(
    handle: &mut OutputHandle,
    output_dir: &Path,
    compressed: &[PathBuf],
) -> Result<(), JobError> {
    let mut paths = Vec::new();
    for path in handle.local_paths().to_vec() {
        if compressed.contains(&path) {
            paths.extend(unpack_compressed(&path, output_dir)?);
        } else if is_archive(&path) {
            paths.extend(unpack_archive(&path, output_dir)?);
        } else {
            paths.push(path);
        }
    }
    handle.set_local_paths(paths);
    Ok(())
}

/// Maps a service call failure.
fn remote_error(err: &TransportError, job_id: &str) -> JobError {
    match err {
        TransportError::Unauthorized(_) => JobError::RemoteAccess(err.to_string()),
        _ => JobError::RemoteJob {
            job_id: job_id.to_string(),
            message: err.to_string(),
        },
    }
}

/// Maps an upload-phase failure.
fn upload_error(err: &TransportError, job_id: &RemoteJobId) -> JobError {
    match err {
        TransportError::Unauthorized(_) => JobError::RemoteAccess(err.to_string()),
        _ => JobError::Upload {
            job_id: job_id.to_string(),
            message: err.to_string(),
        },
    }
}

/// Maps a download-phase failure.
fn download_error(err: &TransportError, job_id: &RemoteJobId) -> JobError {
    match err {
        TransportError::Unauthorized(_) => JobError::RemoteAccess(err.to_string()),
        _ => JobError::Download {
            job_id: job_id.to_string(),
            message: err.to_string(),
        },
    }
}
