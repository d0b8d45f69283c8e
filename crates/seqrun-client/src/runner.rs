// crates/seqrun-client/src/runner.rs
// ============================================================================
// Module: seqrun Job Runner
// Description: Plans job executions, supervises workers, and merges outputs.
// Purpose: Turn one tool invocation into one or more remote jobs.
// Dependencies: seqrun-core, seqrun-config, crate::{api, events, job, transfer}
// ============================================================================

//! ## Overview
//! [`JobRunner::run`] sanitizes arguments, resolves inputs, and picks serial or
//! parallel execution. Serial runs upload every input as one job. Parallel
//! runs split the input (or a paired tuple) into aligned chunks and run one
//! job per chunk on its own thread, at most `max_workers` at a time.
//!
//! The supervisor polls thread liveness and the [`StatusBoard`]. The first
//! failure interrupts every other live worker; the supervisor then waits for
//! all of them to exit before reporting a single aggregated error. A second
//! cancellation request stops the wait immediately.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use seqrun_config::RunnerConfig;
use seqrun_core::CancellationToken;
use seqrun_core::DatabaseRef;
use seqrun_core::InputFile;
use seqrun_core::InputSpec;
use seqrun_core::JobError;
use seqrun_core::JobSpec;
use seqrun_core::LocalStatus;
use seqrun_core::MergeStrategy;
use seqrun_core::OutputHandle;
use seqrun_core::PollMode;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteProbe;
use seqrun_core::SplitOptions;
use seqrun_core::Splitter;
use seqrun_core::StatusBoard;
use seqrun_core::ToolName;
use seqrun_core::ToolRegistry;
use seqrun_core::ValidationError;
use seqrun_core::WorkerId;
use seqrun_core::inputs::check_file_size;
use seqrun_core::merge_outputs;
use seqrun_core::output::check_output_file;
use seqrun_core::resolve_inputs;
use seqrun_core::split::WORK_PREFIX;
use seqrun_core::split::check_splittable;

use crate::api::RemoteJobApi;
use crate::events::EventSink;
use crate::events::RunEvent;
use crate::job::JobContext;
use crate::job::RemoteJob;
use crate::transfer::FileTransfer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Whether this platform can run split/merge parallel execution.
const PARALLEL_PLATFORM_SUPPORTED: bool = cfg!(unix);

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Timing and concurrency settings for a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Remote status poll interval.
    pub poll_interval: Duration,
    /// Poll delay formula.
    pub poll_mode: PollMode,
    /// Supervisor check interval.
    pub supervise_interval: Duration,
    /// Delay between worker spawns.
    pub spawn_stagger: Duration,
    /// Maximum number of concurrently live workers.
    pub max_workers: usize,
    /// Directory for chunk inputs and per-chunk outputs.
    pub work_dir: PathBuf,
}

impl RunnerSettings {
    /// Builds settings from the `[runner]` config section.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            poll_mode: config.poll_mode,
            supervise_interval: config.supervise_interval(),
            spawn_stagger: config.spawn_stagger(),
            max_workers: config.max_workers,
            work_dir: config.work_dir(),
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

// ============================================================================
// SECTION: Requests and Outcomes
// ============================================================================

/// One tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Tool identifier.
    pub tool: ToolName,
    /// Input specification.
    pub inputs: InputSpec,
    /// Directory receiving the outputs.
    pub output_dir: PathBuf,
    /// Free-form custom arguments.
    pub args: String,
    /// Reference database.
    pub database: Option<DatabaseRef>,
    /// Return once the remote job is executing.
    pub detach: bool,
    /// Optional instance size hint.
    pub instance_size: Option<String>,
}

impl RunRequest {
    /// Creates a request writing outputs to the working directory.
    #[must_use]
    pub fn new(tool: impl Into<String>, inputs: impl Into<InputSpec>) -> Self {
        Self {
            tool: ToolName::new(tool),
            inputs: inputs.into(),
            output_dir: PathBuf::from("."),
            args: String::new(),
            database: None,
            detach: false,
            instance_size: None,
        }
    }

    /// Sets the output directory.
    #[must_use]
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Sets the custom argument string.
    #[must_use]
    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = args.into();
        self
    }

    /// Sets the reference database.
    #[must_use]
    pub fn database(mut self, database: DatabaseRef) -> Self {
        self.database = Some(database);
        self
    }

    /// Requests fire-and-forget execution.
    #[must_use]
    pub const fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    /// Sets the instance size hint.
    #[must_use]
    pub fn instance_size(mut self, instance_size: impl Into<String>) -> Self {
        self.instance_size = Some(instance_size.into());
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Serial run finished and outputs were downloaded.
    Completed(OutputHandle),
    /// Detached run is executing remotely.
    Submitted(OutputHandle),
    /// Parallel run finished; chunk outputs were merged.
    Merged {
        /// Merged output files.
        outputs: Vec<PathBuf>,
        /// Remote identifiers of every chunk job, in chunk order.
        job_ids: Vec<RemoteJobId>,
    },
}

/// Inputs and output directory of one job execution.
struct PlannedJob {
    /// Inputs uploaded together.
    inputs: Vec<InputFile>,
    /// Output directory of the execution.
    output_dir: PathBuf,
}

/// A worker thread being supervised.
struct LiveWorker {
    /// Worker identity.
    worker: WorkerId,
    /// Thread handle.
    thread: JoinHandle<Result<OutputHandle, JobError>>,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Orchestrates tool invocations against the job service.
pub struct JobRunner {
    /// Tool table.
    registry: ToolRegistry,
    /// Job service client.
    api: Arc<dyn RemoteJobApi>,
    /// Byte transfer.
    transfer: Arc<dyn FileTransfer>,
    /// Remote input probe.
    probe: Arc<dyn RemoteProbe>,
    /// Event sink.
    events: Arc<dyn EventSink>,
    /// Timing and concurrency.
    settings: RunnerSettings,
}

impl JobRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        registry: ToolRegistry,
        api: Arc<dyn RemoteJobApi>,
        transfer: Arc<dyn FileTransfer>,
        probe: Arc<dyn RemoteProbe>,
        events: Arc<dyn EventSink>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            registry,
            api,
            transfer,
            probe,
            events,
            settings,
        }
    }

    /// Returns the tool table.
    #[must_use]
    pub const fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs `request` to completion (or submission when detached).
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] for validation, remote, transfer, platform, and
    /// merge failures, and [`JobError::Interrupted`] after cancellation.
    pub fn run(
        &self,
        request: &RunRequest,
        token: &CancellationToken,
    ) -> Result<RunOutcome, JobError> {
        let record = self.registry.get(&request.tool)?;
        let (spec, sanitized) = JobSpec::prepare(record, &request.args, request.database.clone())?;
        let tool = spec.tool().clone();
        self.events.record(
            &RunEvent::new("arguments_sanitized").tool(&tool).message(sanitized.summary()),
        );
        if !spec.downgraded_by().is_empty() {
            self.events.record(&RunEvent::new("arguments_downgraded").tool(&tool).message(format!(
                "[{}] disable parallel execution and output validation; output is archived",
                spec.downgraded_by().join(", ")
            )));
        }

        let files = resolve_inputs(&request.inputs, spec.io(), self.probe.as_ref())?;
        let parallel = select_parallel(&spec, &files)?;
        let mut detach = request.detach;
        if parallel && detach {
            detach = false;
            self.events.record(
                &RunEvent::new("async_disabled")
                    .tool(&tool)
                    .message("async mode is incompatible with parallel execution"),
            );
        }
        self.events.record(
            &RunEvent::new("execution_mode")
                .tool(&tool)
                .message(if parallel { "parallel" } else { "serial" }),
        );

        let spec = Arc::new(spec);
        if parallel {
            self.run_parallel(&spec, &files, request, token)
        } else {
            self.run_serial(&spec, files, request, detach, token)
        }
    }

    /// Runs every input as one job.
    fn run_serial(
        &self,
        spec: &Arc<JobSpec>,
        files: Vec<InputFile>,
        request: &RunRequest,
        detach: bool,
        token: &CancellationToken,
    ) -> Result<RunOutcome, JobError> {
        for path in files.iter().filter_map(InputFile::local_path) {
            check_file_size(path, spec.io().serial_max_bytes)?;
        }
        let planned = std::iter::once(Ok(PlannedJob {
            inputs: files,
            output_dir: request.output_dir.clone(),
        }));
        let handles = self.supervise(spec, planned, request, detach, false, token)?;
        let handle = handles.into_iter().next().ok_or_else(|| {
            JobError::RemoteJob {
                job_id: String::new(),
                message: "worker returned no output handle".to_string(),
            }
        })?;
        if detach {
            self.events.record(
                &RunEvent::new("run_complete")
                    .tool(spec.tool())
                    .job_id(handle.job_id())
                    .message("submitted"),
            );
            return Ok(RunOutcome::Submitted(handle));
        }
        if spec.validates_output() {
            handle.validate_expected(&spec.output().expected_outputs)?;
        }
        self.events.record(
            &RunEvent::new("run_complete").tool(spec.tool()).job_id(handle.job_id()),
        );
        Ok(RunOutcome::Completed(handle))
    }

    /// Splits the inputs and runs one job per aligned chunk.
    fn run_parallel(
        &self,
        spec: &Arc<JobSpec>,
        files: &[InputFile],
        request: &RunRequest,
        token: &CancellationToken,
    ) -> Result<RunOutcome, JobError> {
        let paths: Vec<PathBuf> =
            files.iter().filter_map(|file| file.local_path().map(Path::to_path_buf)).collect();
        let work_dir = self.settings.work_dir.clone();
        let splitter =
            Splitter::new(&paths, SplitOptions::new(spec.io().parallel_max_bytes, &work_dir))?;

        let mut scratch: Vec<PathBuf> = Vec::new();
        let supervised = {
            let planned = splitter.map(|chunk| {
                chunk.map(|chunk| {
                    let output_dir = work_dir.join(format!("{WORK_PREFIX}out{:04}", chunk.index));
                    scratch.extend(chunk.paths.iter().cloned());
                    scratch.push(output_dir.clone());
                    let inputs = files
                        .iter()
                        .zip(chunk.paths)
                        .map(|(file, path)| file.with_local_path(path))
                        .collect();
                    PlannedJob {
                        inputs,
                        output_dir,
                    }
                })
            });
            self.supervise(spec, planned, request, false, true, token)
        };
        let outcome = supervised.and_then(|handles| self.merge(spec, &handles, &request.output_dir));
        remove_scratch(&scratch);
        outcome
    }

    /// Merges per-chunk outputs into `output_dir`.
    fn merge(
        &self,
        spec: &JobSpec,
        handles: &[OutputHandle],
        output_dir: &Path,
    ) -> Result<RunOutcome, JobError> {
        if handles.is_empty() {
            return Err(ValidationError::InvalidInput(
                "input produced no records to process".to_string(),
            )
            .into());
        }
        let mut groups: Vec<(PathBuf, Vec<PathBuf>)> = Vec::new();
        for handle in handles {
            if spec.validates_output() {
                handle.validate_expected(&spec.output().expected_outputs)?;
            }
            for path in handle.local_paths() {
                check_output_file(path)?;
                let relative = handle
                    .output_dir()
                    .and_then(|dir| path.strip_prefix(dir).ok())
                    .map_or_else(
                        || PathBuf::from(path.file_name().unwrap_or(path.as_os_str())),
                        Path::to_path_buf,
                    );
                match groups.iter_mut().find(|(name, _)| *name == relative) {
                    Some((_, parts)) => parts.push(path.clone()),
                    None => groups.push((relative, vec![path.clone()])),
                }
            }
        }
        fs::create_dir_all(output_dir).map_err(JobError::io)?;
        let mut outputs = Vec::with_capacity(groups.len());
        for (relative, parts) in groups {
            let dest = output_dir.join(relative);
            merge_outputs(spec.merge_strategy(), spec.tool(), &parts, &dest)?;
            outputs.push(dest);
        }
        let job_ids: Vec<RemoteJobId> =
            handles.iter().filter_map(|handle| handle.job_id().cloned()).collect();
        self.events.record(
            &RunEvent::new("outputs_merged")
                .tool(spec.tool())
                .message(format!("{} chunk outputs into {} files", handles.len(), outputs.len())),
        );
        self.events.record(&RunEvent::new("run_complete").tool(spec.tool()));
        Ok(RunOutcome::Merged {
            outputs,
            job_ids,
        })
    }

    // ------------------------------------------------------------------------
    // Supervisor
    // ------------------------------------------------------------------------

    /// Spawns and supervises one worker per planned job. Returns output
    /// handles in worker order.
    fn supervise(
        &self,
        spec: &Arc<JobSpec>,
        mut planned: impl Iterator<Item = Result<PlannedJob, JobError>>,
        request: &RunRequest,
        detach: bool,
        parallel: bool,
        token: &CancellationToken,
    ) -> Result<Vec<OutputHandle>, JobError> {
        let board = StatusBoard::new();
        let ctx = JobContext {
            api: Arc::clone(&self.api),
            transfer: Arc::clone(&self.transfer),
            board: board.clone(),
            token: token.clone(),
            events: Arc::clone(&self.events),
            poll_interval: self.settings.poll_interval,
            poll_mode: self.settings.poll_mode,
        };
        let tool = spec.tool();
        let max_workers = self.settings.max_workers.max(1);
        let mut live: Vec<LiveWorker> = Vec::new();
        let mut handles: Vec<(WorkerId, OutputHandle)> = Vec::new();
        let mut failures: Vec<(WorkerId, JobError)> = Vec::new();
        let mut local_error: Option<JobError> = None;
        let mut next_worker: u64 = 1;
        let mut exhausted = false;
        let mut stopping = false;

        loop {
            if token.is_escalated() {
                self.report_failure(tool, &board);
                self.events.record(
                    &RunEvent::new("run_interrupted")
                        .tool(tool)
                        .message("second interrupt; live workers were not awaited"),
                );
                return Err(JobError::Interrupted(
                    "second interrupt received; live workers abandoned".to_string(),
                ));
            }

            let (finished, running): (Vec<LiveWorker>, Vec<LiveWorker>) =
                live.into_iter().partition(|entry| entry.thread.is_finished());
            live = running;
            for entry in finished {
                match entry.thread.join() {
                    Ok(Ok(handle)) => handles.push((entry.worker, handle)),
                    Ok(Err(err)) => failures.push((entry.worker, err)),
                    Err(_) => {
                        board.set(entry.worker, LocalStatus::Failed);
                        failures.push((
                            entry.worker,
                            JobError::RemoteJob {
                                job_id: entry_job_id(&board, entry.worker)
                                    .map(|job_id| job_id.to_string())
                                    .unwrap_or_default(),
                                message: "worker thread panicked".to_string(),
                            },
                        ));
                    }
                }
            }

            let failure_seen = !failures.is_empty()
                || local_error.is_some()
                || board.first_failed().is_some()
                || token.is_cancelled();
            if failure_seen && !stopping {
                stopping = true;
                for worker in board.interrupt_others(None) {
                    self.events.record(
                        &RunEvent::new("worker_status")
                            .tool(tool)
                            .worker(worker)
                            .job_id(entry_job_id(&board, worker).as_ref())
                            .status(LocalStatus::Interrupting.as_str()),
                    );
                }
            }

            while !stopping && !exhausted && live.len() < max_workers {
                if board.any_stopping() || token.is_cancelled() {
                    break;
                }
                let job = match planned.next() {
                    None => {
                        exhausted = true;
                        break;
                    }
                    Some(Err(err)) => {
                        local_error = Some(err);
                        break;
                    }
                    Some(Ok(job)) => job,
                };
                let Some(worker) = WorkerId::from_raw(next_worker) else {
                    break;
                };
                if next_worker > 1 && !self.settings.spawn_stagger.is_zero() {
                    thread::sleep(self.settings.spawn_stagger);
                }
                next_worker = next_worker.saturating_add(1);
                board.register(worker);
                let remote = RemoteJob::new(
                    ctx.clone(),
                    worker,
                    Arc::clone(spec),
                    job.inputs,
                    job.output_dir,
                )
                .with_instance_size(request.instance_size.clone());
                let spawned = thread::Builder::new()
                    .name(format!("seqrun-worker-{worker}"))
                    .spawn(move || remote.run(detach));
                match spawned {
                    Ok(thread) => {
                        self.events.record(
                            &RunEvent::new("worker_spawned").tool(tool).worker(worker),
                        );
                        live.push(LiveWorker {
                            worker,
                            thread,
                        });
                    }
                    Err(err) => {
                        board.set(worker, LocalStatus::Failed);
                        local_error = Some(JobError::io(err));
                        break;
                    }
                }
            }

            if live.is_empty() && (exhausted || stopping || local_error.is_some()) {
                break;
            }
            thread::sleep(self.settings.supervise_interval);
        }

        if token.is_cancelled() {
            self.report_failure(tool, &board);
            self.events.record(&RunEvent::new("run_interrupted").tool(tool));
            return Err(JobError::Interrupted("run cancelled".to_string()));
        }
        let only_interrupted = failures.iter().all(|(_, err)| err.is_interrupted());
        if let Some(err) = local_error
            && only_interrupted
        {
            self.report_failure(tool, &board);
            return Err(err);
        }
        if failures.is_empty() {
            handles.sort_by_key(|(worker, _)| *worker);
            return Ok(handles.into_iter().map(|(_, handle)| handle).collect());
        }

        self.report_failure(tool, &board);
        failures.sort_by_key(|(worker, _)| *worker);
        if !parallel && !failures.is_empty() {
            return Err(failures.swap_remove(0).1);
        }
        if only_interrupted {
            return Err(JobError::Interrupted("workers were interrupted".to_string()));
        }
        Err(JobError::WorkersFailed {
            job_ids: board.job_ids().iter().map(ToString::to_string).collect(),
            failures: failures
                .iter()
                .map(|(worker, err)| format!("worker {worker}: {err}"))
                .collect(),
        })
    }

    /// Emits one `run_failed` event per spawned job so humans can correlate
    /// remote records.
    fn report_failure(&self, tool: &ToolName, board: &StatusBoard) {
        let job_ids = board.job_ids();
        if job_ids.is_empty() {
            self.events.record(
                &RunEvent::new("run_failed").tool(tool).message("no remote job was created"),
            );
        }
        for job_id in job_ids {
            self.events.record(&RunEvent::new("run_failed").tool(tool).job_id(Some(&job_id)));
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decides whether `files` run in parallel for `spec`.
///
/// # Errors
///
/// Returns [`JobError::UnsupportedPlatform`] or [`JobError::MergeUnsupported`]
/// when a parallel-eligible run cannot proceed.
fn select_parallel(spec: &JobSpec, files: &[InputFile]) -> Result<bool, JobError> {
    let shape = files.len() == 1 || (spec.io().paired && files.len() > 1);
    let splittable = files
        .iter()
        .all(|file| file.local_path().is_some_and(|path| check_splittable(path).is_ok()));
    if !(spec.parallel_allowed() && shape && splittable) {
        return Ok(false);
    }
    if !PARALLEL_PLATFORM_SUPPORTED {
        return Err(JobError::UnsupportedPlatform(std::env::consts::OS.to_string()));
    }
    if spec.merge_strategy() == MergeStrategy::Unsupported {
        return Err(JobError::MergeUnsupported(spec.tool().to_string()));
    }
    Ok(true)
}

/// Returns the remote id recorded for `worker`.
fn entry_job_id(board: &StatusBoard, worker: WorkerId) -> Option<RemoteJobId> {
    board.snapshot().into_iter().find(|(id, _)| *id == worker).and_then(|(_, entry)| entry.job_id)
}

/// Removes chunk inputs and per-chunk output directories.
fn remove_scratch(paths: &[PathBuf]) {
    for path in paths {
        if path.is_dir() {
            let _ = fs::remove_dir_all(path);
        } else {
            let _ = fs::remove_file(path);
        }
    }
}
