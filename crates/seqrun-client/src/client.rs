// crates/seqrun-client/src/client.rs
// ============================================================================
// Module: seqrun Client Facade
// Description: Caller-facing entry point tying configuration to the runner.
// Purpose: Validate credentials once, then run, inspect, and download jobs.
// Dependencies: seqrun-config, seqrun-core, crate::{api, blob, events, job,
//               runner, transfer}
// ============================================================================

//! ## Overview
//! [`SeqrunClient`] is what callers hold. Every tool in the table is invoked
//! through the same [`SeqrunClient::run`] call, keyed by the tool name in the
//! [`RunRequest`]. The API key is validated before the first job is created.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use seqrun_config::EventSinkKind;
use seqrun_config::EventsConfig;
use seqrun_config::SeqrunConfig;
use seqrun_config::resolve_api_key;
use seqrun_core::CancellationToken;
use seqrun_core::JobError;
use seqrun_core::NoRemoteInputs;
use seqrun_core::OutputHandle;
use seqrun_core::RemoteJobId;
use seqrun_core::RemoteProbe;
use seqrun_core::ToolRegistry;

use crate::api::HttpJobApi;
use crate::api::JobStatus;
use crate::api::RemoteJobApi;
use crate::blob::BlobRouter;
use crate::blob::BlobStore;
use crate::blob::HttpBlobStore;
use crate::blob::S3BlobStore;
use crate::error::ClientError;
use crate::error::TransportError;
use crate::events::EventSink;
use crate::events::FileEventSink;
use crate::events::NoopEventSink;
use crate::events::StderrEventSink;
use crate::job::download_outputs;
use crate::runner::JobRunner;
use crate::runner::RunOutcome;
use crate::runner::RunRequest;
use crate::runner::RunnerSettings;
use crate::transfer::BlobTransfer;
use crate::transfer::FileTransfer;

// ============================================================================
// SECTION: Client
// ============================================================================

/// Remote bioinformatics job client.
pub struct SeqrunClient {
    /// Job service client.
    api: Arc<dyn RemoteJobApi>,
    /// Byte transfer.
    transfer: Arc<dyn FileTransfer>,
    /// Run orchestration.
    runner: JobRunner,
    /// Set once the service accepted the API key.
    key_validated: AtomicBool,
}

impl SeqrunClient {
    /// Returns a builder over explicit collaborators.
    #[must_use]
    pub fn builder(
        api: Arc<dyn RemoteJobApi>,
        transfer: Arc<dyn FileTransfer>,
    ) -> SeqrunClientBuilder {
        SeqrunClientBuilder {
            api,
            transfer,
            probe: Arc::new(NoRemoteInputs),
            events: Arc::new(NoopEventSink),
            registry: ToolRegistry::builtin(),
            settings: RunnerSettings::default(),
        }
    }

    /// Builds an HTTP client from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Job`] with [`JobError::RemoteAccess`] when no
    /// API key is available, and other [`ClientError`] variants when a
    /// transport or the event sink cannot be constructed.
    pub fn from_config(config: &SeqrunConfig) -> Result<Self, ClientError> {
        let api_key = resolve_api_key(&config.server)
            .map_err(|err| JobError::RemoteAccess(err.to_string()))?;
        let api: Arc<dyn RemoteJobApi> = Arc::new(HttpJobApi::new(
            &config.server.base_url()?,
            api_key,
            config.server.timeout(),
        )?);
        // Transfers are unbounded in duration; only the API calls time out.
        let http: Arc<dyn BlobStore> = Arc::new(HttpBlobStore::new(None)?);
        let s3: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(&config.storage)?);
        let router = BlobRouter::builder()
            .store("http", Arc::clone(&http))
            .store("https", http)
            .store("s3", s3)
            .build();
        let transfer: Arc<dyn FileTransfer> =
            Arc::new(BlobTransfer::new(router.clone(), config.storage.clone()));
        Ok(Self::builder(api, transfer)
            .probe(Arc::new(router))
            .events(event_sink(&config.events)?)
            .registry(config.tool_registry()?)
            .settings(RunnerSettings::from_config(&config.runner))
            .build())
    }

    /// Returns the tool table.
    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        self.runner.registry()
    }

    /// Confirms the API key with the service.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RemoteAccess`] when the key is rejected or the
    /// service is unreachable.
    pub fn validate_key(&self) -> Result<(), JobError> {
        self.api.validate_key().map_err(|err| JobError::RemoteAccess(err.to_string()))?;
        self.key_validated.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Runs one tool invocation.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] as described on [`JobRunner::run`], plus
    /// [`JobError::RemoteAccess`] when the key is rejected.
    pub fn run(
        &self,
        request: &RunRequest,
        token: &CancellationToken,
    ) -> Result<RunOutcome, JobError> {
        if !self.key_validated.load(Ordering::SeqCst) {
            self.validate_key()?;
        }
        self.runner.run(request, token)
    }

    /// Reads the remote status of a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RemoteAccess`] or [`JobError::RemoteJob`] when the
    /// service call fails.
    pub fn status(&self, job_id: &RemoteJobId) -> Result<JobStatus, JobError> {
        self.api.status(job_id).map_err(|err| match err {
            TransportError::Unauthorized(_) => JobError::RemoteAccess(err.to_string()),
            _ => JobError::RemoteJob {
                job_id: job_id.to_string(),
                message: err.to_string(),
            },
        })
    }

    /// Downloads the outputs of an existing job, typically one started with
    /// `detach`. Outputs named in `expected` must be present and non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] when outputs are not ready, the transfer fails,
    /// or an expected output is missing.
    pub fn download(
        &self,
        job_id: &RemoteJobId,
        output_dir: &Path,
        expected: &[String],
    ) -> Result<OutputHandle, JobError> {
        let handle =
            download_outputs(self.api.as_ref(), self.transfer.as_ref(), job_id, output_dir)?;
        handle.validate_expected(expected)?;
        Ok(handle)
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Builder for [`SeqrunClient`].
pub struct SeqrunClientBuilder {
    /// Job service client.
    api: Arc<dyn RemoteJobApi>,
    /// Byte transfer.
    transfer: Arc<dyn FileTransfer>,
    /// Remote input probe.
    probe: Arc<dyn RemoteProbe>,
    /// Event sink.
    events: Arc<dyn EventSink>,
    /// Tool table.
    registry: ToolRegistry,
    /// Runner settings.
    settings: RunnerSettings,
}

impl SeqrunClientBuilder {
    /// Sets the remote input probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn RemoteProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the tool table.
    #[must_use]
    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the runner settings.
    #[must_use]
    pub fn settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> SeqrunClient {
        let runner = JobRunner::new(
            self.registry,
            Arc::clone(&self.api),
            Arc::clone(&self.transfer),
            self.probe,
            self.events,
            self.settings,
        );
        SeqrunClient {
            api: self.api,
            transfer: self.transfer,
            runner,
            key_validated: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the configured event sink.
fn event_sink(config: &EventsConfig) -> Result<Arc<dyn EventSink>, ClientError> {
    match (config.sink, &config.path) {
        (EventSinkKind::Stderr, _) => Ok(Arc::new(StderrEventSink)),
        (EventSinkKind::None, _) => Ok(Arc::new(NoopEventSink)),
        (EventSinkKind::File, Some(path)) => {
            let sink = FileEventSink::new(path).map_err(|err| ClientError::Events(err.to_string()))?;
            Ok(Arc::new(sink))
        }
        (EventSinkKind::File, None) => {
            Err(ClientError::Events("file sink requires a path".to_string()))
        }
    }
}
