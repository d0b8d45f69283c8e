// crates/seqrun-client/src/lib.rs
// ============================================================================
// Module: seqrun Client Library
// Description: Remote job protocol, transfers, and parallel orchestration.
// Purpose: Submit bioinformatics tool runs to the job service and collect
//          their outputs.
// Dependencies: aws-sdk-s3, reqwest, seqrun-config, seqrun-core, tokio
// ============================================================================

//! ## Overview
//! seqrun client drives remote jobs end to end. [`SeqrunClient`] validates the
//! API key and hands each [`RunRequest`] to the [`JobRunner`], which runs one
//! [`RemoteJob`] per worker thread and merges parallel outputs.
//! Invariants:
//! - A remote job that exists while its worker exits abnormally is marked
//!   `failed` on the service.
//! - One worker failure interrupts every sibling; a run reports one error.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod blob;
pub mod client;
pub mod error;
pub mod events;
pub mod job;
pub mod runner;
pub mod transfer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use api::DownloadTarget;
pub use api::HttpJobApi;
pub use api::JobStatus;
pub use api::RemoteJobApi;
pub use blob::BlobRouter;
pub use blob::BlobStore;
pub use client::SeqrunClient;
pub use client::SeqrunClientBuilder;
pub use error::ClientError;
pub use error::TransportError;
pub use events::EventSink;
pub use events::MemoryEventSink;
pub use events::RunEvent;
pub use job::JobContext;
pub use job::RemoteJob;
pub use job::download_outputs;
pub use runner::JobRunner;
pub use runner::RunOutcome;
pub use runner::RunRequest;
pub use runner::RunnerSettings;
pub use transfer::BlobTransfer;
pub use transfer::FileTransfer;
