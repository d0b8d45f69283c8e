// crates/seqrun-client/src/error.rs
// ============================================================================
// Module: seqrun Transport Errors
// Description: Failures of the job service API, transfers, and blob stores.
// Dependencies: seqrun-config, seqrun-core, thiserror
// ============================================================================

//! ## Overview
//! [`TransportError`] describes what went wrong on the wire. The job state
//! machine maps it into the public [`seqrun_core::JobError`] taxonomy, adding
//! the remote job identifier and the protocol phase. [`ClientError`] covers
//! client construction.

use seqrun_config::ConfigError;
use seqrun_core::JobError;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The service rejected the API key.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Connection or protocol failure.
    #[error("http error: {0}")]
    Http(String),
    /// Non-success HTTP status.
    #[error("http status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(String),
    /// Object storage failure.
    #[error("storage error: {0}")]
    Storage(String),
    /// URI is malformed.
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    /// No blob store is registered for the URI scheme.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Failures while assembling a client from configuration.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be used.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A transport could not be constructed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Credentials or setup rejected in job terms.
    #[error(transparent)]
    Job(#[from] JobError),
    /// The event log could not be opened.
    #[error("event sink error: {0}")]
    Events(String),
}
