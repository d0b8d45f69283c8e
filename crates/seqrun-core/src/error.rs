// crates/seqrun-core/src/error.rs
// ============================================================================
// Module: seqrun Errors
// Description: Error taxonomy shared by the orchestration core and its callers.
// Purpose: Classify local validation, remote access, transfer, and job failures.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`JobError`] is the single error type surfaced by a job run. Local input
//! problems are reported as [`ValidationError`] and are never retried. Remote
//! failures carry the remote job identifier when one was assigned so that a
//! human can correlate support requests with server-side records.
//! Invariants:
//! - No variant is ever returned as a success value.
//! - Variants are stable for programmatic handling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use thiserror::Error;

// ============================================================================
// SECTION: Validation Errors
// ============================================================================

/// Which side of an inclusive cardinality bound was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountBound {
    /// Fewer inputs than the declared minimum.
    Minimum,
    /// More inputs than the declared maximum.
    Maximum,
}

impl fmt::Display for CountBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minimum => f.write_str("minimum"),
            Self::Maximum => f.write_str("maximum"),
        }
    }
}

/// Local validation failures. Always fatal, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Resolved input count is outside the tool's declared bounds.
    #[error("input count {count} violates {bound} of {limit}")]
    InputCount {
        /// Number of resolved inputs.
        count: usize,
        /// Bound that was violated.
        bound: CountBound,
        /// Value of the violated bound.
        limit: usize,
    },
    /// Free-form arguments contained unknown or blacklisted tags.
    #[error("invalid arguments (unknown: [{}], blacklisted: [{}])", .unknown.join(", "), .blacklisted.join(", "))]
    Arguments {
        /// Tags not present in any list for the tool.
        unknown: Vec<String>,
        /// Tags explicitly blacklisted for the tool.
        blacklisted: Vec<String>,
    },
    /// Local path does not exist.
    #[error("input not found: {0}")]
    NotFound(String),
    /// Local file exceeds the per-file byte limit.
    #[error("input {path} is {actual_bytes} bytes (max {max_bytes})")]
    FileTooLarge {
        /// Offending path.
        path: String,
        /// Configured limit in bytes.
        max_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },
    /// File extension is not a record-oriented format that can be split.
    #[error("unsupported format for splitting: {0}")]
    UnsupportedFormat(String),
    /// Paired files do not contain the same number of record groups.
    #[error("paired inputs have mismatched record counts: {0}")]
    PairedLengthMismatch(String),
    /// Tool identifier is not in the tool table.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Expected output file is missing or trivially small.
    #[error("expected output missing or empty: {0}")]
    MissingOutput(String),
    /// Any other malformed input specification.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// SECTION: Job Errors
// ============================================================================

/// Errors surfaced by a job run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Local validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Authentication rejected or remote service unreachable.
    #[error("remote access error: {0}")]
    RemoteAccess(String),
    /// The remote service reported the job as failed.
    #[error("remote job {job_id} failed: {message}")]
    RemoteJob {
        /// Remote job identifier (empty when creation itself failed).
        job_id: String,
        /// Failure detail.
        message: String,
    },
    /// Transport failure while uploading inputs.
    #[error("upload failed for job {job_id}: {message}")]
    Upload {
        /// Remote job identifier.
        job_id: String,
        /// Failure detail.
        message: String,
    },
    /// Transport failure while downloading outputs.
    #[error("download failed for job {job_id}: {message}")]
    Download {
        /// Remote job identifier.
        job_id: String,
        /// Failure detail.
        message: String,
    },
    /// Process signal or cooperative cancellation.
    #[error("interrupted: {0}")]
    Interrupted(String),
    /// Local platform cannot run the parallel path.
    #[error("platform unsupported for parallel execution: {0}")]
    UnsupportedPlatform(String),
    /// Tool outputs cannot be merged after a parallel run.
    #[error("merge unsupported for tool {0}")]
    MergeUnsupported(String),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(String),
    /// One or more workers of a run failed; siblings were stopped.
    #[error("run failed (jobs: [{}]): {}", .job_ids.join(", "), .failures.join("; "))]
    WorkersFailed {
        /// Remote identifiers of every spawned job, in spawn order.
        job_ids: Vec<String>,
        /// Per-worker failure messages.
        failures: Vec<String>,
    },
}

impl JobError {
    /// Builds an I/O error from any displayable source.
    pub fn io(err: impl fmt::Display) -> Self {
        Self::Io(err.to_string())
    }

    /// Returns true for cooperative or signal-driven interruptions.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}
