// crates/seqrun-core/src/status.rs
// ============================================================================
// Module: seqrun Status
// Description: Remote and local job statuses, the shared status board, and
//              cooperative cancellation.
// Purpose: Coordinate concurrent workers through one guarded status map.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every worker owns one entry in a [`StatusBoard`]. Only the owning worker
//! writes its own status, except that the supervisor (or the run-level
//! cancellation path) writes `interrupting` into other live entries. Terminal
//! entries are never overwritten by a different value.
//!
//! [`CancellationToken`] carries process-wide cancellation. Its first stage
//! asks workers to stop at their next check-in; its second stage marks the
//! request as escalated so callers may abandon cleanup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::RemoteJobId;
use crate::identifiers::WorkerId;

// ============================================================================
// SECTION: Remote Status
// ============================================================================

/// Status reported by (and reported to) the remote job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Job record created.
    Initialized,
    /// Client is uploading inputs.
    TransferringFromClient,
    /// Client finished uploading inputs.
    TransferredFromClient,
    /// Job is queued for execution.
    AwaitingExecution,
    /// Execution backend is starting the job.
    BeginningExecution,
    /// Job is executing.
    Executing,
    /// Outputs are ready for download.
    ReadyToTransferToClient,
    /// Client is downloading outputs.
    TransferringToClient,
    /// Client finished downloading outputs.
    TransferredToClient,
    /// Job failed.
    Failed,
}

impl RemoteStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 10] = [
        Self::Initialized,
        Self::TransferringFromClient,
        Self::TransferredFromClient,
        Self::AwaitingExecution,
        Self::BeginningExecution,
        Self::Executing,
        Self::ReadyToTransferToClient,
        Self::TransferringToClient,
        Self::TransferredToClient,
        Self::Failed,
    ];

    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::TransferringFromClient => "transferring_from_client",
            Self::TransferredFromClient => "transferred_from_client",
            Self::AwaitingExecution => "awaiting_execution",
            Self::BeginningExecution => "beginning_execution",
            Self::Executing => "executing",
            Self::ReadyToTransferToClient => "ready_to_transfer_to_client",
            Self::TransferringToClient => "transferring_to_client",
            Self::TransferredToClient => "transferred_to_client",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Local Status
// ============================================================================

/// Per-worker lifecycle status tracked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    /// Worker created, no remote job yet.
    Initialized,
    /// Inputs are being uploaded.
    Uploading,
    /// Remote job is executing.
    Executing,
    /// Outputs are being downloaded.
    Downloading,
    /// Worker finished successfully.
    Complete,
    /// Worker was asked to stop.
    Interrupting,
    /// Worker failed.
    Failed,
}

impl LocalStatus {
    /// Returns true for statuses that end a worker's lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns true for statuses the supervisor treats as "stop now".
    #[must_use]
    pub const fn is_stopping(self) -> bool {
        matches!(self, Self::Failed | Self::Interrupting)
    }

    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Uploading => "uploading",
            Self::Executing => "executing",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::Interrupting => "interrupting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Status Board
// ============================================================================

/// One entry of the status board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    /// Current local status.
    pub status: LocalStatus,
    /// Remote job identifier once assigned.
    pub job_id: Option<RemoteJobId>,
}

/// Shared, mutex-guarded map from worker id to status.
///
/// # Invariants
/// - A terminal entry is only ever rewritten with the same value.
/// - An interrupting entry only moves to `failed`.
/// - Iteration order is worker id order, which equals spawn order.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    /// Guarded entries.
    inner: Arc<Mutex<BTreeMap<WorkerId, WorkerEntry>>>,
}

impl StatusBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker in `initialized` state.
    pub fn register(&self, worker: WorkerId) {
        self.with_entries(|entries| {
            entries.entry(worker).or_insert(WorkerEntry {
                status: LocalStatus::Initialized,
                job_id: None,
            });
        });
    }

    /// Updates a worker's status. Returns false when the write was refused
    /// because the entry is terminal or absent, or because an interrupting
    /// entry may only move to `failed`.
    pub fn set(&self, worker: WorkerId, status: LocalStatus) -> bool {
        self.with_entries(|entries| match entries.get_mut(&worker) {
            Some(entry) if entry.status.is_terminal() => entry.status == status,
            Some(entry)
                if entry.status == LocalStatus::Interrupting && !status.is_stopping() =>
            {
                false
            }
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        })
    }

    /// Records the remote job id for a worker.
    pub fn set_job_id(&self, worker: WorkerId, job_id: RemoteJobId) {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(&worker) {
                entry.job_id = Some(job_id);
            }
        });
    }

    /// Returns a worker's status.
    #[must_use]
    pub fn status(&self, worker: WorkerId) -> Option<LocalStatus> {
        self.with_entries(|entries| entries.get(&worker).map(|entry| entry.status))
    }

    /// Returns true when the worker should stop at its next check-in.
    #[must_use]
    pub fn is_interrupting(&self, worker: WorkerId) -> bool {
        self.status(worker) == Some(LocalStatus::Interrupting)
    }

    /// Writes `interrupting` into every live entry except `except`.
    /// Returns the workers that were marked.
    pub fn interrupt_others(&self, except: Option<WorkerId>) -> Vec<WorkerId> {
        self.with_entries(|entries| {
            let mut marked = Vec::new();
            for (worker, entry) in entries.iter_mut() {
                if Some(*worker) == except || entry.status.is_terminal() {
                    continue;
                }
                if entry.status != LocalStatus::Interrupting {
                    entry.status = LocalStatus::Interrupting;
                    marked.push(*worker);
                }
            }
            marked
        })
    }

    /// Writes `interrupting` into every live entry.
    pub fn interrupt_all(&self) -> Vec<WorkerId> {
        self.interrupt_others(None)
    }

    /// Returns a snapshot of every entry in worker order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(WorkerId, WorkerEntry)> {
        self.with_entries(|entries| {
            entries.iter().map(|(worker, entry)| (*worker, entry.clone())).collect()
        })
    }

    /// Returns remote job ids in worker order, skipping workers without one.
    #[must_use]
    pub fn job_ids(&self) -> Vec<RemoteJobId> {
        self.with_entries(|entries| {
            entries.values().filter_map(|entry| entry.job_id.clone()).collect()
        })
    }

    /// Returns the first worker (in id order) whose status is `failed`.
    #[must_use]
    pub fn first_failed(&self) -> Option<WorkerId> {
        self.with_entries(|entries| {
            entries
                .iter()
                .find(|(_, entry)| entry.status == LocalStatus::Failed)
                .map(|(worker, _)| *worker)
        })
    }

    /// Returns true when any entry is failed or interrupting.
    #[must_use]
    pub fn any_stopping(&self) -> bool {
        self.with_entries(|entries| entries.values().any(|entry| entry.status.is_stopping()))
    }

    /// Returns true when every entry is `complete`.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.with_entries(|entries| {
            entries.values().all(|entry| entry.status == LocalStatus::Complete)
        })
    }

    /// Runs `f` with the guarded map. A poisoned lock is recovered since
    /// entries are plain values and remain consistent.
    fn with_entries<T>(&self, f: impl FnOnce(&mut BTreeMap<WorkerId, WorkerEntry>) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Two-stage cooperative cancellation flag shared across threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Set on the first cancellation request.
    cancelled: Arc<AtomicBool>,
    /// Set on the second cancellation request.
    escalated: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Escalates cancellation; implies [`CancellationToken::cancel`].
    pub fn escalate(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.escalated.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true once cancellation was escalated.
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::SeqCst)
    }
}
