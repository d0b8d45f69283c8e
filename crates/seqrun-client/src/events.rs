// crates/seqrun-client/src/events.rs
// ============================================================================
// Module: seqrun Run Events
// Description: Structured JSON-line events emitted during a job run.
// Purpose: Report progress and failures without a logging framework.
// Dependencies: seqrun-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every observable step of a run (argument sanitization, worker spawns,
//! status transitions, failures, merges) is reported as a [`RunEvent`] through
//! an [`EventSink`]. Sinks are cheap to share across worker threads and never
//! fail the run: write errors are dropped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use seqrun_core::RemoteJobId;
use seqrun_core::ToolName;
use seqrun_core::WorkerId;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Run event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Tool the run belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolName>,
    /// Worker the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<u64>,
    /// Remote job identifier when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<RemoteJobId>,
    /// Local status label for status events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunEvent {
    /// Creates an event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            tool: None,
            worker: None,
            job_id: None,
            status: None,
            message: None,
        }
    }

    /// Sets the tool.
    #[must_use]
    pub fn tool(mut self, tool: &ToolName) -> Self {
        self.tool = Some(tool.clone());
        self
    }

    /// Sets the worker.
    #[must_use]
    pub const fn worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker.get());
        self
    }

    /// Sets the remote job id.
    #[must_use]
    pub fn job_id(mut self, job_id: Option<&RemoteJobId>) -> Self {
        self.job_id = job_id.cloned();
        self
    }

    /// Sets the status label.
    #[must_use]
    pub const fn status(mut self, status: &'static str) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for run events.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: &RunEvent);
}

/// Event sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl EventSink for StderrEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Event sink that appends JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for FileEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op event sink.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&self, _event: &RunEvent) {}
}

/// Event sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns recorded events with the given identifier.
    #[must_use]
    pub fn named(&self, event: &str) -> Vec<RunEvent> {
        self.events().into_iter().filter(|recorded| recorded.event == event).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
