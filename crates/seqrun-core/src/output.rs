// crates/seqrun-core/src/output.rs
// ============================================================================
// Module: seqrun Output Handle
// Description: Caller-visible record of where a job's output lives.
// Purpose: Track identity, remote location, local paths, and output checks.
// Dependencies: serde, crate::error
// ============================================================================

//! ## Overview
//! Each job execution owns exactly one [`OutputHandle`] and fills it in through
//! setters as it progresses. [`OutputHandle::validate_expected`] applies the
//! same output-name check regardless of whether the handle came from a
//! synchronous run or a later manual download.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ValidationError;
use crate::identifiers::RemoteJobId;
use crate::identifiers::ToolName;
use crate::spec::DatabaseRef;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum size for an output file to count as present.
pub const MIN_OUTPUT_BYTES: u64 = 1;

// ============================================================================
// SECTION: Output Handle
// ============================================================================

/// Output location and identity of one job execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutputHandle {
    /// Tool identity, set after successful creation.
    tool: Option<ToolName>,
    /// Tool version, set after successful creation.
    tool_version: Option<String>,
    /// Database identity, set after successful creation.
    database: Option<DatabaseRef>,
    /// Remote job identifier.
    job_id: Option<RemoteJobId>,
    /// Remote blob locations of the outputs.
    remote_locations: Vec<String>,
    /// Local directory that receives outputs.
    output_dir: Option<PathBuf>,
    /// Local output file paths once downloaded.
    local_paths: Vec<PathBuf>,
}

impl OutputHandle {
    /// Creates an empty handle that will download into `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(output_dir.into()),
            ..Self::default()
        }
    }

    /// Records tool and database identity.
    pub fn set_identity(
        &mut self,
        tool: ToolName,
        tool_version: impl Into<String>,
        database: Option<DatabaseRef>,
    ) {
        self.tool = Some(tool);
        self.tool_version = Some(tool_version.into());
        self.database = database;
    }

    /// Records the remote job identifier.
    pub fn set_job_id(&mut self, job_id: RemoteJobId) {
        self.job_id = Some(job_id);
    }

    /// Records a remote output location.
    pub fn add_remote_location(&mut self, location: impl Into<String>) {
        self.remote_locations.push(location.into());
    }

    /// Records a downloaded local file.
    pub fn add_local_path(&mut self, path: PathBuf) {
        self.local_paths.push(path);
    }

    /// Replaces the local file list (e.g. after archive unpacking).
    pub fn set_local_paths(&mut self, paths: Vec<PathBuf>) {
        self.local_paths = paths;
    }

    /// Returns the tool identity.
    #[must_use]
    pub const fn tool(&self) -> Option<&ToolName> {
        self.tool.as_ref()
    }

    /// Returns the tool version.
    #[must_use]
    pub fn tool_version(&self) -> Option<&str> {
        self.tool_version.as_deref()
    }

    /// Returns the database identity.
    #[must_use]
    pub const fn database(&self) -> Option<&DatabaseRef> {
        self.database.as_ref()
    }

    /// Returns the remote job identifier.
    #[must_use]
    pub const fn job_id(&self) -> Option<&RemoteJobId> {
        self.job_id.as_ref()
    }

    /// Returns the remote output locations.
    #[must_use]
    pub fn remote_locations(&self) -> &[String] {
        &self.remote_locations
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Returns the downloaded local files.
    #[must_use]
    pub fn local_paths(&self) -> &[PathBuf] {
        &self.local_paths
    }

    /// Verifies every expected file exists in the output directory and is at
    /// least [`MIN_OUTPUT_BYTES`] long.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingOutput`] naming the first missing file.
    pub fn validate_expected(&self, expected: &[String]) -> Result<(), ValidationError> {
        let Some(dir) = self.output_dir.as_deref() else {
            return match expected.first() {
                Some(name) => Err(ValidationError::MissingOutput(name.clone())),
                None => Ok(()),
            };
        };
        for name in expected {
            check_output_file(&dir.join(name))?;
        }
        Ok(())
    }
}

/// Verifies `path` is a file of at least [`MIN_OUTPUT_BYTES`].
///
/// # Errors
///
/// Returns [`ValidationError::MissingOutput`].
pub fn check_output_file(path: &Path) -> Result<(), ValidationError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() && metadata.len() >= MIN_OUTPUT_BYTES => Ok(()),
        _ => Err(ValidationError::MissingOutput(path.display().to_string())),
    }
}
