// crates/seqrun-core/src/spec.rs
// ============================================================================
// Module: seqrun Job Specification
// Description: Immutable description of one logical tool invocation.
// Purpose: Bind a tool record, sanitized arguments, and database reference.
// Dependencies: serde, crate::args, crate::tool
// ============================================================================

//! ## Overview
//! A [`JobSpec`] is built once per invocation by [`JobSpec::prepare`], which
//! runs the argument sanitizer and applies the dangerlist downgrade. Every
//! field is read-only afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::args::SanitizedArgs;
use crate::args::sanitize;
use crate::error::ValidationError;
use crate::identifiers::ToolName;
use crate::tool::IoPolicy;
use crate::tool::MergeStrategy;
use crate::tool::OutputPackaging;
use crate::tool::OutputPolicy;
use crate::tool::ToolRecord;

// ============================================================================
// SECTION: Database Reference
// ============================================================================

/// Reference database used by a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseRef {
    /// Database hosted by the service, selected by name and version.
    Named {
        /// Database name.
        name: String,
        /// Database version.
        version: String,
    },
    /// Caller-provided database at a remote path.
    Custom {
        /// Remote location of the database.
        location: String,
    },
}

impl DatabaseRef {
    /// Returns the `(database_name, database_version)` pair sent on job creation.
    #[must_use]
    pub fn wire_fields(&self) -> (String, String) {
        match self {
            Self::Named {
                name,
                version,
            } => (name.clone(), version.clone()),
            Self::Custom {
                location,
            } => (location.clone(), String::new()),
        }
    }
}

// ============================================================================
// SECTION: Job Specification
// ============================================================================

/// Immutable per-invocation job description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Tool identifier.
    tool: ToolName,
    /// Tool version.
    version: String,
    /// Sanitized argument string.
    args: String,
    /// Optional database reference.
    database: Option<DatabaseRef>,
    /// Input policy after any downgrade.
    io: IoPolicy,
    /// Output policy after any downgrade.
    output: OutputPolicy,
    /// Dangerlisted tags that triggered a downgrade.
    downgraded_by: Vec<String>,
}

impl JobSpec {
    /// Sanitizes `raw_args` for `record` and builds the job specification.
    ///
    /// A dangerlisted tag disables output validation and parallelization and
    /// forces archive packaging. The tag itself stays in the argument string.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Arguments`] when the arguments are rejected.
    pub fn prepare(
        record: &ToolRecord,
        raw_args: &str,
        database: Option<DatabaseRef>,
    ) -> Result<(Self, SanitizedArgs), ValidationError> {
        let sanitized = sanitize(raw_args, &record.args)?;
        let mut io = record.io.clone();
        let mut output = record.output.clone();
        if sanitized.is_dangerous() {
            io.parallel = false;
            output.validate = false;
            output.packaging = OutputPackaging::Archive;
        }
        let spec = Self {
            tool: record.name.clone(),
            version: record.version.clone(),
            args: sanitized.as_str().to_string(),
            database,
            io,
            output,
            downgraded_by: sanitized.dangerous_tags().to_vec(),
        };
        Ok((spec, sanitized))
    }

    /// Returns the tool identifier.
    #[must_use]
    pub const fn tool(&self) -> &ToolName {
        &self.tool
    }

    /// Returns the tool version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the sanitized argument string.
    #[must_use]
    pub fn args(&self) -> &str {
        &self.args
    }

    /// Returns the database reference.
    #[must_use]
    pub const fn database(&self) -> Option<&DatabaseRef> {
        self.database.as_ref()
    }

    /// Returns the input policy.
    #[must_use]
    pub const fn io(&self) -> &IoPolicy {
        &self.io
    }

    /// Returns the output policy.
    #[must_use]
    pub const fn output(&self) -> &OutputPolicy {
        &self.output
    }

    /// Returns true when parallel execution is allowed.
    #[must_use]
    pub const fn parallel_allowed(&self) -> bool {
        self.io.parallel
    }

    /// Returns true when expected outputs are validated.
    #[must_use]
    pub const fn validates_output(&self) -> bool {
        self.output.validate
    }

    /// Returns the merge strategy for parallel runs.
    #[must_use]
    pub const fn merge_strategy(&self) -> MergeStrategy {
        self.output.merge
    }

    /// Returns the dangerlisted tags that downgraded this spec.
    #[must_use]
    pub fn downgraded_by(&self) -> &[String] {
        &self.downgraded_by
    }

    /// Returns the output file name requested from the service.
    #[must_use]
    pub fn output_file_name(&self) -> String {
        self.output.remote_output_name(&self.tool)
    }
}
