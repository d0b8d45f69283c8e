// crates/seqrun-core/src/tool.rs
// ============================================================================
// Module: seqrun Tool Table
// Description: Data-driven per-tool argument, input, and output policies.
// Purpose: Replace per-tool wrappers with configuration records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Each remote tool is described by one [`ToolRecord`]. The job runner is fully
//! generic; everything tool-specific (argument whitelist, input bounds, split
//! eligibility, merge strategy, expected outputs) lives in the record.
//! [`ToolRegistry::builtin`] ships a small illustrative table and callers may
//! add or replace records from configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ValidationError;
use crate::identifiers::ToolName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default per-file byte limit for non-parallel runs (1 GiB).
pub const DEFAULT_SERIAL_MAX_BYTES: u64 = 1024 * 1024 * 1024;
/// Default per-chunk byte budget for parallel runs (256 MiB).
pub const DEFAULT_PARALLEL_MAX_BYTES: u64 = 256 * 1024 * 1024;
/// Keyword accepted in configuration for [`ArgArity::Variadic`].
const VARIADIC_KEYWORD: &str = "all";

// ============================================================================
// SECTION: Argument Policy
// ============================================================================

/// Number of follow-on tokens a whitelisted tag consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ArgArityRepr", into = "ArgArityRepr")]
pub enum ArgArity {
    /// Exactly this many following tokens.
    Fixed(usize),
    /// Every following token up to the next recognized tag.
    Variadic,
}

/// Wire form of [`ArgArity`]: a count or the keyword `"all"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ArgArityRepr {
    /// Fixed follow-on count.
    Count(usize),
    /// Keyword form.
    Keyword(String),
}

impl TryFrom<ArgArityRepr> for ArgArity {
    type Error = String;

    fn try_from(value: ArgArityRepr) -> Result<Self, Self::Error> {
        match value {
            ArgArityRepr::Count(count) => Ok(Self::Fixed(count)),
            ArgArityRepr::Keyword(keyword) if keyword == VARIADIC_KEYWORD => Ok(Self::Variadic),
            ArgArityRepr::Keyword(keyword) => {
                Err(format!("arity must be a count or \"{VARIADIC_KEYWORD}\", got {keyword}"))
            }
        }
    }
}

impl From<ArgArity> for ArgArityRepr {
    fn from(value: ArgArity) -> Self {
        match value {
            ArgArity::Fixed(count) => Self::Count(count),
            ArgArity::Variadic => Self::Keyword(VARIADIC_KEYWORD.to_string()),
        }
    }
}

/// Whitelist, blacklist, and dangerlist for free-form tool arguments.
///
/// # Invariants
/// - Dangerlisted tags only take effect when they are also whitelisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgsPolicy {
    /// Recognized tags and the follow-on tokens each consumes.
    #[serde(default)]
    pub whitelist: BTreeMap<String, ArgArity>,
    /// Tags the tool must never receive from callers.
    #[serde(default)]
    pub blacklist: BTreeSet<String>,
    /// Recognized tags that change program structure (e.g. output types).
    #[serde(default)]
    pub dangerlist: BTreeSet<String>,
}

impl ArgsPolicy {
    /// Adds a whitelisted tag.
    #[must_use]
    pub fn allow(mut self, tag: &str, arity: ArgArity) -> Self {
        self.whitelist.insert(tag.to_string(), arity);
        self
    }

    /// Adds a blacklisted tag.
    #[must_use]
    pub fn deny(mut self, tag: &str) -> Self {
        self.blacklist.insert(tag.to_string());
        self
    }

    /// Adds a dangerlisted tag.
    #[must_use]
    pub fn danger(mut self, tag: &str) -> Self {
        self.dangerlist.insert(tag.to_string());
        self
    }
}

// ============================================================================
// SECTION: Input Policy
// ============================================================================

/// Input cardinality, size limits, and parallelization eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoPolicy {
    /// Minimum number of resolved inputs (inclusive).
    #[serde(default = "default_min_inputs")]
    pub min_inputs: usize,
    /// Maximum number of resolved inputs (inclusive).
    #[serde(default = "default_max_inputs")]
    pub max_inputs: usize,
    /// Per-file byte limit for non-parallel runs.
    #[serde(default = "default_serial_max_bytes")]
    pub serial_max_bytes: u64,
    /// Per-chunk byte budget for parallel runs.
    #[serde(default = "default_parallel_max_bytes")]
    pub parallel_max_bytes: u64,
    /// Whether inputs may be split and run as concurrent jobs.
    #[serde(default)]
    pub parallel: bool,
    /// Whether multiple inputs are paired and split in lockstep.
    #[serde(default)]
    pub paired: bool,
    /// Remote-side flags assigned to inputs by position (e.g. `-1`, `-2`).
    #[serde(default)]
    pub positional_prefixes: Vec<String>,
}

/// Serde default for [`IoPolicy::min_inputs`].
const fn default_min_inputs() -> usize {
    1
}

/// Serde default for [`IoPolicy::max_inputs`].
const fn default_max_inputs() -> usize {
    1
}

/// Serde default for [`IoPolicy::serial_max_bytes`].
const fn default_serial_max_bytes() -> u64 {
    DEFAULT_SERIAL_MAX_BYTES
}

/// Serde default for [`IoPolicy::parallel_max_bytes`].
const fn default_parallel_max_bytes() -> u64 {
    DEFAULT_PARALLEL_MAX_BYTES
}

impl Default for IoPolicy {
    fn default() -> Self {
        Self {
            min_inputs: default_min_inputs(),
            max_inputs: default_max_inputs(),
            serial_max_bytes: DEFAULT_SERIAL_MAX_BYTES,
            parallel_max_bytes: DEFAULT_PARALLEL_MAX_BYTES,
            parallel: false,
            paired: false,
            positional_prefixes: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Output Policy
// ============================================================================

/// How the remote service packages job output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPackaging {
    /// Named output files transferred individually.
    Files,
    /// One compressed archive of the whole output directory, unpacked locally.
    Archive,
}

/// Strategy used to merge per-chunk outputs of a parallel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Byte-for-byte concatenation in chunk order.
    Concatenate,
    /// Union of SAM header lines followed by all alignment records.
    SamRecords,
    /// Outputs cannot be merged; parallel runs are refused.
    Unsupported,
}

/// Output packaging, validation, and merge behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPolicy {
    /// Packaging mode requested from the service.
    pub packaging: OutputPackaging,
    /// File names the tool is expected to produce.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    /// Merge strategy for parallel runs.
    #[serde(default = "default_merge")]
    pub merge: MergeStrategy,
    /// Whether expected outputs are verified after a non-parallel run.
    #[serde(default = "default_validate")]
    pub validate: bool,
}

/// Serde default for [`OutputPolicy::merge`].
const fn default_merge() -> MergeStrategy {
    MergeStrategy::Concatenate
}

/// Serde default for [`OutputPolicy::validate`].
const fn default_validate() -> bool {
    true
}

impl OutputPolicy {
    /// Returns the output file name sent to the service on job creation.
    #[must_use]
    pub fn remote_output_name(&self, tool: &ToolName) -> String {
        match self.packaging {
            OutputPackaging::Archive => format!("{tool}_output.tar.gz"),
            OutputPackaging::Files => self
                .expected_outputs
                .first()
                .cloned()
                .unwrap_or_else(|| format!("{tool}_output")),
        }
    }
}

// ============================================================================
// SECTION: Tool Record
// ============================================================================

/// Declarative description of one remote tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Tool identifier.
    pub name: ToolName,
    /// Tool version requested from the service.
    pub version: String,
    /// Free-form argument policy.
    #[serde(default)]
    pub args: ArgsPolicy,
    /// Input policy.
    #[serde(default)]
    pub io: IoPolicy,
    /// Output policy.
    pub output: OutputPolicy,
}

impl ToolRecord {
    /// Validates internal consistency of the record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidInput`] when bounds or policies conflict.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.as_str().trim().is_empty() {
            return Err(ValidationError::InvalidInput("tool name must be set".to_string()));
        }
        if self.io.min_inputs > self.io.max_inputs {
            return Err(ValidationError::InvalidInput(format!(
                "tool {}: min_inputs {} exceeds max_inputs {}",
                self.name, self.io.min_inputs, self.io.max_inputs
            )));
        }
        if self.io.parallel_max_bytes == 0 || self.io.serial_max_bytes == 0 {
            return Err(ValidationError::InvalidInput(format!(
                "tool {}: byte limits must be non-zero",
                self.name
            )));
        }
        if let Some(tag) = self.args.whitelist.keys().find(|tag| self.args.blacklist.contains(*tag))
        {
            return Err(ValidationError::InvalidInput(format!(
                "tool {}: tag {tag} is both whitelisted and blacklisted",
                self.name
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Mapping from tool identifier to its record.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// Records keyed by tool name.
    tools: BTreeMap<ToolName, ToolRecord>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the built-in tool table.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for record in builtin_records() {
            registry.tools.insert(record.name.clone(), record);
        }
        registry
    }

    /// Adds or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the record is inconsistent.
    pub fn register(&mut self, record: ToolRecord) -> Result<(), ValidationError> {
        record.validate()?;
        self.tools.insert(record.name.clone(), record);
        Ok(())
    }

    /// Looks up a tool record.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownTool`] when the tool is not registered.
    pub fn get(&self, name: &ToolName) -> Result<&ToolRecord, ValidationError> {
        self.tools.get(name).ok_or_else(|| ValidationError::UnknownTool(name.to_string()))
    }

    /// Iterates over all records in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolRecord> {
        self.tools.values()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Built-in tool records.
fn builtin_records() -> Vec<ToolRecord> {
    vec![
        ToolRecord {
            name: ToolName::new("bowtie2"),
            version: "2.4.1".to_string(),
            args: ArgsPolicy::default()
                .allow("-q", ArgArity::Fixed(0))
                .allow("-f", ArgArity::Fixed(0))
                .allow("--end-to-end", ArgArity::Fixed(0))
                .allow("--local", ArgArity::Fixed(0))
                .allow("--very-sensitive", ArgArity::Fixed(0))
                .allow("--no-unal", ArgArity::Fixed(0))
                .allow("-N", ArgArity::Fixed(1))
                .allow("-L", ArgArity::Fixed(1))
                .allow("-k", ArgArity::Fixed(1))
                .allow("--rg-id", ArgArity::Fixed(1))
                .allow("--rg", ArgArity::Fixed(1))
                .allow("--un-conc", ArgArity::Fixed(1))
                .danger("--un-conc")
                .deny("-x")
                .deny("-U")
                .deny("-1")
                .deny("-2")
                .deny("-S")
                .deny("-p"),
            io: IoPolicy {
                min_inputs: 1,
                max_inputs: 2,
                parallel: true,
                paired: true,
                positional_prefixes: vec!["-1".to_string(), "-2".to_string()],
                ..IoPolicy::default()
            },
            output: OutputPolicy {
                packaging: OutputPackaging::Files,
                expected_outputs: vec!["bowtie2_output.sam".to_string()],
                merge: MergeStrategy::SamRecords,
                validate: true,
            },
        },
        ToolRecord {
            name: ToolName::new("blastn"),
            version: "2.10.1".to_string(),
            args: ArgsPolicy::default()
                .allow("-evalue", ArgArity::Fixed(1))
                .allow("-word_size", ArgArity::Fixed(1))
                .allow("-max_target_seqs", ArgArity::Fixed(1))
                .allow("-outfmt", ArgArity::Variadic)
                .danger("-outfmt")
                .deny("-query")
                .deny("-db")
                .deny("-out")
                .deny("-remote"),
            io: IoPolicy {
                parallel: true,
                ..IoPolicy::default()
            },
            output: OutputPolicy {
                packaging: OutputPackaging::Files,
                expected_outputs: vec!["blastn_output.txt".to_string()],
                merge: MergeStrategy::Concatenate,
                validate: true,
            },
        },
        ToolRecord {
            name: ToolName::new("fastqc"),
            version: "0.11.9".to_string(),
            args: ArgsPolicy::default()
                .allow("--casava", ArgArity::Fixed(0))
                .allow("--nogroup", ArgArity::Fixed(0))
                .allow("--min_length", ArgArity::Fixed(1))
                .allow("-k", ArgArity::Fixed(1))
                .deny("-o")
                .deny("--outdir"),
            io: IoPolicy {
                min_inputs: 1,
                max_inputs: 64,
                ..IoPolicy::default()
            },
            output: OutputPolicy {
                packaging: OutputPackaging::Archive,
                expected_outputs: Vec::new(),
                merge: MergeStrategy::Unsupported,
                validate: false,
            },
        },
    ]
}
