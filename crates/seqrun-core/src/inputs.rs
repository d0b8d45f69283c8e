// crates/seqrun-core/src/inputs.rs
// ============================================================================
// Module: seqrun Input Resolver
// Description: Expands input specifications into a flat, ordered file list.
// Purpose: Resolve paths, directories, lists, and remote URIs before any
//          network activity and enforce input cardinality.
// Dependencies: crate::error, crate::tool
// ============================================================================

//! ## Overview
//! [`resolve_inputs`] flattens an [`InputSpec`] into [`InputFile`] values:
//! lists are resolved element by element in order, directories are walked
//! recursively in sorted order, and remote URIs are checked through a
//! [`RemoteProbe`] but never expanded. The resolved count must fall inside the
//! tool's inclusive input bounds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crate::error::CountBound;
use crate::error::JobError;
use crate::error::ValidationError;
use crate::tool::IoPolicy;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// URI schemes treated as remote-resident inputs.
pub const REMOTE_SCHEMES: &[&str] = &["s3", "http", "https", "ftp"];

// ============================================================================
// SECTION: Types
// ============================================================================

/// Caller-provided input specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSpec {
    /// Local file or directory.
    Path(PathBuf),
    /// Remote-resident object.
    Uri(String),
    /// Ordered list of specifications.
    List(Vec<InputSpec>),
}

impl From<&str> for InputSpec {
    fn from(value: &str) -> Self {
        if is_remote_uri(value) { Self::Uri(value.to_string()) } else { Self::Path(value.into()) }
    }
}

impl From<PathBuf> for InputSpec {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for InputSpec {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl<T: Into<Self>> From<Vec<T>> for InputSpec {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Where a resolved input lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InputLocation {
    /// Regular file on the local filesystem.
    Local(PathBuf),
    /// Remote-resident object addressed by URI.
    Remote(String),
}

impl InputLocation {
    /// Returns the name registered with the service for this input.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into()),
            Self::Remote(uri) => uri.clone(),
        }
    }
}

/// Positional metadata used to rebuild tool flags on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixTag {
    /// Remote-side flag (e.g. `-1`).
    pub prefix: String,
    /// Position of the input within its group (0-based).
    pub order: usize,
}

/// One resolved input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputFile {
    /// File location.
    pub location: InputLocation,
    /// Optional positional tag.
    pub tag: Option<PrefixTag>,
}

impl InputFile {
    /// Creates an untagged local input.
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            location: InputLocation::Local(path.into()),
            tag: None,
        }
    }

    /// Creates an untagged remote input.
    #[must_use]
    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            location: InputLocation::Remote(uri.into()),
            tag: None,
        }
    }

    /// Returns the local path, if any.
    #[must_use]
    pub fn local_path(&self) -> Option<&Path> {
        match &self.location {
            InputLocation::Local(path) => Some(path),
            InputLocation::Remote(_) => None,
        }
    }

    /// Returns true for remote-resident inputs.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self.location, InputLocation::Remote(_))
    }

    /// Returns a copy pointing at `path` with the same tag.
    #[must_use]
    pub fn with_local_path(&self, path: PathBuf) -> Self {
        Self {
            location: InputLocation::Local(path),
            tag: self.tag.clone(),
        }
    }
}

// ============================================================================
// SECTION: Remote Probe
// ============================================================================

/// Reachability check for remote-resident inputs.
pub trait RemoteProbe: Send + Sync {
    /// Returns the object size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RemoteAccess`] when the object is unreachable.
    fn probe(&self, uri: &str) -> Result<u64, JobError>;
}

/// Probe that refuses every remote input.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteInputs;

impl RemoteProbe for NoRemoteInputs {
    fn probe(&self, uri: &str) -> Result<u64, JobError> {
        Err(JobError::RemoteAccess(format!("remote inputs are not configured: {uri}")))
    }
}

/// Returns true when `value` starts with a remote URI scheme.
#[must_use]
pub fn is_remote_uri(value: &str) -> bool {
    value
        .split_once("://")
        .is_some_and(|(scheme, rest)| !rest.is_empty() && REMOTE_SCHEMES.contains(&scheme))
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves `spec`, enforces the cardinality bounds of `io`, and assigns
/// positional prefix tags.
///
/// # Errors
///
/// Returns [`JobError::Validation`] for missing paths and count violations, and
/// [`JobError::RemoteAccess`] for unreachable remote inputs.
pub fn resolve_inputs(
    spec: &InputSpec,
    io: &IoPolicy,
    probe: &dyn RemoteProbe,
) -> Result<Vec<InputFile>, JobError> {
    let mut files = Vec::new();
    resolve_into(spec, probe, &mut files)?;
    check_cardinality(files.len(), io.min_inputs, io.max_inputs)?;
    assign_prefixes(&mut files, &io.positional_prefixes);
    Ok(files)
}

/// Resolves `spec` without bounds or tagging.
///
/// # Errors
///
/// See [`resolve_inputs`].
pub fn resolve(spec: &InputSpec, probe: &dyn RemoteProbe) -> Result<Vec<InputFile>, JobError> {
    let mut files = Vec::new();
    resolve_into(spec, probe, &mut files)?;
    Ok(files)
}

/// Appends the resolution of `spec` to `out`.
fn resolve_into(
    spec: &InputSpec,
    probe: &dyn RemoteProbe,
    out: &mut Vec<InputFile>,
) -> Result<(), JobError> {
    match spec {
        InputSpec::List(items) => {
            for item in items {
                resolve_into(item, probe, out)?;
            }
        }
        InputSpec::Uri(uri) => {
            probe.probe(uri)?;
            out.push(InputFile::remote(uri.clone()));
        }
        InputSpec::Path(path) => {
            if let Some(raw) = path.to_str()
                && is_remote_uri(raw)
            {
                probe.probe(raw)?;
                out.push(InputFile::remote(raw));
                return Ok(());
            }
            resolve_local(path, out)?;
        }
    }
    Ok(())
}

/// Resolves a local file or directory.
fn resolve_local(path: &Path, out: &mut Vec<InputFile>) -> Result<(), JobError> {
    let metadata = fs::metadata(path)
        .map_err(|_| ValidationError::NotFound(path.display().to_string()))?;
    if metadata.is_dir() {
        walk_dir(path, out)?;
    } else {
        out.push(InputFile::local(path));
    }
    Ok(())
}

/// Appends every regular file under `dir`, recursing in sorted name order.
fn walk_dir(dir: &Path, out: &mut Vec<InputFile>) -> Result<(), JobError> {
    let mut entries = fs::read_dir(dir)
        .map_err(JobError::io)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(JobError::io)?;
    entries.sort();
    for entry in entries {
        let metadata = fs::metadata(&entry).map_err(JobError::io)?;
        if metadata.is_dir() {
            walk_dir(&entry, out)?;
        } else if metadata.is_file() {
            out.push(InputFile::local(entry));
        }
    }
    Ok(())
}

/// Checks `count` against inclusive bounds.
///
/// # Errors
///
/// Returns [`ValidationError::InputCount`] naming the violated bound.
pub const fn check_cardinality(
    count: usize,
    min_inputs: usize,
    max_inputs: usize,
) -> Result<(), ValidationError> {
    if count < min_inputs {
        return Err(ValidationError::InputCount {
            count,
            bound: CountBound::Minimum,
            limit: min_inputs,
        });
    }
    if count > max_inputs {
        return Err(ValidationError::InputCount {
            count,
            bound: CountBound::Maximum,
            limit: max_inputs,
        });
    }
    Ok(())
}

/// Tags inputs with positional prefixes when there is one prefix per input.
pub fn assign_prefixes(files: &mut [InputFile], prefixes: &[String]) {
    if prefixes.is_empty() || files.len() != prefixes.len() {
        return;
    }
    for (order, (file, prefix)) in files.iter_mut().zip(prefixes).enumerate() {
        file.tag = Some(PrefixTag {
            prefix: prefix.clone(),
            order,
        });
    }
}

/// Verifies a local file does not exceed `max_bytes`.
///
/// # Errors
///
/// Returns [`ValidationError::NotFound`] or [`ValidationError::FileTooLarge`].
pub fn check_file_size(path: &Path, max_bytes: u64) -> Result<u64, ValidationError> {
    let actual_bytes = fs::metadata(path)
        .map_err(|_| ValidationError::NotFound(path.display().to_string()))?
        .len();
    if actual_bytes > max_bytes {
        return Err(ValidationError::FileTooLarge {
            path: path.display().to_string(),
            max_bytes,
            actual_bytes,
        });
    }
    Ok(actual_bytes)
}
