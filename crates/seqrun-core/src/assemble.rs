// crates/seqrun-core/src/assemble.rs
// ============================================================================
// Module: seqrun Output Assembler
// Description: Merges per-chunk outputs and unpacks output archives.
// Purpose: Turn N chunk outputs into one logical result on disk.
// Dependencies: flate2, tar, crate::tool
// ============================================================================

//! ## Overview
//! [`merge_outputs`] applies the tool's [`MergeStrategy`]: plain concatenation
//! in chunk order, or a SAM-aware merge that keeps one copy of each header line
//! before all alignment records. [`unpack_archive`] extracts `.tar`, `.tar.gz`
//! and `.tgz` archives, accepting only regular files and directories with
//! relative member paths, then deletes the archive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fs;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use tar::Archive;
use tar::EntryType;

use crate::error::JobError;
use crate::error::ValidationError;
use crate::identifiers::ToolName;
use crate::tool::MergeStrategy;

// ============================================================================
// SECTION: Merge
// ============================================================================

/// SAM header line introducing the file-level header.
const SAM_HD_PREFIX: &[u8] = b"@HD";

/// Merges `parts` into `dest` using `strategy`.
///
/// # Errors
///
/// Returns [`JobError::MergeUnsupported`] for [`MergeStrategy::Unsupported`]
/// and [`JobError::Io`] on filesystem failures.
pub fn merge_outputs(
    strategy: MergeStrategy,
    tool: &ToolName,
    parts: &[PathBuf],
    dest: &Path,
) -> Result<(), JobError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(JobError::io)?;
    }
    match strategy {
        MergeStrategy::Concatenate => concatenate(parts, dest).map_err(JobError::io),
        MergeStrategy::SamRecords => merge_sam(parts, dest).map_err(JobError::io),
        MergeStrategy::Unsupported => Err(JobError::MergeUnsupported(tool.to_string())),
    }
}

/// Byte-for-byte concatenation in order.
fn concatenate(parts: &[PathBuf], dest: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(dest)?);
    for part in parts {
        let mut reader = File::open(part)?;
        io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()
}

/// Header union followed by all records in chunk order.
fn merge_sam(parts: &[PathBuf], dest: &Path) -> io::Result<()> {
    let mut hd_line: Option<Vec<u8>> = None;
    let mut headers: Vec<Vec<u8>> = Vec::new();
    let mut seen: BTreeSet<Vec<u8>> = BTreeSet::new();
    let mut body_parts: Vec<Vec<u8>> = Vec::with_capacity(parts.len());

    for part in parts {
        let mut reader = BufReader::new(File::open(part)?);
        let mut body = Vec::new();
        let mut in_header = true;
        loop {
            let mut line = Vec::new();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if !line.ends_with(b"\n") {
                line.push(b'\n');
            }
            if in_header && line.starts_with(b"@") {
                if line.starts_with(SAM_HD_PREFIX) {
                    if hd_line.is_none() {
                        hd_line = Some(line);
                    }
                } else if seen.insert(line.clone()) {
                    headers.push(line);
                }
            } else {
                in_header = false;
                body.extend_from_slice(&line);
            }
        }
        body_parts.push(body);
    }

    let mut writer = BufWriter::new(File::create(dest)?);
    if let Some(line) = hd_line {
        writer.write_all(&line)?;
    }
    for line in headers {
        writer.write_all(&line)?;
    }
    for body in body_parts {
        writer.write_all(&body)?;
    }
    writer.flush()
}

// ============================================================================
// SECTION: Archives
// ============================================================================

/// Returns true when `path` names a supported archive.
#[must_use]
pub fn is_archive(path: &Path) -> bool {
    archive_kind(path).is_some()
}

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Supported archive encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    /// Plain tar.
    Tar,
    /// Gzip-compressed tar.
    TarGz,
}

/// Classifies `path` by suffix.
fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

/// Extracts `archive_path` into `dest_dir`, deletes the archive, and returns
/// the extracted regular files in archive order.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidInput`] for unsupported archives, special
/// members, or unsafe member paths, and [`JobError::Io`] on I/O failure.
pub fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    let kind = archive_kind(archive_path).ok_or_else(|| {
        ValidationError::InvalidInput(format!("not an archive: {}", archive_path.display()))
    })?;
    unpack_as(archive_path, dest_dir, kind)
}

/// Extracts a file the service flagged as compressed, whatever its name.
///
/// The archive kind comes from the suffix when it has one; otherwise a gzip
/// magic number selects tar.gz and anything else is read as plain tar.
///
/// # Errors
///
/// Same as [`unpack_archive`].
pub fn unpack_compressed(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, JobError> {
    let kind = match archive_kind(archive_path) {
        Some(kind) => kind,
        None => sniff_kind(archive_path)?,
    };
    unpack_as(archive_path, dest_dir, kind)
}

/// Reads the first bytes of `path` to tell gzip from plain tar.
fn sniff_kind(path: &Path) -> Result<ArchiveKind, JobError> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path).map_err(JobError::io)?;
    let read = file.read(&mut magic).map_err(JobError::io)?;
    Ok(if read == 2 && magic == GZIP_MAGIC { ArchiveKind::TarGz } else { ArchiveKind::Tar })
}

/// Extracts `archive_path` as `kind` and removes it unless a member replaced it.
fn unpack_as(
    archive_path: &Path,
    dest_dir: &Path,
    kind: ArchiveKind,
) -> Result<Vec<PathBuf>, JobError> {
    let file = File::open(archive_path).map_err(JobError::io)?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
    };
    let extracted = extract_entries(Archive::new(reader), dest_dir)?;
    if !extracted.iter().any(|path| path == archive_path) {
        fs::remove_file(archive_path).map_err(JobError::io)?;
    }
    Ok(extracted)
}

/// Extracts every member of `archive` under `dest_dir`.
fn extract_entries<R: Read>(
    mut archive: Archive<R>,
    dest_dir: &Path,
) -> Result<Vec<PathBuf>, JobError> {
    fs::create_dir_all(dest_dir).map_err(JobError::io)?;
    let mut extracted = Vec::new();
    for entry in archive.entries().map_err(JobError::io)? {
        let mut entry = entry.map_err(JobError::io)?;
        let entry_type = entry.header().entry_type();
        if !matches!(entry_type, EntryType::Directory | EntryType::Regular) {
            return Err(ValidationError::InvalidInput(
                "output archives may not contain special entries".to_string(),
            )
            .into());
        }
        let path = entry
            .path()
            .map_err(|err| ValidationError::InvalidInput(err.to_string()))?
            .into_owned();
        let relative = normalize_member_path(&path)?;
        if relative.as_os_str().is_empty() {
            if entry_type == EntryType::Directory {
                continue;
            }
            return Err(ValidationError::InvalidInput("empty archive member path".to_string())
                .into());
        }
        let dest_path = dest_dir.join(&relative);
        if entry_type == EntryType::Directory {
            fs::create_dir_all(&dest_path).map_err(JobError::io)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).map_err(JobError::io)?;
            }
            entry.unpack(&dest_path).map_err(JobError::io)?;
            extracted.push(dest_path);
        }
    }
    Ok(extracted)
}

/// Rejects absolute and parent-relative member paths; drops `.` components.
fn normalize_member_path(path: &Path) -> Result<PathBuf, ValidationError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError::InvalidInput(format!(
                    "unsafe archive member path: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(normalized)
}
