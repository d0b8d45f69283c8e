// crates/seqrun-core/tests/inputs.rs
// ============================================================================
// Module: Input Resolver Tests
// Description: Path, directory, list, and remote URI resolution.
// Purpose: Verify flattening order, cardinality bounds, and prefix tagging.
// Dependencies: seqrun-core, proptest, tempfile
// ============================================================================

//! ## Overview
//! Builds small directory trees on disk and resolves them.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use proptest::prelude::*;
use seqrun_core::CountBound;
use seqrun_core::InputFile;
use seqrun_core::InputLocation;
use seqrun_core::InputSpec;
use seqrun_core::IoPolicy;
use seqrun_core::JobError;
use seqrun_core::NoRemoteInputs;
use seqrun_core::PrefixTag;
use seqrun_core::RemoteProbe;
use seqrun_core::ValidationError;
use seqrun_core::inputs::check_file_size;
use seqrun_core::inputs::is_remote_uri;
use seqrun_core::inputs::resolve;
use seqrun_core::resolve_inputs;
use tempfile::tempdir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Probe that accepts a fixed set of URIs and records every call.
struct FixedProbe {
    known: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl FixedProbe {
    fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(ToString::to_string).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl RemoteProbe for FixedProbe {
    fn probe(&self, uri: &str) -> Result<u64, JobError> {
        self.calls.lock().unwrap().push(uri.to_string());
        if self.known.iter().any(|known| known == uri) {
            Ok(42)
        } else {
            Err(JobError::RemoteAccess(format!("unreachable: {uri}")))
        }
    }
}

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"@r\nA\n+\nI\n").unwrap();
}

fn local_paths(files: &[InputFile]) -> Vec<PathBuf> {
    files.iter().filter_map(|file| file.local_path().map(Path::to_path_buf)).collect()
}

fn bounds(min_inputs: usize, max_inputs: usize) -> IoPolicy {
    IoPolicy {
        min_inputs,
        max_inputs,
        ..IoPolicy::default()
    }
}

// ============================================================================
// SECTION: Local Inputs
// ============================================================================

#[test]
fn single_file_resolves_to_itself() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("reads.fq");
    touch(&file);
    let files = resolve(&InputSpec::from(file.as_path()), &NoRemoteInputs).unwrap();
    assert_eq!(files, vec![InputFile::local(file)]);
}

#[test]
fn directory_expands_recursively_in_sorted_order() {
    let dir = tempdir().unwrap();
    touch(&dir.path().join("b.fq"));
    touch(&dir.path().join("a/z.fq"));
    touch(&dir.path().join("a/nested/y.fq"));
    touch(&dir.path().join("c.fq"));
    fs::create_dir_all(dir.path().join("empty")).unwrap();

    let files = resolve(&InputSpec::from(dir.path()), &NoRemoteInputs).unwrap();
    assert_eq!(
        local_paths(&files),
        vec![
            dir.path().join("a/nested/y.fq"),
            dir.path().join("a/z.fq"),
            dir.path().join("b.fq"),
            dir.path().join("c.fq"),
        ]
    );
}

#[test]
fn list_preserves_element_order() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("2.fq");
    let second = dir.path().join("1.fq");
    touch(&first);
    touch(&second);
    let spec = InputSpec::from(vec![first.clone(), second.clone()]);
    let files = resolve(&spec, &NoRemoteInputs).unwrap();
    assert_eq!(local_paths(&files), vec![first, second]);
}

#[test]
fn missing_path_is_not_found() {
    let dir = tempdir().unwrap();
    let err = resolve(&InputSpec::from(dir.path().join("nope.fq")), &NoRemoteInputs).unwrap_err();
    assert!(matches!(err, JobError::Validation(ValidationError::NotFound(_))));
}

#[test]
fn cardinality_names_violated_bound() {
    let dir = tempdir().unwrap();
    touch(&dir.path().join("a.fq"));
    touch(&dir.path().join("b.fq"));
    touch(&dir.path().join("c.fq"));

    let err = resolve_inputs(&InputSpec::from(dir.path()), &bounds(1, 2), &NoRemoteInputs)
        .unwrap_err();
    assert_eq!(
        err,
        JobError::Validation(ValidationError::InputCount {
            count: 3,
            bound: CountBound::Maximum,
            limit: 2,
        })
    );

    let err = resolve_inputs(&InputSpec::from(dir.path()), &bounds(4, 8), &NoRemoteInputs)
        .unwrap_err();
    assert!(err.to_string().contains("minimum"));
}

#[test]
fn empty_directory_violates_minimum() {
    let dir = tempdir().unwrap();
    let err = resolve_inputs(&InputSpec::from(dir.path()), &bounds(1, 1), &NoRemoteInputs)
        .unwrap_err();
    assert!(matches!(
        err,
        JobError::Validation(ValidationError::InputCount {
            bound: CountBound::Minimum,
            ..
        })
    ));
}

#[test]
fn positional_prefixes_tag_each_input() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("r1.fq");
    let right = dir.path().join("r2.fq");
    touch(&left);
    touch(&right);
    let io = IoPolicy {
        min_inputs: 1,
        max_inputs: 2,
        paired: true,
        positional_prefixes: vec!["-1".to_string(), "-2".to_string()],
        ..IoPolicy::default()
    };

    let paired = resolve_inputs(&InputSpec::from(vec![left.clone(), right]), &io, &NoRemoteInputs)
        .unwrap();
    assert_eq!(
        paired[1].tag,
        Some(PrefixTag {
            prefix: "-2".to_string(),
            order: 1,
        })
    );

    let single = resolve_inputs(&InputSpec::from(left), &io, &NoRemoteInputs).unwrap();
    assert_eq!(single[0].tag, None);
}

#[test]
fn file_size_limit_is_enforced() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("reads.fq");
    touch(&file);
    assert_eq!(check_file_size(&file, 64).unwrap(), 9);
    let err = check_file_size(&file, 4).unwrap_err();
    assert!(matches!(
        err,
        ValidationError::FileTooLarge {
            max_bytes: 4,
            actual_bytes: 9,
            ..
        }
    ));
}

// ============================================================================
// SECTION: Remote Inputs
// ============================================================================

#[test]
fn remote_uri_is_checked_but_not_expanded() {
    let probe = FixedProbe::new(&["s3://bucket/reads.fq"]);
    let files = resolve(&InputSpec::from("s3://bucket/reads.fq"), &probe).unwrap();
    assert_eq!(files, vec![InputFile::remote("s3://bucket/reads.fq")]);
    assert_eq!(files[0].location.file_name(), "s3://bucket/reads.fq");
    assert_eq!(probe.calls.lock().unwrap().as_slice(), ["s3://bucket/reads.fq".to_string()]);
}

#[test]
fn unreachable_remote_uri_is_access_error() {
    let probe = FixedProbe::new(&[]);
    let err = resolve(&InputSpec::from("https://host/missing.fq"), &probe).unwrap_err();
    assert!(matches!(err, JobError::RemoteAccess(_)));
}

#[test]
fn remote_schemes_are_recognized() {
    assert!(is_remote_uri("s3://bucket/key"));
    assert!(is_remote_uri("ftp://host/file"));
    assert!(!is_remote_uri("file:///tmp/x"));
    assert!(!is_remote_uri("s3://"));
    assert!(!is_remote_uri("reads.fq"));
    assert!(matches!(InputSpec::from("http://x/y"), InputSpec::Uri(_)));
    assert!(matches!(
        InputFile::local("a.fq").location,
        InputLocation::Local(_)
    ));
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn directory_resolution_is_depth_independent(
        names in prop::collection::btree_set("[a-z]{1,6}", 1 .. 8),
        depths in prop::collection::vec(0usize .. 4, 8),
    ) {
        let flat = tempdir().unwrap();
        let nested = tempdir().unwrap();
        for (name, depth) in names.iter().zip(&depths) {
            touch(&flat.path().join(format!("{name}.fq")));
            let mut path = nested.path().to_path_buf();
            for level in 0 .. *depth {
                path.push(format!("d{level}"));
            }
            touch(&path.join(format!("{name}.fq")));
        }

        let flat_files = resolve(&InputSpec::from(flat.path()), &NoRemoteInputs).unwrap();
        let nested_files = resolve(&InputSpec::from(nested.path()), &NoRemoteInputs).unwrap();
        let file_names = |files: &[InputFile]| -> BTreeSet<String> {
            files.iter().map(|file| file.location.file_name()).collect()
        };
        prop_assert_eq!(file_names(&flat_files), file_names(&nested_files));
        prop_assert_eq!(nested_files.len(), names.len());

        let count = names.len();
        let ok = resolve_inputs(&InputSpec::from(nested.path()), &bounds(count, count), &NoRemoteInputs);
        prop_assert!(ok.is_ok());
        let too_few = resolve_inputs(&InputSpec::from(nested.path()), &bounds(count + 1, count + 5), &NoRemoteInputs);
        prop_assert!(too_few.is_err());
    }
}
