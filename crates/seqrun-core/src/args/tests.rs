// crates/seqrun-core/src/args/tests.rs
// ============================================================================
// Module: Argument Sanitizer Unit Tests
// Description: Tokenization details of the argument sanitizer.
// Purpose: Cover inline values, variadic stops, and violation accumulation.
// Dependencies: seqrun-core
// ============================================================================

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

use super::bare_tag;
use super::sanitize;
use crate::error::ValidationError;
use crate::tool::ArgArity;
use crate::tool::ArgsPolicy;

fn policy() -> ArgsPolicy {
    ArgsPolicy::default()
        .allow("-a", ArgArity::Fixed(1))
        .allow("-b", ArgArity::Fixed(2))
        .allow("--flag", ArgArity::Fixed(0))
        .allow("-outfmt", ArgArity::Variadic)
        .danger("-outfmt")
        .deny("-o")
}

#[test]
fn bare_tag_strips_inline_value() {
    assert_eq!(bare_tag("--min=3"), "--min");
    assert_eq!(bare_tag("-a"), "-a");
    assert_eq!(bare_tag("=x"), "");
}

#[test]
fn inline_value_counts_as_first_follow_on() {
    let sanitized = sanitize("-b=1 2 --flag", &policy()).expect("sanitize");
    assert_eq!(sanitized.as_str(), "-b=1 2 --flag");
}

#[test]
fn fixed_arity_keeps_available_tokens_at_end_of_string() {
    let sanitized = sanitize("--flag -b 1", &policy()).expect("sanitize");
    assert_eq!(sanitized.as_str(), "--flag -b 1");
}

#[test]
fn variadic_stops_at_next_recognized_tag() {
    let sanitized = sanitize("-outfmt 6 qseqid sseqid -a x", &policy()).expect("sanitize");
    assert_eq!(sanitized.as_str(), "-outfmt 6 qseqid sseqid -a x");
    assert_eq!(sanitized.dangerous_tags(), ["-outfmt".to_string()]);
}

#[test]
fn variadic_does_not_swallow_blacklisted_tags() {
    let err = sanitize("-outfmt 6 -o out.txt", &policy()).unwrap_err();
    assert_eq!(
        err,
        ValidationError::Arguments {
            unknown: vec!["out.txt".to_string()],
            blacklisted: vec!["-o".to_string()],
        }
    );
}

#[test]
fn violations_accumulate_across_the_whole_string() {
    let err = sanitize("--bogus -a x -o y --other --bogus", &policy()).unwrap_err();
    let ValidationError::Arguments {
        unknown,
        blacklisted,
    } = err
    else {
        panic!("expected arguments error");
    };
    assert_eq!(unknown, vec!["--bogus".to_string(), "y".to_string(), "--other".to_string()]);
    assert_eq!(blacklisted, vec!["-o".to_string()]);
}

#[test]
fn whitespace_is_normalized() {
    let sanitized = sanitize("  -a\tAACC \n --flag ", &policy()).expect("sanitize");
    assert_eq!(sanitized.as_str(), "-a AACC --flag");
    assert_eq!(sanitized.summary(), "custom arguments: -a AACC --flag");
}

#[test]
fn empty_string_is_accepted() {
    let sanitized = sanitize("", &policy()).expect("sanitize");
    assert!(sanitized.as_str().is_empty());
    assert!(!sanitized.is_dangerous());
    assert_eq!(sanitized.summary(), "no custom arguments");
}
