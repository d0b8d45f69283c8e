// crates/seqrun-config/src/lib.rs
// ============================================================================
// Module: seqrun Config Library
// Description: Configuration model and loader for the seqrun client.
// Purpose: Single source of truth for seqrun.toml semantics.
// Dependencies: seqrun-core, serde, toml
// ============================================================================

//! ## Overview
//! `seqrun-config` loads `seqrun.toml`, fills defaults, validates every
//! section, resolves the service API key, and merges tool-table overrides
//! into the built-in registry.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
