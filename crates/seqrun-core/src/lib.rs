// crates/seqrun-core/src/lib.rs
// ============================================================================
// Module: seqrun Core Library
// Description: Public API surface for the seqrun orchestration core.
// Purpose: Expose the tool table, sanitizer, resolver, splitter, assembler,
//          status board, and error taxonomy.
// Dependencies: crate::{args, assemble, error, identifiers, inputs, output,
//               poll, spec, split, status, tool}
// ============================================================================

//! ## Overview
//! seqrun core holds everything about running a remote bioinformatics job that
//! does not touch the network: argument sanitization, input resolution,
//! record-aligned file splitting, output merging, and the shared status board
//! that worker threads coordinate through. The network side lives in
//! `seqrun-client`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod args;
pub mod assemble;
pub mod error;
pub mod identifiers;
pub mod inputs;
pub mod output;
pub mod poll;
pub mod spec;
pub mod split;
pub mod status;
pub mod tool;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use args::SanitizedArgs;
pub use args::sanitize;
pub use assemble::merge_outputs;
pub use assemble::unpack_archive;
pub use assemble::unpack_compressed;
pub use error::CountBound;
pub use error::JobError;
pub use error::ValidationError;
pub use identifiers::RemoteJobId;
pub use identifiers::ToolName;
pub use identifiers::WorkerId;
pub use inputs::InputFile;
pub use inputs::InputLocation;
pub use inputs::InputSpec;
pub use inputs::NoRemoteInputs;
pub use inputs::PrefixTag;
pub use inputs::RemoteProbe;
pub use inputs::resolve_inputs;
pub use output::OutputHandle;
pub use poll::PollMode;
pub use poll::next_poll_delay;
pub use spec::DatabaseRef;
pub use spec::JobSpec;
pub use split::Chunk;
pub use split::SplitOptions;
pub use split::Splitter;
pub use status::CancellationToken;
pub use status::LocalStatus;
pub use status::RemoteStatus;
pub use status::StatusBoard;
pub use tool::ArgArity;
pub use tool::ArgsPolicy;
pub use tool::IoPolicy;
pub use tool::MergeStrategy;
pub use tool::OutputPackaging;
pub use tool::OutputPolicy;
pub use tool::ToolRecord;
pub use tool::ToolRegistry;
