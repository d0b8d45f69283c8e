// crates/seqrun-core/src/poll.rs
// ============================================================================
// Module: seqrun Poll Timing
// Description: Drift-free delay computation for status polling.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Status polling measures the wall-clock time since polling began and sleeps
//! only until the next multiple of the interval. [`PollMode::LegacyModulo`]
//! keeps the older `elapsed % interval` formula, which shrinks toward zero
//! near interval boundaries.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Delay formula used between status polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Sleep `interval - elapsed % interval`.
    #[default]
    Remainder,
    /// Sleep `elapsed % interval`.
    LegacyModulo,
}

/// Returns the delay before the next status poll.
#[must_use]
pub fn next_poll_delay(elapsed: Duration, interval: Duration, mode: PollMode) -> Duration {
    let interval_nanos = interval.as_nanos();
    if interval_nanos == 0 {
        return Duration::ZERO;
    }
    let phase = elapsed.as_nanos() % interval_nanos;
    let delay = match mode {
        PollMode::Remainder => interval_nanos - phase,
        PollMode::LegacyModulo => phase,
    };
    // delay never exceeds the interval.
    Duration::from_nanos(u64::try_from(delay).unwrap_or(u64::MAX))
}
