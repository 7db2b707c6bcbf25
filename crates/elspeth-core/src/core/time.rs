// elspeth-core/src/core/time.rs
// ============================================================================
// Module: Elspeth Time Model
// Description: Canonical timestamp representation for audit records.
// Purpose: Provide deterministic, replayable time values across Elspeth records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Elspeth embeds explicit time values in audit records to keep replay
//! deterministic. The engine reads time only through the [`Clock`] trait;
//! tests inject a [`ManualClock`] so recorded timestamps and durations are
//! reproducible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in unix epoch milliseconds.
///
/// # Invariants
/// - Values are explicitly provided by clocks or callers; monotonicity within
///   a run is a clock responsibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the elapsed milliseconds since `earlier`, saturating at zero.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> u64 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 { 0 } else { delta as u64 }
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source abstraction for the engine.
pub trait Clock {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock implementation backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Creates a new system clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix millis, guarded for shared test use.
    now: Mutex<i64>,
}

impl ManualClock {
    /// Creates a manual clock starting at the provided unix millis.
    #[must_use]
    pub fn starting_at(millis: i64) -> Self {
        Self {
            now: Mutex::new(millis),
        }
    }

    /// Advances the clock by the provided number of milliseconds.
    pub fn advance_millis(&self, millis: i64) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = guard.saturating_add(millis);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let millis = self.now.lock().map_or(0, |guard| *guard);
        Timestamp::from_unix_millis(millis)
    }
}
