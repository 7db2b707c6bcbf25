// elspeth-core/src/core/outcome.rs
// ============================================================================
// Module: Elspeth Token Outcomes
// Description: Terminal and intermediate token outcome records.
// Purpose: Enforce the one-terminal-outcome-per-leaf-token invariant.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every leaf token ends in exactly one terminal outcome. `Buffered` is the
//! only non-terminal outcome kind: a buffered token reappears with a final
//! outcome when its batch flushes or its coalesce releases.
//! `ConsumedInBatch` marks tokens absorbed by an aggregation flush or a
//! coalesce merge; the merged token carries the row forward.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Row Outcome
// ============================================================================

/// Closed sum of token outcome kinds.
///
/// # Invariants
/// - Variants are stable for serialization and audit replay.
/// - Only [`RowOutcome::Buffered`] is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// Token reached the default sink successfully.
    Completed,
    /// Token was routed to a named sink by a gate.
    Routed,
    /// Token was forked; terminal for the parent itself.
    Forked,
    /// Token failed.
    Failed,
    /// Token was quarantined.
    Quarantined,
    /// Token was absorbed into a batch or coalesce merge.
    ConsumedInBatch,
    /// Token is the merged product of a coalesce join.
    Coalesced,
    /// Token was expanded into multiple rows.
    Expanded,
    /// Token is buffered awaiting a batch flush or coalesce release.
    Buffered,
}

impl RowOutcome {
    /// Returns true when the outcome is terminal for the token it is
    /// recorded against.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Buffered)
    }

    /// Returns the stable lowercase label for the outcome.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Routed => "routed",
            Self::Forked => "forked",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
            Self::ConsumedInBatch => "consumed_in_batch",
            Self::Coalesced => "coalesced",
            Self::Expanded => "expanded",
            Self::Buffered => "buffered",
        }
    }
}

// ============================================================================
// SECTION: Token Outcome Record
// ============================================================================

/// Audit record of a token outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOutcomeRecord {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Token the outcome applies to.
    pub token_id: TokenId,
    /// Outcome kind.
    pub outcome: RowOutcome,
    /// Destination sink when the outcome involved one.
    pub sink_name: Option<SinkName>,
    /// Whether the outcome is terminal for this token.
    pub is_terminal: bool,
    /// Recording timestamp.
    pub recorded_at: Timestamp,
}
