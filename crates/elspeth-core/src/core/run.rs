// elspeth-core/src/core/run.rs
// ============================================================================
// Module: Elspeth Run Records
// Description: Run lifecycle status and the run audit record.
// Purpose: Capture one pipeline execution with its resolved configuration.
// Dependencies: crate::core::{hashing, identifiers, schema, time}, serde
// ============================================================================

//! ## Overview
//! A run owns every node, row, artifact, and checkpoint recorded during one
//! pipeline execution. The resolved settings and their canonical hash are
//! captured on the run row so replay can verify that a checkpoint belongs to
//! a compatible configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::RunId;
use crate::core::schema::SchemaContract;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Transitions are `Pending → Running → Completed | Failed | Cancelled`;
///   recorders reject any other transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run row created, execution not started.
    Pending,
    /// Run is executing.
    Running,
    /// Run completed successfully.
    Completed,
    /// Run failed; checkpoints are preserved for resume.
    Failed,
    /// Run was cancelled cooperatively.
    Cancelled,
}

impl RunStatus {
    /// Returns true when the status is a terminal run state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Audit record for one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp, set when the status becomes terminal.
    pub completed_at: Option<Timestamp>,
    /// Canonical hash of the resolved settings.
    pub config_hash: HashDigest,
    /// Resolved settings captured verbatim.
    pub settings: Value,
    /// Schema contract observed from the first source row, if any.
    pub schema_contract: Option<SchemaContract>,
    /// Engine version that executed the run.
    pub engine_version: String,
    /// Canonicalization scheme label used for all hashes in this run.
    pub canonical_version: String,
}
