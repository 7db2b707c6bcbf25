// elspeth-core/src/core/checkpoint.rs
// ============================================================================
// Module: Elspeth Checkpoint Records
// Description: Resumable markers with serialized aggregation state.
// Purpose: Allow a failed run to resume on another process at a row boundary.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Checkpoints mark a position in the source sequence plus the live
//! aggregation state needed to continue. Resume requires the rebuilt graph's
//! node identifiers to match the checkpoint's (the deterministic-ID
//! invariant); the optional topology hash catches structural drift early.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::CheckpointId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Checkpoint Record
// ============================================================================

/// Audit record for one resumable marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Checkpoint identifier.
    pub checkpoint_id: CheckpointId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Token at which to resume.
    pub token_id: TokenId,
    /// Node up to which processing completed.
    pub node_id: NodeId,
    /// Source sequence number covered by this checkpoint.
    pub sequence: u64,
    /// Serialized aggregation executor state, if any buffers were live.
    pub aggregation_state: Option<Value>,
    /// Hash of the DAG topology snapshot for compatibility checks.
    pub topology_hash: Option<HashDigest>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
