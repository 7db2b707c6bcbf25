// elspeth-core/src/core/state.rs
// ============================================================================
// Module: Elspeth Node State Records
// Description: Per-node-execution audit states, routing events, and operations.
// Purpose: Capture the open/close lifecycle of every node execution.
// Dependencies: crate::core::{hashing, identifiers, node, time}, serde
// ============================================================================

//! ## Overview
//! A node state records one execution of one node against one token. States
//! are created `Open` and must be closed `Completed` or `Failed` before the
//! executor returns; recorders enforce that invariant. Routing events hang
//! off the state that emitted them; operations capture batch-granularity
//! work (a whole sink write, a batch flush) together with the external calls
//! made while they were active.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::node::RoutingMode;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Node State Status
// ============================================================================

/// Status of one audited node execution.
///
/// # Invariants
/// - Every state is created `Open` and closed exactly once.
/// - `Completed` and `Failed` are the only closing variants; `Skipped` is
///   recorded directly for nodes bypassed by routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStateStatus {
    /// Execution started; not yet closed.
    Open,
    /// Execution completed successfully.
    Completed {
        /// Execution duration in milliseconds.
        duration_ms: u64,
        /// Canonical hash of the input row data.
        input_hash: HashDigest,
        /// Canonical hash of the output row data.
        output_hash: HashDigest,
        /// Structured success reason recorded verbatim.
        success_reason: Value,
    },
    /// Execution failed.
    Failed {
        /// Execution duration in milliseconds.
        duration_ms: u64,
        /// Structured error payload.
        error: Value,
        /// Phase in which the failure occurred (for example "write", "flush").
        error_phase: String,
    },
    /// Node was skipped for this token.
    Skipped,
}

impl NodeStateStatus {
    /// Returns true when the state has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Returns the stable lowercase label for the status.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
        }
    }
}

// ============================================================================
// SECTION: Node State Record
// ============================================================================

/// Audit record of one execution of one node against one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStateRecord {
    /// State identifier.
    pub state_id: StateId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Executed node.
    pub node_id: NodeId,
    /// Token the execution applied to.
    pub token_id: TokenId,
    /// Current status.
    pub status: NodeStateStatus,
    /// Monotonic sequence number within the run.
    pub sequence: u64,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Structured metadata (for example retry attempt counts).
    pub metadata: Option<Value>,
}

// ============================================================================
// SECTION: Routing Event Record
// ============================================================================

/// Audit record of one edge traversal.
///
/// # Invariants
/// - A completed state registers exactly one event for a continue transition,
///   or N events sharing a `routing_group_id` for a fork.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEventRecord {
    /// State that emitted the traversal.
    pub state_id: StateId,
    /// Traversed edge.
    pub edge_id: EdgeId,
    /// Routing mode of the traversal.
    pub mode: RoutingMode,
    /// Group shared by all events of a single fork.
    pub routing_group_id: String,
}

// ============================================================================
// SECTION: Operation Records
// ============================================================================

/// Kind of batch-granularity operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A sink write covering a batch of tokens.
    SinkWrite,
    /// An aggregation batch flush.
    BatchFlush,
}

/// Audit record for a batch-granularity operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Operation identifier.
    pub operation_id: OperationId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Node the operation executed against.
    pub node_id: NodeId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Start timestamp.
    pub started_at: Timestamp,
    /// Completion timestamp, set when the operation closes.
    pub completed_at: Option<Timestamp>,
    /// Number of tokens covered by the operation.
    pub token_count: u64,
    /// Structured completion status payload.
    pub outcome: Option<Value>,
}

/// Audit record for one external call made during an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCallRecord {
    /// Owning operation identifier.
    pub operation_id: OperationId,
    /// Call kind label (for example "http", "db").
    pub call_kind: String,
    /// Call target description.
    pub target: String,
    /// Call latency in milliseconds.
    pub duration_ms: u64,
    /// Structured call status payload.
    pub status: Value,
}
