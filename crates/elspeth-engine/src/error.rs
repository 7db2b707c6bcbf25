// elspeth-engine/src/error.rs
// ============================================================================
// Module: Elspeth Engine Errors
// Description: Error sum for graph validation, execution, and resume.
// Purpose: Give every failure mode a named, matchable variant.
// Dependencies: elspeth-core, elspeth-config, crate::graph, thiserror
// ============================================================================

//! ## Overview
//! Engine errors split into startup failures (graph and route validation,
//! always fatal), per-row failures (handled by on-error policies), and
//! audit-invariant violations (engine bugs surfaced as internal corruption).
//! The recorder never silently swallows: anything that escapes a plugin
//! reaches the orchestrator, which closes the run `Failed`, preserves
//! checkpoints, runs completion hooks, and re-raises.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::NodeId;
use elspeth_core::PluginError;
use elspeth_core::RecorderError;
use elspeth_core::RouteLabel;
use elspeth_core::RunId;
use elspeth_core::RunStatus;
use thiserror::Error;

use crate::graph::GraphError;

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Graph construction or validation failed. Always fatal at startup.
    #[error("graph validation failed: {0}")]
    GraphValidation(#[from] GraphError),
    /// A routing label has no registered edge. The current state is closed
    /// `Failed` before this is raised, so the audit trail stays complete.
    #[error("no registered edge for label `{label}` on node {node_id}")]
    MissingEdge {
        /// Node whose routing failed.
        node_id: NodeId,
        /// Unresolved routing label.
        label: RouteLabel,
    },
    /// The orchestrator was started without a payload store.
    #[error("payload store required (audit): source rows must be stored before processing")]
    PayloadStoreRequired,
    /// An aggregation checkpoint exceeded the hard size limit.
    #[error(
        "checkpoint size exceeds {limit_mb} MB limit ({actual_bytes} bytes); lower the \
         aggregation trigger count or disable checkpointing for this pipeline"
    )]
    CheckpointSizeLimitExceeded {
        /// Hard limit in megabytes.
        limit_mb: u64,
        /// Serialized size in bytes.
        actual_bytes: usize,
    },
    /// A checkpoint payload could not be restored.
    #[error("checkpoint restore failed: {0}")]
    CheckpointRestore(String),
    /// Resume was requested for a run that cannot be resumed.
    #[error("run {run_id} cannot be resumed from status {status:?}: {reason}")]
    NotResumable {
        /// Requested run.
        run_id: RunId,
        /// Current run status.
        status: RunStatus,
        /// Why resume is rejected.
        reason: String,
    },
    /// Resume found no checkpoint for the run.
    #[error("run {run_id} has no checkpoint to resume from")]
    NoCheckpoint {
        /// Requested run.
        run_id: RunId,
    },
    /// Resume found the rebuilt graph incompatible with the checkpoint.
    #[error("checkpoint node {checkpoint_node} does not exist in the rebuilt graph; \
             the resolved configuration has changed")]
    CheckpointIncompatible {
        /// Node recorded in the checkpoint.
        checkpoint_node: NodeId,
    },
    /// The per-row fork budget was exhausted.
    #[error("fork budget exhausted: row produced more than {budget} forks")]
    ForkBudgetExhausted {
        /// Configured budget.
        budget: u64,
    },
    /// A plugin failure escaped its on-error policy.
    #[error("plugin failure: {0}")]
    Plugin(#[from] PluginError),
    /// The audit recorder rejected a write.
    #[error("audit recorder failure: {0}")]
    Recorder(#[from] RecorderError),
    /// An audit invariant was violated. This indicates an engine bug.
    #[error("internal state corruption: {0}")]
    InternalCorruption(String),
    /// Serialization of an engine-owned structure failed.
    #[error("serialization failure: {0}")]
    Serialization(String),
}
