// elspeth-core/src/interfaces/recorder.rs
// ============================================================================
// Module: Elspeth Recorder Interfaces
// Description: Audit recorder and payload store contract surfaces.
// Purpose: Define the single write path for all audit state.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The recorder owns every write to the audit store. Calls are transactional
//! with respect to their emitted records: a failed close leaves the state
//! `Open` and the caller must retry or crash; recording is never silently
//! skipped. Recorders reject closing a state that was never opened and
//! reject closing a state twice; both indicate an engine bug.
//!
//! The payload store is a strictly content-addressed blob store. It is
//! required when the orchestrator runs: source entry stores raw data before
//! any processing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::artifact::ArtifactRecord;
use crate::core::checkpoint::CheckpointRecord;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RouteLabel;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::node::DeterminismClass;
use crate::core::node::EdgeRecord;
use crate::core::node::NodeKind;
use crate::core::node::NodeRecord;
use crate::core::node::RoutingMode;
use crate::core::outcome::TokenOutcomeRecord;
use crate::core::row::RowData;
use crate::core::row::RowRecord;
use crate::core::row::TokenRecord;
use crate::core::run::RunRecord;
use crate::core::run::RunStatus;
use crate::core::schema::SchemaContract;
use crate::core::state::NodeStateRecord;
use crate::core::state::OperationCallRecord;
use crate::core::state::OperationKind;
use crate::core::state::OperationRecord;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Payload store errors.
#[derive(Debug, Error)]
pub enum PayloadStoreError {
    /// Store I/O error.
    #[error("payload store io error: {0}")]
    Io(String),
    /// Requested payload is absent.
    #[error("payload not found: {0}")]
    NotFound(String),
    /// Stored bytes fail their content-hash check.
    #[error("payload store corruption: {0}")]
    Corrupt(String),
}

/// Audit recorder errors.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The referenced entity does not exist.
    #[error("recorder entity not found: {0}")]
    NotFound(String),
    /// The requested status transition is not allowed.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// A state was closed that was never opened, or closed twice.
    #[error("internal state corruption: {0}")]
    StateCorruption(String),
    /// No payload store is configured; rows cannot be created.
    #[error("payload store required (audit): {0}")]
    PayloadStoreMissing(String),
    /// Payload store operation failed.
    #[error("payload store failure: {0}")]
    Payload(#[from] PayloadStoreError),
    /// Canonical hashing failed.
    #[error("hashing failure: {0}")]
    Hash(#[from] HashError),
    /// Underlying storage failure.
    #[error("recorder storage failure: {0}")]
    Storage(String),
}

// ============================================================================
// SECTION: Payload Store
// ============================================================================

/// Strictly content-addressed blob store.
///
/// # Invariants
/// - `store` is idempotent by hash; `retrieve(store(b)) == b`.
pub trait PayloadStore {
    /// Stores bytes and returns their content hash.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError`] when the bytes cannot be persisted.
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError>;

    /// Retrieves the bytes behind a content hash.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::NotFound`] when the hash is absent.
    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError>;

    /// Returns true when the hash is present.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError`] when existence cannot be determined.
    fn exists(&self, hash: &HashDigest) -> Result<bool, PayloadStoreError>;
}

// ============================================================================
// SECTION: Recorder Inputs
// ============================================================================

/// Inputs for registering a graph node.
#[derive(Debug, Clone)]
pub struct NodeRegistration {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Deterministic node identifier computed by the graph builder.
    pub node_id: NodeId,
    /// Plugin name.
    pub plugin_name: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Plugin version string.
    pub plugin_version: String,
    /// Declared determinism class.
    pub determinism: DeterminismClass,
    /// Resolved node configuration.
    pub config: Value,
    /// Declared input schema contract, if any.
    pub input_contract: Option<SchemaContract>,
    /// Declared output schema contract, if any.
    pub output_contract: Option<SchemaContract>,
    /// Registration timestamp.
    pub registered_at: Timestamp,
}

/// Inputs for closing a node state as completed.
#[derive(Debug, Clone)]
pub struct StateCompletion {
    /// Canonical hash of the input row data.
    pub input_hash: HashDigest,
    /// Canonical hash of the output row data.
    pub output_hash: HashDigest,
    /// Structured success reason recorded verbatim.
    pub success_reason: Value,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

// ============================================================================
// SECTION: Audit Recorder
// ============================================================================

/// The single write path for all audit state.
pub trait AuditRecorder {
    /// Opens a run in `Pending` and advances it to `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run row cannot be created.
    fn begin_run(
        &self,
        settings: &Value,
        engine_version: &str,
        started_at: Timestamp,
    ) -> Result<RunRecord, RecorderError>;

    /// Closes a run with a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::InvalidTransition`] when the status is not
    /// terminal or the run is already closed.
    fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError>;

    /// Records the schema contract observed from the first source row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run does not exist.
    fn record_schema_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError>;

    /// Registers a graph node.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the run does not exist or hashing fails.
    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError>;

    /// Registers a routing edge.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when either endpoint is not registered.
    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &RouteLabel,
        mode: RoutingMode,
    ) -> Result<EdgeRecord, RecorderError>;

    /// Creates a row, storing its data in the payload store first.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::PayloadStoreMissing`] when no payload store
    /// is configured; the row is never recorded without a payload reference.
    fn create_row(
        &self,
        run_id: &RunId,
        source_node: &NodeId,
        row_index: u64,
        data: &RowData,
        row_id: Option<RowId>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError>;

    /// Creates the initial token for a row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the row does not exist.
    fn create_token(
        &self,
        row_id: &RowId,
        token_id: &TokenId,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError>;

    /// Creates a fork child token.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the parent token does not exist.
    fn fork_token(
        &self,
        parent: &TokenId,
        child: &TokenId,
        branch: &BranchName,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError>;

    /// Opens a node state and assigns its run-wide sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the node or token is not registered.
    fn begin_node_state(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
        started_at: Timestamp,
    ) -> Result<StateId, RecorderError>;

    /// Closes an open state as completed.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::StateCorruption`] when the state was never
    /// opened or is already closed.
    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: StateCompletion,
    ) -> Result<(), RecorderError>;

    /// Closes an open state as failed.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::StateCorruption`] when the state was never
    /// opened or is already closed.
    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: Value,
        error_phase: &str,
        duration_ms: u64,
    ) -> Result<(), RecorderError>;

    /// Attaches structured metadata (for example retry attempt counts) to a
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] when the state does not exist.
    fn set_state_metadata(&self, state_id: &StateId, metadata: Value) -> Result<(), RecorderError>;

    /// Records one edge traversal emitted by a state.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the state or edge is not registered.
    fn record_routing(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: RoutingMode,
        routing_group_id: &str,
    ) -> Result<(), RecorderError>;

    /// Records a token outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the token is not registered.
    fn record_token_outcome(&self, outcome: &TokenOutcomeRecord) -> Result<(), RecorderError>;

    /// Registers an artifact produced by a sink.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the sink node or state is not
    /// registered.
    #[allow(clippy::too_many_arguments, reason = "audit surface mirrors the artifact record")]
    fn register_artifact(
        &self,
        run_id: &RunId,
        sink_node: &NodeId,
        state_id: &StateId,
        artifact_type: &str,
        uri: &str,
        size_bytes: u64,
        content_hash: &HashDigest,
        registered_at: Timestamp,
    ) -> Result<ArtifactRecord, RecorderError>;

    /// Opens a batch-granularity operation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the node is not registered.
    fn begin_operation(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        kind: OperationKind,
        token_count: u64,
        started_at: Timestamp,
    ) -> Result<OperationId, RecorderError>;

    /// Closes an open operation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::StateCorruption`] when the operation was
    /// never opened or is already closed.
    fn complete_operation(
        &self,
        operation_id: &OperationId,
        outcome: Value,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError>;

    /// Records one external call attributed to an operation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::NotFound`] when the operation does not exist.
    fn record_call(&self, call: OperationCallRecord) -> Result<(), RecorderError>;

    /// Persists a checkpoint atomically.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the snapshot cannot be made durable.
    fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> Result<(), RecorderError>;

    /// Returns the most recent checkpoint for a run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn latest_checkpoint(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, RecorderError>;

    /// Deletes all checkpoints for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when deletion fails.
    fn delete_checkpoints(&self, run_id: &RunId) -> Result<(), RecorderError>;

    /// Loads a run record.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError>;

    /// Returns all rows recorded for a run, in row-index order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, RecorderError>;

    /// Returns all token outcomes recorded for a run, in recording order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn token_outcomes(&self, run_id: &RunId) -> Result<Vec<TokenOutcomeRecord>, RecorderError>;

    /// Returns all node states recorded for a run, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn node_states(&self, run_id: &RunId) -> Result<Vec<NodeStateRecord>, RecorderError>;

    /// Returns all artifacts registered for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>, RecorderError>;

    /// Returns all operations recorded for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    fn operations(&self, run_id: &RunId) -> Result<Vec<OperationRecord>, RecorderError>;
}
