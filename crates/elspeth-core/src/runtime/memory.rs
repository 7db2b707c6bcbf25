// elspeth-core/src/runtime/memory.rs
// ============================================================================
// Module: Elspeth In-Memory Recorder
// Description: Complete in-memory audit recorder for tests and local demos.
// Purpose: Enforce recorder invariants without external storage.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! `MemoryRecorder` implements the full [`AuditRecorder`] surface over
//! mutex-guarded maps. It enforces the same state-machine invariants as the
//! durable SQLite recorder: states open exactly once and close exactly once,
//! rows always carry a payload-store reference, and run status transitions
//! follow `Pending → Running → Completed | Failed | Cancelled`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde_json::Value;

use crate::core::artifact::ArtifactRecord;
use crate::core::checkpoint::CheckpointRecord;
use crate::core::hashing::HashDigest;
use crate::core::hashing::canonical_json_bytes;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RouteLabel;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::identifiers::TokenId;
use crate::core::node::EdgeRecord;
use crate::core::node::NodeRecord;
use crate::core::node::RoutingMode;
use crate::core::outcome::TokenOutcomeRecord;
use crate::core::row::RowData;
use crate::core::row::RowRecord;
use crate::core::row::TokenRecord;
use crate::core::row::row_value;
use crate::core::run::RunRecord;
use crate::core::run::RunStatus;
use crate::core::schema::SchemaContract;
use crate::core::state::NodeStateRecord;
use crate::core::state::NodeStateStatus;
use crate::core::state::OperationCallRecord;
use crate::core::state::OperationKind;
use crate::core::state::OperationRecord;
use crate::core::state::RoutingEventRecord;
use crate::core::time::Timestamp;
use crate::interfaces::recorder::AuditRecorder;
use crate::interfaces::recorder::NodeRegistration;
use crate::interfaces::recorder::PayloadStore;
use crate::interfaces::recorder::RecorderError;
use crate::interfaces::recorder::StateCompletion;

// ============================================================================
// SECTION: Inner State
// ============================================================================

/// Mutable recorder state guarded by the outer mutex.
#[derive(Debug, Default)]
struct RecorderInner {
    /// Run records keyed by run id.
    runs: BTreeMap<String, RunRecord>,
    /// Node records keyed by node id.
    nodes: BTreeMap<String, NodeRecord>,
    /// Registered edges in registration order.
    edges: Vec<EdgeRecord>,
    /// Row records in creation order.
    rows: Vec<RowRecord>,
    /// Token records keyed by token id.
    tokens: BTreeMap<String, TokenRecord>,
    /// Node state records keyed by state id.
    states: BTreeMap<String, NodeStateRecord>,
    /// Routing events in emission order.
    routing_events: Vec<RoutingEventRecord>,
    /// Token outcomes in recording order.
    outcomes: Vec<TokenOutcomeRecord>,
    /// Artifact records in registration order.
    artifacts: Vec<ArtifactRecord>,
    /// Operation records keyed by operation id.
    operations: BTreeMap<String, OperationRecord>,
    /// External call records in recording order.
    operation_calls: Vec<OperationCallRecord>,
    /// Checkpoint records in creation order.
    checkpoints: Vec<CheckpointRecord>,
    /// Per-run node-state sequence counters.
    state_sequences: BTreeMap<String, u64>,
    /// Monotonic counter feeding generated identifiers.
    next_id: u64,
}

impl RecorderInner {
    /// Issues the next generated identifier with the provided prefix.
    fn issue_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

// ============================================================================
// SECTION: Memory Recorder
// ============================================================================

/// In-memory audit recorder for tests and examples.
pub struct MemoryRecorder {
    /// Recorder state protected by a mutex.
    inner: Mutex<RecorderInner>,
    /// Payload store backing `create_row`, when configured.
    payload_store: Option<Arc<dyn PayloadStore + Send + Sync>>,
}

impl MemoryRecorder {
    /// Creates a recorder with no payload store; `create_row` will fail.
    #[must_use]
    pub fn without_payload_store() -> Self {
        Self {
            inner: Mutex::new(RecorderInner::default()),
            payload_store: None,
        }
    }

    /// Creates a recorder backed by the provided payload store.
    #[must_use]
    pub fn new(payload_store: Arc<dyn PayloadStore + Send + Sync>) -> Self {
        Self {
            inner: Mutex::new(RecorderInner::default()),
            payload_store: Some(payload_store),
        }
    }

    /// Locks the inner state, mapping mutex poisoning onto a storage error.
    fn lock(&self) -> Result<MutexGuard<'_, RecorderInner>, RecorderError> {
        self.inner
            .lock()
            .map_err(|_| RecorderError::Storage("recorder mutex poisoned".to_string()))
    }

    /// Returns the number of still-open node states for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    pub fn open_state_count(&self, run_id: &RunId) -> Result<usize, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .states
            .values()
            .filter(|state| state.run_id == *run_id && !state.status.is_closed())
            .count())
    }

    /// Returns all routing events recorded for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    pub fn routing_events(&self, run_id: &RunId) -> Result<Vec<RoutingEventRecord>, RecorderError> {
        let inner = self.lock()?;
        let state_ids: Vec<String> = inner
            .states
            .values()
            .filter(|state| state.run_id == *run_id)
            .map(|state| state.state_id.as_str().to_string())
            .collect();
        Ok(inner
            .routing_events
            .iter()
            .filter(|event| state_ids.iter().any(|id| id == event.state_id.as_str()))
            .cloned()
            .collect())
    }

    /// Returns all token records for a row.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    pub fn tokens_for_row(&self, row_id: &RowId) -> Result<Vec<TokenRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .tokens
            .values()
            .filter(|token| token.row_id == *row_id)
            .cloned()
            .collect())
    }

    /// Returns all external call records for an operation.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    pub fn operation_calls(
        &self,
        operation_id: &OperationId,
    ) -> Result<Vec<OperationCallRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .operation_calls
            .iter()
            .filter(|call| call.operation_id == *operation_id)
            .cloned()
            .collect())
    }

    /// Returns all checkpoints for a run in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the lookup fails.
    pub fn checkpoints(&self, run_id: &RunId) -> Result<Vec<CheckpointRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .checkpoints
            .iter()
            .filter(|checkpoint| checkpoint.run_id == *run_id)
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for MemoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecorder").finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: AuditRecorder Implementation
// ============================================================================

impl AuditRecorder for MemoryRecorder {
    fn begin_run(
        &self,
        settings: &Value,
        engine_version: &str,
        started_at: Timestamp,
    ) -> Result<RunRecord, RecorderError> {
        let config_hash = hash_canonical_json(settings)?;
        let mut inner = self.lock()?;
        let run_id = RunId::new(inner.issue_id("run"));
        let record = RunRecord {
            run_id: run_id.clone(),
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            config_hash,
            settings: settings.clone(),
            schema_contract: None,
            engine_version: engine_version.to_string(),
            canonical_version: crate::core::hashing::CANONICAL_VERSION.to_string(),
        };
        inner.runs.insert(run_id.as_str().to_string(), record.clone());
        inner.state_sequences.insert(run_id.as_str().to_string(), 0);
        Ok(record)
    }

    fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::InvalidTransition(format!(
                "finish_run requires a terminal status, got {status:?}"
            )));
        }
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| RecorderError::NotFound(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Err(RecorderError::InvalidTransition(format!(
                "run {run_id} is already closed as {:?}",
                run.status
            )));
        }
        run.status = status;
        run.completed_at = Some(completed_at);
        Ok(())
    }

    fn record_schema_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| RecorderError::NotFound(format!("run {run_id}")))?;
        run.schema_contract = Some(contract.clone());
        Ok(())
    }

    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError> {
        let config_hash = hash_canonical_json(&registration.config)?;
        let mut inner = self.lock()?;
        if !inner.runs.contains_key(registration.run_id.as_str()) {
            return Err(RecorderError::NotFound(format!("run {}", registration.run_id)));
        }
        let record = NodeRecord {
            node_id: registration.node_id.clone(),
            run_id: registration.run_id,
            plugin_name: registration.plugin_name,
            kind: registration.kind,
            plugin_version: registration.plugin_version,
            determinism: registration.determinism,
            config_hash,
            config: registration.config,
            input_contract: registration.input_contract,
            output_contract: registration.output_contract,
            registered_at: registration.registered_at,
        };
        inner.nodes.insert(registration.node_id.as_str().to_string(), record.clone());
        Ok(record)
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &RouteLabel,
        mode: RoutingMode,
    ) -> Result<EdgeRecord, RecorderError> {
        let mut inner = self.lock()?;
        if !inner.nodes.contains_key(from.as_str()) {
            return Err(RecorderError::NotFound(format!("node {from}")));
        }
        if !inner.nodes.contains_key(to.as_str()) {
            return Err(RecorderError::NotFound(format!("node {to}")));
        }
        let edge_id = EdgeId::new(inner.issue_id("edge"));
        let record = EdgeRecord {
            edge_id,
            run_id: run_id.clone(),
            from_node: from.clone(),
            to_node: to.clone(),
            label: label.clone(),
            mode,
        };
        inner.edges.push(record.clone());
        Ok(record)
    }

    fn create_row(
        &self,
        run_id: &RunId,
        source_node: &NodeId,
        row_index: u64,
        data: &RowData,
        row_id: Option<RowId>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError> {
        let store = self.payload_store.as_ref().ok_or_else(|| {
            RecorderError::PayloadStoreMissing(
                "create_row requires a configured payload store".to_string(),
            )
        })?;
        let value = row_value(data);
        let canonical = canonical_json_bytes(&value)?;
        let payload_ref = store.store(&canonical)?;
        let source_data_hash = hash_canonical_json(&value)?;
        let mut inner = self.lock()?;
        if !inner.runs.contains_key(run_id.as_str()) {
            return Err(RecorderError::NotFound(format!("run {run_id}")));
        }
        let row_id = row_id.unwrap_or_else(|| RowId::new(inner.issue_id("row")));
        let record = RowRecord {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node.clone(),
            row_index,
            source_data_hash,
            source_data_ref: payload_ref.as_str().to_string(),
            created_at,
        };
        inner.rows.push(record.clone());
        Ok(record)
    }

    fn create_token(
        &self,
        row_id: &RowId,
        token_id: &TokenId,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError> {
        let mut inner = self.lock()?;
        if !inner.rows.iter().any(|row| row.row_id == *row_id) {
            return Err(RecorderError::NotFound(format!("row {row_id}")));
        }
        let record = TokenRecord {
            token_id: token_id.clone(),
            row_id: row_id.clone(),
            parent_token_id: None,
            branch_name: None,
            created_at,
        };
        inner.tokens.insert(token_id.as_str().to_string(), record.clone());
        Ok(record)
    }

    fn fork_token(
        &self,
        parent: &TokenId,
        child: &TokenId,
        branch: &BranchName,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError> {
        let mut inner = self.lock()?;
        let parent_record = inner
            .tokens
            .get(parent.as_str())
            .ok_or_else(|| RecorderError::NotFound(format!("token {parent}")))?;
        let record = TokenRecord {
            token_id: child.clone(),
            row_id: parent_record.row_id.clone(),
            parent_token_id: Some(parent.clone()),
            branch_name: Some(branch.clone()),
            created_at,
        };
        inner.tokens.insert(child.as_str().to_string(), record.clone());
        Ok(record)
    }

    fn begin_node_state(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
        started_at: Timestamp,
    ) -> Result<StateId, RecorderError> {
        let mut inner = self.lock()?;
        if !inner.nodes.contains_key(node_id.as_str()) {
            return Err(RecorderError::NotFound(format!(
                "node {node_id} is not registered for run {run_id}"
            )));
        }
        if !inner.tokens.contains_key(token_id.as_str()) {
            return Err(RecorderError::NotFound(format!("token {token_id}")));
        }
        let sequence = {
            let counter = inner.state_sequences.entry(run_id.as_str().to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let state_id = StateId::new(inner.issue_id("state"));
        let record = NodeStateRecord {
            state_id: state_id.clone(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            token_id: token_id.clone(),
            status: NodeStateStatus::Open,
            sequence,
            started_at,
            metadata: None,
        };
        inner.states.insert(state_id.as_str().to_string(), record);
        Ok(state_id)
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: StateCompletion,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        let state = inner.states.get_mut(state_id.as_str()).ok_or_else(|| {
            RecorderError::StateCorruption(format!("state {state_id} was never opened"))
        })?;
        if state.status.is_closed() {
            return Err(RecorderError::StateCorruption(format!(
                "state {state_id} is already closed as {}",
                state.status.label()
            )));
        }
        state.status = NodeStateStatus::Completed {
            duration_ms: completion.duration_ms,
            input_hash: completion.input_hash,
            output_hash: completion.output_hash,
            success_reason: completion.success_reason,
        };
        Ok(())
    }

    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: Value,
        error_phase: &str,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        let state = inner.states.get_mut(state_id.as_str()).ok_or_else(|| {
            RecorderError::StateCorruption(format!("state {state_id} was never opened"))
        })?;
        if state.status.is_closed() {
            return Err(RecorderError::StateCorruption(format!(
                "state {state_id} is already closed as {}",
                state.status.label()
            )));
        }
        state.status = NodeStateStatus::Failed {
            duration_ms,
            error,
            error_phase: error_phase.to_string(),
        };
        Ok(())
    }

    fn set_state_metadata(&self, state_id: &StateId, metadata: Value) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        let state = inner
            .states
            .get_mut(state_id.as_str())
            .ok_or_else(|| RecorderError::NotFound(format!("state {state_id}")))?;
        state.metadata = Some(metadata);
        Ok(())
    }

    fn record_routing(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: RoutingMode,
        routing_group_id: &str,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        if !inner.states.contains_key(state_id.as_str()) {
            return Err(RecorderError::NotFound(format!("state {state_id}")));
        }
        if !inner.edges.iter().any(|edge| edge.edge_id == *edge_id) {
            return Err(RecorderError::NotFound(format!("edge {edge_id}")));
        }
        inner.routing_events.push(RoutingEventRecord {
            state_id: state_id.clone(),
            edge_id: edge_id.clone(),
            mode,
            routing_group_id: routing_group_id.to_string(),
        });
        Ok(())
    }

    fn record_token_outcome(&self, outcome: &TokenOutcomeRecord) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        if !inner.tokens.contains_key(outcome.token_id.as_str()) {
            return Err(RecorderError::NotFound(format!("token {}", outcome.token_id)));
        }
        inner.outcomes.push(outcome.clone());
        Ok(())
    }

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
    ) -> Result<ArtifactRecord, RecorderError> {
        let mut inner = self.lock()?;
        if !inner.nodes.contains_key(sink_node.as_str()) {
            return Err(RecorderError::NotFound(format!("node {sink_node}")));
        }
        if !inner.states.contains_key(state_id.as_str()) {
            return Err(RecorderError::NotFound(format!("state {state_id}")));
        }
        let artifact_id = ArtifactId::new(inner.issue_id("artifact"));
        let record = ArtifactRecord {
            artifact_id,
            run_id: run_id.clone(),
            sink_node_id: sink_node.clone(),
            produced_by_state_id: state_id.clone(),
            artifact_type: artifact_type.to_string(),
            path_or_uri: uri.to_string(),
            size_bytes,
            content_hash: content_hash.clone(),
            registered_at,
        };
        inner.artifacts.push(record.clone());
        Ok(record)
    }

    fn begin_operation(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        kind: OperationKind,
        token_count: u64,
        started_at: Timestamp,
    ) -> Result<OperationId, RecorderError> {
        let mut inner = self.lock()?;
        if !inner.nodes.contains_key(node_id.as_str()) {
            return Err(RecorderError::NotFound(format!("node {node_id}")));
        }
        let operation_id = OperationId::new(inner.issue_id("operation"));
        let record = OperationRecord {
            operation_id: operation_id.clone(),
            run_id: run_id.clone(),
            node_id: node_id.clone(),
            kind,
            started_at,
            completed_at: None,
            token_count,
            outcome: None,
        };
        inner.operations.insert(operation_id.as_str().to_string(), record);
        Ok(operation_id)
    }

    fn complete_operation(
        &self,
        operation_id: &OperationId,
        outcome: Value,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        let operation = inner.operations.get_mut(operation_id.as_str()).ok_or_else(|| {
            RecorderError::StateCorruption(format!("operation {operation_id} was never opened"))
        })?;
        if operation.completed_at.is_some() {
            return Err(RecorderError::StateCorruption(format!(
                "operation {operation_id} is already closed"
            )));
        }
        operation.completed_at = Some(completed_at);
        operation.outcome = Some(outcome);
        Ok(())
    }

    fn record_call(&self, call: OperationCallRecord) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        if !inner.operations.contains_key(call.operation_id.as_str()) {
            return Err(RecorderError::NotFound(format!("operation {}", call.operation_id)));
        }
        inner.operation_calls.push(call);
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        if !inner.runs.contains_key(checkpoint.run_id.as_str()) {
            return Err(RecorderError::NotFound(format!("run {}", checkpoint.run_id)));
        }
        inner.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn latest_checkpoint(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .checkpoints
            .iter()
            .filter(|checkpoint| checkpoint.run_id == *run_id)
            .max_by_key(|checkpoint| checkpoint.sequence)
            .cloned())
    }

    fn delete_checkpoints(&self, run_id: &RunId) -> Result<(), RecorderError> {
        let mut inner = self.lock()?;
        inner.checkpoints.retain(|checkpoint| checkpoint.run_id != *run_id);
        Ok(())
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner.runs.get(run_id.as_str()).cloned())
    }

    fn rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, RecorderError> {
        let inner = self.lock()?;
        let mut rows: Vec<RowRecord> =
            inner.rows.iter().filter(|row| row.run_id == *run_id).cloned().collect();
        rows.sort_by_key(|row| row.row_index);
        Ok(rows)
    }

    fn token_outcomes(&self, run_id: &RunId) -> Result<Vec<TokenOutcomeRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .outcomes
            .iter()
            .filter(|outcome| outcome.run_id == *run_id)
            .cloned()
            .collect())
    }

    fn node_states(&self, run_id: &RunId) -> Result<Vec<NodeStateRecord>, RecorderError> {
        let inner = self.lock()?;
        let mut states: Vec<NodeStateRecord> =
            inner.states.values().filter(|state| state.run_id == *run_id).cloned().collect();
        states.sort_by_key(|state| state.sequence);
        Ok(states)
    }

    fn artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .artifacts
            .iter()
            .filter(|artifact| artifact.run_id == *run_id)
            .cloned()
            .collect())
    }

    fn operations(&self, run_id: &RunId) -> Result<Vec<OperationRecord>, RecorderError> {
        let inner = self.lock()?;
        Ok(inner
            .operations
            .values()
            .filter(|operation| operation.run_id == *run_id)
            .cloned()
            .collect())
    }
}
