// elspeth-engine/src/executors/sink.rs
// ============================================================================
// Module: Elspeth Sink Executor
// Description: Batch sink writes with the write/flush durability gate.
// Purpose: Close every token lifecycle and register artifacts post-flush.
// Dependencies: crate::{error, graph, telemetry}, elspeth-core
// ============================================================================

//! ## Overview
//! Sink writes happen at batch boundaries, one `write` call for the whole
//! batch followed by `flush`. One node state opens per token so every token
//! lifecycle closes. Artifact registration happens only after `flush`
//! returns: a write failure closes all states `Failed` with phase "write"
//! and registers nothing; a flush failure closes them with phase "flush".
//! Leaving states open on flush failure is explicitly forbidden. The
//! artifact links to the first token's state for lineage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::ArtifactRecord;
use elspeth_core::AuditRecorder;
use elspeth_core::Clock;
use elspeth_core::OperationKind;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::SinkName;
use elspeth_core::SinkPlugin;
use elspeth_core::StateCompletion;
use elspeth_core::StateId;
use elspeth_core::TokenInfo;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_core::row_value;
use serde_json::json;

use crate::error::EngineError;
use crate::graph::GraphNode;
use crate::telemetry::EngineEvent;
use crate::telemetry::TelemetryObserver;

// ============================================================================
// SECTION: Batch Entries
// ============================================================================

/// One token pending a sink write, with the outcome to record on success.
///
/// `pending_outcome` is `None` when the token's terminal outcome was already
/// recorded upstream (quarantined rows, coalesced tokens).
#[derive(Debug, Clone)]
pub struct SinkBatchEntry {
    /// Token to write.
    pub token: TokenInfo,
    /// Outcome recorded after a successful flush, if still owed.
    pub pending_outcome: Option<RowOutcome>,
}

// ============================================================================
// SECTION: Sink Executor
// ============================================================================

/// Writes one batch through a sink with the durability gate.
///
/// Returns the registered artifact, or `None` for an empty batch (no side
/// effects at all in that case).
///
/// # Errors
///
/// Returns [`EngineError::Plugin`] when `write` or `flush` fails; every
/// opened state is closed `Failed` with the phase named before the error
/// propagates.
#[allow(clippy::too_many_arguments, reason = "executor surface mirrors the audit dance inputs")]
pub fn execute_sink(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    run_id: &RunId,
    node: &GraphNode,
    sink: &mut dyn SinkPlugin,
    sink_name: &SinkName,
    entries: Vec<SinkBatchEntry>,
    observer: &dyn TelemetryObserver,
) -> Result<Option<ArtifactRecord>, EngineError> {
    if entries.is_empty() {
        return Ok(None);
    }

    let started_at = clock.now();
    let operation_id = recorder.begin_operation(
        run_id,
        &node.node_id,
        OperationKind::SinkWrite,
        u64::try_from(entries.len()).unwrap_or(u64::MAX),
        started_at,
    )?;

    // All token lifecycles must close: one state per token.
    let mut state_ids: Vec<StateId> = Vec::with_capacity(entries.len());
    for entry in &entries {
        let state_id = recorder.begin_node_state(
            run_id,
            &node.node_id,
            &entry.token.token_id,
            started_at,
        )?;
        state_ids.push(state_id);
    }

    let rows: Vec<RowData> = entries.iter().map(|entry| entry.token.row_data.clone()).collect();
    let first_state = state_ids.first().cloned().ok_or_else(|| {
        EngineError::InternalCorruption("sink batch with no states".to_string())
    })?;
    let ctx = PluginContext {
        run_id,
        config: &node.config,
        state_id: Some(&first_state),
        operation_id: Some(&operation_id),
        recorder: Some(recorder),
    };

    let descriptor = match sink.write(&rows, &ctx) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            fail_states(recorder, clock, &state_ids, &error, "write", started_at)?;
            recorder.complete_operation(
                &operation_id,
                json!({ "status": "failed", "phase": "write" }),
                clock.now(),
            )?;
            return Err(EngineError::Plugin(error));
        }
    };

    // Durability gate: nothing is registered until flush returns.
    if let Err(error) = sink.flush() {
        fail_states(recorder, clock, &state_ids, &error, "flush", started_at)?;
        recorder.complete_operation(
            &operation_id,
            json!({ "status": "failed", "phase": "flush" }),
            clock.now(),
        )?;
        return Err(EngineError::Plugin(error));
    }

    let duration_ms = clock.now().millis_since(started_at);
    for (entry, state_id) in entries.iter().zip(&state_ids) {
        let row_hash = hash_canonical_json(&row_value(&entry.token.row_data))
            .map_err(elspeth_core::RecorderError::from)?;
        recorder.complete_node_state(state_id, StateCompletion {
            input_hash: row_hash.clone(),
            output_hash: row_hash,
            success_reason: json!({ "sink": sink_name.as_str(), "written": true }),
            duration_ms,
        })?;
    }

    let artifact = recorder.register_artifact(
        run_id,
        &node.node_id,
        &first_state,
        &descriptor.artifact_type,
        &descriptor.uri,
        descriptor.size_bytes,
        &descriptor.content_hash,
        clock.now(),
    )?;
    recorder.complete_operation(
        &operation_id,
        json!({
            "status": "written",
            "artifact": artifact.artifact_id.as_str(),
            "tokens": entries.len(),
        }),
        clock.now(),
    )?;

    for entry in &entries {
        if let Some(outcome) = entry.pending_outcome {
            recorder.record_token_outcome(&TokenOutcomeRecord {
                run_id: run_id.clone(),
                row_id: entry.token.row_id.clone(),
                token_id: entry.token.token_id.clone(),
                outcome,
                sink_name: Some(sink_name.clone()),
                is_terminal: true,
                recorded_at: clock.now(),
            })?;
            observer.on_event(&EngineEvent::TokenCompleted {
                token_id: entry.token.token_id.clone(),
                outcome,
            });
        }
    }

    Ok(Some(artifact))
}

/// Closes every state `Failed` with the phase named.
fn fail_states(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    state_ids: &[StateId],
    error: &elspeth_core::PluginError,
    phase: &str,
    started_at: elspeth_core::Timestamp,
) -> Result<(), EngineError> {
    let duration_ms = clock.now().millis_since(started_at);
    for state_id in state_ids {
        recorder.fail_node_state(state_id, error.to_error_value(), phase, duration_ms)?;
    }
    Ok(())
}
