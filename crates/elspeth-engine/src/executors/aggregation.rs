// elspeth-engine/src/executors/aggregation.rs
// ============================================================================
// Module: Elspeth Aggregation Executor
// Description: Per-node buffering, trigger evaluation, and batch flush.
// Purpose: Buffer tokens until a trigger fires, then merge through a batch transform.
// Dependencies: crate::{error, graph, telemetry, tokens}, elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! Each aggregation node owns a pair of length-synchronised buffers: the row
//! data handed to the batch transform and the full token values needed to
//! record outcomes and rebuild state after a crash. A length mismatch at
//! flush is internal state corruption. Checkpoint serialization stores the
//! complete token values (not bare identifiers) so a resumed process can
//! reconstruct the buffers faithfully; payloads above 1 MiB log a warning
//! and payloads above 10 MiB are rejected outright.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_config::AggregationSettings;
use elspeth_config::TriggerSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::BatchId;
use elspeth_core::BatchOutput;
use elspeth_core::Clock;
use elspeth_core::NodeId;
use elspeth_core::OperationKind;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::StateCompletion;
use elspeth_core::Timestamp;
use elspeth_core::TokenInfo;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::TransformPlugin;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_expr::Predicate;
use elspeth_expr::parse_predicate;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::error::EngineError;
use crate::telemetry::EngineEvent;
use crate::telemetry::TelemetryObserver;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Checkpoint size that triggers a warning, in bytes.
const CHECKPOINT_WARN_BYTES: usize = 1024 * 1024;
/// Checkpoint size hard limit, in bytes.
const CHECKPOINT_LIMIT_BYTES: usize = 10 * 1024 * 1024;
/// Current aggregation checkpoint format version.
const CHECKPOINT_FORMAT_VERSION: u64 = 1;

// ============================================================================
// SECTION: Buffers
// ============================================================================

/// Buffered state for one aggregation node.
#[derive(Debug, Default)]
struct NodeBuffer {
    /// Row data in arrival order, length-synchronised with `tokens`.
    rows: Vec<RowData>,
    /// Full token values in arrival order.
    tokens: Vec<TokenInfo>,
    /// Batch identifier, created on the first buffered row.
    batch_id: Option<BatchId>,
    /// Timestamp of the first buffered row, for timeout triggers.
    first_buffered_at: Option<Timestamp>,
    /// Rows consumed by previous flushes of this node.
    count_fire_offset: u64,
    /// Condition-trigger fires on previous flushes of this node.
    condition_fire_offset: u64,
}

/// Serialized checkpoint form of one node buffer.
#[derive(Debug, Serialize, Deserialize)]
struct NodeBufferCheckpoint {
    /// Full token values, sufficient to rebuild the buffers.
    tokens: Vec<TokenInfo>,
    /// Batch identifier to re-activate.
    batch_id: Option<BatchId>,
    /// Age of the oldest buffered row at checkpoint time, in seconds.
    elapsed_age_seconds: u64,
    /// Rows consumed by previous flushes.
    count_fire_offset: u64,
    /// Condition-trigger fires by previous flushes.
    condition_fire_offset: u64,
}

/// Parsed trigger for one aggregation node.
#[derive(Debug)]
struct NodeTrigger {
    /// Declared trigger settings.
    settings: TriggerSettings,
    /// Parsed condition predicates, in declaration order.
    predicates: Vec<Predicate>,
}

/// Result of one flush: the merged continuation token, if any.
#[derive(Debug)]
pub struct FlushResult {
    /// Merged token entering the graph at the aggregation's outgoing edge.
    pub merged: Option<TokenInfo>,
    /// Tokens consumed by the flush.
    pub consumed: Vec<TokenInfo>,
    /// Batch identifier of the flushed generation.
    pub batch_id: BatchId,
    /// The flush state, for routing attribution of the merged token.
    pub state_id: elspeth_core::StateId,
}

// ============================================================================
// SECTION: Aggregation Executor
// ============================================================================

/// Owns the buffers and triggers of every aggregation node in a run.
#[derive(Debug, Default)]
pub struct AggregationExecutor {
    /// Buffered state per node.
    buffers: BTreeMap<NodeId, NodeBuffer>,
    /// Parsed triggers per node.
    triggers: BTreeMap<NodeId, NodeTrigger>,
    /// Monotonic counter feeding batch identifiers.
    next_batch: u64,
}

impl AggregationExecutor {
    /// Creates an empty aggregation executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node's trigger configuration, parsing condition
    /// predicates once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a condition predicate fails to parse;
    /// settings validation makes this unreachable for validated pipelines.
    pub fn ensure_node(
        &mut self,
        node_id: &NodeId,
        settings: &AggregationSettings,
    ) -> Result<(), EngineError> {
        if self.triggers.contains_key(node_id) {
            return Ok(());
        }
        let mut predicates = Vec::new();
        collect_predicates(&settings.trigger, &mut predicates)
            .map_err(EngineError::InternalCorruption)?;
        self.triggers.insert(node_id.clone(), NodeTrigger {
            settings: settings.trigger.clone(),
            predicates,
        });
        Ok(())
    }

    /// Returns the node identifiers with non-empty buffers.
    #[must_use]
    pub fn nodes_with_buffers(&self) -> Vec<NodeId> {
        self.buffers
            .iter()
            .filter(|(_, buffer)| !buffer.tokens.is_empty())
            .map(|(node_id, _)| node_id.clone())
            .collect()
    }

    /// Returns the buffered row count for a node.
    #[must_use]
    pub fn buffered_count(&self, node_id: &NodeId) -> usize {
        self.buffers.get(node_id).map_or(0, |buffer| buffer.tokens.len())
    }

    /// Buffers one token, recording its non-terminal `Buffered` outcome.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the audit write fails.
    pub fn buffer_row(
        &mut self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        node_id: &NodeId,
        token: &TokenInfo,
    ) -> Result<(), EngineError> {
        let now = clock.now();
        let batch_needed = {
            let buffer = self.buffers.entry(node_id.clone()).or_default();
            buffer.batch_id.is_none()
        };
        if batch_needed {
            self.next_batch += 1;
            let batch_id = BatchId::new(format!("batch-{}", self.next_batch));
            if let Some(buffer) = self.buffers.get_mut(node_id) {
                buffer.batch_id = Some(batch_id);
                buffer.first_buffered_at = Some(now);
            }
        }
        if let Some(buffer) = self.buffers.get_mut(node_id) {
            buffer.rows.push(token.row_data.clone());
            buffer.tokens.push(token.clone());
        }

        recorder.record_token_outcome(&TokenOutcomeRecord {
            run_id: run_id.clone(),
            row_id: token.row_id.clone(),
            token_id: token.token_id.clone(),
            outcome: RowOutcome::Buffered,
            sink_name: None,
            is_terminal: false,
            recorded_at: now,
        })?;
        Ok(())
    }

    /// Reports whether the node's trigger is satisfied.
    #[must_use]
    pub fn should_flush(&self, node_id: &NodeId, clock: &dyn Clock) -> bool {
        let Some(buffer) = self.buffers.get(node_id) else {
            return false;
        };
        let Some(trigger) = self.triggers.get(node_id) else {
            return false;
        };
        if buffer.tokens.is_empty() {
            return false;
        }
        let mut predicate_index = 0;
        trigger_fires(
            &trigger.settings,
            &trigger.predicates,
            &mut predicate_index,
            buffer,
            clock.now(),
        )
    }

    /// Flushes the node's buffer through the batch-aware transform.
    ///
    /// Consumed tokens receive `ConsumedInBatch`; the merged token (if the
    /// transform produced one) continues on the node's outgoing edge. A
    /// failed batch transform fails every buffered token and clears the
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InternalCorruption`] on buffer length
    /// mismatch, and [`EngineError`] for audit or transform failures.
    #[allow(clippy::too_many_arguments, reason = "executor surface mirrors the audit dance inputs")]
    pub fn execute_flush(
        &mut self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        node_id: &NodeId,
        transform: &mut dyn TransformPlugin,
        config: &Value,
        tokens: &mut TokenManager,
        observer: &dyn TelemetryObserver,
        trigger_kind: &str,
    ) -> Result<FlushResult, EngineError> {
        let buffer = self
            .buffers
            .get_mut(node_id)
            .ok_or_else(|| EngineError::InternalCorruption(format!(
                "flush requested for unknown aggregation node {node_id}"
            )))?;
        if buffer.rows.len() != buffer.tokens.len() {
            return Err(EngineError::InternalCorruption(format!(
                "aggregation buffer length mismatch on {node_id}: {} rows vs {} tokens",
                buffer.rows.len(),
                buffer.tokens.len()
            )));
        }
        let batch_id = buffer.batch_id.clone().ok_or_else(|| {
            EngineError::InternalCorruption(format!(
                "flush without an active batch on {node_id}"
            ))
        })?;

        let rows = std::mem::take(&mut buffer.rows);
        let consumed = std::mem::take(&mut buffer.tokens);
        buffer.batch_id = None;
        buffer.first_buffered_at = None;
        buffer.count_fire_offset += u64::try_from(rows.len()).unwrap_or(u64::MAX);

        let started_at = clock.now();
        let operation_id = recorder.begin_operation(
            run_id,
            node_id,
            OperationKind::BatchFlush,
            u64::try_from(consumed.len()).unwrap_or(u64::MAX),
            started_at,
        )?;

        let first = consumed.first().ok_or_else(|| {
            EngineError::InternalCorruption(format!("flush of empty buffer on {node_id}"))
        })?;
        let state_id =
            recorder.begin_node_state(run_id, node_id, &first.token_id, started_at)?;
        let input_hash = hash_canonical_json(&json!(rows))
            .map_err(elspeth_core::RecorderError::from)?;

        let ctx = PluginContext {
            run_id,
            config,
            state_id: Some(&state_id),
            operation_id: Some(&operation_id),
            recorder: Some(recorder),
        };
        let output = transform.process_batch(rows, &ctx);
        let duration_ms = clock.now().millis_since(started_at);

        match output {
            BatchOutput::Merged {
                data,
                reason,
            } => {
                let output_hash = hash_canonical_json(&Value::Object(data.clone()))
                    .map_err(elspeth_core::RecorderError::from)?;
                recorder.complete_node_state(&state_id, StateCompletion {
                    input_hash,
                    output_hash,
                    success_reason: json!({
                        "reason": reason,
                        "trigger": trigger_kind,
                        "batch_id": batch_id.as_str(),
                        "consumed": consumed.len(),
                    }),
                    duration_ms,
                })?;
                record_consumed(recorder, clock, run_id, &consumed, observer)?;
                let merged = tokens.create_merged(&first.row_id, data);
                recorder.create_token(&merged.row_id, &merged.token_id, clock.now())?;
                recorder.complete_operation(
                    &operation_id,
                    json!({ "status": "flushed", "consumed": consumed.len() }),
                    clock.now(),
                )?;
                Ok(FlushResult {
                    merged: Some(merged),
                    consumed,
                    batch_id,
                    state_id,
                })
            }
            BatchOutput::Empty => {
                recorder.complete_node_state(&state_id, StateCompletion {
                    input_hash: input_hash.clone(),
                    output_hash: input_hash,
                    success_reason: json!({
                        "reason": "empty",
                        "trigger": trigger_kind,
                        "batch_id": batch_id.as_str(),
                        "consumed": consumed.len(),
                    }),
                    duration_ms,
                })?;
                record_consumed(recorder, clock, run_id, &consumed, observer)?;
                recorder.complete_operation(
                    &operation_id,
                    json!({ "status": "empty", "consumed": consumed.len() }),
                    clock.now(),
                )?;
                Ok(FlushResult {
                    merged: None,
                    consumed,
                    batch_id,
                    state_id,
                })
            }
            BatchOutput::Error {
                error,
            } => {
                // A failed flush fails every buffered token; the buffer is
                // already cleared and is not retried.
                recorder.fail_node_state(&state_id, error.clone(), "flush", duration_ms)?;
                for token in &consumed {
                    recorder.record_token_outcome(&TokenOutcomeRecord {
                        run_id: run_id.clone(),
                        row_id: token.row_id.clone(),
                        token_id: token.token_id.clone(),
                        outcome: RowOutcome::Failed,
                        sink_name: None,
                        is_terminal: true,
                        recorded_at: clock.now(),
                    })?;
                    observer.on_event(&EngineEvent::TokenCompleted {
                        token_id: token.token_id.clone(),
                        outcome: RowOutcome::Failed,
                    });
                }
                recorder.complete_operation(
                    &operation_id,
                    json!({ "status": "failed", "consumed": consumed.len() }),
                    clock.now(),
                )?;
                Err(EngineError::Plugin(elspeth_core::PluginError::logic(format!(
                    "batch transform failed: {error}"
                ))))
            }
        }
    }

    // ------------------------------------------------------------------
    // Checkpointing
    // ------------------------------------------------------------------

    /// Serializes the live buffers for a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CheckpointSizeLimitExceeded`] above the hard
    /// limit and [`EngineError::Serialization`] when encoding fails.
    pub fn get_checkpoint_state(&self, clock: &dyn Clock) -> Result<Option<Value>, EngineError> {
        let now = clock.now();
        let mut state = serde_json::Map::new();
        state.insert("_version".to_string(), json!(CHECKPOINT_FORMAT_VERSION));
        let mut any = false;
        for (node_id, buffer) in &self.buffers {
            if buffer.tokens.is_empty() {
                continue;
            }
            any = true;
            let elapsed_age_seconds = buffer
                .first_buffered_at
                .map_or(0, |first| now.millis_since(first) / 1_000);
            let checkpoint = NodeBufferCheckpoint {
                tokens: buffer.tokens.clone(),
                batch_id: buffer.batch_id.clone(),
                elapsed_age_seconds,
                count_fire_offset: buffer.count_fire_offset,
                condition_fire_offset: buffer.condition_fire_offset,
            };
            let encoded = serde_json::to_value(checkpoint)
                .map_err(|err| EngineError::Serialization(err.to_string()))?;
            state.insert(node_id.as_str().to_string(), encoded);
        }
        if !any {
            return Ok(None);
        }

        let value = Value::Object(state);
        let size = serde_json::to_vec(&value)
            .map_err(|err| EngineError::Serialization(err.to_string()))?
            .len();
        if size > CHECKPOINT_LIMIT_BYTES {
            return Err(EngineError::CheckpointSizeLimitExceeded {
                limit_mb: 10,
                actual_bytes: size,
            });
        }
        if size > CHECKPOINT_WARN_BYTES {
            tracing::warn!(
                target: "elspeth::checkpoint",
                size_bytes = size,
                "aggregation checkpoint exceeds 1 MiB; consider a smaller trigger count"
            );
        }
        Ok(Some(value))
    }

    /// Restores buffers and trigger counts from a checkpoint payload.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CheckpointRestore`] for unknown or legacy
    /// formats; the old bare-`token_ids` form is rejected explicitly.
    pub fn restore_from_checkpoint(
        &mut self,
        state: &Value,
        clock: &dyn Clock,
        tokens: &mut TokenManager,
    ) -> Result<(), EngineError> {
        let object = state.as_object().ok_or_else(|| {
            EngineError::CheckpointRestore("aggregation state is not an object".to_string())
        })?;
        let version = object.get("_version").and_then(Value::as_u64).unwrap_or(0);
        if version != CHECKPOINT_FORMAT_VERSION {
            return Err(EngineError::CheckpointRestore(format!(
                "unsupported aggregation checkpoint version {version} (expected \
                 {CHECKPOINT_FORMAT_VERSION})"
            )));
        }

        let now = clock.now();
        for (key, entry) in object {
            if key == "_version" {
                continue;
            }
            if entry.get("token_ids").is_some() {
                return Err(EngineError::CheckpointRestore(format!(
                    "aggregation checkpoint for {key} uses the legacy token_ids format; \
                     full token values are required to rebuild buffers"
                )));
            }
            if entry.get("tokens").is_none() {
                return Err(EngineError::CheckpointRestore(format!(
                    "aggregation checkpoint for {key} is missing the tokens key"
                )));
            }
            let checkpoint: NodeBufferCheckpoint = serde_json::from_value(entry.clone())
                .map_err(|err| EngineError::CheckpointRestore(err.to_string()))?;

            let mut buffer = NodeBuffer {
                rows: checkpoint.tokens.iter().map(|token| token.row_data.clone()).collect(),
                tokens: checkpoint.tokens,
                batch_id: checkpoint.batch_id,
                first_buffered_at: Some(Timestamp::from_unix_millis(
                    now.as_unix_millis()
                        .saturating_sub(i64::try_from(
                            checkpoint.elapsed_age_seconds.saturating_mul(1_000),
                        )
                        .unwrap_or(i64::MAX)),
                )),
                count_fire_offset: checkpoint.count_fire_offset,
                condition_fire_offset: checkpoint.condition_fire_offset,
            };
            if buffer.batch_id.is_none() {
                self.next_batch += 1;
                buffer.batch_id = Some(BatchId::new(format!("batch-{}", self.next_batch)));
            }
            for token in &buffer.tokens {
                tokens.adopt(token.clone());
            }
            self.buffers.insert(NodeId::new(key.clone()), buffer);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Trigger Evaluation
// ============================================================================

/// Collects parsed predicates from a trigger tree in declaration order.
fn collect_predicates(
    trigger: &TriggerSettings,
    out: &mut Vec<Predicate>,
) -> Result<(), String> {
    match trigger {
        TriggerSettings::Count(_) | TriggerSettings::TimeoutSeconds(_) => Ok(()),
        TriggerSettings::Condition(condition) => {
            let predicate = parse_predicate(condition).map_err(|err| err.to_string())?;
            out.push(predicate);
            Ok(())
        }
        TriggerSettings::AnyOf(inner) => {
            for trigger in inner {
                collect_predicates(trigger, out)?;
            }
            Ok(())
        }
    }
}

/// Evaluates a trigger tree against the buffer state.
fn trigger_fires(
    trigger: &TriggerSettings,
    predicates: &[Predicate],
    predicate_index: &mut usize,
    buffer: &NodeBuffer,
    now: Timestamp,
) -> bool {
    match trigger {
        TriggerSettings::Count(count) => {
            u64::try_from(buffer.tokens.len()).unwrap_or(u64::MAX) >= *count
        }
        TriggerSettings::TimeoutSeconds(seconds) => buffer
            .first_buffered_at
            .is_some_and(|first| now.millis_since(first) >= seconds.saturating_mul(1_000)),
        TriggerSettings::Condition(_) => {
            let predicate = predicates.get(*predicate_index);
            *predicate_index += 1;
            predicate.is_some_and(|predicate| {
                buffer
                    .rows
                    .last()
                    .is_some_and(|row| predicate.evaluate(row).unwrap_or(false))
            })
        }
        TriggerSettings::AnyOf(inner) => inner
            .iter()
            .any(|trigger| trigger_fires(trigger, predicates, predicate_index, buffer, now)),
    }
}

/// Records `ConsumedInBatch` for every consumed token.
fn record_consumed(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    run_id: &RunId,
    consumed: &[TokenInfo],
    observer: &dyn TelemetryObserver,
) -> Result<(), EngineError> {
    for token in consumed {
        recorder.record_token_outcome(&TokenOutcomeRecord {
            run_id: run_id.clone(),
            row_id: token.row_id.clone(),
            token_id: token.token_id.clone(),
            outcome: RowOutcome::ConsumedInBatch,
            sink_name: None,
            is_terminal: true,
            recorded_at: clock.now(),
        })?;
        observer.on_event(&EngineEvent::TokenCompleted {
            token_id: token.token_id.clone(),
            outcome: RowOutcome::ConsumedInBatch,
        });
    }
    Ok(())
}
