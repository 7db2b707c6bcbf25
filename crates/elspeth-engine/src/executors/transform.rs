// elspeth-engine/src/executors/transform.rs
// ============================================================================
// Module: Elspeth Transform Executor
// Description: Runs one transform against one token with the audit wrap.
// Purpose: Apply transform output and on-error policy inside a closed state.
// Dependencies: crate::{error, graph, retry, telemetry}, elspeth-core
// ============================================================================

//! ## Overview
//! The transform executor opens a node state, invokes `process` with a
//! context carrying the state identifier for call attribution, and closes
//! the state before any telemetry leaves the engine. Failures follow the
//! plugin's declared on-error policy: `raise` aborts the row, `discard`
//! quarantines the token, `route_to` sends it to a named sink. Retryable
//! failures are retried by the configured retry manager; the attempt count
//! lands in the state's metadata.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::AuditRecorder;
use elspeth_core::Clock;
use elspeth_core::OnErrorPolicy;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::PluginErrorKind;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::SinkName;
use elspeth_core::StateCompletion;
use elspeth_core::TokenInfo;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_core::row_value;
use serde_json::Value;
use serde_json::json;

use crate::error::EngineError;
use crate::graph::GraphNode;
use crate::retry::RetryManager;
use crate::telemetry::EngineEvent;
use crate::telemetry::TelemetryObserver;

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// Outcome of running one transform against one token.
#[derive(Debug)]
pub enum TransformExecution {
    /// The transform succeeded; the updated token proceeds on the continue
    /// edge.
    Updated(TokenInfo),
    /// The token was quarantined under the `discard` policy. Its terminal
    /// outcome is already recorded.
    Quarantined,
    /// The token routes to a named sink under the `route_to` policy.
    Routed {
        /// Destination sink.
        sink: SinkName,
        /// Token to hand to the sink executor.
        token: TokenInfo,
    },
    /// The failure propagates under the `raise` policy. The token's terminal
    /// outcome is already recorded; the caller aborts the run.
    Aborted(PluginError),
}

// ============================================================================
// SECTION: Transform Executor
// ============================================================================

/// Runs one transform against one token.
///
/// # Errors
///
/// Returns [`EngineError`] when audit writes fail; plugin failures are
/// folded into the returned [`TransformExecution`] per the on-error policy.
#[allow(clippy::too_many_arguments, reason = "executor surface mirrors the audit dance inputs")]
pub fn execute_transform(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    run_id: &RunId,
    node: &GraphNode,
    plugin: &mut dyn TransformPlugin,
    token: &TokenInfo,
    retry: Option<&RetryManager>,
    continue_edge: Option<&elspeth_core::EdgeId>,
    routing_group: &mut u64,
    observer: &dyn TelemetryObserver,
) -> Result<TransformExecution, EngineError> {
    let started_at = clock.now();
    let state_id = recorder.begin_node_state(run_id, &node.node_id, &token.token_id, started_at)?;
    let input_hash = hash_canonical_json(&row_value(&token.row_data))
        .map_err(elspeth_core::RecorderError::from)?;

    let ctx = PluginContext {
        run_id,
        config: &node.config,
        state_id: Some(&state_id),
        operation_id: None,
        recorder: Some(recorder),
    };

    let row = token.row_data.clone();
    let (output, attempts) = match retry {
        None => (plugin.process(row.clone(), &ctx), 1),
        Some(manager) => {
            let retried = manager.call(|| match plugin.process(row.clone(), &ctx) {
                TransformOutput::Success {
                    data,
                    reason,
                } => Ok((data, reason)),
                TransformOutput::Error {
                    error,
                } => Err(error_to_plugin_failure(&error)),
            });
            let output = match retried.result {
                Ok((data, reason)) => TransformOutput::Success {
                    data,
                    reason,
                },
                Err(failure) => TransformOutput::Error {
                    error: failure.to_error_value(),
                },
            };
            (output, retried.attempts)
        }
    };

    let finished_at = clock.now();
    let duration_ms = finished_at.millis_since(started_at);

    if attempts > 1 {
        recorder.set_state_metadata(&state_id, json!({ "attempts": attempts }))?;
    }

    // Per-call timeout: the watchdog measures wall clock around the call;
    // expiry closes the state as a timeout failure.
    let timed_out = plugin.call_timeout_ms().is_some_and(|timeout| duration_ms > timeout);

    let output = if timed_out {
        TransformOutput::Error {
            error: json!({
                "kind": "timeout",
                "timeout_ms": plugin.call_timeout_ms(),
                "elapsed_ms": duration_ms,
            }),
        }
    } else {
        output
    };

    match output {
        TransformOutput::Success {
            data,
            reason,
        } => {
            let output_hash = hash_canonical_json(&Value::Object(data.clone()))
                .map_err(elspeth_core::RecorderError::from)?;
            recorder.complete_node_state(&state_id, StateCompletion {
                input_hash,
                output_hash,
                success_reason: reason,
                duration_ms,
            })?;
            if let Some(edge_id) = continue_edge {
                *routing_group += 1;
                let group = format!("rg-{routing_group}");
                recorder.record_routing(
                    &state_id,
                    edge_id,
                    elspeth_core::RoutingMode::Move,
                    &group,
                )?;
            }
            observer.on_event(&EngineEvent::TransformCompleted {
                node_id: node.node_id.clone(),
                token_id: token.token_id.clone(),
                state_id,
                duration_ms,
            });
            Ok(TransformExecution::Updated(token.with_data(data)))
        }
        TransformOutput::Error {
            error,
        } => {
            let phase = if timed_out { "timeout" } else { "process" };
            recorder.fail_node_state(&state_id, error.clone(), phase, duration_ms)?;
            match plugin.on_error() {
                OnErrorPolicy::Raise => {
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
                    Ok(TransformExecution::Aborted(error_to_plugin_failure(&error)))
                }
                OnErrorPolicy::Discard => {
                    recorder.record_token_outcome(&TokenOutcomeRecord {
                        run_id: run_id.clone(),
                        row_id: token.row_id.clone(),
                        token_id: token.token_id.clone(),
                        outcome: RowOutcome::Quarantined,
                        sink_name: None,
                        is_terminal: true,
                        recorded_at: clock.now(),
                    })?;
                    observer.on_event(&EngineEvent::TokenCompleted {
                        token_id: token.token_id.clone(),
                        outcome: RowOutcome::Quarantined,
                    });
                    Ok(TransformExecution::Quarantined)
                }
                OnErrorPolicy::RouteTo {
                    sink,
                } => Ok(TransformExecution::Routed {
                    sink,
                    token: token.clone(),
                }),
            }
        }
    }
}

/// Folds a structured transform error into a classified plugin failure.
fn error_to_plugin_failure(error: &Value) -> PluginError {
    let kind = error
        .get("kind")
        .and_then(Value::as_str)
        .and_then(|label| match label {
            "io" => Some(PluginErrorKind::Io),
            "network" => Some(PluginErrorKind::Network),
            "external" => Some(PluginErrorKind::External),
            _ => None,
        })
        .unwrap_or(PluginErrorKind::Logic);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("transform failed")
        .to_string();
    PluginError::Failed {
        kind,
        message,
    }
}
