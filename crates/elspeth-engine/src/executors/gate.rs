// elspeth-engine/src/executors/gate.rs
// ============================================================================
// Module: Elspeth Gate Executor
// Description: Runs plugin and config gates with audited routing.
// Purpose: Resolve gate decisions through registered edges, forks included.
// Dependencies: crate::{error, graph, telemetry, tokens}, elspeth-core, elspeth-expr
// ============================================================================

//! ## Overview
//! Both gate paths share the same discipline: evaluate, resolve the label
//! through the route resolution map, record one routing event per traversed
//! edge (fork siblings share a routing group), close the state with the
//! condition and result recorded verbatim, then emit telemetry. A label
//! with no registered edge closes the state `Failed` before the missing-edge
//! error is raised so the audit trail stays complete.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::AuditRecorder;
use elspeth_core::BranchName;
use elspeth_core::Clock;
use elspeth_core::GateAction;
use elspeth_core::GatePlugin;
use elspeth_core::PluginContext;
use elspeth_core::RouteLabel;
use elspeth_core::RoutingMode;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::SinkName;
use elspeth_core::StateCompletion;
use elspeth_core::StateId;
use elspeth_core::TokenInfo;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_core::row_value;
use elspeth_expr::Predicate;
use serde_json::json;

use crate::error::EngineError;
use crate::graph::ExecutionGraph;
use crate::graph::GraphNode;
use crate::graph::RouteResolution;
use crate::telemetry::EngineEvent;
use crate::telemetry::TelemetryObserver;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Execution Result
// ============================================================================

/// Outcome of running one gate against one token.
#[derive(Debug)]
pub enum GateExecution {
    /// Proceed along the continue edge with the (possibly annotated) token.
    Continue(TokenInfo),
    /// The token routes to a named sink; its `Routed` outcome is recorded at
    /// sink write time.
    Routed {
        /// Destination sink.
        sink: SinkName,
        /// Token to hand to the sink executor.
        token: TokenInfo,
    },
    /// The token forked; the parent's `Forked` outcome is recorded and each
    /// child proceeds to the coalesce joining its branch.
    Forked {
        /// Child tokens in branch order.
        children: Vec<TokenInfo>,
    },
    /// The fork budget was exhausted; the token is quarantined.
    Quarantined,
}

/// The gate body to execute: a plugin instance or a parsed predicate.
pub enum GateImpl<'a> {
    /// Plugin-driven gate.
    Plugin(&'a mut dyn GatePlugin),
    /// Config-driven gate evaluating a sandboxed predicate.
    Config(&'a Predicate),
}

// ============================================================================
// SECTION: Gate Executor
// ============================================================================

/// Runs one gate against one token.
///
/// # Errors
///
/// Returns [`EngineError::MissingEdge`] when a routing label has no
/// registered edge (the state is closed `Failed` first), and
/// [`EngineError`] variants for audit failures.
#[allow(clippy::too_many_arguments, reason = "executor surface mirrors the audit dance inputs")]
pub fn execute_gate(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    run_id: &RunId,
    graph: &ExecutionGraph,
    node: &GraphNode,
    gate: GateImpl<'_>,
    token: &TokenInfo,
    tokens: &mut TokenManager,
    fork_budget: u64,
    routing_group: &mut u64,
    observer: &dyn TelemetryObserver,
) -> Result<GateExecution, EngineError> {
    let started_at = clock.now();
    let state_id = recorder.begin_node_state(run_id, &node.node_id, &token.token_id, started_at)?;
    let row_hash = hash_canonical_json(&row_value(&token.row_data))
        .map_err(elspeth_core::RecorderError::from)?;

    // Evaluate.
    let (condition, row, action) = match gate {
        GateImpl::Plugin(plugin) => {
            let ctx = PluginContext {
                run_id,
                config: &node.config,
                state_id: Some(&state_id),
                operation_id: None,
                recorder: Some(recorder),
            };
            match plugin.evaluate(token.row_data.clone(), &ctx) {
                Ok(verdict) => {
                    (json!(plugin.name()), verdict.row, verdict.action)
                }
                Err(error) => {
                    let duration_ms = clock.now().millis_since(started_at);
                    recorder.fail_node_state(
                        &state_id,
                        error.to_error_value(),
                        "evaluate",
                        duration_ms,
                    )?;
                    return Err(EngineError::Plugin(error));
                }
            }
        }
        GateImpl::Config(predicate) => match predicate.evaluate(&token.row_data) {
            Ok(result) => {
                let label = RouteLabel::new(if result { "true" } else { "false" });
                let action = match graph.resolve_route(&node.node_id, &label) {
                    Some(RouteResolution::Continue) | None => GateAction::Continue,
                    Some(RouteResolution::Fork) => GateAction::ForkToPaths(node.fork_to.clone()),
                    Some(RouteResolution::Sink(_)) => GateAction::Route(label),
                };
                (json!(predicate.source()), token.row_data.clone(), action)
            }
            Err(error) => {
                let duration_ms = clock.now().millis_since(started_at);
                recorder.fail_node_state(
                    &state_id,
                    json!({ "kind": "expression", "message": error.to_string() }),
                    "evaluate",
                    duration_ms,
                )?;
                return Err(EngineError::Plugin(elspeth_core::PluginError::logic(
                    error.to_string(),
                )));
            }
        },
    };

    let updated = token.with_data(row);
    let result_label = match &action {
        GateAction::Continue => "continue".to_string(),
        GateAction::Route(label) => format!("route:{label}"),
        GateAction::ForkToPaths(branches) => format!("fork:{}", branches.len()),
    };

    match action {
        GateAction::Continue => {
            record_single_routing(
                recorder,
                graph,
                node,
                &state_id,
                &RouteLabel::continue_label(),
                routing_group,
                clock,
                started_at,
            )?;
            close_gate_state(
                recorder,
                clock,
                &state_id,
                started_at,
                &row_hash,
                &condition,
                &result_label,
            )?;
            emit_gate_telemetry(observer, node, &updated, &state_id, &result_label);
            Ok(GateExecution::Continue(updated))
        }
        GateAction::Route(label) => {
            let Some(RouteResolution::Sink(sink)) =
                graph.resolve_route(&node.node_id, &label).cloned()
            else {
                return fail_missing_edge(
                    recorder, clock, node, &state_id, started_at, &label,
                );
            };
            record_single_routing(
                recorder, graph, node, &state_id, &label, routing_group, clock, started_at,
            )?;
            close_gate_state(
                recorder,
                clock,
                &state_id,
                started_at,
                &row_hash,
                &condition,
                &result_label,
            )?;
            emit_gate_telemetry(observer, node, &updated, &state_id, &result_label);
            Ok(GateExecution::Routed {
                sink,
                token: updated,
            })
        }
        GateAction::ForkToPaths(branches) => {
            let children = match tokens.fork(&updated, &branches, fork_budget) {
                Ok(children) => children,
                Err(EngineError::ForkBudgetExhausted {
                    budget,
                }) => {
                    let duration_ms = clock.now().millis_since(started_at);
                    recorder.fail_node_state(
                        &state_id,
                        json!({
                            "kind": "fork_budget_exhausted",
                            "budget": budget,
                        }),
                        "evaluate",
                        duration_ms,
                    )?;
                    recorder.record_token_outcome(&TokenOutcomeRecord {
                        run_id: run_id.clone(),
                        row_id: updated.row_id.clone(),
                        token_id: updated.token_id.clone(),
                        outcome: RowOutcome::Quarantined,
                        sink_name: None,
                        is_terminal: true,
                        recorded_at: clock.now(),
                    })?;
                    observer.on_event(&EngineEvent::TokenCompleted {
                        token_id: updated.token_id.clone(),
                        outcome: RowOutcome::Quarantined,
                    });
                    return Ok(GateExecution::Quarantined);
                }
                Err(other) => return Err(other),
            };

            for child in &children {
                let branch = child.branch_name.clone().unwrap_or_else(|| BranchName::new(""));
                recorder.fork_token(
                    &updated.token_id,
                    &child.token_id,
                    &branch,
                    clock.now(),
                )?;
            }

            // All sibling routing events share one group so replay can
            // reassemble the fork.
            *routing_group += 1;
            let group = format!("rg-{routing_group}");
            for branch in &branches {
                let label = RouteLabel::new(branch.as_str());
                let Some(edge_id) = graph.edge(&node.node_id, &label) else {
                    return fail_missing_edge(
                        recorder, clock, node, &state_id, started_at, &label,
                    );
                };
                recorder.record_routing(&state_id, edge_id, RoutingMode::Copy, &group)?;
            }

            close_gate_state(
                recorder,
                clock,
                &state_id,
                started_at,
                &row_hash,
                &condition,
                &result_label,
            )?;

            recorder.record_token_outcome(&TokenOutcomeRecord {
                run_id: run_id.clone(),
                row_id: updated.row_id.clone(),
                token_id: updated.token_id.clone(),
                outcome: RowOutcome::Forked,
                sink_name: None,
                is_terminal: true,
                recorded_at: clock.now(),
            })?;
            emit_gate_telemetry(observer, node, &updated, &state_id, &result_label);
            observer.on_event(&EngineEvent::TokenCompleted {
                token_id: updated.token_id.clone(),
                outcome: RowOutcome::Forked,
            });
            Ok(GateExecution::Forked {
                children,
            })
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Records one Move routing event for a label.
#[allow(clippy::too_many_arguments, reason = "helper threads the audit dance inputs")]
fn record_single_routing(
    recorder: &dyn AuditRecorder,
    graph: &ExecutionGraph,
    node: &GraphNode,
    state_id: &StateId,
    label: &RouteLabel,
    routing_group: &mut u64,
    clock: &dyn Clock,
    started_at: elspeth_core::Timestamp,
) -> Result<(), EngineError> {
    let Some(edge_id) = graph.edge(&node.node_id, label) else {
        let duration_ms = clock.now().millis_since(started_at);
        recorder.fail_node_state(
            state_id,
            json!({ "kind": "missing_edge", "label": label.as_str() }),
            "route",
            duration_ms,
        )?;
        return Err(EngineError::MissingEdge {
            node_id: node.node_id.clone(),
            label: label.clone(),
        });
    };
    *routing_group += 1;
    let group = format!("rg-{routing_group}");
    recorder.record_routing(state_id, edge_id, RoutingMode::Move, &group)?;
    Ok(())
}

/// Closes the gate state `Failed` for a missing edge, then raises.
fn fail_missing_edge(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    node: &GraphNode,
    state_id: &StateId,
    started_at: elspeth_core::Timestamp,
    label: &RouteLabel,
) -> Result<GateExecution, EngineError> {
    let duration_ms = clock.now().millis_since(started_at);
    recorder.fail_node_state(
        state_id,
        json!({ "kind": "missing_edge", "label": label.as_str() }),
        "route",
        duration_ms,
    )?;
    Err(EngineError::MissingEdge {
        node_id: node.node_id.clone(),
        label: label.clone(),
    })
}

/// Closes the gate state `Completed` with the decision recorded verbatim.
fn close_gate_state(
    recorder: &dyn AuditRecorder,
    clock: &dyn Clock,
    state_id: &StateId,
    started_at: elspeth_core::Timestamp,
    row_hash: &elspeth_core::HashDigest,
    condition: &serde_json::Value,
    result_label: &str,
) -> Result<(), EngineError> {
    let duration_ms = clock.now().millis_since(started_at);
    recorder.complete_node_state(state_id, StateCompletion {
        input_hash: row_hash.clone(),
        output_hash: row_hash.clone(),
        success_reason: json!({ "condition": condition, "result": result_label }),
        duration_ms,
    })?;
    Ok(())
}

/// Emits the gate telemetry event after the state is closed.
fn emit_gate_telemetry(
    observer: &dyn TelemetryObserver,
    node: &GraphNode,
    token: &TokenInfo,
    state_id: &StateId,
    action: &str,
) {
    observer.on_event(&EngineEvent::GateEvaluated {
        node_id: node.node_id.clone(),
        token_id: token.token_id.clone(),
        state_id: state_id.clone(),
        action: action.to_string(),
    });
}
