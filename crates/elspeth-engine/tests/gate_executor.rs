// elspeth-engine/tests/gate_executor.rs
// ============================================================================
// Module: Gate Executor Tests
// Description: Gate evaluation, routing events, forks, and missing edges.
// ============================================================================
//! ## Overview
//! Exercises the gate executor directly: continue and route resolutions,
//! fork child creation with shared routing groups, the audited failure path
//! for missing edges, and the fork budget quarantine.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use std::collections::BTreeMap;

use common::fixture;
use common::recorder_and_clock;
use common::settings_with_sinks;
use elspeth_config::CoalescePolicy;
use elspeth_config::CoalesceSettings;
use elspeth_config::CollisionPolicy;
use elspeth_config::GateSettings;
use elspeth_config::MergeStrategy;
use elspeth_config::PipelineSettings;
use elspeth_config::RouteTarget;
use elspeth_config::StepSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::MemoryRecorder;
use elspeth_core::NodeStateStatus;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::TokenInfo;
use elspeth_core::Timestamp;
use elspeth_engine::EngineError;
use elspeth_engine::ExecutionGraph;
use elspeth_engine::GateExecution;
use elspeth_engine::GateImpl;
use elspeth_engine::NodeDetail;
use elspeth_engine::NullObserver;
use elspeth_engine::TokenManager;
use elspeth_engine::execute_gate;
use serde_json::json;

/// Prepared gate-executor surroundings.
struct Setup {
    /// In-memory recorder.
    recorder: MemoryRecorder,
    /// Manual clock.
    clock: elspeth_core::ManualClock,
    /// Registered execution graph.
    graph: ExecutionGraph,
    /// Open run identifier.
    run_id: RunId,
    /// Staged token carrying `{"value": 100}`.
    token: TokenInfo,
    /// Token manager owning the staged token.
    tokens: TokenManager,
}

/// Builds a graph for the provided settings, registered or not, and stages
/// one token carrying `{"value": 100}`.
fn setup_with(settings: &PipelineSettings, register_edges: bool) -> Setup {
    let (recorder, _payloads, clock) = recorder_and_clock();
    let fx = fixture(Vec::new(), settings);
    let mut graph = ExecutionGraph::build(settings, &fx.plugins).unwrap();
    let run = recorder
        .begin_run(&settings.to_value().unwrap(), "test", Timestamp::from_unix_millis(1))
        .unwrap();
    if register_edges {
        graph.register(&recorder, &run.run_id, Timestamp::from_unix_millis(1)).unwrap();
    } else {
        // Register nodes only so states can open; every edge stays missing.
        for node_id in graph.node_ids() {
            let node = graph.node(&node_id).unwrap().clone();
            recorder
                .register_node(elspeth_core::NodeRegistration {
                    run_id: run.run_id.clone(),
                    node_id: node.node_id,
                    plugin_name: node.plugin_name,
                    kind: node.kind,
                    plugin_version: node.plugin_version,
                    determinism: node.determinism,
                    config: node.config,
                    input_contract: node.input_contract,
                    output_contract: node.output_contract,
                    registered_at: Timestamp::from_unix_millis(1),
                })
                .unwrap();
        }
    }

    let mut data = RowData::new();
    data.insert("value".to_string(), json!(100));
    let row = recorder
        .create_row(&run.run_id, graph.source_id(), 0, &data, None, Timestamp::from_unix_millis(2))
        .unwrap();
    let mut tokens = TokenManager::new();
    let token = tokens.create_initial(&row.row_id, data);
    recorder.create_token(&row.row_id, &token.token_id, Timestamp::from_unix_millis(2)).unwrap();

    Setup {
        recorder,
        clock,
        graph,
        run_id: run.run_id,
        token,
        tokens,
    }
}

/// Builds threshold-gate settings routing `true` to the target.
fn gate_settings(target: RouteTarget, fork_to: Vec<String>) -> PipelineSettings {
    let mut settings = settings_with_sinks(&["default", "high"], "default");
    let mut routes = BTreeMap::new();
    routes.insert("true".to_string(), target);
    routes.insert("false".to_string(), RouteTarget::Continue);
    settings.steps.push(StepSettings::Gate(GateSettings {
        name: "gate".to_string(),
        condition: Some("row['value'] > 50".to_string()),
        plugin: None,
        config: json!({}),
        routes,
        fork_to: fork_to.clone(),
    }));
    if !fork_to.is_empty() {
        settings.steps.push(StepSettings::Coalesce(CoalesceSettings {
            name: "join".to_string(),
            branches: fork_to,
            policy: CoalescePolicy::RequireAll,
            merge: MergeStrategy::Union,
            collision: CollisionPolicy::LastWins,
        }));
    }
    settings
}

/// Returns the gate node and its parsed predicate.
fn gate_node(graph: &ExecutionGraph) -> (elspeth_engine::GraphNode, elspeth_expr::Predicate) {
    for node_id in graph.node_ids() {
        let node = graph.node(&node_id).unwrap();
        if let NodeDetail::ConfigGate {
            predicate, ..
        } = &node.detail
        {
            return (node.clone(), predicate.clone());
        }
    }
    panic!("settings declared no config gate");
}

// ============================================================================
// SECTION: Continue and Route
// ============================================================================

/// Tests a false-evaluating gate continues with a completed state.
#[test]
fn test_gate_continue() {
    let settings = gate_settings(RouteTarget::Sink("high".to_string()), Vec::new());
    let mut setup = setup_with(&settings, true);
    let (node, predicate) = gate_node(&setup.graph);
    let mut low = setup.token.clone();
    low.row_data.insert("value".to_string(), json!(10));
    let mut group = 0;
    let observer = NullObserver;

    let execution = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &low,
        &mut setup.tokens,
        64,
        &mut group,
        &observer,
    )
    .unwrap();

    assert!(matches!(execution, GateExecution::Continue(_)));
    let states = setup.recorder.node_states(&setup.run_id).unwrap();
    assert_eq!(states.len(), 1);
    let NodeStateStatus::Completed {
        success_reason, ..
    } = &states[0].status
    else {
        panic!("expected completed state");
    };
    // The decision is recorded verbatim: condition plus result.
    assert_eq!(success_reason.get("condition"), Some(&json!("row['value'] > 50")));
    assert_eq!(success_reason.get("result"), Some(&json!("continue")));
}

/// Tests a true-evaluating gate routes to the resolved sink.
#[test]
fn test_gate_route() {
    let settings = gate_settings(RouteTarget::Sink("high".to_string()), Vec::new());
    let mut setup = setup_with(&settings, true);
    let (node, predicate) = gate_node(&setup.graph);
    let token = setup.token.clone();
    let mut group = 0;
    let observer = NullObserver;

    let execution = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &token,
        &mut setup.tokens,
        64,
        &mut group,
        &observer,
    )
    .unwrap();

    let GateExecution::Routed {
        sink, ..
    } = execution
    else {
        panic!("expected a routed execution");
    };
    assert_eq!(sink.as_str(), "high");

    let events = setup.recorder.routing_events(&setup.run_id).unwrap();
    assert_eq!(events.len(), 1);
}

// ============================================================================
// SECTION: Fork
// ============================================================================

/// Tests a fork creates children with lineage and a shared routing group.
#[test]
fn test_gate_fork_creates_children() {
    let settings = gate_settings(
        RouteTarget::Fork,
        vec!["path_a".to_string(), "path_b".to_string()],
    );
    let mut setup = setup_with(&settings, true);
    let (node, predicate) = gate_node(&setup.graph);
    let token = setup.token.clone();
    let mut group = 0;
    let observer = NullObserver;

    let execution = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &token,
        &mut setup.tokens,
        64,
        &mut group,
        &observer,
    )
    .unwrap();

    let GateExecution::Forked {
        children,
    } = execution
    else {
        panic!("expected a forked execution");
    };
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|child| {
        child.parent_token_id.as_ref() == Some(&token.token_id)
    }));

    let events = setup.recorder.routing_events(&setup.run_id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].routing_group_id, events[1].routing_group_id);

    // The parent terminates with a Forked outcome.
    let outcomes = setup.recorder.token_outcomes(&setup.run_id).unwrap();
    assert!(outcomes.iter().any(|outcome| {
        outcome.token_id == token.token_id
            && outcome.outcome == RowOutcome::Forked
            && outcome.is_terminal
    }));
}

/// Tests an exhausted fork budget quarantines the token.
#[test]
fn test_fork_budget_exhausted_quarantines() {
    let settings = gate_settings(
        RouteTarget::Fork,
        vec!["path_a".to_string(), "path_b".to_string()],
    );
    let mut setup = setup_with(&settings, true);
    let (node, predicate) = gate_node(&setup.graph);
    let token = setup.token.clone();
    let mut group = 0;
    let observer = NullObserver;

    let execution = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &token,
        &mut setup.tokens,
        1,
        &mut group,
        &observer,
    )
    .unwrap();

    assert!(matches!(execution, GateExecution::Quarantined));
    let outcomes = setup.recorder.token_outcomes(&setup.run_id).unwrap();
    assert!(outcomes.iter().any(|outcome| {
        outcome.outcome == RowOutcome::Quarantined && outcome.is_terminal
    }));
    let states = setup.recorder.node_states(&setup.run_id).unwrap();
    assert!(matches!(states[0].status, NodeStateStatus::Failed { .. }));
}

// ============================================================================
// SECTION: Missing Edge
// ============================================================================

/// Tests a missing edge closes the state failed before raising.
#[test]
fn test_missing_edge_fails_state_first() {
    let settings = gate_settings(RouteTarget::Sink("high".to_string()), Vec::new());
    let mut setup = setup_with(&settings, false);
    let (node, predicate) = gate_node(&setup.graph);
    let mut low = setup.token.clone();
    low.row_data.insert("value".to_string(), json!(10));
    let mut group = 0;
    let observer = NullObserver;

    let error = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &low,
        &mut setup.tokens,
        64,
        &mut group,
        &observer,
    )
    .unwrap_err();

    assert!(matches!(error, EngineError::MissingEdge { .. }));
    // Audit completeness: the state closed failed before the raise.
    assert_eq!(setup.recorder.open_state_count(&setup.run_id).unwrap(), 0);
    let states = setup.recorder.node_states(&setup.run_id).unwrap();
    assert!(matches!(states[0].status, NodeStateStatus::Failed { .. }));
}

// ============================================================================
// SECTION: Expression Failures
// ============================================================================

/// Tests a predicate evaluation error records a failed state.
#[test]
fn test_expression_error_records_failure() {
    let mut settings = settings_with_sinks(&["default"], "default");
    let mut routes = BTreeMap::new();
    routes.insert("true".to_string(), RouteTarget::Continue);
    settings.steps.push(StepSettings::Gate(GateSettings {
        name: "gate".to_string(),
        condition: Some("row['missing_field'] > 50".to_string()),
        plugin: None,
        config: json!({}),
        routes,
        fork_to: Vec::new(),
    }));
    let mut setup = setup_with(&settings, true);
    let (node, predicate) = gate_node(&setup.graph);
    let token = setup.token.clone();
    let mut group = 0;
    let observer = NullObserver;

    let error = execute_gate(
        &setup.recorder,
        &setup.clock,
        &setup.run_id,
        &setup.graph,
        &node,
        GateImpl::Config(&predicate),
        &token,
        &mut setup.tokens,
        64,
        &mut group,
        &observer,
    )
    .unwrap_err();

    assert!(matches!(error, EngineError::Plugin(_)));
    let states = setup.recorder.node_states(&setup.run_id).unwrap();
    let NodeStateStatus::Failed {
        error_phase, ..
    } = &states[0].status
    else {
        panic!("expected failed state");
    };
    assert_eq!(error_phase, "evaluate");
}
