// elspeth-engine/tests/orchestrator_routing.rs
// ============================================================================
// Module: Orchestrator Routing Tests
// Description: Gate routing, routed-row accounting, and route validation.
// ============================================================================
//! ## Overview
//! Covers the threshold-gate scenarios: routed rows reach their named sink
//! with a `Routed` outcome, routed rows count separately in progress, and a
//! route to an unknown sink fails at initialisation before any row loads.

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
use elspeth_config::GateSettings;
use elspeth_config::RouteTarget;
use elspeth_config::StepSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::RouteLabel;
use elspeth_core::RowOutcome;
use elspeth_core::RunStatus;
use elspeth_engine::EngineError;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use elspeth_plugins::ThresholdGate;
use serde_json::json;

/// Builds the threshold config-gate step: value > 50 routes to `high`.
fn threshold_gate(target: &str) -> StepSettings {
    let mut routes = BTreeMap::new();
    routes.insert("true".to_string(), RouteTarget::Sink(target.to_string()));
    routes.insert("false".to_string(), RouteTarget::Continue);
    StepSettings::Gate(GateSettings {
        name: "threshold".to_string(),
        condition: Some("row['value'] > 50".to_string()),
        plugin: None,
        config: json!({}),
        routes,
        fork_to: Vec::new(),
    })
}

// ============================================================================
// SECTION: Config Gate Routing
// ============================================================================

/// Tests the threshold scenario: one routed row, two completed rows.
#[test]
fn test_threshold_gate_routes_over_to_named_sink() {
    let mut settings = settings_with_sinks(&["default", "high"], "default");
    settings.steps.push(threshold_gate("high"));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(
        vec![json!({"value": 10}), json!({"value": 100}), json!({"value": 30})],
        &settings,
    );

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.progress.rows_routed, 1);
    assert_eq!(result.progress.rows_succeeded, 2);

    assert_eq!(fx.sink_handles["high"].len(), 1);
    assert_eq!(fx.sink_handles["default"].len(), 2);

    let outcomes = recorder.token_outcomes(&result.run_id).unwrap();
    let routed: Vec<_> =
        outcomes.iter().filter(|outcome| outcome.outcome == RowOutcome::Routed).collect();
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].sink_name.as_ref().map(elspeth_core::SinkName::as_str), Some("high"));
    assert!(routed[0].is_terminal);

    let completed =
        outcomes.iter().filter(|outcome| outcome.outcome == RowOutcome::Completed).count();
    assert_eq!(completed, 2);
}

/// Tests routed rows are terminal at the sink they were routed to.
#[test]
fn test_routed_row_value_reaches_named_sink() {
    let mut settings = settings_with_sinks(&["default", "high"], "default");
    settings.steps.push(threshold_gate("high"));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"value": 99})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let routed_rows = fx.sink_handles["high"].rows();
    assert_eq!(routed_rows.len(), 1);
    assert_eq!(routed_rows[0].get("value"), Some(&json!(99)));
}

// ============================================================================
// SECTION: Plugin Gate Routing
// ============================================================================

/// Tests a plugin gate routes through the same resolution map.
#[test]
fn test_plugin_gate_routes_to_named_sink() {
    let mut settings = settings_with_sinks(&["default", "high"], "default");
    let mut routes = BTreeMap::new();
    routes.insert("high".to_string(), RouteTarget::Sink("high".to_string()));
    settings.steps.push(StepSettings::Gate(GateSettings {
        name: "threshold_plugin".to_string(),
        condition: None,
        plugin: Some("threshold".to_string()),
        config: json!({}),
        routes,
        fork_to: Vec::new(),
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"value": 100}), json!({"value": 1})], &settings);
    fx.plugins = fx.plugins.with_gate(
        "threshold_plugin",
        Box::new(ThresholdGate::new("value", 50.0, RouteLabel::new("high"))),
    );

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.progress.rows_routed, 1);
    assert_eq!(result.progress.rows_succeeded, 1);
    assert_eq!(fx.sink_handles["high"].len(), 1);
}

// ============================================================================
// SECTION: Route Validation
// ============================================================================

/// Tests a route to an unknown sink fails at init, before any row loads.
#[test]
fn test_route_to_unknown_sink_fails_at_init() {
    let mut settings = settings_with_sinks(&["default"], "default");
    settings.steps.push(threshold_gate("nonexistent_sink"));
    let (recorder, payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"value": 10})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let error = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap_err();

    let message = error.to_string();
    assert!(message.contains("nonexistent_sink"));
    assert!(message.contains("default"));
    assert!(matches!(error, EngineError::GraphValidation(_)));

    // No rows were processed: source entry never stored a payload.
    assert!(payloads.is_empty().unwrap());
    assert_eq!(fx.sink_handles["default"].len(), 0);
}
