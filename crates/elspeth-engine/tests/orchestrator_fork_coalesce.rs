// elspeth-engine/tests/orchestrator_fork_coalesce.rs
// ============================================================================
// Module: Orchestrator Fork/Coalesce Tests
// Description: Fork lineage, branch joins, and merge strategies.
// ============================================================================
//! ## Overview
//! Covers the fork-coalesce scenario: a forked parent terminates `Forked`,
//! children are consumed by the join, the merged token terminates
//! `Coalesced`, and exactly one artifact lands at the downstream sink.

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
use elspeth_core::RowOutcome;
use elspeth_core::RunStatus;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use serde_json::json;

/// Builds a fork-then-coalesce pipeline over two branches.
fn fork_coalesce_settings(policy: CoalescePolicy, merge: MergeStrategy) -> PipelineSettings {
    let mut settings = settings_with_sinks(&["default"], "default");
    let mut routes = BTreeMap::new();
    routes.insert("true".to_string(), RouteTarget::Fork);
    settings.steps.push(StepSettings::Gate(GateSettings {
        name: "splitter".to_string(),
        condition: Some("row['id'] >= 0".to_string()),
        plugin: None,
        config: json!({}),
        routes,
        fork_to: vec!["path_a".to_string(), "path_b".to_string()],
    }));
    settings.steps.push(StepSettings::Coalesce(CoalesceSettings {
        name: "join".to_string(),
        branches: vec!["path_a".to_string(), "path_b".to_string()],
        policy,
        merge,
        collision: CollisionPolicy::LastWins,
    }));
    settings
}

// ============================================================================
// SECTION: Fork and Join
// ============================================================================

/// Tests the one-row fork-coalesce scenario end to end.
#[test]
fn test_fork_coalesce_single_row() {
    let settings = fork_coalesce_settings(CoalescePolicy::RequireAll, MergeStrategy::Union);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1, "value": "x"})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);

    let rows = recorder.rows(&result.run_id).unwrap();
    assert_eq!(rows.len(), 1);

    // Four tokens: the parent, two fork children, and the merged token.
    let tokens = recorder.tokens_for_row(&rows[0].row_id).unwrap();
    assert_eq!(tokens.len(), 4);
    let children: Vec<_> =
        tokens.iter().filter(|token| token.parent_token_id.is_some()).collect();
    assert_eq!(children.len(), 2);
    let branches: Vec<_> = children
        .iter()
        .filter_map(|token| token.branch_name.as_ref().map(elspeth_core::BranchName::as_str))
        .collect();
    assert!(branches.contains(&"path_a"));
    assert!(branches.contains(&"path_b"));

    let outcomes = recorder.token_outcomes(&result.run_id).unwrap();
    let terminal: Vec<_> = outcomes.iter().filter(|outcome| outcome.is_terminal).collect();
    let count = |kind: RowOutcome| {
        terminal.iter().filter(|outcome| outcome.outcome == kind).count()
    };
    assert_eq!(count(RowOutcome::Forked), 1);
    assert_eq!(count(RowOutcome::ConsumedInBatch), 2);
    assert_eq!(count(RowOutcome::Coalesced), 1);

    // One artifact at the downstream sink.
    assert_eq!(recorder.artifacts(&result.run_id).unwrap().len(), 1);
    assert_eq!(fx.sink_handles["default"].len(), 1);
}

/// Tests routing events of a fork share one routing group.
#[test]
fn test_fork_siblings_share_routing_group() {
    let settings = fork_coalesce_settings(CoalescePolicy::RequireAll, MergeStrategy::Union);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let events = recorder.routing_events(&result.run_id).unwrap();
    let copies: Vec<_> = events
        .iter()
        .filter(|event| event.mode == elspeth_core::RoutingMode::Copy)
        .collect();
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[0].routing_group_id, copies[1].routing_group_id);
}

// ============================================================================
// SECTION: Merge Strategies
// ============================================================================

/// Tests union merge combines branch fields key-wise.
#[test]
fn test_union_merge_combines_fields() {
    let settings = fork_coalesce_settings(CoalescePolicy::RequireAll, MergeStrategy::Union);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 7, "value": "v"})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let merged = fx.sink_handles["default"].rows();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("id"), Some(&json!(7)));
    assert_eq!(merged[0].get("value"), Some(&json!("v")));
}

/// Tests concat merge nests branch rows under their branch names.
#[test]
fn test_concat_merge_nests_by_branch() {
    let settings = fork_coalesce_settings(CoalescePolicy::RequireAll, MergeStrategy::Concat);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 7})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let merged = fx.sink_handles["default"].rows();
    assert_eq!(merged.len(), 1);
    assert!(merged[0].contains_key("path_a"));
    assert!(merged[0].contains_key("path_b"));
}

/// Tests quorum release fires as soon as enough branches arrive.
#[test]
fn test_quorum_releases_on_first_branch() {
    let settings = fork_coalesce_settings(CoalescePolicy::Quorum(1), MergeStrategy::First);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 7})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    // The first arrival satisfied the quorum; the second child remains a
    // leaf that the end-of-run flush resolves.
    assert_eq!(result.status, RunStatus::Completed);
    assert!(!fx.sink_handles["default"].is_empty());
}
