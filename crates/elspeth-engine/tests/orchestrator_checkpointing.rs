// elspeth-engine/tests/orchestrator_checkpointing.rs
// ============================================================================
// Module: Orchestrator Checkpointing Tests
// Description: Checkpoint cadence, retention, and crash-resume recovery.
// ============================================================================
//! ## Overview
//! Covers the checkpoint policies, deletion on success and preservation on
//! failure, and the aggregation crash/restart scenario: five rows buffered,
//! a crash, and a resumed process that flushes with all ten rows in order.

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

use common::FailAtTransform;
use common::base_settings;
use common::fixture;
use common::recorder_and_clock;
use elspeth_config::AggregationSettings;
use elspeth_config::CheckpointPolicy;
use elspeth_config::CheckpointSettings;
use elspeth_config::StepSettings;
use elspeth_config::TransformSettings;
use elspeth_config::TriggerSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::OnErrorPolicy;
use elspeth_core::RunStatus;
use elspeth_engine::EngineError;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use elspeth_plugins::BatchCollectTransform;
use elspeth_plugins::PassthroughTransform;
use serde_json::Value;
use serde_json::json;

/// Builds N inline rows `{"n": i}`.
fn rows(count: u64) -> Vec<Value> {
    (0 .. count).map(|index| json!({"n": index})).collect()
}

/// Checkpoint settings for a policy.
const fn checkpoints(policy: CheckpointPolicy) -> Option<CheckpointSettings> {
    Some(CheckpointSettings {
        policy,
    })
}

// ============================================================================
// SECTION: Cadence Policies
// ============================================================================

/// Tests the every-row policy persists one checkpoint per processed row.
#[test]
fn test_every_row_policy_checkpoints_each_row() {
    // A failing last row keeps the checkpoints around for inspection
    // (success would delete them).
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "fail_at".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(rows(3), &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FailAtTransform::new(3)));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let error = orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::EveryRow))
        .unwrap_err();
    assert!(matches!(error, EngineError::Plugin(_)));

    // Rows one and two succeeded before the crash.
    let run_id = elspeth_core::RunId::new("run-1");
    assert_eq!(recorder.checkpoints(&run_id).unwrap().len(), 2);
}

/// Tests the every-N policy respects its interval.
#[test]
fn test_every_n_policy_respects_interval() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "fail_at".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(rows(10), &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FailAtTransform::new(10)));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let error = orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::EveryN(4)))
        .unwrap_err();
    assert!(matches!(error, EngineError::Plugin(_)));

    let run_id = elspeth_core::RunId::new("run-1");
    let list = recorder.checkpoints(&run_id).unwrap();
    // Rows four and eight crossed the interval before the crash at ten.
    assert_eq!(list.len(), 2);
}

/// Tests no checkpoint manager means no checkpoints.
#[test]
fn test_none_policy_skips_checkpointing() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(rows(5), &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::None))
        .unwrap();
    assert!(recorder.checkpoints(&result.run_id).unwrap().is_empty());
}

// ============================================================================
// SECTION: Retention
// ============================================================================

/// Tests checkpoints are deleted when a run completes.
#[test]
fn test_checkpoints_deleted_on_success() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(rows(5), &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::EveryRow))
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(recorder.checkpoints(&result.run_id).unwrap().is_empty());
}

/// Tests checkpoints are preserved when a run fails.
#[test]
fn test_checkpoints_preserved_on_failure() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "fail_at".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(rows(5), &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FailAtTransform::new(4)));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::EveryRow))
        .unwrap_err();

    let run_id = elspeth_core::RunId::new("run-1");
    let run = recorder.run(&run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!recorder.checkpoints(&run_id).unwrap().is_empty());
}

// ============================================================================
// SECTION: Crash and Resume
// ============================================================================

/// Tests the aggregation crash/restart scenario: flush sees all ten rows.
#[test]
fn test_aggregation_state_survives_crash_and_resume() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "fail_at".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    settings.steps.push(StepSettings::Aggregation(AggregationSettings {
        name: "collect".to_string(),
        transform: "batch_collect".to_string(),
        config: json!({}),
        trigger: TriggerSettings::Count(10),
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let observer = NullObserver;
    let store = elspeth_core::MemoryPayloadStore::new();

    // First process: five rows buffer, the sixth crashes the run.
    let mut fx = fixture(rows(10), &settings);
    fx.plugins = fx
        .plugins
        .with_transform(Box::new(FailAtTransform::new(6)))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    orchestrator
        .run(&mut fx.plugins, Some(&store), checkpoints(CheckpointPolicy::EveryRow))
        .unwrap_err();

    let failed_run = elspeth_core::RunId::new("run-1");
    let checkpoint = recorder.latest_checkpoint(&failed_run).unwrap().unwrap();
    assert_eq!(checkpoint.sequence, 4);
    let aggregation_state = checkpoint.aggregation_state.clone().unwrap();
    let buffered = aggregation_state
        .as_object()
        .and_then(|state| {
            state.iter().find(|(key, _)| key.as_str() != "_version").map(|(_, entry)| entry)
        })
        .and_then(|entry| entry.get("tokens"))
        .and_then(Value::as_array)
        .map(Vec::len);
    assert_eq!(buffered, Some(5));

    // Second process: fresh plugin instances, the transform no longer fails
    // within the remaining rows, and the source repositions past row five.
    let mut resumed = fixture(rows(10), &settings);
    resumed.plugins = resumed
        .plugins
        .with_transform(Box::new(PassthroughTransform::new()))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let result = orchestrator
        .resume(
            &failed_run,
            &mut resumed.plugins,
            Some(&store),
            checkpoints(CheckpointPolicy::EveryRow),
        )
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    // Rows six through ten processed in the resumed run.
    assert_eq!(result.progress.rows_processed, 5);

    // The flush saw all ten rows in order.
    let merged = resumed.sink_handles["default"].rows();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("count"), Some(&json!(10)));
    let members = merged[0].get("rows").and_then(Value::as_array).unwrap();
    let order: Vec<i64> =
        members.iter().filter_map(|row| row.get("n").and_then(Value::as_i64)).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

    // The failed run's checkpoints are spent after a successful resume.
    assert!(recorder.checkpoints(&failed_run).unwrap().is_empty());
}

/// Tests resume is rejected for completed runs and absent checkpoints.
#[test]
fn test_resume_rejects_ineligible_runs() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let observer = NullObserver;
    let store = elspeth_core::MemoryPayloadStore::new();

    let mut fx = fixture(rows(2), &settings);
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let completed = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let mut again = fixture(rows(2), &settings);
    let error = orchestrator
        .resume(&completed.run_id, &mut again.plugins, Some(&store), None)
        .unwrap_err();
    assert!(matches!(error, EngineError::NotResumable { .. }));

    let error = orchestrator
        .resume(
            &elspeth_core::RunId::new("run-ghost"),
            &mut again.plugins,
            Some(&store),
            None,
        )
        .unwrap_err();
    assert!(matches!(error, EngineError::NotResumable { .. }));
}
