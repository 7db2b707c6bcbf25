// system-tests/tests/recovery.rs
// ============================================================================
// Module: Crash Recovery Tests
// Description: Durable checkpoint resume across recorder re-opens.
// ============================================================================
//! ## Overview
//! The aggregation crash/restart scenario over the durable stores: five
//! rows buffered, a crash, a reopened audit store in a "new process", and a
//! resume whose flush sees all ten rows in order. Resume must yield the
//! same terminal outcomes an uninterrupted run produces.

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

use std::collections::BTreeMap;

use elspeth_config::AggregationSettings;
use elspeth_config::CheckpointPolicy;
use elspeth_config::CheckpointSettings;
use elspeth_config::StepSettings;
use elspeth_config::TransformSettings;
use elspeth_config::TriggerSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::DeterminismClass;
use elspeth_core::OnErrorPolicy;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunStatus;
use elspeth_core::SystemClock;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use elspeth_plugins::BatchCollectTransform;
use elspeth_plugins::PassthroughTransform;
use serde_json::Value;
use serde_json::json;
use system_tests::Harness;
use system_tests::plugins;
use system_tests::settings_with_sinks;

/// Transform that raises on the Nth row it sees (1-based).
#[derive(Debug)]
struct FailAtTransform {
    /// Row ordinal that fails, 1-based.
    fail_at: u64,
    /// Rows seen so far.
    seen: u64,
}

impl TransformPlugin for FailAtTransform {
    fn name(&self) -> &str {
        "fail_at"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        self.seen += 1;
        if self.seen == self.fail_at {
            return TransformOutput::Error {
                error: json!({ "kind": "logic", "message": "induced crash" }),
            };
        }
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "passed" }),
        }
    }
}

/// Builds the count-ten aggregation pipeline.
fn aggregation_settings() -> elspeth_config::PipelineSettings {
    let mut settings = settings_with_sinks(&["default"], "default");
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
    settings.checkpoint = Some(CheckpointSettings {
        policy: CheckpointPolicy::EveryRow,
    });
    settings
}

/// Ten inline rows `{"n": i}`.
fn ten_rows() -> Vec<Value> {
    (0 .. 10).map(|index| json!({"n": index})).collect()
}

// ============================================================================
// SECTION: S5 Crash and Resume
// ============================================================================

/// Tests the durable crash/restart scenario flushes all ten rows in order.
#[test]
fn test_s5_aggregation_crash_restart() {
    let harness = Harness::new();
    let settings = aggregation_settings();
    let clock = SystemClock::new();
    let observer = NullObserver;

    // First process: five rows buffer, the sixth crashes.
    let mut fx = plugins(ten_rows(), &settings);
    fx.set = fx
        .set
        .with_transform(Box::new(FailAtTransform {
            fail_at: 6,
            seen: 0,
        }))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &harness.recorder, &clock, &observer);
    orchestrator
        .run(&mut fx.set, Some(harness.payloads.as_ref()), settings.checkpoint)
        .unwrap_err();

    let failed_runs = harness
        .recorder
        .runs_completed_before(elspeth_core::Timestamp::from_unix_millis(i64::MAX))
        .unwrap();
    assert_eq!(failed_runs.len(), 1);
    let failed_run = failed_runs[0].clone();

    // The checkpoint carries the aggregation state in its audit record.
    let checkpoint = harness.recorder.latest_checkpoint(&failed_run).unwrap().unwrap();
    assert!(checkpoint.aggregation_state.is_some());
    assert_eq!(checkpoint.sequence, 4);

    // Second process: a reopened store and fresh plugin instances.
    let reopened = harness.reopen();
    let mut resumed = plugins(ten_rows(), &settings);
    resumed.set = resumed
        .set
        .with_transform(Box::new(PassthroughTransform::new()))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &reopened, &clock, &observer);
    let result = orchestrator
        .resume(
            &failed_run,
            &mut resumed.set,
            Some(harness.payloads.as_ref()),
            settings.checkpoint,
        )
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let merged = resumed.sink_handles["default"].rows();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].get("count"), Some(&json!(10)));
    let order: Vec<i64> = merged[0]
        .get("rows")
        .and_then(Value::as_array)
        .unwrap()
        .iter()
        .filter_map(|row| row.get("n").and_then(Value::as_i64))
        .collect();
    assert_eq!(order, (0 .. 10).collect::<Vec<_>>());
}

/// Tests crash-plus-resume matches the uninterrupted run's terminal
/// outcomes per source row (recovery idempotence).
#[test]
fn test_recovery_idempotence() {
    // Uninterrupted baseline.
    let baseline_harness = Harness::new();
    let mut baseline_settings = aggregation_settings();
    baseline_settings.steps.remove(0);
    let clock = SystemClock::new();
    let observer = NullObserver;
    let mut baseline = plugins(ten_rows(), &baseline_settings);
    baseline.set = baseline
        .set
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator =
        Orchestrator::new(&baseline_settings, &baseline_harness.recorder, &clock, &observer);
    let baseline_result = orchestrator
        .run(&mut baseline.set, Some(baseline_harness.payloads.as_ref()), None)
        .unwrap();
    let baseline_outcomes = terminal_outcomes_by_row(
        &baseline_harness.recorder,
        &baseline_result.run_id,
    );

    // Crash and resume.
    let harness = Harness::new();
    let settings = aggregation_settings();
    let mut fx = plugins(ten_rows(), &settings);
    fx.set = fx
        .set
        .with_transform(Box::new(FailAtTransform {
            fail_at: 6,
            seen: 0,
        }))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &harness.recorder, &clock, &observer);
    orchestrator
        .run(&mut fx.set, Some(harness.payloads.as_ref()), settings.checkpoint)
        .unwrap_err();
    let failed_run = harness
        .recorder
        .runs_completed_before(elspeth_core::Timestamp::from_unix_millis(i64::MAX))
        .unwrap()[0]
        .clone();

    let reopened = harness.reopen();
    let mut resumed = plugins(ten_rows(), &settings);
    resumed.set = resumed
        .set
        .with_transform(Box::new(PassthroughTransform::new()))
        .with_batch_transform("collect", Box::new(BatchCollectTransform::new()));
    let orchestrator = Orchestrator::new(&settings, &reopened, &clock, &observer);
    let resumed_result = orchestrator
        .resume(
            &failed_run,
            &mut resumed.set,
            Some(harness.payloads.as_ref()),
            settings.checkpoint,
        )
        .unwrap();

    // Union the crashed and resumed runs: restored tokens carry row ids
    // from the first run while their flush outcomes land in the second, so
    // rows and outcomes are combined across both runs before grouping.
    let mut rows = reopened.rows(&failed_run).unwrap();
    rows.extend(reopened.rows(&resumed_result.run_id).unwrap());
    let mut outcomes = reopened.token_outcomes(&failed_run).unwrap();
    outcomes.extend(reopened.token_outcomes(&resumed_result.run_id).unwrap());
    let combined_rows = group_terminal_outcomes(&rows, &outcomes);
    assert_eq!(combined_rows, baseline_outcomes);
}

/// Returns terminal outcome kinds per source row index, sorted.
fn terminal_outcomes_by_row(
    recorder: &dyn AuditRecorder,
    run_id: &elspeth_core::RunId,
) -> BTreeMap<u64, Vec<RowOutcome>> {
    let rows = recorder.rows(run_id).unwrap();
    let outcomes = recorder.token_outcomes(run_id).unwrap();
    group_terminal_outcomes(&rows, &outcomes)
}

/// Groups terminal outcome kinds by source row index.
fn group_terminal_outcomes(
    rows: &[elspeth_core::RowRecord],
    outcomes: &[elspeth_core::TokenOutcomeRecord],
) -> BTreeMap<u64, Vec<RowOutcome>> {
    let mut by_row = BTreeMap::new();
    for row in rows {
        let mut kinds: Vec<RowOutcome> = outcomes
            .iter()
            .filter(|outcome| outcome.row_id == row.row_id && outcome.is_terminal)
            .map(|outcome| outcome.outcome)
            .collect();
        kinds.sort_by_key(|kind| kind.label());
        by_row.insert(row.row_index, kinds);
    }
    by_row
}
