// elspeth-engine/tests/orchestrator_core.rs
// ============================================================================
// Module: Orchestrator Core Tests
// Description: Run lifecycle, audit capture, and failure handling.
// ============================================================================
//! ## Overview
//! Covers the simple-pipeline path end to end: run status, per-row audit
//! records, artifact registration, config capture, lifecycle hooks, and the
//! payload-store precondition.

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

use common::FailingTransform;
use common::JournalingTransform;
use common::LifecycleJournal;
use common::base_settings;
use common::fixture;
use common::recorder_and_clock;
use elspeth_config::StepSettings;
use elspeth_config::TransformSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::OnErrorPolicy;
use elspeth_core::RowOutcome;
use elspeth_core::RunStatus;
use elspeth_engine::EngineError;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use elspeth_plugins::PassthroughTransform;
use serde_json::json;

/// Adds a passthrough transform step to settings.
fn with_passthrough(settings: &mut elspeth_config::PipelineSettings) {
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "passthrough".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
}

// ============================================================================
// SECTION: Simple Pipeline
// ============================================================================

/// Tests the two-row passthrough pipeline completes with full audit capture.
#[test]
fn test_run_simple_pipeline() {
    let mut settings = base_settings();
    with_passthrough(&mut settings);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(
        vec![json!({"id": 1, "value": "hello"}), json!({"id": 2, "value": "world"})],
        &settings,
    );
    fx.plugins = fx.plugins.with_transform(Box::new(PassthroughTransform::new()));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let payload_guard = elspeth_core::MemoryPayloadStore::new();
    let result =
        orchestrator.run(&mut fx.plugins, Some(&payload_guard), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.progress.rows_processed, 2);
    assert_eq!(result.progress.rows_succeeded, 2);
    assert_eq!(result.progress.rows_failed, 0);

    let rows = recorder.rows(&result.run_id).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.source_data_hash.value.len(), 64);
        assert!(!row.source_data_ref.is_empty());
    }

    let artifacts = recorder.artifacts(&result.run_id).unwrap();
    assert_eq!(artifacts.len(), 1);
    assert!(!artifacts[0].content_hash.value.is_empty());

    // Both rows reached the default sink.
    assert_eq!(fx.sink_handles["default"].len(), 2);

    // No open states remain after a successful run.
    assert_eq!(recorder.open_state_count(&result.run_id).unwrap(), 0);
}

/// Tests a pipeline with no transforms delivers rows straight to the sink.
#[test]
fn test_run_no_transforms() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.progress.rows_succeeded, 1);
    assert_eq!(fx.sink_handles["default"].len(), 1);
}

/// Tests an empty source completes with zero rows and no artifacts.
#[test]
fn test_run_empty_source() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(Vec::new(), &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.progress.rows_processed, 0);
    assert!(recorder.artifacts(&result.run_id).unwrap().is_empty());
}

// ============================================================================
// SECTION: Config Capture
// ============================================================================

/// Tests the run row captures the resolved settings and their hash.
#[test]
fn test_run_records_resolved_config() {
    let mut settings = base_settings();
    with_passthrough(&mut settings);
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(PassthroughTransform::new()));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let run = recorder.run(&result.run_id).unwrap().unwrap();
    assert_eq!(run.settings, settings.to_value().unwrap());
    assert_eq!(run.config_hash.value.len(), 64);
    assert_eq!(run.engine_version, elspeth_engine::ENGINE_VERSION);
    assert!(run.schema_contract.is_some());
}

// ============================================================================
// SECTION: Payload Store Precondition
// ============================================================================

/// Tests the orchestrator fails immediately without a payload store.
#[test]
fn test_run_requires_payload_store() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let result = orchestrator.run(&mut fx.plugins, None, None);

    assert!(matches!(result, Err(EngineError::PayloadStoreRequired)));
}

// ============================================================================
// SECTION: Failure Handling
// ============================================================================

/// Tests a raising transform marks the run failed and propagates.
#[test]
fn test_run_marks_failed_on_transform_error() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "failing".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FailingTransform {
        policy: OnErrorPolicy::Raise,
        kind: "logic",
    }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let error = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap_err();
    assert!(matches!(error, EngineError::Plugin(_)));
}

/// Tests the discard policy quarantines the token and the run completes.
#[test]
fn test_discard_policy_quarantines() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "failing".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Discard,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1}), json!({"id": 2})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FailingTransform {
        policy: OnErrorPolicy::Discard,
        kind: "logic",
    }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.progress.rows_quarantined, 2);
    let outcomes = recorder.token_outcomes(&result.run_id).unwrap();
    assert!(outcomes.iter().all(|outcome| outcome.outcome == RowOutcome::Quarantined));
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Tests a pre-set cancellation flag closes the run cancelled at the first
/// row boundary.
#[test]
fn test_cancellation_closes_run_cancelled() {
    let settings = base_settings();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1}), json!({"id": 2})], &settings);

    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer)
        .with_cancellation(flag);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.progress.rows_processed, 0);

    // Cancelled runs are not resumable.
    let mut again = fixture(vec![json!({"id": 1})], &settings);
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let error = orchestrator
        .resume(&result.run_id, &mut again.plugins, Some(&store), None)
        .unwrap_err();
    assert!(matches!(error, EngineError::NotResumable { .. }));
}

// ============================================================================
// SECTION: Lifecycle Hooks
// ============================================================================

/// Tests on_complete and close run after processing, in order.
#[test]
fn test_lifecycle_hooks_called_in_order() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "journaling".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let journal = LifecycleJournal::default();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(JournalingTransform {
        journal: journal.clone(),
    }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    let events = journal.snapshot();
    assert_eq!(events, vec![
        "transform.process".to_string(),
        "transform.on_complete".to_string(),
        "transform.close".to_string(),
    ]);
}

/// Tests on_complete runs even when the run fails.
#[test]
fn test_on_complete_called_on_error() {
    let mut settings = base_settings();
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "journaling".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "failing".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let journal = LifecycleJournal::default();
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx
        .plugins
        .with_transform(Box::new(JournalingTransform {
            journal: journal.clone(),
        }))
        .with_transform(Box::new(FailingTransform {
            policy: OnErrorPolicy::Raise,
            kind: "logic",
        }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None);
    assert!(result.is_err());

    let events = journal.snapshot();
    assert!(events.contains(&"transform.on_complete".to_string()));
    assert!(events.contains(&"transform.close".to_string()));
}
