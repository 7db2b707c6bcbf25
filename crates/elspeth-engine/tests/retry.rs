// elspeth-engine/tests/retry.rs
// ============================================================================
// Module: Retry Manager Tests
// Description: Classified retry, attempt budgets, and state metadata.
// ============================================================================
//! ## Overview
//! Validates retry classification and the single-completed-state contract:
//! a transform that recovers after transient failures closes one completed
//! state carrying the attempt count in its metadata.

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

use common::FlakyTransform;
use common::base_settings;
use common::fixture;
use common::recorder_and_clock;
use elspeth_config::RetrySettings;
use elspeth_config::StepSettings;
use elspeth_config::TransformSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::NodeStateStatus;
use elspeth_core::OnErrorPolicy;
use elspeth_core::PluginError;
use elspeth_core::PluginErrorKind;
use elspeth_core::RunStatus;
use elspeth_engine::NullObserver;
use elspeth_engine::Orchestrator;
use elspeth_engine::RetryManager;
use serde_json::json;

/// Fast retry settings for tests.
fn fast_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        retryable: vec![PluginErrorKind::Network, PluginErrorKind::Io],
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Tests a retryable failure is retried to success with attempts counted.
#[test]
fn test_retryable_failure_is_retried() {
    let manager = RetryManager::new(fast_retry());
    let mut failures = 2;

    let retried = manager.call(|| {
        if failures > 0 {
            failures -= 1;
            return Err(PluginError::Failed {
                kind: PluginErrorKind::Network,
                message: "transient".to_string(),
            });
        }
        Ok(42)
    });

    assert_eq!(retried.attempts, 3);
    assert_eq!(retried.result.unwrap(), 42);
}

/// Tests a non-retryable failure bypasses the retry loop.
#[test]
fn test_non_retryable_failure_bypasses_retry() {
    let manager = RetryManager::new(fast_retry());
    let mut calls = 0;

    let retried = manager.call(|| -> Result<(), PluginError> {
        calls += 1;
        Err(PluginError::logic("deterministic bug"))
    });

    assert_eq!(calls, 1);
    assert_eq!(retried.attempts, 1);
    assert!(retried.result.is_err());
}

/// Tests the attempt budget is honoured.
#[test]
fn test_attempt_budget_is_honoured() {
    let manager = RetryManager::new(fast_retry());
    let mut calls = 0;

    let retried = manager.call(|| -> Result<(), PluginError> {
        calls += 1;
        Err(PluginError::Failed {
            kind: PluginErrorKind::Network,
            message: "always transient".to_string(),
        })
    });

    assert_eq!(calls, 3);
    assert!(retried.result.is_err());
}

// ============================================================================
// SECTION: Audit Integration
// ============================================================================

/// Tests a recovered transform closes one completed state with the attempt
/// count in its metadata.
#[test]
fn test_recovered_transform_records_attempts() {
    let mut settings = base_settings();
    settings.retry = Some(fast_retry());
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "flaky".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FlakyTransform {
        failures_left: 2,
    }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    let result = orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let states = recorder.node_states(&result.run_id).unwrap();
    let transform_states: Vec<_> = states
        .iter()
        .filter(|state| state.node_id.as_str().starts_with("flaky"))
        .collect();
    assert_eq!(transform_states.len(), 1);
    assert!(matches!(transform_states[0].status, NodeStateStatus::Completed { .. }));
    assert_eq!(
        transform_states[0].metadata.as_ref().and_then(|metadata| metadata.get("attempts")),
        Some(&json!(3))
    );
}

/// Tests retry exhaustion surfaces the failure through the on-error policy.
#[test]
fn test_retry_exhaustion_fails_the_row() {
    let mut settings = base_settings();
    settings.retry = Some(fast_retry());
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "flaky".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let (recorder, _payloads, clock) = recorder_and_clock();
    let mut fx = fixture(vec![json!({"id": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(FlakyTransform {
        failures_left: 10,
    }));

    let observer = NullObserver;
    let orchestrator = Orchestrator::new(&settings, &recorder, &clock, &observer);
    let store = elspeth_core::MemoryPayloadStore::new();
    assert!(orchestrator.run(&mut fx.plugins, Some(&store), None).is_err());
}
