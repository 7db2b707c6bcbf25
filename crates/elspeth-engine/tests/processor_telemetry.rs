// elspeth-engine/tests/processor_telemetry.rs
// ============================================================================
// Module: Processor Telemetry Tests
// Description: Landscape-before-telemetry ordering regression tests.
// ============================================================================
//! ## Overview
//! Telemetry events must be emitted only after the corresponding recorder
//! write has been persisted. The observer here checks the audit store at
//! delivery time: a transform or gate event whose state is still open, or a
//! token event whose outcome is absent, fails the run.

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
use std::sync::Arc;
use std::sync::Mutex;

use common::fixture;
use common::settings_with_sinks;
use elspeth_config::GateSettings;
use elspeth_config::RouteTarget;
use elspeth_config::StepSettings;
use elspeth_config::TransformSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::ManualClock;
use elspeth_core::MemoryPayloadStore;
use elspeth_core::MemoryRecorder;
use elspeth_core::OnErrorPolicy;
use elspeth_engine::EngineEvent;
use elspeth_engine::Orchestrator;
use elspeth_engine::TelemetryObserver;
use elspeth_plugins::PassthroughTransform;
use serde_json::json;

/// Observer that verifies audit persistence at event delivery time.
struct OrderingObserver {
    /// Shared recorder, consulted on every delivery.
    recorder: Arc<MemoryRecorder>,
    /// Ordering violations observed.
    violations: Mutex<Vec<String>>,
}

impl OrderingObserver {
    /// Creates an observer over a shared recorder.
    fn new(recorder: Arc<MemoryRecorder>) -> Self {
        Self {
            recorder,
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns the recorded ordering violations.
    fn violations(&self) -> Vec<String> {
        self.violations.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }

    /// Appends one ordering violation.
    fn record_violation(&self, message: String) {
        if let Ok(mut guard) = self.violations.lock() {
            guard.push(message);
        }
    }
}

impl TelemetryObserver for OrderingObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TransformCompleted {
                state_id, ..
            }
            | EngineEvent::GateEvaluated {
                state_id, ..
            } => {
                let run_id = elspeth_core::RunId::new("run-1");
                let closed = self
                    .recorder
                    .node_states(&run_id)
                    .map(|states| {
                        states
                            .iter()
                            .any(|state| state.state_id == *state_id && state.status.is_closed())
                    })
                    .unwrap_or(false);
                if !closed {
                    self.record_violation(format!(
                        "telemetry for state {state_id} arrived before the state closed"
                    ));
                }
            }
            EngineEvent::TokenCompleted {
                token_id, ..
            } => {
                let run_id = elspeth_core::RunId::new("run-1");
                let recorded = self
                    .recorder
                    .token_outcomes(&run_id)
                    .map(|outcomes| {
                        outcomes.iter().any(|outcome| outcome.token_id == *token_id)
                    })
                    .unwrap_or(false);
                if !recorded {
                    self.record_violation(format!(
                        "telemetry for token {token_id} arrived before its outcome persisted"
                    ));
                }
            }
            EngineEvent::Progress(_) => {}
        }
    }
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

/// Tests every telemetry event trails its recorder write.
#[test]
fn test_landscape_precedes_telemetry() {
    let mut settings = settings_with_sinks(&["default", "high"], "default");
    settings.steps.push(StepSettings::Transform(TransformSettings {
        plugin: "passthrough".to_string(),
        config: json!({}),
        on_error: OnErrorPolicy::Raise,
        timeout_ms: None,
    }));
    let mut routes = BTreeMap::new();
    routes.insert("true".to_string(), RouteTarget::Sink("high".to_string()));
    routes.insert("false".to_string(), RouteTarget::Continue);
    settings.steps.push(StepSettings::Gate(GateSettings {
        name: "threshold".to_string(),
        condition: Some("row['n'] > 1".to_string()),
        plugin: None,
        config: json!({}),
        routes,
        fork_to: Vec::new(),
    }));

    let payloads = Arc::new(MemoryPayloadStore::new());
    let recorder = Arc::new(MemoryRecorder::new(payloads));
    let clock = ManualClock::starting_at(1_000);
    let observer = OrderingObserver::new(recorder.clone());

    let mut fx = fixture(vec![json!({"n": 0}), json!({"n": 2}), json!({"n": 1})], &settings);
    fx.plugins = fx.plugins.with_transform(Box::new(PassthroughTransform::new()));

    let orchestrator = Orchestrator::new(&settings, recorder.as_ref(), &clock, &observer);
    let store = MemoryPayloadStore::new();
    orchestrator.run(&mut fx.plugins, Some(&store), None).unwrap();

    assert_eq!(observer.violations(), Vec::<String>::new());
}
