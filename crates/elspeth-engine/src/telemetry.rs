// elspeth-engine/src/telemetry.rs
// ============================================================================
// Module: Elspeth Engine Telemetry
// Description: Engine events delivered after audit writes persist.
// Purpose: Give hosts progress and per-node visibility without audit coupling.
// Dependencies: elspeth-core, serde, tracing
// ============================================================================

//! ## Overview
//! Telemetry events are emitted strictly after the corresponding recorder
//! write has been persisted (landscape-before-telemetry). Swapping that
//! order is forbidden and regression-tested: a crash between audit write and
//! telemetry emission loses an event, never an audit record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;

use elspeth_core::NodeId;
use elspeth_core::RowOutcome;
use elspeth_core::StateId;
use elspeth_core::TokenId;
use serde::Serialize;

// ============================================================================
// SECTION: Progress
// ============================================================================

/// Aggregate progress snapshot emitted on the progress cadence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct ProgressEvent {
    /// Rows pulled from the source so far.
    pub rows_processed: u64,
    /// Rows whose tokens all reached success outcomes. Routed rows count as
    /// successes in aggregate progress.
    pub rows_succeeded: u64,
    /// Rows that failed.
    pub rows_failed: u64,
    /// Rows quarantined at source entry or by on-error policy.
    pub rows_quarantined: u64,
    /// Rows routed to named sinks by gates.
    pub rows_routed: u64,
    /// Wall-clock seconds since the run started.
    pub elapsed_seconds: f64,
}

// ============================================================================
// SECTION: Engine Events
// ============================================================================

/// Events the engine emits to its observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A transform completed against one token.
    TransformCompleted {
        /// Executed node.
        node_id: NodeId,
        /// Token the execution applied to.
        token_id: TokenId,
        /// Closed audit state.
        state_id: StateId,
        /// Execution duration in milliseconds.
        duration_ms: u64,
    },
    /// A gate evaluated one token.
    GateEvaluated {
        /// Executed node.
        node_id: NodeId,
        /// Token the evaluation applied to.
        token_id: TokenId,
        /// Closed audit state.
        state_id: StateId,
        /// Action label recorded for the decision.
        action: String,
    },
    /// A token reached a terminal outcome.
    TokenCompleted {
        /// Token identifier.
        token_id: TokenId,
        /// Terminal outcome kind.
        outcome: RowOutcome,
    },
    /// Aggregate progress on the reporting cadence.
    Progress(ProgressEvent),
}

// ============================================================================
// SECTION: Observer
// ============================================================================

/// Observer receiving engine events.
///
/// # Invariants
/// - Events arrive only after the corresponding audit write is durable.
pub trait TelemetryObserver {
    /// Delivers one event.
    fn on_event(&self, event: &EngineEvent);
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl TelemetryObserver for NullObserver {
    fn on_event(&self, _event: &EngineEvent) {}
}

/// Observer that logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TelemetryObserver for TracingObserver {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TransformCompleted {
                node_id,
                token_id,
                duration_ms,
                ..
            } => {
                tracing::debug!(target: "elspeth::node", %node_id, %token_id, duration_ms, "transform completed");
            }
            EngineEvent::GateEvaluated {
                node_id,
                token_id,
                action,
                ..
            } => {
                tracing::debug!(target: "elspeth::node", %node_id, %token_id, action, "gate evaluated");
            }
            EngineEvent::TokenCompleted {
                token_id,
                outcome,
            } => {
                tracing::debug!(target: "elspeth::row", %token_id, outcome = outcome.label(), "token completed");
            }
            EngineEvent::Progress(progress) => {
                tracing::info!(
                    target: "elspeth::run",
                    rows_processed = progress.rows_processed,
                    rows_succeeded = progress.rows_succeeded,
                    rows_failed = progress.rows_failed,
                    rows_quarantined = progress.rows_quarantined,
                    rows_routed = progress.rows_routed,
                    "progress"
                );
            }
        }
    }
}

/// Observer that records events for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    /// Captured events in delivery order.
    events: Mutex<Vec<EngineEvent>>,
}

impl CollectingObserver {
    /// Creates an empty collecting observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the captured events.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }
}

impl TelemetryObserver for CollectingObserver {
    fn on_event(&self, event: &EngineEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}
