// elspeth-engine/src/lib.rs
// ============================================================================
// Module: Elspeth Engine Library
// Description: Public API surface for the Elspeth execution engine.
// Purpose: Expose the graph, processor, executors, and orchestrator.
// Dependencies: crate::{checkpoint, error, executors, graph, orchestrator,
//               plugins, processor, retry, telemetry, tokens}
// ============================================================================

//! ## Overview
//! The engine drives user-declared pipelines through a validated DAG of
//! source, transform, gate, aggregation, coalesce, and sink nodes. Its
//! defining obligation is the audit trail: every row ends in exactly one
//! terminal outcome per leaf token, every node execution closes the state it
//! opened, and every artifact is content-hashed and linked to the operation
//! that produced it, under forks, joins, retries, and crash-resume.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod checkpoint;
pub mod error;
pub mod executors;
pub mod graph;
pub mod orchestrator;
pub mod plugins;
pub mod processor;
pub mod retry;
pub mod telemetry;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use checkpoint::CheckpointManager;
pub use error::EngineError;
pub use executors::AggregationExecutor;
pub use executors::CoalesceDeposit;
pub use executors::CoalesceExecutor;
pub use executors::GateExecution;
pub use executors::GateImpl;
pub use executors::SinkBatchEntry;
pub use executors::TransformExecution;
pub use executors::execute_gate;
pub use executors::execute_sink;
pub use executors::execute_transform;
pub use graph::ExecutionGraph;
pub use graph::GraphError;
pub use graph::GraphNode;
pub use graph::NodeDetail;
pub use graph::RouteResolution;
pub use orchestrator::ENGINE_VERSION;
pub use orchestrator::Orchestrator;
pub use orchestrator::RunResult;
pub use plugins::PluginSet;
pub use processor::RowDisposition;
pub use processor::RowProcessor;
pub use retry::RetryManager;
pub use telemetry::CollectingObserver;
pub use telemetry::EngineEvent;
pub use telemetry::NullObserver;
pub use telemetry::ProgressEvent;
pub use telemetry::TelemetryObserver;
pub use telemetry::TracingObserver;
pub use tokens::TokenManager;
