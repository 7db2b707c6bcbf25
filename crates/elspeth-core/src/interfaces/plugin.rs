// elspeth-core/src/interfaces/plugin.rs
// ============================================================================
// Module: Elspeth Plugin Capabilities
// Description: Capability traits for sources, transforms, gates, and sinks.
// Purpose: Define the narrow interfaces through which plugin bodies reach the engine.
// Dependencies: crate::core, crate::interfaces::recorder, serde, serde_json
// ============================================================================

//! ## Overview
//! Plugins implement one of four capability traits. The engine dispatches by
//! node kind, never by downcasting, and hands every call a [`PluginContext`]
//! carrying the run identifier, the current audit state, and an optional
//! recorder handle so plugins can attribute external calls to the operation
//! that made them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::OperationId;
use crate::core::identifiers::RouteLabel;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SinkName;
use crate::core::identifiers::StateId;
use crate::core::node::DeterminismClass;
use crate::core::row::RowData;
use crate::core::schema::SchemaContract;
use crate::interfaces::recorder::AuditRecorder;

// ============================================================================
// SECTION: Plugin Context
// ============================================================================

/// Context handed to every plugin call.
///
/// # Invariants
/// - `state_id` is populated for per-token calls so external calls can be
///   attributed; `operation_id` is populated for batch-granularity calls.
pub struct PluginContext<'a> {
    /// Run identifier.
    pub run_id: &'a RunId,
    /// Resolved plugin configuration.
    pub config: &'a Value,
    /// Current audit state for call attribution, when executing per token.
    pub state_id: Option<&'a StateId>,
    /// Current operation for call attribution, when executing per batch.
    pub operation_id: Option<&'a OperationId>,
    /// Recorder handle for external-call recording.
    pub recorder: Option<&'a dyn AuditRecorder>,
}

impl std::fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("run_id", &self.run_id)
            .field("state_id", &self.state_id)
            .field("operation_id", &self.operation_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Plugin Errors
// ============================================================================

/// Classified kinds of plugin failure, used by retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    /// Local I/O failure.
    Io,
    /// Transient network failure.
    Network,
    /// External service failure.
    External,
    /// Deterministic logic failure; never retryable.
    Logic,
}

/// Errors raised by plugin bodies.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin call failed with a classified kind.
    #[error("plugin call failed ({kind:?}): {message}")]
    Failed {
        /// Classified failure kind.
        kind: PluginErrorKind,
        /// Human-readable failure description.
        message: String,
    },
    /// The plugin call exceeded its declared timeout.
    #[error("plugin call timed out after {timeout_ms} ms")]
    Timeout {
        /// Declared timeout in milliseconds.
        timeout_ms: u64,
    },
    /// The plugin does not support the requested capability.
    #[error("unsupported plugin capability: {0}")]
    Unsupported(String),
}

impl PluginError {
    /// Creates a deterministic logic failure.
    #[must_use]
    pub fn logic(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: PluginErrorKind::Logic,
            message: message.into(),
        }
    }

    /// Creates a local I/O failure.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: PluginErrorKind::Io,
            message: message.into(),
        }
    }

    /// Returns the classified kind when the error carries one.
    #[must_use]
    pub const fn kind(&self) -> Option<PluginErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Timeout { .. } | Self::Unsupported(_) => None,
        }
    }

    /// Returns a structured JSON form for audit error payloads.
    #[must_use]
    pub fn to_error_value(&self) -> Value {
        match self {
            Self::Failed { kind, message } => serde_json::json!({
                "kind": kind,
                "message": message,
            }),
            Self::Timeout { timeout_ms } => serde_json::json!({
                "kind": "timeout",
                "timeout_ms": timeout_ms,
            }),
            Self::Unsupported(message) => serde_json::json!({
                "kind": "unsupported",
                "message": message,
            }),
        }
    }
}

// ============================================================================
// SECTION: On-Error Policy
// ============================================================================

/// Declared policy for handling a failed plugin call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Re-raise the failure and abort the row.
    #[default]
    Raise,
    /// Quarantine the token and continue with the next row.
    Discard,
    /// Route the token to a named sink.
    RouteTo {
        /// Destination sink name.
        sink: SinkName,
    },
}

// ============================================================================
// SECTION: Source Capability
// ============================================================================

/// One row yielded by a source: valid payload or quarantined input.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRow {
    /// A well-formed row ready for processing.
    Valid {
        /// Row data.
        data: RowData,
        /// Optional schema contract observed for this row.
        contract: Option<SchemaContract>,
    },
    /// A malformed input routed to a quarantine sink.
    Quarantined {
        /// Raw input as received.
        data: Value,
        /// Structured error describing the defect.
        error: Value,
        /// Quarantine destination sink.
        destination: SinkName,
    },
}

/// Resume capability declared by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// The source honours `start_at` positioning hints.
    Positioned,
    /// The source can be re-iterated from the beginning.
    Rewindable,
    /// The source cannot resume; checkpoints cannot be replayed against it.
    #[default]
    None,
}

/// Row-producing source capability.
pub trait SourcePlugin {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared determinism class.
    fn determinism(&self) -> DeterminismClass;

    /// Returns the declared output schema contract, if any.
    fn output_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Returns the configured quarantine destination, if any.
    fn quarantine_sink(&self) -> Option<SinkName> {
        None
    }

    /// Returns the declared resume capability.
    fn resume_mode(&self) -> ResumeMode {
        ResumeMode::None
    }

    /// Records the node identifier assigned by the graph.
    fn set_node_id(&mut self, node_id: NodeId);

    /// Called exactly once per run before any row is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the source cannot open its input.
    fn on_start(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Returns the next available source row, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when reading the underlying input fails.
    fn next_row(&mut self, ctx: &PluginContext<'_>) -> Result<Option<SourceRow>, PluginError>;

    /// Positions the source past the provided sequence number.
    ///
    /// Only called when [`SourcePlugin::resume_mode`] returns
    /// [`ResumeMode::Positioned`].
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when positioning fails or is unsupported.
    fn start_at(&mut self, sequence: u64) -> Result<(), PluginError> {
        let _ = sequence;
        Err(PluginError::Unsupported("source does not support positioning".to_string()))
    }

    /// Called exactly once after the last row, even when the run fails.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when completion work fails.
    fn on_complete(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Releases held resources. Runs last.
    fn close(&mut self) {}
}

// ============================================================================
// SECTION: Transform Capability
// ============================================================================

/// Result of a transform `process` call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    /// The transform produced replacement row data.
    Success {
        /// New row data.
        data: RowData,
        /// Structured success reason recorded in the audit state.
        reason: Value,
    },
    /// The transform failed; the on-error policy decides what happens.
    Error {
        /// Structured error payload.
        error: Value,
    },
}

/// Result of a batch-aware transform over an aggregation buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutput {
    /// The batch merged into a single output row.
    Merged {
        /// Merged row data.
        data: RowData,
        /// Structured success reason recorded in the audit state.
        reason: Value,
    },
    /// The batch produced no output row.
    Empty,
    /// The batch transform failed.
    Error {
        /// Structured error payload.
        error: Value,
    },
}

/// Row-transforming capability.
pub trait TransformPlugin {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared determinism class.
    fn determinism(&self) -> DeterminismClass;

    /// Returns the declared input schema contract, if any.
    fn input_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Returns the declared output schema contract, if any.
    fn output_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Returns true when the transform consumes whole batches.
    fn is_batch_aware(&self) -> bool {
        false
    }

    /// Returns the declared on-error policy.
    fn on_error(&self) -> OnErrorPolicy {
        OnErrorPolicy::Raise
    }

    /// Returns the per-call timeout in milliseconds, if declared.
    fn call_timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Processes one row.
    fn process(&mut self, row: RowData, ctx: &PluginContext<'_>) -> TransformOutput;

    /// Processes a batch of rows into at most one merged row.
    ///
    /// Only called for batch-aware transforms attached to aggregations.
    fn process_batch(&mut self, rows: Vec<RowData>, ctx: &PluginContext<'_>) -> BatchOutput {
        let _ = (rows, ctx);
        BatchOutput::Error {
            error: serde_json::json!({
                "kind": "unsupported",
                "message": "transform is not batch-aware",
            }),
        }
    }

    /// Called exactly once per run before the first row.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when start-up work fails.
    fn on_start(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called exactly once after the last row, even when the run fails.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when completion work fails.
    fn on_complete(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Releases held resources. Runs last.
    fn close(&mut self) {}
}

// ============================================================================
// SECTION: Gate Capability
// ============================================================================

/// Action selected by a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    /// Proceed along the continue edge.
    Continue,
    /// Terminate this token and route it to the sink behind the label.
    Route(RouteLabel),
    /// Fork the token into one child per named branch.
    ForkToPaths(Vec<BranchName>),
}

/// Result of a gate evaluation: the (possibly annotated) row plus an action.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    /// Row data after evaluation; plugin gates must preserve the schema.
    pub row: RowData,
    /// Selected action.
    pub action: GateAction,
}

/// Routing and forking gate capability.
pub trait GatePlugin {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared input schema contract, if any.
    ///
    /// Plugin gates preserve schemas: the output contract always equals the
    /// input contract.
    fn input_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Evaluates the gate against one row.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when evaluation fails.
    fn evaluate(
        &mut self,
        row: RowData,
        ctx: &PluginContext<'_>,
    ) -> Result<GateVerdict, PluginError>;

    /// Releases held resources. Runs last.
    fn close(&mut self) {}
}

// ============================================================================
// SECTION: Sink Capability
// ============================================================================

/// Artifact description returned by a sink write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Artifact type label (for example "file", "http").
    pub artifact_type: String,
    /// Path or URI of the produced artifact.
    pub uri: String,
    /// Size of the produced artifact in bytes.
    pub size_bytes: u64,
    /// SHA-256 hash of the bytes written.
    pub content_hash: HashDigest,
}

/// Artifact-producing sink capability.
pub trait SinkPlugin {
    /// Returns the plugin name.
    fn name(&self) -> &str;

    /// Returns the plugin version string.
    fn plugin_version(&self) -> &str;

    /// Returns the declared input schema contract, if any.
    fn input_schema(&self) -> Option<SchemaContract> {
        None
    }

    /// Records the node identifier assigned by the graph.
    fn set_node_id(&mut self, node_id: NodeId);

    /// Writes a batch of rows and describes the produced artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the write fails; no artifact is
    /// registered in that case.
    fn write(
        &mut self,
        rows: &[RowData],
        ctx: &PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError>;

    /// Makes previously written rows durable.
    ///
    /// Artifact registration happens only after this returns successfully.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when durability cannot be guaranteed.
    fn flush(&mut self) -> Result<(), PluginError>;

    /// Called exactly once per run before the first write.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when start-up work fails.
    fn on_start(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Called exactly once after the last write, even when the run fails.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when completion work fails.
    fn on_complete(&mut self, ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let _ = ctx;
        Ok(())
    }

    /// Releases held resources. Runs last.
    fn close(&mut self) {}
}
