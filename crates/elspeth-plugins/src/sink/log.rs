// elspeth-plugins/src/sink/log.rs
// ============================================================================
// Module: Elspeth Log Sink
// Description: Tracing-backed sink for audit-grade delivery records.
// Purpose: Record written rows without persisting payloads anywhere.
// Dependencies: elspeth-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! `LogSink` emits one structured log record per written row and nothing
//! else. It is the cheapest sink to point a quarantine route at when the
//! quarantined payloads are already in the payload store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::ArtifactDescriptor;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SinkPlugin;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use elspeth_core::row_value;
use serde_json::json;

// ============================================================================
// SECTION: Log Sink
// ============================================================================

/// Log-only sink.
#[derive(Debug, Default)]
pub struct LogSink {
    /// Sink label used in artifact URIs.
    label: String,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl LogSink {
    /// Creates a log sink with a label for its artifact URI.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            node_id: None,
        }
    }

    /// Returns the node identifier assigned by the graph, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }
}

impl SinkPlugin for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = Some(node_id);
    }

    fn write(
        &mut self,
        rows: &[RowData],
        ctx: &PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        for row in rows {
            tracing::info!(
                target: "elspeth::sink",
                sink = self.label,
                run = ctx.run_id.as_str(),
                row = %row_value(row),
                "row written"
            );
        }
        let bytes = serde_json::to_vec(&json!(rows))
            .map_err(|err| PluginError::io(err.to_string()))?;
        Ok(ArtifactDescriptor {
            artifact_type: "log".to_string(),
            uri: format!("log://{}", self.label),
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            content_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}
