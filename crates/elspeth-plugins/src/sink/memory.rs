// elspeth-plugins/src/sink/memory.rs
// ============================================================================
// Module: Elspeth Memory Sink
// Description: In-memory sink with a shared inspection handle.
// Purpose: Capture written rows for tests and demos.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! `MemorySink` collects written rows behind a shared handle so tests can
//! assert on exactly what reached the sink. Rows written but not yet flushed
//! stay in a staging buffer; `flush` promotes them, mirroring the durability
//! gate real sinks honour.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use elspeth_core::ArtifactDescriptor;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SinkPlugin;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use serde_json::json;

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Shared inspection handle over a memory sink's durable rows.
#[derive(Debug, Default, Clone)]
pub struct MemorySinkHandle {
    /// Durable rows, promoted at flush.
    rows: Arc<Mutex<Vec<RowData>>>,
}

impl MemorySinkHandle {
    /// Returns a snapshot of the durable rows.
    #[must_use]
    pub fn rows(&self) -> Vec<RowData> {
        self.rows.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }

    /// Returns the durable row count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().map_or(0, |guard| guard.len())
    }

    /// Returns true when no rows are durable yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self.rows.lock() {
            Ok(guard) => guard.is_empty(),
            Err(_) => true,
        }
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// In-memory sink capturing written rows.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Sink name used in artifact URIs.
    label: String,
    /// Rows written but not yet flushed.
    staged: Vec<RowData>,
    /// Durable rows shared with the handle.
    handle: MemorySinkHandle,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl MemorySink {
    /// Creates a memory sink with a label for its artifact URI.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            staged: Vec::new(),
            handle: MemorySinkHandle::default(),
            node_id: None,
        }
    }

    /// Returns the shared inspection handle.
    #[must_use]
    pub fn handle(&self) -> MemorySinkHandle {
        self.handle.clone()
    }

    /// Returns the node identifier assigned by the graph, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }
}

impl SinkPlugin for MemorySink {
    fn name(&self) -> &str {
        "memory"
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
        _ctx: &PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        self.staged.extend(rows.iter().cloned());
        let bytes = serde_json::to_vec(&json!(rows))
            .map_err(|err| PluginError::io(err.to_string()))?;
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            uri: format!("memory://{}", self.label),
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            content_hash: hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        let staged = std::mem::take(&mut self.staged);
        self.handle
            .rows
            .lock()
            .map_err(|_| PluginError::io("memory sink mutex poisoned".to_string()))?
            .extend(staged);
        Ok(())
    }
}
