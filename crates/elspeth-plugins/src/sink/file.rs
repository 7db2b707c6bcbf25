// elspeth-plugins/src/sink/file.rs
// ============================================================================
// Module: Elspeth File Sink
// Description: JSON-lines file sink with flush durability.
// Purpose: Persist batches to disk and describe the produced artifact.
// Dependencies: elspeth-core, serde_json, std::fs
// ============================================================================

//! ## Overview
//! Appends each batch as JSON lines. `write` buffers through the OS;
//! `flush` calls `sync_all`, which is the durability point artifact
//! registration waits for. The descriptor hashes the bytes written by this
//! batch, not the whole file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;

use elspeth_core::ArtifactDescriptor;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SinkPlugin;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use elspeth_core::row_value;
use serde_json::Value;

// ============================================================================
// SECTION: File Sink
// ============================================================================

/// JSON-lines file sink.
#[derive(Debug)]
pub struct FileSink {
    /// Output path.
    path: String,
    /// Open file handle, created on first write.
    file: Option<File>,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl FileSink {
    /// Creates a file sink writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file: None,
            node_id: None,
        }
    }

    /// Creates a file sink from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `path` is missing.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let path = config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::logic("file sink config requires a path"))?;
        Ok(Self::new(path))
    }

    /// Returns the node identifier assigned by the graph, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Opens the output file lazily.
    fn file(&mut self) -> Result<&mut File, PluginError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|err| PluginError::io(format!("failed to open {}: {err}", self.path)))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| PluginError::io("file handle unavailable".to_string()))
    }
}

impl SinkPlugin for FileSink {
    fn name(&self) -> &str {
        "file"
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
        let mut bytes = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut bytes, &row_value(row))
                .map_err(|err| PluginError::io(err.to_string()))?;
            bytes.push(b'\n');
        }
        let path = self.path.clone();
        let file = self.file()?;
        file.write_all(&bytes)
            .map_err(|err| PluginError::io(format!("failed to write {path}: {err}")))?;
        let content_hash = hash_bytes(DEFAULT_HASH_ALGORITHM, &bytes);
        Ok(ArtifactDescriptor {
            artifact_type: "file".to_string(),
            uri: path,
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            content_hash,
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()
                .map_err(|err| PluginError::io(format!("failed to sync {}: {err}", self.path)))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
    }
}
