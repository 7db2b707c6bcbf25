// elspeth-plugins/tests/sink_tests.rs
// ============================================================================
// Module: Sink Plugin Tests
// Description: File and memory sink behaviour.
// ============================================================================
//! ## Overview
//! Validates artifact descriptors carry real content hashes, the file sink
//! appends JSON lines, and the memory sink honours the flush gate.

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

use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::RunId;
use elspeth_core::SinkPlugin;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use elspeth_plugins::FileSink;
use elspeth_plugins::MemorySink;
use serde_json::json;

/// Owned context parts for sink calls.
struct Ctx {
    /// Run identifier.
    run_id: RunId,
    /// Resolved config.
    config: serde_json::Value,
}

impl Ctx {
    /// Creates context parts with an empty config.
    fn new() -> Self {
        Self {
            run_id: RunId::new("run-1"),
            config: json!({}),
        }
    }

    /// Borrows a plugin context.
    fn ctx(&self) -> PluginContext<'_> {
        PluginContext {
            run_id: &self.run_id,
            config: &self.config,
            state_id: None,
            operation_id: None,
            recorder: None,
        }
    }
}

/// Builds a row from a JSON object literal.
fn row(value: serde_json::Value) -> RowData {
    value.as_object().cloned().unwrap_or_default()
}

// ============================================================================
// SECTION: File Sink
// ============================================================================

/// Tests the file sink appends JSON lines and hashes the written bytes.
#[test]
fn test_file_sink_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jsonl");
    let mut sink = FileSink::new(path.display().to_string());
    let parts = Ctx::new();

    let descriptor = sink
        .write(&[row(json!({"id": 1})), row(json!({"id": 2}))], &parts.ctx())
        .unwrap();
    sink.flush().unwrap();

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.iter().filter(|byte| **byte == b'\n').count(), 2);
    assert_eq!(descriptor.content_hash, hash_bytes(DEFAULT_HASH_ALGORITHM, &written));
    assert_eq!(descriptor.size_bytes, u64::try_from(written.len()).unwrap());
    assert_eq!(descriptor.artifact_type, "file");
}

/// Tests consecutive writes append rather than truncate.
#[test]
fn test_file_sink_appends_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.jsonl");
    let mut sink = FileSink::new(path.display().to_string());
    let parts = Ctx::new();

    sink.write(&[row(json!({"id": 1}))], &parts.ctx()).unwrap();
    sink.write(&[row(json!({"id": 2}))], &parts.ctx()).unwrap();
    sink.flush().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// Tests rows become visible through the handle only after flush.
#[test]
fn test_memory_sink_flush_gate() {
    let mut sink = MemorySink::new("default");
    let handle = sink.handle();
    let parts = Ctx::new();

    sink.write(&[row(json!({"id": 1}))], &parts.ctx()).unwrap();
    assert!(handle.is_empty());

    sink.flush().unwrap();
    assert_eq!(handle.len(), 1);
    assert_eq!(handle.rows()[0].get("id"), Some(&json!(1)));
}
