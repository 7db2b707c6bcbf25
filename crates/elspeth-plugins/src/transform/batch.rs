// elspeth-plugins/src/transform/batch.rs
// ============================================================================
// Module: Elspeth Batch Collect Transform
// Description: Batch-aware transform merging buffered rows.
// Purpose: Provide the flush body for aggregation nodes.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! The batch collector merges an aggregation buffer into one row carrying
//! the member count and the members themselves in arrival order, so the
//! downstream sink (and the audit trail) can see exactly what the flush
//! consumed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::BatchOutput;
use elspeth_core::DeterminismClass;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use serde_json::json;

// ============================================================================
// SECTION: Batch Collect Transform
// ============================================================================

/// Batch-aware transform collecting buffered rows into one.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchCollectTransform;

impl BatchCollectTransform {
    /// Creates a batch collector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransformPlugin for BatchCollectTransform {
    fn name(&self) -> &str {
        "batch_collect"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn is_batch_aware(&self) -> bool {
        true
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        // Single-row use degenerates to a one-member batch.
        let mut output = RowData::new();
        output.insert("count".to_string(), json!(1));
        output.insert("rows".to_string(), json!([row]));
        TransformOutput::Success {
            data: output,
            reason: json!({ "reason": "collected", "count": 1 }),
        }
    }

    fn process_batch(&mut self, rows: Vec<RowData>, _ctx: &PluginContext<'_>) -> BatchOutput {
        if rows.is_empty() {
            return BatchOutput::Empty;
        }
        let count = rows.len();
        let mut output = RowData::new();
        output.insert("count".to_string(), json!(count));
        output.insert("rows".to_string(), json!(rows));
        BatchOutput::Merged {
            data: output,
            reason: json!({ "reason": "collected", "count": count }),
        }
    }
}
