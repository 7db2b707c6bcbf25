// elspeth-plugins/src/transform/passthrough.rs
// ============================================================================
// Module: Elspeth Passthrough Transform
// Description: Identity transform.
// Purpose: Exercise the transform path without changing row data.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! The passthrough transform returns its input unchanged. It exists so
//! pipelines can be exercised end to end with a real transform state in the
//! audit trail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::DeterminismClass;
use elspeth_core::PluginContext;
use elspeth_core::RowData;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use serde_json::json;

// ============================================================================
// SECTION: Passthrough Transform
// ============================================================================

/// Identity transform.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTransform;

impl PassthroughTransform {
    /// Creates a passthrough transform.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransformPlugin for PassthroughTransform {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "passthrough" }),
        }
    }
}
