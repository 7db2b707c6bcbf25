// elspeth-plugins/src/gate/threshold.rs
// ============================================================================
// Module: Elspeth Threshold Gate
// Description: Routes rows whose numeric field crosses a threshold.
// Purpose: Provide a plugin-gate body for routing pipelines.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! Compares the configured numeric field against the threshold. Rows over
//! the threshold follow the `route_over` label; everything else continues.
//! A missing or non-numeric field is an evaluation error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::GateAction;
use elspeth_core::GatePlugin;
use elspeth_core::GateVerdict;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RouteLabel;
use elspeth_core::RowData;
use serde_json::Value;

// ============================================================================
// SECTION: Threshold Gate
// ============================================================================

/// Gate routing rows whose numeric field exceeds a threshold.
#[derive(Debug, Clone)]
pub struct ThresholdGate {
    /// Field to compare.
    field: String,
    /// Threshold value.
    threshold: f64,
    /// Route label for rows over the threshold.
    route_over: RouteLabel,
}

impl ThresholdGate {
    /// Creates a threshold gate.
    #[must_use]
    pub fn new(field: impl Into<String>, threshold: f64, route_over: RouteLabel) -> Self {
        Self {
            field: field.into(),
            threshold,
            route_over,
        }
    }

    /// Creates a threshold gate from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `field`, `threshold`, or `route_over`
    /// are missing or malformed.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let field = config
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::logic("threshold gate config requires a field"))?;
        let threshold = config
            .get("threshold")
            .and_then(Value::as_f64)
            .ok_or_else(|| PluginError::logic("threshold gate config requires a threshold"))?;
        let route_over = config
            .get("route_over")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::logic("threshold gate config requires route_over"))?;
        Ok(Self::new(field, threshold, RouteLabel::new(route_over)))
    }
}

impl GatePlugin for ThresholdGate {
    fn name(&self) -> &str {
        "threshold"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn evaluate(
        &mut self,
        row: RowData,
        _ctx: &PluginContext<'_>,
    ) -> Result<GateVerdict, PluginError> {
        let value = row
            .get(&self.field)
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                PluginError::logic(format!("field `{}` is absent or not numeric", self.field))
            })?;
        let action = if value > self.threshold {
            GateAction::Route(self.route_over.clone())
        } else {
            GateAction::Continue
        };
        Ok(GateVerdict {
            row,
            action,
        })
    }
}
