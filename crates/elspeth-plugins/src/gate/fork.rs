// elspeth-plugins/src/gate/fork.rs
// ============================================================================
// Module: Elspeth Fork Gate
// Description: Unconditionally forks rows into configured branches.
// Purpose: Provide a plugin-gate body for fork/coalesce pipelines.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! Forks every row into one child per configured branch. The engine
//! terminates the parent with a `Forked` outcome and drives each child to
//! the coalesce joining its branch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::BranchName;
use elspeth_core::GateAction;
use elspeth_core::GatePlugin;
use elspeth_core::GateVerdict;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use serde_json::Value;

// ============================================================================
// SECTION: Fork Gate
// ============================================================================

/// Gate forking every row into its configured branches.
#[derive(Debug, Clone)]
pub struct ForkGate {
    /// Branch names to fork into.
    branches: Vec<BranchName>,
}

impl ForkGate {
    /// Creates a fork gate over the named branches.
    #[must_use]
    pub fn new(branches: Vec<BranchName>) -> Self {
        Self {
            branches,
        }
    }

    /// Creates a fork gate from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `branches` is missing or empty.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let branches = config
            .get("branches")
            .and_then(Value::as_array)
            .ok_or_else(|| PluginError::logic("fork gate config requires branches"))?
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(BranchName::new)
                    .ok_or_else(|| PluginError::logic("fork branches must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if branches.is_empty() {
            return Err(PluginError::logic("fork gate requires at least one branch"));
        }
        Ok(Self::new(branches))
    }
}

impl GatePlugin for ForkGate {
    fn name(&self) -> &str {
        "fork"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn evaluate(
        &mut self,
        row: RowData,
        _ctx: &PluginContext<'_>,
    ) -> Result<GateVerdict, PluginError> {
        Ok(GateVerdict {
            row,
            action: GateAction::ForkToPaths(self.branches.clone()),
        })
    }
}
