// elspeth-plugins/src/transform/rename.rs
// ============================================================================
// Module: Elspeth Rename Transform
// Description: Field-renaming transform.
// Purpose: Map field names while preserving values and order of the rest.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! Renames fields according to the configured `mapping`. Fields not named in
//! the mapping pass through untouched; a mapping entry for an absent field
//! is an error surfaced through the on-error policy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::DeterminismClass;
use elspeth_core::OnErrorPolicy;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Rename Transform
// ============================================================================

/// Field-renaming transform.
#[derive(Debug, Clone)]
pub struct RenameTransform {
    /// Old field name to new field name.
    mapping: BTreeMap<String, String>,
    /// Declared on-error policy.
    on_error: OnErrorPolicy,
}

impl RenameTransform {
    /// Creates a rename transform from a mapping.
    #[must_use]
    pub fn new(mapping: BTreeMap<String, String>) -> Self {
        Self {
            mapping,
            on_error: OnErrorPolicy::Raise,
        }
    }

    /// Creates a rename transform from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `mapping` is missing or malformed.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let mapping = config
            .get("mapping")
            .and_then(Value::as_object)
            .ok_or_else(|| PluginError::logic("rename transform config requires a mapping"))?;
        let mapping = mapping
            .iter()
            .map(|(old, new)| {
                new.as_str()
                    .map(|new| (old.clone(), new.to_string()))
                    .ok_or_else(|| PluginError::logic("rename mapping values must be strings"))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let on_error = config
            .get("on_error")
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|err| PluginError::logic(format!("invalid on_error policy: {err}")))?
            .unwrap_or_default();
        Ok(Self {
            mapping,
            on_error,
        })
    }
}

impl TransformPlugin for RenameTransform {
    fn name(&self) -> &str {
        "rename"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn on_error(&self) -> OnErrorPolicy {
        self.on_error.clone()
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        for old in self.mapping.keys() {
            if !row.contains_key(old) {
                return TransformOutput::Error {
                    error: json!({
                        "kind": "logic",
                        "message": format!("field `{old}` is absent"),
                    }),
                };
            }
        }
        let mut output = RowData::new();
        for (name, value) in row {
            match self.mapping.get(&name) {
                Some(renamed) => {
                    output.insert(renamed.clone(), value);
                }
                None => {
                    output.insert(name, value);
                }
            }
        }
        TransformOutput::Success {
            data: output,
            reason: json!({ "reason": "renamed", "fields": self.mapping.len() }),
        }
    }
}
