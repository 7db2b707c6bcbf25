// elspeth-plugins/src/transform/uppercase.rs
// ============================================================================
// Module: Elspeth Uppercase Transform
// Description: Uppercases configured string fields.
// Purpose: Provide a simple value-mutating transform for pipelines.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! Uppercases the configured string fields. Non-string values in a named
//! field are an error surfaced through the on-error policy; unnamed fields
//! pass through untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

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
// SECTION: Uppercase Transform
// ============================================================================

/// Uppercases configured string fields.
#[derive(Debug, Clone)]
pub struct UppercaseTransform {
    /// Fields to uppercase.
    fields: Vec<String>,
    /// Declared on-error policy.
    on_error: OnErrorPolicy,
}

impl UppercaseTransform {
    /// Creates an uppercase transform over the named fields.
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            on_error: OnErrorPolicy::Raise,
        }
    }

    /// Creates an uppercase transform from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `fields` is missing or malformed.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let fields = config
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| PluginError::logic("uppercase transform config requires fields"))?
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PluginError::logic("uppercase fields must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let on_error = config
            .get("on_error")
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|err| PluginError::logic(format!("invalid on_error policy: {err}")))?
            .unwrap_or_default();
        Ok(Self {
            fields,
            on_error,
        })
    }
}

impl TransformPlugin for UppercaseTransform {
    fn name(&self) -> &str {
        "uppercase"
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

    fn process(&mut self, mut row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        for field in &self.fields {
            match row.get(field) {
                Some(Value::String(text)) => {
                    let upper = text.to_uppercase();
                    row.insert(field.clone(), json!(upper));
                }
                Some(_) => {
                    return TransformOutput::Error {
                        error: json!({
                            "kind": "logic",
                            "message": format!("field `{field}` is not a string"),
                        }),
                    };
                }
                None => {
                    return TransformOutput::Error {
                        error: json!({
                            "kind": "logic",
                            "message": format!("field `{field}` is absent"),
                        }),
                    };
                }
            }
        }
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "uppercased", "fields": self.fields.len() }),
        }
    }
}
