// elspeth-plugins/src/source/inline.rs
// ============================================================================
// Module: Elspeth Inline Source
// Description: Source yielding rows embedded in the resolved settings.
// Purpose: Drive pipelines from literal rows in tests and demos.
// Dependencies: elspeth-core, serde_json
// ============================================================================

//! ## Overview
//! `InlineSource` yields the rows embedded under `rows` in its config.
//! Non-object entries are quarantined to the configured quarantine sink
//! when one is declared, which makes the source a convenient driver for
//! quarantine-path tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::DeterminismClass;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::ResumeMode;
use elspeth_core::SchemaContract;
use elspeth_core::SinkName;
use elspeth_core::SourcePlugin;
use elspeth_core::SourceRow;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Inline Source
// ============================================================================

/// Source yielding literal rows from its configuration.
#[derive(Debug, Clone)]
pub struct InlineSource {
    /// Rows to yield, in order.
    rows: Vec<Value>,
    /// Next row index to yield.
    cursor: usize,
    /// Quarantine destination for non-object rows.
    quarantine: Option<SinkName>,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl InlineSource {
    /// Creates a source over literal rows.
    #[must_use]
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            cursor: 0,
            quarantine: None,
            node_id: None,
        }
    }

    /// Creates a source from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `rows` is missing or not an array.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let rows = config
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| PluginError::logic("inline source config requires a rows array"))?
            .clone();
        let quarantine = config
            .get("quarantine_sink")
            .and_then(Value::as_str)
            .map(SinkName::new);
        Ok(Self {
            rows,
            cursor: 0,
            quarantine,
            node_id: None,
        })
    }

    /// Declares a quarantine destination for malformed rows.
    #[must_use]
    pub fn with_quarantine(mut self, sink: SinkName) -> Self {
        self.quarantine = Some(sink);
        self
    }

    /// Returns the node identifier assigned by the graph, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }
}

impl SourcePlugin for InlineSource {
    fn name(&self) -> &str {
        "inline"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn output_schema(&self) -> Option<SchemaContract> {
        self.rows
            .first()
            .and_then(Value::as_object)
            .map(SchemaContract::observe)
    }

    fn quarantine_sink(&self) -> Option<SinkName> {
        self.quarantine.clone()
    }

    fn resume_mode(&self) -> ResumeMode {
        ResumeMode::Positioned
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = Some(node_id);
    }

    fn next_row(&mut self, _ctx: &PluginContext<'_>) -> Result<Option<SourceRow>, PluginError> {
        let Some(value) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        match value {
            Value::Object(map) => Ok(Some(SourceRow::Valid {
                data: map.clone(),
                contract: None,
            })),
            other => {
                let destination = self.quarantine.clone().ok_or_else(|| {
                    PluginError::logic(format!(
                        "inline row {} is not an object and no quarantine sink is declared",
                        self.cursor - 1
                    ))
                })?;
                Ok(Some(SourceRow::Quarantined {
                    data: other.clone(),
                    error: json!({ "kind": "malformed", "message": "row is not an object" }),
                    destination,
                }))
            }
        }
    }

    fn start_at(&mut self, sequence: u64) -> Result<(), PluginError> {
        let next = usize::try_from(sequence.saturating_add(1)).unwrap_or(usize::MAX);
        self.cursor = next.min(self.rows.len());
        Ok(())
    }
}
