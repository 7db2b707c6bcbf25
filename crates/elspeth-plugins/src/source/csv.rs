// elspeth-plugins/src/source/csv.rs
// ============================================================================
// Module: Elspeth CSV Source
// Description: Header-driven CSV file source.
// Purpose: Read delimited rows with typed field inference.
// Dependencies: elspeth-core, serde_json, std::fs
// ============================================================================

//! ## Overview
//! `CsvSource` reads a header-driven CSV file (RFC 4180 subset: quoted
//! fields with doubled-quote escapes, no embedded newlines). Field values
//! are inferred as int, float, bool, or string. Rows whose field count does
//! not match the header are quarantined when a quarantine sink is declared
//! and fail the run otherwise.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;

use elspeth_core::DeterminismClass;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::ResumeMode;
use elspeth_core::RowData;
use elspeth_core::SinkName;
use elspeth_core::SourcePlugin;
use elspeth_core::SourceRow;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: CSV Source
// ============================================================================

/// Header-driven CSV file source.
#[derive(Debug, Clone)]
pub struct CsvSource {
    /// Path to the CSV file.
    path: String,
    /// Quarantine destination for malformed lines.
    quarantine: Option<SinkName>,
    /// Parsed header, populated at `on_start`.
    header: Vec<String>,
    /// Remaining data lines, populated at `on_start`.
    lines: Vec<String>,
    /// Next line index to yield.
    cursor: usize,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl CsvSource {
    /// Creates a source over a CSV file path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            quarantine: None,
            header: Vec::new(),
            lines: Vec::new(),
            cursor: 0,
            node_id: None,
        }
    }

    /// Creates a source from its resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when `path` is missing.
    pub fn from_config(config: &Value) -> Result<Self, PluginError> {
        let path = config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::logic("csv source config requires a path"))?;
        let quarantine = config
            .get("quarantine_sink")
            .and_then(Value::as_str)
            .map(SinkName::new);
        let mut source = Self::new(path);
        source.quarantine = quarantine;
        Ok(source)
    }

    /// Returns the node identifier assigned by the graph, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Parses one CSV line into fields (RFC 4180 subset).
    fn split_line(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '"' if in_quotes => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        current.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '"' => in_quotes = true,
                ',' if !in_quotes => {
                    fields.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        fields.push(current);
        fields
    }

    /// Infers a typed JSON value from a CSV field.
    fn infer_value(field: &str) -> Value {
        if let Ok(int) = field.parse::<i64>() {
            return json!(int);
        }
        if let Ok(float) = field.parse::<f64>() {
            if float.is_finite() {
                return json!(float);
            }
        }
        match field {
            "true" => json!(true),
            "false" => json!(false),
            other => json!(other),
        }
    }
}

impl SourcePlugin for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::IoRead
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

    fn on_start(&mut self, _ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|err| PluginError::io(format!("failed to read {}: {err}", self.path)))?;
        let mut lines = text.lines().map(str::to_string);
        self.header = lines
            .next()
            .map(|line| Self::split_line(&line))
            .ok_or_else(|| PluginError::logic(format!("csv file {} is empty", self.path)))?;
        self.lines = lines.filter(|line| !line.is_empty()).collect();
        Ok(())
    }

    fn next_row(&mut self, _ctx: &PluginContext<'_>) -> Result<Option<SourceRow>, PluginError> {
        let Some(line) = self.lines.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let fields = Self::split_line(line);
        if fields.len() != self.header.len() {
            let error = json!({
                "kind": "malformed",
                "message": format!(
                    "expected {} fields, found {}",
                    self.header.len(),
                    fields.len()
                ),
            });
            return self.quarantine.clone().map_or_else(
                || {
                    Err(PluginError::logic(format!(
                        "malformed csv line {} and no quarantine sink is declared",
                        self.cursor
                    )))
                },
                |destination| {
                    Ok(Some(SourceRow::Quarantined {
                        data: json!({ "raw": line }),
                        error,
                        destination,
                    }))
                },
            );
        }
        let mut row = RowData::new();
        for (name, field) in self.header.iter().zip(fields) {
            row.insert(name.clone(), Self::infer_value(&field));
        }
        Ok(Some(SourceRow::Valid {
            data: row,
            contract: None,
        }))
    }

    fn start_at(&mut self, sequence: u64) -> Result<(), PluginError> {
        let next = usize::try_from(sequence.saturating_add(1)).unwrap_or(usize::MAX);
        self.cursor = next.min(self.lines.len());
        Ok(())
    }
}
