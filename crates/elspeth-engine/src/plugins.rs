// elspeth-engine/src/plugins.rs
// ============================================================================
// Module: Elspeth Plugin Set
// Description: The instantiated plugin objects a run executes against.
// Purpose: Carry plugin instances from the host into the engine by position and name.
// Dependencies: elspeth-core
// ============================================================================

//! ## Overview
//! Plugin discovery and instantiation happen outside the engine; a run
//! receives a fully assembled [`PluginSet`]. Transforms are addressed by
//! their position in the step list, plugin gates and batch transforms by
//! name, and sinks by sink name. The engine dispatches by node kind, never
//! by downcasting.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::GatePlugin;
use elspeth_core::SinkName;
use elspeth_core::SinkPlugin;
use elspeth_core::SourcePlugin;
use elspeth_core::TransformPlugin;

// ============================================================================
// SECTION: Plugin Set
// ============================================================================

/// The instantiated plugins for one run.
pub struct PluginSet {
    /// The pipeline source.
    pub source: Box<dyn SourcePlugin>,
    /// Transforms in step order.
    pub transforms: Vec<Box<dyn TransformPlugin>>,
    /// Plugin gates keyed by gate name.
    pub gates: BTreeMap<String, Box<dyn GatePlugin>>,
    /// Batch-aware transforms keyed by aggregation name.
    pub batch_transforms: BTreeMap<String, Box<dyn TransformPlugin>>,
    /// Sinks keyed by sink name.
    pub sinks: BTreeMap<SinkName, Box<dyn SinkPlugin>>,
}

impl PluginSet {
    /// Creates a plugin set with only a source and sinks.
    #[must_use]
    pub fn new(
        source: Box<dyn SourcePlugin>,
        sinks: BTreeMap<SinkName, Box<dyn SinkPlugin>>,
    ) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            gates: BTreeMap::new(),
            batch_transforms: BTreeMap::new(),
            sinks: BTreeMap::new(),
        }
        .with_sinks(sinks)
    }

    /// Replaces the sink map.
    #[must_use]
    pub fn with_sinks(mut self, sinks: BTreeMap<SinkName, Box<dyn SinkPlugin>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Appends a transform in step order.
    #[must_use]
    pub fn with_transform(mut self, transform: Box<dyn TransformPlugin>) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Registers a plugin gate by name.
    #[must_use]
    pub fn with_gate(mut self, name: impl Into<String>, gate: Box<dyn GatePlugin>) -> Self {
        self.gates.insert(name.into(), gate);
        self
    }

    /// Registers a batch-aware transform for an aggregation.
    #[must_use]
    pub fn with_batch_transform(
        mut self,
        aggregation: impl Into<String>,
        transform: Box<dyn TransformPlugin>,
    ) -> Self {
        self.batch_transforms.insert(aggregation.into(), transform);
        self
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("source", &self.source.name())
            .field("transforms", &self.transforms.len())
            .field("gates", &self.gates.len())
            .field("batch_transforms", &self.batch_transforms.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
