// elspeth-engine/src/graph/build.rs
// ============================================================================
// Module: Elspeth Graph Construction
// Description: Builds the execution graph from settings and plugin metadata.
// Purpose: Derive deterministic node IDs and cache all routing lookups.
// Dependencies: crate::{graph, plugins}, elspeth-config, elspeth-core, elspeth-expr
// ============================================================================

//! ## Overview
//! Construction walks the source, steps, and sinks of the resolved settings,
//! producing one node per plugin instance plus engine-internal nodes for
//! config-driven gates and coalesces. Node identifiers are derived from
//! `(plugin_name, kind, position, canonical-hash(config))`, so identical
//! resolved configurations produce identical identifiers across runs, the
//! invariant that makes checkpoints portable between processes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_config::PipelineSettings;
use elspeth_config::StepSettings;
use elspeth_core::BranchName;
use elspeth_core::DeterminismClass;
use elspeth_core::NodeId;
use elspeth_core::NodeKind;
use elspeth_core::RouteLabel;
use elspeth_core::SinkName;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_expr::parse_predicate;
use serde_json::Value;
use serde_json::json;

use crate::graph::ExecutionGraph;
use crate::graph::GraphError;
use crate::graph::GraphNode;
use crate::graph::NodeDetail;
use crate::graph::RouteResolution;
use crate::plugins::PluginSet;

// ============================================================================
// SECTION: Node ID Derivation
// ============================================================================

/// Derives a deterministic node identifier.
///
/// # Errors
///
/// Returns [`GraphError::Hash`] when the config cannot be canonicalized.
pub fn derive_node_id(
    plugin_name: &str,
    kind: NodeKind,
    position: usize,
    config: &Value,
) -> Result<NodeId, GraphError> {
    let config_hash = hash_canonical_json(config)?;
    let prefix = &config_hash.value[.. 8.min(config_hash.value.len())];
    Ok(NodeId::new(format!("{plugin_name}-{}-{position}-{prefix}", kind.label())))
}

// ============================================================================
// SECTION: Graph Builder
// ============================================================================

impl ExecutionGraph {
    /// Builds the execution graph from settings and plugin metadata.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when settings are invalid or hashing fails.
    pub fn build(settings: &PipelineSettings, plugins: &PluginSet) -> Result<Self, GraphError> {
        settings.validate()?;

        let mut nodes: BTreeMap<NodeId, GraphNode> = BTreeMap::new();
        let mut chain: Vec<NodeId> = Vec::new();
        let mut sink_id_map = BTreeMap::new();
        let mut transform_id_map = BTreeMap::new();
        let mut config_gate_id_map = BTreeMap::new();
        let mut aggregation_id_map = BTreeMap::new();
        let mut coalesce_id_map = BTreeMap::new();
        let mut route_resolution_map = BTreeMap::new();
        let mut branch_to_coalesce = BTreeMap::new();

        // Source node at position zero.
        let source_id = derive_node_id(
            plugins.source.name(),
            NodeKind::Source,
            0,
            &settings.source.config,
        )?;
        nodes.insert(source_id.clone(), GraphNode {
            node_id: source_id.clone(),
            kind: NodeKind::Source,
            plugin_name: plugins.source.name().to_string(),
            plugin_version: plugins.source.plugin_version().to_string(),
            determinism: plugins.source.determinism(),
            config: settings.source.config.clone(),
            input_contract: None,
            output_contract: plugins.source.output_schema(),
            fork_to: Vec::new(),
            detail: NodeDetail::Source,
        });
        chain.push(source_id.clone());

        // One node per step, positions starting at one.
        let mut transform_position = 0_usize;
        for (index, step) in settings.steps.iter().enumerate() {
            let position = index + 1;
            let node = match step {
                StepSettings::Transform(transform) => {
                    let node_id = derive_node_id(
                        &transform.plugin,
                        NodeKind::Transform,
                        position,
                        &transform.config,
                    )?;
                    let plugin = plugins.transforms.get(transform_position);
                    let node = GraphNode {
                        node_id: node_id.clone(),
                        kind: NodeKind::Transform,
                        plugin_name: transform.plugin.clone(),
                        plugin_version: plugin
                            .map_or_else(|| "unknown".to_string(), |p| {
                                p.plugin_version().to_string()
                            }),
                        determinism: plugin
                            .map_or(DeterminismClass::Deterministic, |p| p.determinism()),
                        config: transform.config.clone(),
                        input_contract: plugin.and_then(|p| p.input_schema()),
                        output_contract: plugin.and_then(|p| p.output_schema()),
                        fork_to: Vec::new(),
                        detail: NodeDetail::Transform {
                            position: transform_position,
                        },
                    };
                    transform_id_map.insert(transform_position, node_id);
                    transform_position += 1;
                    node
                }
                StepSettings::Gate(gate) => {
                    let config = json!({
                        "name": gate.name,
                        "condition": gate.condition,
                        "routes": gate.routes,
                        "fork_to": gate.fork_to,
                        "plugin_config": gate.config,
                    });
                    let fork_to: Vec<BranchName> =
                        gate.fork_to.iter().map(BranchName::new).collect();
                    let (plugin_name, detail, contract) = match (&gate.condition, &gate.plugin) {
                        (Some(condition), None) => {
                            let predicate = parse_predicate(condition).map_err(|source| {
                                GraphError::Settings(
                                    elspeth_config::SettingsError::InvalidCondition {
                                        gate: gate.name.clone(),
                                        source,
                                    },
                                )
                            })?;
                            ("config_gate".to_string(), NodeDetail::ConfigGate {
                                name: gate.name.clone(),
                                predicate,
                            }, None)
                        }
                        (None, Some(plugin_name)) => {
                            let contract = plugins
                                .gates
                                .get(&gate.name)
                                .and_then(|plugin| plugin.input_schema());
                            (plugin_name.clone(), NodeDetail::PluginGate {
                                name: gate.name.clone(),
                            }, contract)
                        }
                        _ => {
                            return Err(GraphError::Settings(
                                elspeth_config::SettingsError::AmbiguousGate {
                                    gate: gate.name.clone(),
                                },
                            ));
                        }
                    };
                    let node_id =
                        derive_node_id(&plugin_name, NodeKind::Gate, position, &config)?;
                    if matches!(detail, NodeDetail::ConfigGate { .. }) {
                        config_gate_id_map.insert(gate.name.clone(), node_id.clone());
                    }
                    for (label, target) in &gate.routes {
                        route_resolution_map.insert(
                            (node_id.clone(), RouteLabel::new(label.clone())),
                            RouteResolution::from_target(target),
                        );
                    }
                    GraphNode {
                        node_id,
                        kind: NodeKind::Gate,
                        plugin_name,
                        plugin_version: plugins
                            .gates
                            .get(&gate.name)
                            .map_or_else(|| "builtin".to_string(), |plugin| {
                                plugin.plugin_version().to_string()
                            }),
                        determinism: DeterminismClass::Deterministic,
                        config,
                        // Gates preserve schemas: output equals input.
                        input_contract: contract.clone(),
                        output_contract: contract,
                        fork_to,
                        detail,
                    }
                }
                StepSettings::Aggregation(aggregation) => {
                    let config = json!({
                        "name": aggregation.name,
                        "transform": aggregation.transform,
                        "trigger": aggregation.trigger,
                        "transform_config": aggregation.config,
                    });
                    let node_id = derive_node_id(
                        &aggregation.transform,
                        NodeKind::Aggregation,
                        position,
                        &config,
                    )?;
                    aggregation_id_map.insert(aggregation.name.clone(), node_id.clone());
                    GraphNode {
                        node_id,
                        kind: NodeKind::Aggregation,
                        plugin_name: aggregation.transform.clone(),
                        plugin_version: plugins
                            .batch_transforms
                            .get(&aggregation.name)
                            .map_or_else(|| "builtin".to_string(), |plugin| {
                                plugin.plugin_version().to_string()
                            }),
                        determinism: DeterminismClass::Deterministic,
                        config,
                        input_contract: None,
                        output_contract: None,
                        fork_to: Vec::new(),
                        detail: NodeDetail::Aggregation {
                            settings: aggregation.clone(),
                        },
                    }
                }
                StepSettings::Coalesce(coalesce) => {
                    let config = json!({
                        "name": coalesce.name,
                        "branches": coalesce.branches,
                        "policy": coalesce.policy,
                        "merge": coalesce.merge,
                        "collision": coalesce.collision,
                    });
                    let node_id =
                        derive_node_id("coalesce", NodeKind::Coalesce, position, &config)?;
                    coalesce_id_map.insert(coalesce.name.clone(), node_id.clone());
                    for branch in &coalesce.branches {
                        branch_to_coalesce.insert(BranchName::new(branch), node_id.clone());
                    }
                    GraphNode {
                        node_id,
                        kind: NodeKind::Coalesce,
                        plugin_name: "coalesce".to_string(),
                        plugin_version: "builtin".to_string(),
                        determinism: DeterminismClass::Deterministic,
                        config,
                        input_contract: None,
                        output_contract: None,
                        fork_to: Vec::new(),
                        detail: NodeDetail::Coalesce {
                            settings: coalesce.clone(),
                        },
                    }
                }
            };
            chain.push(node.node_id.clone());
            nodes.insert(node.node_id.clone(), node);
        }

        // One node per sink, positions after the step chain.
        let sink_base = settings.steps.len() + 1;
        for (offset, (sink_name, sink_settings)) in settings.sinks.iter().enumerate() {
            let name = SinkName::new(sink_name.clone());
            let node_id = derive_node_id(
                &sink_settings.plugin,
                NodeKind::Sink,
                sink_base + offset,
                &sink_settings.config,
            )?;
            let plugin = plugins.sinks.get(&name);
            nodes.insert(node_id.clone(), GraphNode {
                node_id: node_id.clone(),
                kind: NodeKind::Sink,
                plugin_name: sink_settings.plugin.clone(),
                plugin_version: plugin
                    .map_or_else(|| "unknown".to_string(), |p| p.plugin_version().to_string()),
                determinism: DeterminismClass::IoWrite,
                config: sink_settings.config.clone(),
                input_contract: plugin.and_then(|p| p.input_schema()),
                output_contract: None,
                fork_to: Vec::new(),
                detail: NodeDetail::Sink {
                    name: name.clone(),
                },
            });
            sink_id_map.insert(name, node_id);
        }

        // Continue-edge successors: each chain node flows to the next, and
        // the last chain node flows to the default sink.
        let mut successor = BTreeMap::new();
        for window in chain.windows(2) {
            successor.insert(window[0].clone(), window[1].clone());
        }
        if let (Some(last), Some(default_sink)) =
            (chain.last(), sink_id_map.get(&SinkName::new(settings.default_sink.clone())))
        {
            successor.insert(last.clone(), default_sink.clone());
        }

        let topology: Vec<String> =
            nodes.keys().map(|node_id| node_id.as_str().to_string()).collect();
        let topology_hash = hash_canonical_json(&topology)?;

        let graph = Self {
            nodes,
            source_id,
            chain,
            sink_id_map,
            transform_id_map,
            config_gate_id_map,
            aggregation_id_map,
            coalesce_id_map,
            route_resolution_map,
            branch_to_coalesce,
            successor,
            edge_map: BTreeMap::new(),
            topology_hash,
        };
        graph.validate(settings)?;
        Ok(graph)
    }
}
