// elspeth-engine/src/graph/mod.rs
// ============================================================================
// Module: Elspeth Execution Graph
// Description: Validated DAG with node-ID maps and route resolution.
// Purpose: Hold the typed node/edge structure the row processor walks.
// Dependencies: crate::graph::{build, validate}, elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! The execution graph is built from resolved settings plus the plugin set's
//! declared metadata, then validated before any row is processed. It caches
//! the lookup structures every audited routing resolves through: sink and
//! step ID maps, the `(node, label)` route resolution map, the
//! branch-to-coalesce map, and (after edge registration) the
//! `(node, label) → edge` map.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod build;
pub mod validate;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_config::AggregationSettings;
use elspeth_config::CoalesceSettings;
use elspeth_config::RouteTarget;
use elspeth_core::AuditRecorder;
use elspeth_core::BranchName;
use elspeth_core::DeterminismClass;
use elspeth_core::EdgeId;
use elspeth_core::HashDigest;
use elspeth_core::NodeId;
use elspeth_core::NodeKind;
use elspeth_core::RecorderError;
use elspeth_core::RouteLabel;
use elspeth_core::RoutingMode;
use elspeth_core::RunId;
use elspeth_core::SchemaContract;
use elspeth_core::SinkName;
use elspeth_expr::Predicate;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Graph Error
// ============================================================================

/// Errors raised during graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A gate route target does not resolve to a sink, continue, or fork.
    #[error(
        "gate `{gate}` routes label `{label}` to unknown sink `{target}`; available sinks: \
         {available:?}"
    )]
    UnknownRouteTarget {
        /// Gate name.
        gate: String,
        /// Route label.
        label: String,
        /// The unresolved target.
        target: String,
        /// Declared sink names.
        available: Vec<String>,
    },
    /// A fork branch reaches neither a downstream node nor a coalesce.
    #[error("gate `{gate}` forks to branch `{branch}` but no coalesce names that branch")]
    UnroutedBranch {
        /// Gate name.
        gate: String,
        /// Orphaned branch name.
        branch: String,
    },
    /// A coalesce names a branch no fork produces.
    #[error("coalesce `{coalesce}` joins branch `{branch}` but no gate forks to it")]
    OrphanCoalesceBranch {
        /// Coalesce name.
        coalesce: String,
        /// Unproduced branch name.
        branch: String,
    },
    /// Producer and consumer schemas are incompatible on an edge.
    #[error("schema mismatch on edge {producer} -> {consumer}: {details}")]
    SchemaMismatch {
        /// Producer node.
        producer: NodeId,
        /// Consumer node.
        consumer: NodeId,
        /// Joined incompatibility descriptions.
        details: String,
    },
    /// Settings-level validation failed during graph construction.
    #[error("invalid settings: {0}")]
    Settings(#[from] elspeth_config::SettingsError),
    /// Canonical hashing of a node config failed.
    #[error("failed to hash node config: {0}")]
    Hash(#[from] elspeth_core::hashing::HashError),
}

// ============================================================================
// SECTION: Route Resolution
// ============================================================================

/// Resolution of a `(node, label)` routing pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResolution {
    /// Proceed along the continue edge.
    Continue,
    /// Fork into the gate's declared branches.
    Fork,
    /// Route to the named sink.
    Sink(SinkName),
}

impl RouteResolution {
    /// Builds a resolution from a settings route target.
    #[must_use]
    pub fn from_target(target: &RouteTarget) -> Self {
        match target {
            RouteTarget::Continue => Self::Continue,
            RouteTarget::Fork => Self::Fork,
            RouteTarget::Sink(sink) => Self::Sink(SinkName::new(sink.clone())),
        }
    }
}

// ============================================================================
// SECTION: Graph Nodes
// ============================================================================

/// Node-kind-specific execution detail.
#[derive(Debug, Clone)]
pub enum NodeDetail {
    /// The pipeline source.
    Source,
    /// A transform at a position in the plugin set's transform list.
    Transform {
        /// Index into the plugin set's transforms.
        position: usize,
    },
    /// A plugin-driven gate.
    PluginGate {
        /// Gate name.
        name: String,
    },
    /// A config-driven gate with a parsed predicate.
    ConfigGate {
        /// Gate name.
        name: String,
        /// Parsed predicate, fixed at graph build.
        predicate: Predicate,
    },
    /// An aggregation buffer.
    Aggregation {
        /// Aggregation settings.
        settings: AggregationSettings,
    },
    /// A coalesce join.
    Coalesce {
        /// Coalesce settings.
        settings: CoalesceSettings,
    },
    /// A named sink.
    Sink {
        /// Sink name.
        name: SinkName,
    },
}

/// One node of the execution graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Deterministic node identifier.
    pub node_id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Plugin name registered for the node.
    pub plugin_name: String,
    /// Plugin version registered for the node.
    pub plugin_version: String,
    /// Declared determinism class.
    pub determinism: DeterminismClass,
    /// Resolved node configuration.
    pub config: Value,
    /// Declared input schema contract, if any.
    pub input_contract: Option<SchemaContract>,
    /// Declared output schema contract, if any.
    pub output_contract: Option<SchemaContract>,
    /// Branch names this node forks to; empty for non-gate nodes.
    pub fork_to: Vec<BranchName>,
    /// Kind-specific execution detail.
    pub detail: NodeDetail,
}

// ============================================================================
// SECTION: Execution Graph
// ============================================================================

/// Validated execution graph with cached lookup structures.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Nodes keyed by identifier.
    pub(crate) nodes: BTreeMap<NodeId, GraphNode>,
    /// Source node identifier.
    pub(crate) source_id: NodeId,
    /// Main-chain order: source, then steps in settings order.
    #[allow(dead_code, reason = "retained for future chain-order lookups")]
    pub(crate) chain: Vec<NodeId>,
    /// Sink name to node identifier.
    pub(crate) sink_id_map: BTreeMap<SinkName, NodeId>,
    /// Transform position to node identifier.
    #[allow(dead_code, reason = "retained for future transform-position lookups")]
    pub(crate) transform_id_map: BTreeMap<usize, NodeId>,
    /// Config gate name to node identifier.
    #[allow(dead_code, reason = "retained for future config-gate-name lookups")]
    pub(crate) config_gate_id_map: BTreeMap<String, NodeId>,
    /// Aggregation name to node identifier.
    #[allow(dead_code, reason = "retained for future aggregation-name lookups")]
    pub(crate) aggregation_id_map: BTreeMap<String, NodeId>,
    /// Coalesce name to node identifier.
    #[allow(dead_code, reason = "retained for future coalesce-name lookups")]
    pub(crate) coalesce_id_map: BTreeMap<String, NodeId>,
    /// `(node, label)` to routing resolution.
    pub(crate) route_resolution_map: BTreeMap<(NodeId, RouteLabel), RouteResolution>,
    /// Branch name to the coalesce node that joins it.
    pub(crate) branch_to_coalesce: BTreeMap<BranchName, NodeId>,
    /// Continue-edge successor of each main-chain node.
    pub(crate) successor: BTreeMap<NodeId, NodeId>,
    /// `(node, label)` to registered edge, populated by `register_edges`.
    pub(crate) edge_map: BTreeMap<(NodeId, RouteLabel), EdgeId>,
    /// Canonical hash of the DAG topology for checkpoint compatibility.
    pub(crate) topology_hash: HashDigest,
}

impl ExecutionGraph {
    /// Returns the source node identifier.
    #[must_use]
    pub const fn source_id(&self) -> &NodeId {
        &self.source_id
    }

    /// Returns a node by identifier.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    /// Returns all node identifiers in deterministic order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Returns the sink node identifier for a sink name.
    #[must_use]
    pub fn sink_id(&self, name: &SinkName) -> Option<&NodeId> {
        self.sink_id_map.get(name)
    }

    /// Returns the declared sink names in deterministic order.
    #[must_use]
    pub fn sink_names(&self) -> Vec<SinkName> {
        self.sink_id_map.keys().cloned().collect()
    }

    /// Returns the continue-edge successor of a main-chain node.
    #[must_use]
    pub fn successor(&self, node_id: &NodeId) -> Option<&NodeId> {
        self.successor.get(node_id)
    }

    /// Resolves a `(node, label)` routing pair.
    #[must_use]
    pub fn resolve_route(&self, node_id: &NodeId, label: &RouteLabel) -> Option<&RouteResolution> {
        self.route_resolution_map.get(&(node_id.clone(), label.clone()))
    }

    /// Returns the coalesce node joining a branch.
    #[must_use]
    pub fn coalesce_for_branch(&self, branch: &BranchName) -> Option<&NodeId> {
        self.branch_to_coalesce.get(branch)
    }

    /// Returns the registered edge for a `(node, label)` pair.
    #[must_use]
    pub fn edge(&self, node_id: &NodeId, label: &RouteLabel) -> Option<&EdgeId> {
        self.edge_map.get(&(node_id.clone(), label.clone()))
    }

    /// Returns the topology hash for checkpoint compatibility checks.
    #[must_use]
    pub const fn topology_hash(&self) -> &HashDigest {
        &self.topology_hash
    }

    /// Registers the graph's nodes and edges in the recorder and populates
    /// the edge map.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when registration fails.
    pub fn register(
        &mut self,
        recorder: &dyn AuditRecorder,
        run_id: &RunId,
        registered_at: elspeth_core::Timestamp,
    ) -> Result<(), RecorderError> {
        for node in self.nodes.values() {
            recorder.register_node(elspeth_core::NodeRegistration {
                run_id: run_id.clone(),
                node_id: node.node_id.clone(),
                plugin_name: node.plugin_name.clone(),
                kind: node.kind,
                plugin_version: node.plugin_version.clone(),
                determinism: node.determinism,
                config: node.config.clone(),
                input_contract: node.input_contract.clone(),
                output_contract: node.output_contract.clone(),
                registered_at,
            })?;
        }

        let mut planned: Vec<(NodeId, NodeId, RouteLabel, RoutingMode)> = Vec::new();

        for (from, to) in self.successor.clone() {
            planned.push((from, to, RouteLabel::continue_label(), RoutingMode::Move));
        }
        for ((node_id, label), resolution) in self.route_resolution_map.clone() {
            match resolution {
                RouteResolution::Continue | RouteResolution::Fork => {}
                RouteResolution::Sink(sink) => {
                    if let Some(sink_node) = self.sink_id_map.get(&sink) {
                        planned.push((node_id, sink_node.clone(), label, RoutingMode::Move));
                    }
                }
            }
        }
        for (branch, coalesce_node) in self.branch_to_coalesce.clone() {
            // One copy edge per fork branch, per gate that forks to it.
            for node in self.nodes.values() {
                if node.fork_to.contains(&branch) {
                    planned.push((
                        node.node_id.clone(),
                        coalesce_node.clone(),
                        RouteLabel::new(branch.as_str()),
                        RoutingMode::Copy,
                    ));
                }
            }
        }

        for (from, to, label, mode) in planned {
            let edge = recorder.register_edge(run_id, &from, &to, &label, mode)?;
            self.edge_map.insert((from, label), edge.edge_id);
        }
        Ok(())
    }
}
