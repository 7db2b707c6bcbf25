// elspeth-engine/src/graph/validate.rs
// ============================================================================
// Module: Elspeth Graph Validation
// Description: Edge compatibility checks run at construction time.
// Purpose: Reject unroutable branches and incompatible schemas before row one.
// Dependencies: crate::graph, elspeth-config, elspeth-core
// ============================================================================

//! ## Overview
//! Validation covers four families of defects: gate routes that resolve to
//! nothing, fork branches with no coalesce, coalesce branches no fork
//! produces, and schema incompatibilities on continue edges. For nodes with
//! no declared schema (config gates, aggregations, coalesces) the walker
//! looks through them to the first upstream node that declares an output
//! schema. Errors name the producer node, the consumer node, and the
//! specific missing field or type mismatch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_config::PipelineSettings;
use elspeth_core::BranchName;
use elspeth_core::NodeId;
use elspeth_core::SchemaContract;

use crate::graph::ExecutionGraph;
use crate::graph::GraphError;
use crate::graph::RouteResolution;

// ============================================================================
// SECTION: Validation
// ============================================================================

impl ExecutionGraph {
    /// Validates edge compatibility for the constructed graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] naming the offending nodes and defect.
    pub fn validate(&self, settings: &PipelineSettings) -> Result<(), GraphError> {
        self.validate_routes(settings)?;
        self.validate_fork_branches()?;
        self.validate_coalesce_branches()?;
        self.validate_schemas()?;
        Ok(())
    }

    /// Checks every gate route target resolves to a known sink, continue, or
    /// fork.
    fn validate_routes(&self, settings: &PipelineSettings) -> Result<(), GraphError> {
        let available: Vec<String> = settings.sinks.keys().cloned().collect();
        for ((node_id, label), resolution) in &self.route_resolution_map {
            if let RouteResolution::Sink(sink) = resolution {
                if !self.sink_id_map.contains_key(sink) {
                    let gate = self
                        .nodes
                        .get(node_id)
                        .map_or_else(|| node_id.to_string(), |node| node.plugin_name.clone());
                    return Err(GraphError::UnknownRouteTarget {
                        gate,
                        label: label.as_str().to_string(),
                        target: sink.as_str().to_string(),
                        available,
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks every fork branch reaches a coalesce that names it.
    fn validate_fork_branches(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            for branch in &node.fork_to {
                if !self.branch_to_coalesce.contains_key(branch) {
                    return Err(GraphError::UnroutedBranch {
                        gate: node.plugin_name.clone(),
                        branch: branch.as_str().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks every coalesce branch is produced by some fork.
    fn validate_coalesce_branches(&self) -> Result<(), GraphError> {
        let forked: Vec<&BranchName> =
            self.nodes.values().flat_map(|node| node.fork_to.iter()).collect();
        for (branch, coalesce_node) in &self.branch_to_coalesce {
            if !forked.contains(&branch) {
                let coalesce = self
                    .nodes
                    .get(coalesce_node)
                    .map_or_else(|| coalesce_node.to_string(), |node| node.plugin_name.clone());
                return Err(GraphError::OrphanCoalesceBranch {
                    coalesce,
                    branch: branch.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks schema compatibility on every continue edge.
    fn validate_schemas(&self) -> Result<(), GraphError> {
        for (producer_id, consumer_id) in &self.successor {
            let Some(consumer) = self.nodes.get(consumer_id) else {
                continue;
            };
            let Some(consumer_contract) = &consumer.input_contract else {
                continue;
            };
            let Some((effective_producer, producer_contract)) =
                self.effective_output_contract(producer_id)
            else {
                continue;
            };

            let incompatibilities = consumer_contract.incompatibilities_with(&producer_contract);
            if !incompatibilities.is_empty() {
                let details = incompatibilities
                    .iter()
                    .map(std::string::ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(GraphError::SchemaMismatch {
                    producer: effective_producer,
                    consumer: consumer_id.clone(),
                    details,
                });
            }
        }
        Ok(())
    }

    /// Walks upstream from a node to the first declared output contract.
    ///
    /// Nodes without a declared schema (config gates, aggregations,
    /// coalesces) are looked through.
    fn effective_output_contract(&self, node_id: &NodeId) -> Option<(NodeId, SchemaContract)> {
        let mut current = node_id.clone();
        loop {
            let node = self.nodes.get(&current)?;
            if let Some(contract) = &node.output_contract {
                return Some((current, contract.clone()));
            }
            let upstream = self
                .successor
                .iter()
                .find(|(_, downstream)| **downstream == current)
                .map(|(upstream, _)| upstream.clone())?;
            current = upstream;
        }
    }
}
