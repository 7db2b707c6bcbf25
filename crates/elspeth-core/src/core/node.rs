// elspeth-core/src/core/node.rs
// ============================================================================
// Module: Elspeth Graph Node Records
// Description: Node and edge audit records with kind and determinism metadata.
// Purpose: Capture the registered execution graph for replay and validation.
// Dependencies: crate::core::{hashing, identifiers, schema, time}, serde
// ============================================================================

//! ## Overview
//! Nodes and edges are registered in the audit store before any row is
//! processed. Node identifiers are deterministic (see
//! [`NodeId`](crate::core::identifiers::NodeId)), which is what makes a
//! checkpoint taken by one run resumable by another run with the same
//! resolved configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::EdgeId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RouteLabel;
use crate::core::identifiers::RunId;
use crate::core::schema::SchemaContract;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Node Kind
// ============================================================================

/// Execution graph node kinds.
///
/// # Invariants
/// - Variants are stable for serialization and audit replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Row-producing source node.
    Source,
    /// Row-transforming node.
    Transform,
    /// Routing or forking gate node.
    Gate,
    /// Buffering aggregation node.
    Aggregation,
    /// Branch-joining coalesce node.
    Coalesce,
    /// Artifact-producing sink node.
    Sink,
}

impl NodeKind {
    /// Returns the stable lowercase label used in node identifiers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Gate => "gate",
            Self::Aggregation => "aggregation",
            Self::Coalesce => "coalesce",
            Self::Sink => "sink",
        }
    }
}

// ============================================================================
// SECTION: Determinism Class
// ============================================================================

/// Declared determinism class of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismClass {
    /// Output is a pure function of input.
    Deterministic,
    /// Output depends on external reads.
    IoRead,
    /// Execution performs external writes.
    IoWrite,
    /// Execution invokes external services.
    ExternalCall,
    /// Output is not reproducible from input.
    NonDeterministic,
}

// ============================================================================
// SECTION: Routing Mode
// ============================================================================

/// Routing mode for an edge traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// The input token is consumed by the traversal.
    Move,
    /// The token is duplicated for a parallel branch.
    Copy,
}

// ============================================================================
// SECTION: Node Record
// ============================================================================

/// Audit record for a registered graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Deterministic node identifier.
    pub node_id: NodeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Plugin name as declared by the plugin.
    pub plugin_name: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Plugin version string.
    pub plugin_version: String,
    /// Declared determinism class.
    pub determinism: DeterminismClass,
    /// Canonical hash of the resolved node configuration.
    pub config_hash: HashDigest,
    /// Resolved node configuration.
    pub config: Value,
    /// Declared input schema contract, if any.
    pub input_contract: Option<SchemaContract>,
    /// Declared output schema contract, if any.
    pub output_contract: Option<SchemaContract>,
    /// Registration timestamp.
    pub registered_at: Timestamp,
}

// ============================================================================
// SECTION: Edge Record
// ============================================================================

/// Audit record for a registered routing edge.
///
/// # Invariants
/// - Every audited routing resolves through a registered edge; traversing an
///   unregistered `(node, label)` pair is a `MissingEdge` failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge identifier.
    pub edge_id: EdgeId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Producing node.
    pub from_node: NodeId,
    /// Consuming node.
    pub to_node: NodeId,
    /// Routing label ("continue", "true", "false", or a branch name).
    pub label: RouteLabel,
    /// Routing mode for traversals of this edge.
    pub mode: RoutingMode,
}
