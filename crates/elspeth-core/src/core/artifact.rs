// elspeth-core/src/core/artifact.rs
// ============================================================================
// Module: Elspeth Artifact Records
// Description: Content-hashed sink output records.
// Purpose: Link every produced artifact back to the state that wrote it.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Artifacts are registered only after the owning sink's `flush()` returns
//! successfully (the durability gate). Each artifact carries the content
//! hash of the bytes written and the state identifier of the first token in
//! the write, which anchors lineage queries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StateId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Artifact Record
// ============================================================================

/// Audit record for one sink output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Producing sink node.
    pub sink_node_id: NodeId,
    /// State on the first token of the write.
    pub produced_by_state_id: StateId,
    /// Artifact type label (for example "file", "http").
    pub artifact_type: String,
    /// Path or URI of the produced artifact.
    pub path_or_uri: String,
    /// Size of the produced artifact in bytes.
    pub size_bytes: u64,
    /// SHA-256 hash of the bytes written.
    pub content_hash: HashDigest,
    /// Registration timestamp.
    pub registered_at: Timestamp,
}
