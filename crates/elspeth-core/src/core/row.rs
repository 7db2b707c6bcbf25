// elspeth-core/src/core/row.rs
// ============================================================================
// Module: Elspeth Row and Token Records
// Description: Source row audit records and in-flight token values.
// Purpose: Anchor every row to the payload store and track token lineage.
// Dependencies: crate::core::{hashing, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Row data is carried as a JSON object (the heterogeneous "document" of the
//! engine). The audit record for a row stores a canonical hash of the source
//! data plus an opaque reference into the payload store; both are mandatory,
//! which is what guarantees "raw data stored before any processing".
//!
//! Tokens form a forest rooted at one initial token per row: forks create
//! children tagged with a branch name, coalesces merge children back. The
//! durable [`TokenRecord`] captures lineage; the in-memory [`TokenInfo`]
//! carries the current row data through the graph and is what aggregation
//! checkpoints serialize.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::BranchName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::RowId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Row Data
// ============================================================================

/// Heterogeneous row payload: a JSON object keyed by field name.
pub type RowData = Map<String, Value>;

/// Wraps row data in a [`Value`] for hashing and storage.
#[must_use]
pub fn row_value(data: &RowData) -> Value {
    Value::Object(data.clone())
}

// ============================================================================
// SECTION: Row Record
// ============================================================================

/// Audit record for one source-provided row.
///
/// # Invariants
/// - `source_data_ref` is always populated; recorders reject rows without a
///   payload store reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    /// Row identifier, unique within the run.
    pub row_id: RowId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Source node that produced the row.
    pub source_node_id: NodeId,
    /// Monotonic row index within the source sequence.
    pub row_index: u64,
    /// Canonical, ordering-insensitive hash of the source data.
    pub source_data_hash: HashDigest,
    /// Content-addressed reference into the payload store.
    pub source_data_ref: String,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Token Record
// ============================================================================

/// Durable lineage record for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Parent token when this token was created by a fork.
    pub parent_token_id: Option<TokenId>,
    /// Branch name when this token was created by a fork.
    pub branch_name: Option<BranchName>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Token Info
// ============================================================================

/// In-flight token value carried through the graph by the row processor.
///
/// Tokens are immutable from the processor's viewpoint; replacing row data
/// produces a new value via [`TokenInfo::with_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token identifier.
    pub token_id: TokenId,
    /// Owning row identifier.
    pub row_id: RowId,
    /// Current row data.
    pub row_data: RowData,
    /// Branch name when created by a fork.
    pub branch_name: Option<BranchName>,
    /// Parent token when created by a fork.
    pub parent_token_id: Option<TokenId>,
}

impl TokenInfo {
    /// Creates the initial token for a row.
    #[must_use]
    pub const fn initial(token_id: TokenId, row_id: RowId, row_data: RowData) -> Self {
        Self {
            token_id,
            row_id,
            row_data,
            branch_name: None,
            parent_token_id: None,
        }
    }

    /// Returns a copy of this token carrying replacement row data.
    #[must_use]
    pub fn with_data(&self, row_data: RowData) -> Self {
        Self {
            token_id: self.token_id.clone(),
            row_id: self.row_id.clone(),
            row_data,
            branch_name: self.branch_name.clone(),
            parent_token_id: self.parent_token_id.clone(),
        }
    }
}
