// elspeth-engine/src/tokens.rs
// ============================================================================
// Module: Elspeth Token Manager
// Description: Token identifier issue and in-memory lineage arena.
// Purpose: Track the token forest for one run and enforce fork budgets.
// Dependencies: elspeth-core, crate::error
// ============================================================================

//! ## Overview
//! Tokens form a forest rooted at one initial token per row. The manager
//! issues deterministic sequential identifiers, keeps the in-memory arena
//! for the current run, and counts forks per row so the configurable budget
//! can bound branch explosion. The recorder owns durable lineage; this
//! arena exists so the processor never re-reads the audit store mid-row.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::BranchName;
use elspeth_core::RowData;
use elspeth_core::RowId;
use elspeth_core::TokenId;
use elspeth_core::TokenInfo;

use crate::error::EngineError;

// ============================================================================
// SECTION: Token Manager
// ============================================================================

/// Issues token identifiers and tracks lineage for one run.
#[derive(Debug, Default)]
pub struct TokenManager {
    /// Arena of all live and completed tokens, keyed by identifier.
    arena: BTreeMap<TokenId, TokenInfo>,
    /// Fork count per row, for budget enforcement.
    forks_per_row: BTreeMap<RowId, u64>,
    /// Monotonic counter feeding issued identifiers.
    next_id: u64,
}

impl TokenManager {
    /// Creates an empty token manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next token identifier.
    fn issue_id(&mut self) -> TokenId {
        self.next_id += 1;
        TokenId::new(format!("tok-{}", self.next_id))
    }

    /// Creates the initial token for a row and stores it in the arena.
    pub fn create_initial(&mut self, row_id: &RowId, row_data: RowData) -> TokenInfo {
        let token = TokenInfo::initial(self.issue_id(), row_id.clone(), row_data);
        self.arena.insert(token.token_id.clone(), token.clone());
        token
    }

    /// Registers an externally reconstructed token (checkpoint restore).
    pub fn adopt(&mut self, token: TokenInfo) {
        // Keep the id counter ahead of any adopted "tok-N" identifier so
        // resumed runs never reissue a live id.
        if let Some(rest) = token.token_id.as_str().strip_prefix("tok-") {
            if let Ok(n) = rest.parse::<u64>() {
                self.next_id = self.next_id.max(n);
            }
        }
        self.arena.insert(token.token_id.clone(), token);
    }

    /// Returns a token from the arena.
    #[must_use]
    pub fn get(&self, token_id: &TokenId) -> Option<&TokenInfo> {
        self.arena.get(token_id)
    }

    /// Replaces a token's stored value after a transform update.
    pub fn update(&mut self, token: TokenInfo) {
        self.arena.insert(token.token_id.clone(), token);
    }

    /// Forks a parent token into one child per branch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ForkBudgetExhausted`] when the row's fork
    /// budget would be exceeded.
    pub fn fork(
        &mut self,
        parent: &TokenInfo,
        branches: &[BranchName],
        budget: u64,
    ) -> Result<Vec<TokenInfo>, EngineError> {
        let counter = self.forks_per_row.entry(parent.row_id.clone()).or_insert(0);
        let requested = u64::try_from(branches.len()).unwrap_or(u64::MAX);
        if counter.saturating_add(requested) > budget {
            return Err(EngineError::ForkBudgetExhausted {
                budget,
            });
        }
        *counter += requested;

        let children = branches
            .iter()
            .map(|branch| {
                let child = TokenInfo {
                    token_id: self.issue_id(),
                    row_id: parent.row_id.clone(),
                    row_data: parent.row_data.clone(),
                    branch_name: Some(branch.clone()),
                    parent_token_id: Some(parent.token_id.clone()),
                };
                self.arena.insert(child.token_id.clone(), child.clone());
                child
            })
            .collect();
        Ok(children)
    }

    /// Creates a merged token continuing a row after a flush or join.
    pub fn create_merged(&mut self, row_id: &RowId, row_data: RowData) -> TokenInfo {
        let token = TokenInfo {
            token_id: self.issue_id(),
            row_id: row_id.clone(),
            row_data,
            branch_name: None,
            parent_token_id: None,
        };
        self.arena.insert(token.token_id.clone(), token.clone());
        token
    }

    /// Returns every arena token belonging to a row.
    #[must_use]
    pub fn tokens_for_row(&self, row_id: &RowId) -> Vec<&TokenInfo> {
        self.arena.values().filter(|token| token.row_id == *row_id).collect()
    }

    /// Clears per-row fork accounting once a row reaches its terminal set.
    pub fn finish_row(&mut self, row_id: &RowId) {
        self.forks_per_row.remove(row_id);
    }
}
