// elspeth-engine/src/executors/coalesce.rs
// ============================================================================
// Module: Elspeth Coalesce Executor
// Description: Branch joins keyed by row with policy-driven release.
// Purpose: Merge fork children back into one token per row.
// Dependencies: crate::{error, telemetry, tokens}, elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! Each coalesce node holds a join set keyed by row identifier. Deposits
//! record a non-terminal `Buffered` outcome and open/close a node state so
//! every branch arrival is audited. When the policy is satisfied the
//! children merge into one token: `ConsumedInBatch` for each incoming,
//! `Coalesced` for the merged token, which then continues on the outgoing
//! edge. `flush_pending` finalises everything holdable at end of run:
//! best-effort joins merge what arrived, require-all joins that are still
//! incomplete fail with the missing branches named.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_config::CoalescePolicy;
use elspeth_config::CoalesceSettings;
use elspeth_config::CollisionPolicy;
use elspeth_config::MergeStrategy;
use elspeth_core::AuditRecorder;
use elspeth_core::BranchName;
use elspeth_core::Clock;
use elspeth_core::NodeId;
use elspeth_core::RowData;
use elspeth_core::RowId;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::StateCompletion;
use elspeth_core::TokenInfo;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_core::row_value;
use serde_json::Value;
use serde_json::json;

use crate::error::EngineError;
use crate::telemetry::EngineEvent;
use crate::telemetry::TelemetryObserver;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Deposit Result
// ============================================================================

/// Result of depositing one token into a join set.
#[derive(Debug)]
pub enum CoalesceDeposit {
    /// The join is not yet satisfied; the token is held.
    Held,
    /// The join released: one merged token, with the consumed children.
    Merged {
        /// Merged token continuing on the outgoing edge.
        merged: TokenInfo,
        /// Tokens absorbed by the merge.
        consumed: Vec<TokenInfo>,
        /// The releasing deposit state, for routing attribution.
        state_id: elspeth_core::StateId,
    },
}

// ============================================================================
// SECTION: Coalesce Executor
// ============================================================================

/// Owns the pending join sets of every coalesce node in a run.
#[derive(Debug, Default)]
pub struct CoalesceExecutor {
    /// Pending joins: node, then row, then arrivals in branch order.
    pending: BTreeMap<NodeId, BTreeMap<RowId, Vec<TokenInfo>>>,
}

impl CoalesceExecutor {
    /// Creates an empty coalesce executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently held by a node.
    #[must_use]
    pub fn pending_rows(&self, node_id: &NodeId) -> usize {
        self.pending.get(node_id).map_or(0, BTreeMap::len)
    }

    /// Deposits a token into the node's join set for its row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when audit writes fail.
    #[allow(clippy::too_many_arguments, reason = "executor surface mirrors the audit dance inputs")]
    pub fn deposit(
        &mut self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        node_id: &NodeId,
        settings: &CoalesceSettings,
        token: TokenInfo,
        tokens: &mut TokenManager,
        observer: &dyn TelemetryObserver,
    ) -> Result<CoalesceDeposit, EngineError> {
        let started_at = clock.now();
        let state_id =
            recorder.begin_node_state(run_id, node_id, &token.token_id, started_at)?;
        let row_hash = hash_canonical_json(&row_value(&token.row_data))
            .map_err(elspeth_core::RecorderError::from)?;

        let arrivals = self
            .pending
            .entry(node_id.clone())
            .or_default()
            .entry(token.row_id.clone())
            .or_default();
        arrivals.push(token.clone());
        let arrived: Vec<BranchName> =
            arrivals.iter().filter_map(|held| held.branch_name.clone()).collect();
        let ready = policy_satisfied(&settings.policy, &settings.branches, &arrived);

        let duration_ms = clock.now().millis_since(started_at);
        recorder.complete_node_state(&state_id, StateCompletion {
            input_hash: row_hash.clone(),
            output_hash: row_hash,
            success_reason: json!({
                "deposited": token.branch_name.as_ref().map(BranchName::as_str),
                "arrived": arrived.iter().map(BranchName::as_str).collect::<Vec<_>>(),
                "ready": ready,
            }),
            duration_ms,
        })?;

        if !ready {
            recorder.record_token_outcome(&TokenOutcomeRecord {
                run_id: run_id.clone(),
                row_id: token.row_id.clone(),
                token_id: token.token_id.clone(),
                outcome: RowOutcome::Buffered,
                sink_name: None,
                is_terminal: false,
                recorded_at: clock.now(),
            })?;
            return Ok(CoalesceDeposit::Held);
        }

        let consumed = self
            .pending
            .get_mut(node_id)
            .and_then(|rows| rows.remove(&token.row_id))
            .unwrap_or_default();
        let merged =
            self.merge(recorder, clock, run_id, settings, &consumed, tokens, observer)?;
        Ok(CoalesceDeposit::Merged {
            merged,
            consumed,
            state_id,
        })
    }

    /// Finalises every held join at end of run.
    ///
    /// Returns merged tokens to enqueue on each node's outgoing edge.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when audit writes fail.
    pub fn flush_pending(
        &mut self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        settings_by_node: &BTreeMap<NodeId, CoalesceSettings>,
        tokens: &mut TokenManager,
        observer: &dyn TelemetryObserver,
    ) -> Result<Vec<(NodeId, TokenInfo)>, EngineError> {
        let mut released = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        for (node_id, rows) in pending {
            let Some(settings) = settings_by_node.get(&node_id) else {
                return Err(EngineError::InternalCorruption(format!(
                    "pending coalesce rows for unknown node {node_id}"
                )));
            };
            for (row_id, held) in rows {
                match settings.policy {
                    CoalescePolicy::BestEffort => {
                        let merged = self.merge(
                            recorder, clock, run_id, settings, &held, tokens, observer,
                        )?;
                        released.push((node_id.clone(), merged));
                    }
                    CoalescePolicy::RequireAll
                    | CoalescePolicy::Quorum(_)
                    | CoalescePolicy::SelectBranch(_) => {
                        let arrived: Vec<&str> = held
                            .iter()
                            .filter_map(|token| {
                                token.branch_name.as_ref().map(BranchName::as_str)
                            })
                            .collect();
                        let missing: Vec<&str> = settings
                            .branches
                            .iter()
                            .map(String::as_str)
                            .filter(|branch| !arrived.contains(branch))
                            .collect();
                        tracing::warn!(
                            target: "elspeth::coalesce",
                            %node_id,
                            %row_id,
                            ?missing,
                            "incomplete coalesce at end of run"
                        );
                        for token in held {
                            recorder.record_token_outcome(&TokenOutcomeRecord {
                                run_id: run_id.clone(),
                                row_id: token.row_id.clone(),
                                token_id: token.token_id.clone(),
                                outcome: RowOutcome::Failed,
                                sink_name: None,
                                is_terminal: true,
                                recorded_at: clock.now(),
                            })?;
                            observer.on_event(&EngineEvent::TokenCompleted {
                                token_id: token.token_id.clone(),
                                outcome: RowOutcome::Failed,
                            });
                        }
                    }
                }
            }
        }
        Ok(released)
    }

    /// Merges held tokens into one, recording outcomes for all parties.
    #[allow(clippy::too_many_arguments, reason = "helper threads the audit dance inputs")]
    fn merge(
        &self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        settings: &CoalesceSettings,
        held: &[TokenInfo],
        tokens: &mut TokenManager,
        observer: &dyn TelemetryObserver,
    ) -> Result<TokenInfo, EngineError> {
        let first = held.first().ok_or_else(|| {
            EngineError::InternalCorruption("merge of empty coalesce hold".to_string())
        })?;
        let merged_data = merge_rows(settings, held)?;
        let merged = tokens.create_merged(&first.row_id, merged_data);
        recorder.create_token(&merged.row_id, &merged.token_id, clock.now())?;

        for token in held {
            recorder.record_token_outcome(&TokenOutcomeRecord {
                run_id: run_id.clone(),
                row_id: token.row_id.clone(),
                token_id: token.token_id.clone(),
                outcome: RowOutcome::ConsumedInBatch,
                sink_name: None,
                is_terminal: true,
                recorded_at: clock.now(),
            })?;
            observer.on_event(&EngineEvent::TokenCompleted {
                token_id: token.token_id.clone(),
                outcome: RowOutcome::ConsumedInBatch,
            });
        }
        recorder.record_token_outcome(&TokenOutcomeRecord {
            run_id: run_id.clone(),
            row_id: merged.row_id.clone(),
            token_id: merged.token_id.clone(),
            outcome: RowOutcome::Coalesced,
            sink_name: None,
            is_terminal: true,
            recorded_at: clock.now(),
        })?;
        observer.on_event(&EngineEvent::TokenCompleted {
            token_id: merged.token_id.clone(),
            outcome: RowOutcome::Coalesced,
        });
        Ok(merged)
    }
}

// ============================================================================
// SECTION: Policies and Merging
// ============================================================================

/// Reports whether a join policy is satisfied by the arrived branches.
fn policy_satisfied(
    policy: &CoalescePolicy,
    declared: &[String],
    arrived: &[BranchName],
) -> bool {
    match policy {
        CoalescePolicy::RequireAll => declared
            .iter()
            .all(|branch| arrived.iter().any(|name| name.as_str() == branch)),
        CoalescePolicy::BestEffort => false,
        CoalescePolicy::Quorum(quorum) => arrived.len() >= *quorum,
        CoalescePolicy::SelectBranch(branch) => {
            arrived.iter().any(|name| name.as_str() == branch)
        }
    }
}

/// Merges held rows according to the configured strategy.
fn merge_rows(settings: &CoalesceSettings, held: &[TokenInfo]) -> Result<RowData, EngineError> {
    let rows: Vec<&TokenInfo> = match &settings.policy {
        CoalescePolicy::SelectBranch(branch) => held
            .iter()
            .filter(|token| {
                token.branch_name.as_ref().is_some_and(|name| name.as_str() == branch)
            })
            .collect(),
        _ => held.iter().collect(),
    };
    let first = rows.first().ok_or_else(|| {
        EngineError::InternalCorruption("merge selected no rows".to_string())
    })?;

    match settings.merge {
        MergeStrategy::First => Ok(first.row_data.clone()),
        MergeStrategy::Last => {
            Ok(rows.last().map_or_else(|| first.row_data.clone(), |t| t.row_data.clone()))
        }
        MergeStrategy::Union => {
            let mut merged = RowData::new();
            for token in &rows {
                for (key, value) in &token.row_data {
                    match (merged.contains_key(key), settings.collision) {
                        (true, CollisionPolicy::FirstWins) => {}
                        (true, CollisionPolicy::Error) => {
                            if merged.get(key) != Some(value) {
                                return Err(EngineError::InternalCorruption(format!(
                                    "union merge collision on field `{key}`"
                                )));
                            }
                        }
                        _ => {
                            merged.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            Ok(merged)
        }
        MergeStrategy::Concat => {
            let mut merged = RowData::new();
            for (index, token) in rows.iter().enumerate() {
                let key = token
                    .branch_name
                    .as_ref()
                    .map_or_else(|| format!("branch_{index}"), |name| name.as_str().to_string());
                merged.insert(key, Value::Object(token.row_data.clone()));
            }
            Ok(merged)
        }
    }
}
