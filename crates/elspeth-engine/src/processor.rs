// elspeth-engine/src/processor.rs
// ============================================================================
// Module: Elspeth Row Processor
// Description: Drives one source row through the graph to terminal outcomes.
// Purpose: Own the work-list walk, sink batching, and outcome bookkeeping.
// Dependencies: crate::{error, executors, graph, plugins, retry, telemetry, tokens}
// ============================================================================

//! ## Overview
//! The processor pops `(node, token)` pairs off a work list in deterministic
//! depth-first order and dispatches by node kind. Sink-bound tokens are not
//! written one at a time: they accumulate in per-sink batches drained at
//! flush boundaries. Before a row finishes, the processor asserts that every
//! leaf token has exactly one terminal outcome recorded or owed; a
//! violation is a fatal engine bug, not a data error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use elspeth_config::TriggerSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::Clock;
use elspeth_core::NodeId;
use elspeth_core::RowData;
use elspeth_core::RowId;
use elspeth_core::RowOutcome;
use elspeth_core::RowRecord;
use elspeth_core::RunId;
use elspeth_core::SinkName;
use elspeth_core::TokenId;
use elspeth_core::TokenInfo;

use crate::error::EngineError;
use crate::executors::AggregationExecutor;
use crate::executors::CoalesceDeposit;
use crate::executors::CoalesceExecutor;
use crate::executors::GateExecution;
use crate::executors::GateImpl;
use crate::executors::SinkBatchEntry;
use crate::executors::TransformExecution;
use crate::executors::execute_gate;
use crate::executors::execute_transform;
use crate::graph::ExecutionGraph;
use crate::graph::NodeDetail;
use crate::plugins::PluginSet;
use crate::retry::RetryManager;
use crate::telemetry::TelemetryObserver;
use crate::tokens::TokenManager;

// ============================================================================
// SECTION: Row Disposition
// ============================================================================

/// Aggregate flags describing how a row's tokens fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowDisposition {
    /// At least one token reached the default sink.
    pub completed: bool,
    /// At least one token was routed to a named sink.
    pub routed: bool,
    /// At least one token was quarantined.
    pub quarantined: bool,
    /// At least one token failed.
    pub failed: bool,
}

// ============================================================================
// SECTION: Row Processor
// ============================================================================

/// Drives rows through a validated graph against a plugin set.
pub struct RowProcessor<'a> {
    /// The validated execution graph.
    graph: &'a ExecutionGraph,
    /// Audit recorder handle.
    recorder: &'a dyn AuditRecorder,
    /// Engine clock.
    clock: &'a dyn Clock,
    /// Telemetry observer.
    observer: &'a dyn TelemetryObserver,
    /// Run identifier.
    run_id: RunId,
    /// Token identifier issue and lineage arena.
    pub tokens: TokenManager,
    /// Aggregation buffers.
    pub aggregations: AggregationExecutor,
    /// Coalesce join sets.
    pub coalesces: CoalesceExecutor,
    /// Per-sink pending batches, drained at flush boundaries.
    pub pending_sinks: BTreeMap<SinkName, Vec<SinkBatchEntry>>,
    /// Retry manager for classified-retryable transform failures.
    retry: Option<RetryManager>,
    /// Fork budget per row.
    max_forks: u64,
    /// Monotonic routing group counter.
    routing_group: u64,
    /// Tokens whose terminal outcome is already recorded upstream of a sink.
    terminal_recorded: BTreeSet<TokenId>,
}

impl<'a> RowProcessor<'a> {
    /// Creates a processor for one run.
    #[must_use]
    pub fn new(
        graph: &'a ExecutionGraph,
        recorder: &'a dyn AuditRecorder,
        clock: &'a dyn Clock,
        observer: &'a dyn TelemetryObserver,
        run_id: RunId,
        retry: Option<RetryManager>,
        max_forks: u64,
    ) -> Self {
        Self {
            graph,
            recorder,
            clock,
            observer,
            run_id,
            tokens: TokenManager::new(),
            aggregations: AggregationExecutor::new(),
            coalesces: CoalesceExecutor::new(),
            pending_sinks: BTreeMap::new(),
            retry,
            max_forks,
            routing_group: 0,
            terminal_recorded: BTreeSet::new(),
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Appends a token to a sink's pending batch.
    pub fn enqueue_sink(
        &mut self,
        sink: SinkName,
        token: TokenInfo,
        pending_outcome: Option<RowOutcome>,
    ) {
        self.pending_sinks.entry(sink).or_default().push(SinkBatchEntry {
            token,
            pending_outcome,
        });
    }

    /// Takes the pending batch for one sink.
    #[must_use]
    pub fn take_pending(&mut self, sink: &SinkName) -> Vec<SinkBatchEntry> {
        self.pending_sinks.remove(sink).unwrap_or_default()
    }

    /// Processes one source row to its terminal outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a plugin failure escapes its on-error
    /// policy or an audit invariant is violated.
    pub fn process_row(
        &mut self,
        plugins: &mut PluginSet,
        row: &RowRecord,
        data: RowData,
    ) -> Result<(TokenId, RowDisposition), EngineError> {
        let initial = self.tokens.create_initial(&row.row_id, data);
        self.recorder.create_token(&row.row_id, &initial.token_id, self.clock.now())?;
        let initial_id = initial.token_id.clone();

        let start = self.graph.successor(self.graph.source_id()).cloned().ok_or_else(|| {
            EngineError::InternalCorruption("source has no outgoing edge".to_string())
        })?;

        let mut disposition = RowDisposition::default();
        self.drive(plugins, vec![(start, initial)], &mut disposition)?;
        self.verify_row_invariant(&row.row_id)?;
        self.tokens.finish_row(&row.row_id);
        Ok((initial_id, disposition))
    }

    /// Continues a token from a node's outgoing edge (used for merged tokens
    /// released at end-of-run flush points).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when downstream execution fails.
    pub fn continue_from(
        &mut self,
        plugins: &mut PluginSet,
        node_id: &NodeId,
        token: TokenInfo,
    ) -> Result<RowDisposition, EngineError> {
        let next = self.graph.successor(node_id).cloned().ok_or_else(|| {
            EngineError::InternalCorruption(format!("node {node_id} has no outgoing edge"))
        })?;
        let mut disposition = RowDisposition::default();
        self.drive(plugins, vec![(next, token)], &mut disposition)?;
        Ok(disposition)
    }

    /// Finalises every held coalesce join at end of run and drives released
    /// merged tokens downstream.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a merge or downstream execution fails.
    pub fn flush_coalesces(
        &mut self,
        plugins: &mut PluginSet,
    ) -> Result<RowDisposition, EngineError> {
        let mut settings_by_node = BTreeMap::new();
        for node_id in self.graph.node_ids() {
            if let Some(node) = self.graph.node(&node_id) {
                if let NodeDetail::Coalesce {
                    settings,
                } = &node.detail
                {
                    settings_by_node.insert(node_id.clone(), settings.clone());
                }
            }
        }
        let released = self.coalesces.flush_pending(
            self.recorder,
            self.clock,
            &self.run_id,
            &settings_by_node,
            &mut self.tokens,
            self.observer,
        )?;
        let mut disposition = RowDisposition::default();
        for (node_id, merged) in released {
            self.terminal_recorded.insert(merged.token_id.clone());
            let next = self.successor_of(&node_id)?;
            self.drive(plugins, vec![(next, merged)], &mut disposition)?;
        }
        Ok(disposition)
    }

    /// Flushes every non-empty aggregation buffer at end of run and drives
    /// merged tokens downstream.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when a flush or downstream execution fails.
    pub fn flush_aggregations(
        &mut self,
        plugins: &mut PluginSet,
    ) -> Result<RowDisposition, EngineError> {
        let mut disposition = RowDisposition::default();
        for node_id in self.aggregations.nodes_with_buffers() {
            let node = self.graph.node(&node_id).cloned().ok_or_else(|| {
                EngineError::InternalCorruption(format!(
                    "buffered rows for unknown aggregation node {node_id}"
                ))
            })?;
            let NodeDetail::Aggregation {
                settings,
            } = &node.detail
            else {
                return Err(EngineError::InternalCorruption(format!(
                    "buffered rows on non-aggregation node {node_id}"
                )));
            };
            let plugin = plugins.batch_transforms.get_mut(&settings.name).ok_or_else(|| {
                EngineError::InternalCorruption(format!(
                    "no batch transform instance for aggregation {}",
                    settings.name
                ))
            })?;
            let flush = self.aggregations.execute_flush(
                self.recorder,
                self.clock,
                &self.run_id,
                &node_id,
                plugin.as_mut(),
                &node.config,
                &mut self.tokens,
                self.observer,
                "end_of_run",
            )?;
            if let Some(merged) = flush.merged {
                self.record_continue_routing(&node_id, &flush.state_id)?;
                let next = self.successor_of(&node_id)?;
                self.drive(plugins, vec![(next, merged)], &mut disposition)?;
            }
        }
        Ok(disposition)
    }

    /// Records a continue-edge traversal for a state, when the edge is
    /// registered.
    fn record_continue_routing(
        &mut self,
        node_id: &NodeId,
        state_id: &elspeth_core::StateId,
    ) -> Result<(), EngineError> {
        let label = elspeth_core::RouteLabel::continue_label();
        if let Some(edge_id) = self.graph.edge(node_id, &label) {
            self.routing_group += 1;
            let group = format!("rg-{}", self.routing_group);
            self.recorder.record_routing(
                state_id,
                edge_id,
                elspeth_core::RoutingMode::Move,
                &group,
            )?;
        }
        Ok(())
    }

    /// Runs the work-list loop until it drains.
    fn drive(
        &mut self,
        plugins: &mut PluginSet,
        mut stack: Vec<(NodeId, TokenInfo)>,
        disposition: &mut RowDisposition,
    ) -> Result<(), EngineError> {
        while let Some((node_id, token)) = stack.pop() {
            let node = self.graph.node(&node_id).cloned().ok_or_else(|| {
                EngineError::InternalCorruption(format!("work item for unknown node {node_id}"))
            })?;

            match &node.detail {
                NodeDetail::Source => {
                    return Err(EngineError::InternalCorruption(
                        "source node enqueued as a work item".to_string(),
                    ));
                }
                NodeDetail::Transform {
                    position,
                } => {
                    let plugin = plugins.transforms.get_mut(*position).ok_or_else(|| {
                        EngineError::InternalCorruption(format!(
                            "no transform instance at position {position}"
                        ))
                    })?;
                    let continue_edge =
                        self.graph.edge(&node_id, &elspeth_core::RouteLabel::continue_label());
                    match execute_transform(
                        self.recorder,
                        self.clock,
                        &self.run_id,
                        &node,
                        plugin.as_mut(),
                        &token,
                        self.retry.as_ref(),
                        continue_edge,
                        &mut self.routing_group,
                        self.observer,
                    )? {
                        TransformExecution::Updated(updated) => {
                            self.tokens.update(updated.clone());
                            let next = self.successor_of(&node_id)?;
                            stack.push((next, updated));
                        }
                        TransformExecution::Quarantined => {
                            disposition.quarantined = true;
                        }
                        TransformExecution::Routed {
                            sink,
                            token,
                        } => {
                            disposition.routed = true;
                            self.enqueue_sink(sink, token, Some(RowOutcome::Routed));
                        }
                        TransformExecution::Aborted(error) => {
                            disposition.failed = true;
                            return Err(EngineError::Plugin(error));
                        }
                    }
                }
                NodeDetail::PluginGate {
                    name,
                } => {
                    let plugin = plugins.gates.get_mut(name).ok_or_else(|| {
                        EngineError::InternalCorruption(format!(
                            "no plugin gate instance named {name}"
                        ))
                    })?;
                    let execution = execute_gate(
                        self.recorder,
                        self.clock,
                        &self.run_id,
                        self.graph,
                        &node,
                        GateImpl::Plugin(plugin.as_mut()),
                        &token,
                        &mut self.tokens,
                        self.max_forks,
                        &mut self.routing_group,
                        self.observer,
                    )?;
                    self.apply_gate_execution(&node_id, execution, &mut stack, disposition)?;
                }
                NodeDetail::ConfigGate {
                    predicate, ..
                } => {
                    let execution = execute_gate(
                        self.recorder,
                        self.clock,
                        &self.run_id,
                        self.graph,
                        &node,
                        GateImpl::Config(predicate),
                        &token,
                        &mut self.tokens,
                        self.max_forks,
                        &mut self.routing_group,
                        self.observer,
                    )?;
                    self.apply_gate_execution(&node_id, execution, &mut stack, disposition)?;
                }
                NodeDetail::Aggregation {
                    settings,
                } => {
                    self.aggregations.ensure_node(&node_id, settings)?;
                    self.aggregations.buffer_row(
                        self.recorder,
                        self.clock,
                        &self.run_id,
                        &node_id,
                        &token,
                    )?;
                    if self.aggregations.should_flush(&node_id, self.clock) {
                        let plugin =
                            plugins.batch_transforms.get_mut(&settings.name).ok_or_else(|| {
                                EngineError::InternalCorruption(format!(
                                    "no batch transform instance for aggregation {}",
                                    settings.name
                                ))
                            })?;
                        let flush = self.aggregations.execute_flush(
                            self.recorder,
                            self.clock,
                            &self.run_id,
                            &node_id,
                            plugin.as_mut(),
                            &node.config,
                            &mut self.tokens,
                            self.observer,
                            trigger_kind(&settings.trigger),
                        )?;
                        if let Some(merged) = flush.merged {
                            self.record_continue_routing(&node_id, &flush.state_id)?;
                            let next = self.successor_of(&node_id)?;
                            stack.push((next, merged));
                        }
                    }
                }
                NodeDetail::Coalesce {
                    settings,
                } => {
                    let deposit = self.coalesces.deposit(
                        self.recorder,
                        self.clock,
                        &self.run_id,
                        &node_id,
                        settings,
                        token,
                        &mut self.tokens,
                        self.observer,
                    )?;
                    if let CoalesceDeposit::Merged {
                        merged,
                        state_id,
                        ..
                    } = deposit
                    {
                        self.record_continue_routing(&node_id, &state_id)?;
                        self.terminal_recorded.insert(merged.token_id.clone());
                        let next = self.successor_of(&node_id)?;
                        stack.push((next, merged));
                    }
                }
                NodeDetail::Sink {
                    name,
                } => {
                    let pending_outcome = if self.terminal_recorded.contains(&token.token_id) {
                        None
                    } else {
                        disposition.completed = true;
                        Some(RowOutcome::Completed)
                    };
                    self.enqueue_sink(name.clone(), token, pending_outcome);
                }
            }
        }
        Ok(())
    }

    /// Applies a gate execution result to the work list.
    fn apply_gate_execution(
        &mut self,
        node_id: &NodeId,
        execution: GateExecution,
        stack: &mut Vec<(NodeId, TokenInfo)>,
        disposition: &mut RowDisposition,
    ) -> Result<(), EngineError> {
        match execution {
            GateExecution::Continue(updated) => {
                self.tokens.update(updated.clone());
                let next = self.successor_of(node_id)?;
                stack.push((next, updated));
            }
            GateExecution::Routed {
                sink,
                token,
            } => {
                disposition.routed = true;
                self.enqueue_sink(sink, token, Some(RowOutcome::Routed));
            }
            GateExecution::Forked {
                children,
            } => {
                // Reverse push so the first branch is processed first.
                for child in children.into_iter().rev() {
                    let branch = child.branch_name.clone().ok_or_else(|| {
                        EngineError::InternalCorruption(
                            "fork child without a branch name".to_string(),
                        )
                    })?;
                    let target =
                        self.graph.coalesce_for_branch(&branch).cloned().ok_or_else(|| {
                            EngineError::InternalCorruption(format!(
                                "fork branch {branch} has no coalesce target"
                            ))
                        })?;
                    stack.push((target, child));
                }
            }
            GateExecution::Quarantined => {
                disposition.quarantined = true;
            }
        }
        Ok(())
    }

    /// Returns a node's continue-edge successor.
    fn successor_of(&self, node_id: &NodeId) -> Result<NodeId, EngineError> {
        self.graph.successor(node_id).cloned().ok_or_else(|| {
            EngineError::InternalCorruption(format!("node {node_id} has no outgoing edge"))
        })
    }

    /// Asserts the terminal-outcome invariant for one row.
    ///
    /// Every token of the row must have at most one terminal outcome, and
    /// every token without one must be accounted for: buffered in an
    /// aggregation or coalesce, or pending in exactly one sink batch.
    fn verify_row_invariant(&self, row_id: &RowId) -> Result<(), EngineError> {
        let outcomes = self.recorder.token_outcomes(&self.run_id)?;
        let mut terminal_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut buffered: BTreeSet<String> = BTreeSet::new();
        for outcome in &outcomes {
            if outcome.row_id != *row_id {
                continue;
            }
            if outcome.is_terminal {
                *terminal_counts.entry(outcome.token_id.as_str().to_string()).or_insert(0) += 1;
            } else {
                buffered.insert(outcome.token_id.as_str().to_string());
            }
        }
        for (token_id, count) in &terminal_counts {
            if *count > 1 {
                return Err(EngineError::InternalCorruption(format!(
                    "token {token_id} has {count} terminal outcomes"
                )));
            }
        }
        for token in self.tokens.tokens_for_row(row_id) {
            let token_id = token.token_id.as_str();
            if terminal_counts.contains_key(token_id) || buffered.contains(token_id) {
                continue;
            }
            let pending = self
                .pending_sinks
                .values()
                .flatten()
                .any(|entry| entry.token.token_id.as_str() == token_id);
            if !pending {
                return Err(EngineError::InternalCorruption(format!(
                    "token {token_id} reached no terminal outcome and is not pending anywhere"
                )));
            }
        }
        Ok(())
    }
}

/// Returns the stable label of the trigger kind that governs a flush.
const fn trigger_kind(trigger: &TriggerSettings) -> &'static str {
    match trigger {
        TriggerSettings::Count(_) => "count",
        TriggerSettings::TimeoutSeconds(_) => "timeout",
        TriggerSettings::Condition(_) => "condition",
        TriggerSettings::AnyOf(_) => "any_of",
    }
}
