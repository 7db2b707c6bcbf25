// elspeth-engine/src/orchestrator.rs
// ============================================================================
// Module: Elspeth Orchestrator
// Description: Run lifecycle from source iteration to terminal run status.
// Purpose: Drive rows through the processor with progress, checkpoints, and hooks.
// Dependencies: crate::{checkpoint, error, executors, graph, plugins, processor,
//               retry, telemetry}, elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! The orchestrator validates the graph, opens the run, iterates the source,
//! and hands each row to the processor. Pending sink batches drain at end of
//! source, after coalesces and aggregations flush. Lifecycle hooks run on
//! every exit path, the run closes `Completed`, `Failed`, or `Cancelled`
//! (cancellation is cooperative, observed at row boundaries), and
//! checkpoints are deleted on success and preserved otherwise for resume.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use elspeth_config::CheckpointSettings;
use elspeth_config::PipelineSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::CheckpointRecord;
use elspeth_core::Clock;
use elspeth_core::PayloadStore;
use elspeth_core::PluginContext;
use elspeth_core::ResumeMode;
use elspeth_core::RowData;
use elspeth_core::RowOutcome;
use elspeth_core::RunId;
use elspeth_core::RunStatus;
use elspeth_core::SchemaContract;
use elspeth_core::SinkName;
use elspeth_core::SourceRow;
use elspeth_core::Timestamp;
use elspeth_core::TokenOutcomeRecord;
use serde_json::Value;
use serde_json::json;

use crate::checkpoint::CheckpointManager;
use crate::error::EngineError;
use crate::executors::execute_sink;
use crate::graph::ExecutionGraph;
use crate::graph::GraphError;
use crate::plugins::PluginSet;
use crate::processor::RowProcessor;
use crate::retry::RetryManager;
use crate::telemetry::EngineEvent;
use crate::telemetry::ProgressEvent;
use crate::telemetry::TelemetryObserver;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Engine version recorded on every run.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Progress cadence: emit every N rows.
const PROGRESS_ROW_INTERVAL: u64 = 100;
/// Progress cadence: emit at least every this many milliseconds.
const PROGRESS_TIME_INTERVAL_MS: u64 = 5_000;

// ============================================================================
// SECTION: Run Result
// ============================================================================

/// Result of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: RunId,
    /// Terminal run status.
    pub status: RunStatus,
    /// Final progress snapshot.
    pub progress: ProgressEvent,
}

/// Internal result of the row loop.
struct RowLoopOutcome {
    /// Final progress snapshot.
    progress: ProgressEvent,
    /// Whether cancellation was observed at a row boundary.
    cancelled: bool,
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Orchestrates one pipeline run end to end.
pub struct Orchestrator<'a> {
    /// Resolved pipeline settings.
    settings: &'a PipelineSettings,
    /// Audit recorder handle.
    recorder: &'a dyn AuditRecorder,
    /// Engine clock.
    clock: &'a dyn Clock,
    /// Telemetry observer.
    observer: &'a dyn TelemetryObserver,
    /// Cooperative cancellation flag, checked at row boundaries.
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        settings: &'a PipelineSettings,
        recorder: &'a dyn AuditRecorder,
        clock: &'a dyn Clock,
        observer: &'a dyn TelemetryObserver,
    ) -> Self {
        Self {
            settings,
            recorder,
            clock,
            observer,
            cancel: None,
        }
    }

    /// Registers a cooperative cancellation flag.
    ///
    /// Cancellation is checked at row boundaries only; a run that observes
    /// the flag closes `Cancelled` with its checkpoints preserved.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Executes a fresh run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PayloadStoreRequired`] when no payload store
    /// is configured (source loading never runs), and any error the body
    /// raised after cleanup.
    pub fn run(
        &self,
        plugins: &mut PluginSet,
        payload_store: Option<&dyn PayloadStore>,
        checkpoint_settings: Option<CheckpointSettings>,
    ) -> Result<RunResult, EngineError> {
        self.execute(plugins, payload_store, checkpoint_settings, None)
    }

    /// Resumes a failed run from its latest checkpoint into a new run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotResumable`] for runs that are not
    /// `Failed`, [`EngineError::NoCheckpoint`] when none exists, and
    /// [`EngineError::CheckpointIncompatible`] when the rebuilt graph does
    /// not match the checkpoint's node identifiers.
    pub fn resume(
        &self,
        run_id: &RunId,
        plugins: &mut PluginSet,
        payload_store: Option<&dyn PayloadStore>,
        checkpoint_settings: Option<CheckpointSettings>,
    ) -> Result<RunResult, EngineError> {
        let prior = self
            .recorder
            .run(run_id)?
            .ok_or_else(|| EngineError::NotResumable {
                run_id: run_id.clone(),
                status: RunStatus::Pending,
                reason: "run does not exist".to_string(),
            })?;
        match prior.status {
            RunStatus::Failed => {}
            RunStatus::Completed => {
                return Err(EngineError::NotResumable {
                    run_id: run_id.clone(),
                    status: prior.status,
                    reason: "run already completed".to_string(),
                });
            }
            RunStatus::Running | RunStatus::Pending => {
                return Err(EngineError::NotResumable {
                    run_id: run_id.clone(),
                    status: prior.status,
                    reason: "run has not finished".to_string(),
                });
            }
            RunStatus::Cancelled => {
                return Err(EngineError::NotResumable {
                    run_id: run_id.clone(),
                    status: prior.status,
                    reason: "cancelled runs are not resumable".to_string(),
                });
            }
        }

        let checkpoint = self
            .recorder
            .latest_checkpoint(run_id)?
            .ok_or_else(|| EngineError::NoCheckpoint {
                run_id: run_id.clone(),
            })?;

        let result = self.execute(plugins, payload_store, checkpoint_settings, Some(checkpoint));
        if result.is_ok() {
            // The prior run's markers are spent once the resume succeeds.
            self.recorder.delete_checkpoints(run_id)?;
        }
        result
    }

    /// Shared execution body for fresh and resumed runs.
    fn execute(
        &self,
        plugins: &mut PluginSet,
        payload_store: Option<&dyn PayloadStore>,
        checkpoint_settings: Option<CheckpointSettings>,
        resume_from: Option<CheckpointRecord>,
    ) -> Result<RunResult, EngineError> {
        // Source loading never runs without a payload store.
        if payload_store.is_none() {
            return Err(EngineError::PayloadStoreRequired);
        }

        let mut graph = ExecutionGraph::build(self.settings, plugins)?;

        // Deterministic-ID invariant: the checkpoint must name a node the
        // rebuilt graph also derives.
        if let Some(checkpoint) = &resume_from {
            if graph.node(&checkpoint.node_id).is_none() {
                return Err(EngineError::CheckpointIncompatible {
                    checkpoint_node: checkpoint.node_id.clone(),
                });
            }
            if let Some(recorded) = &checkpoint.topology_hash {
                if recorded != graph.topology_hash() {
                    return Err(EngineError::CheckpointIncompatible {
                        checkpoint_node: checkpoint.node_id.clone(),
                    });
                }
            }
        }

        // Quarantine destinations declared by the source must be known sinks.
        if let Some(destination) = plugins.source.quarantine_sink() {
            if graph.sink_id(&destination).is_none() {
                return Err(EngineError::GraphValidation(GraphError::UnknownRouteTarget {
                    gate: plugins.source.name().to_string(),
                    label: "quarantine".to_string(),
                    target: destination.as_str().to_string(),
                    available: graph
                        .sink_names()
                        .iter()
                        .map(|name| name.as_str().to_string())
                        .collect(),
                }));
            }
        }

        // Plugins self-attribute audit records through their node ids.
        plugins.source.set_node_id(graph.source_id().clone());
        for (sink_name, sink) in &mut plugins.sinks {
            if let Some(node_id) = graph.sink_id(sink_name) {
                sink.set_node_id(node_id.clone());
            }
        }

        let settings_value = self
            .settings
            .to_value()
            .map_err(|err| EngineError::Serialization(err.to_string()))?;
        let started_at = self.clock.now();
        let run = self.recorder.begin_run(&settings_value, ENGINE_VERSION, started_at)?;
        let run_id = run.run_id.clone();
        graph.register(self.recorder, &run_id, started_at)?;

        let retry = self.settings.retry.clone().map(RetryManager::new);
        let mut processor = RowProcessor::new(
            &graph,
            self.recorder,
            self.clock,
            self.observer,
            run_id.clone(),
            retry,
            self.settings.max_forks_per_row,
        );

        if let Some(checkpoint) = &resume_from {
            if let Some(state) = &checkpoint.aggregation_state {
                let tokens = &mut processor.tokens;
                // Split borrow: restore needs both the buffers and the arena.
                let aggregations = &mut processor.aggregations;
                aggregations.restore_from_checkpoint(state, self.clock, tokens)?;
            }
        }

        let mut manager =
            checkpoint_settings.or(self.settings.checkpoint).map(CheckpointManager::new);

        let body = self.run_rows(
            plugins,
            &graph,
            &mut processor,
            manager.as_mut(),
            &run_id,
            started_at,
            resume_from.as_ref(),
        );

        // Completion hooks run on every exit path.
        let hooks = run_completion_hooks(plugins, &run_id, &self.settings.source.config);

        let status = match (&body, &hooks) {
            (Ok(outcome), Ok(())) if outcome.cancelled => RunStatus::Cancelled,
            (Ok(_), Ok(())) => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        self.recorder.finish_run(&run_id, status, self.clock.now())?;

        match (body, hooks) {
            (Ok(outcome), Ok(())) => {
                if status == RunStatus::Completed {
                    // Checkpoints are spent once the run completes; a
                    // cancelled run keeps them.
                    self.recorder.delete_checkpoints(&run_id)?;
                }
                Ok(RunResult {
                    run_id,
                    status,
                    progress: outcome.progress,
                })
            }
            (Err(error), _) => Err(error),
            (Ok(_), Err(error)) => Err(error),
        }
    }

    /// Iterates the source and drives every row, returning final progress.
    #[allow(clippy::too_many_arguments, reason = "run body threads the execute-scope locals")]
    fn run_rows(
        &self,
        plugins: &mut PluginSet,
        graph: &ExecutionGraph,
        processor: &mut RowProcessor<'_>,
        mut manager: Option<&mut CheckpointManager>,
        run_id: &RunId,
        started_at: Timestamp,
        resume_from: Option<&CheckpointRecord>,
    ) -> Result<RowLoopOutcome, EngineError> {
        let source_config = self.settings.source.config.clone();
        let ctx = PluginContext {
            run_id,
            config: &source_config,
            state_id: None,
            operation_id: None,
            recorder: Some(self.recorder),
        };

        plugins.source.on_start(&ctx)?;

        // Position the started source past the checkpoint.
        let mut skip_through: Option<u64> = None;
        let mut resume_index: Option<u64> = None;
        if let Some(checkpoint) = resume_from {
            match plugins.source.resume_mode() {
                ResumeMode::Positioned => {
                    plugins.source.start_at(checkpoint.sequence)?;
                    resume_index = Some(checkpoint.sequence.saturating_add(1));
                }
                ResumeMode::Rewindable => {
                    skip_through = Some(checkpoint.sequence);
                }
                ResumeMode::None => {
                    return Err(EngineError::CheckpointRestore(format!(
                        "source `{}` declares no resume capability",
                        plugins.source.name()
                    )));
                }
            }
        }

        tracing::info!(target: "elspeth::run", %run_id, "run started");

        let mut progress = ProgressEvent::default();
        let mut row_index: u64 = resume_index.unwrap_or(0);
        let mut seen_first_row = false;
        let mut last_progress_at = started_at;
        let mut last_initial_token: Option<elspeth_core::TokenId> = None;

        let mut cancelled = false;
        loop {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    cancelled = true;
                    tracing::info!(target: "elspeth::run", %run_id, "cancellation observed");
                    break;
                }
            }
            let next = plugins.source.next_row(&ctx)?;
            let Some(source_row) = next else {
                break;
            };
            let current_index = row_index;
            row_index += 1;
            if let Some(limit) = skip_through {
                if current_index <= limit {
                    continue;
                }
            }

            match source_row {
                SourceRow::Quarantined {
                    data,
                    error,
                    destination,
                } => {
                    if graph.sink_id(&destination).is_none() {
                        return Err(EngineError::GraphValidation(
                            GraphError::UnknownRouteTarget {
                                gate: plugins.source.name().to_string(),
                                label: "quarantine".to_string(),
                                target: destination.as_str().to_string(),
                                available: graph
                                    .sink_names()
                                    .iter()
                                    .map(|name| name.as_str().to_string())
                                    .collect(),
                            },
                        ));
                    }
                    self.quarantine_row(
                        processor,
                        graph,
                        run_id,
                        current_index,
                        data,
                        error,
                        &destination,
                    )?;
                    progress.rows_quarantined += 1;
                }
                SourceRow::Valid {
                    data,
                    contract,
                } => {
                    if !seen_first_row {
                        seen_first_row = true;
                        let observed =
                            contract.unwrap_or_else(|| SchemaContract::observe(&data));
                        self.recorder.record_schema_contract(run_id, &observed)?;
                    }
                    let row = self.recorder.create_row(
                        run_id,
                        graph.source_id(),
                        current_index,
                        &data,
                        None,
                        self.clock.now(),
                    )?;
                    let (initial_token, disposition) =
                        processor.process_row(plugins, &row, data)?;
                    last_initial_token = Some(initial_token.clone());

                    if disposition.failed {
                        progress.rows_failed += 1;
                    } else if disposition.quarantined {
                        progress.rows_quarantined += 1;
                    } else if disposition.routed && !disposition.completed {
                        progress.rows_routed += 1;
                    } else {
                        progress.rows_succeeded += 1;
                    }

                    if let Some(manager) = manager.as_mut() {
                        if manager.due_after_row(current_index + 1) {
                            let state =
                                processor.aggregations.get_checkpoint_state(self.clock)?;
                            manager.take_checkpoint(
                                self.recorder,
                                self.clock,
                                run_id,
                                &initial_token,
                                graph.source_id(),
                                current_index,
                                state,
                                graph.topology_hash(),
                            )?;
                        }
                    }
                }
            }

            progress.rows_processed += 1;
            let now = self.clock.now();
            let due_by_count = progress.rows_processed == 1
                || progress.rows_processed % PROGRESS_ROW_INTERVAL == 0;
            let due_by_time = now.millis_since(last_progress_at) >= PROGRESS_TIME_INTERVAL_MS;
            if due_by_count || due_by_time {
                last_progress_at = now;
                progress.elapsed_seconds = millis_to_seconds(now.millis_since(started_at));
                self.observer.on_event(&EngineEvent::Progress(progress));
            }
        }

        // End of source: coalesces release, aggregations flush, sinks drain.
        // A cancelled run still drains what it already owes its sinks.
        processor.flush_coalesces(plugins)?;
        processor.flush_aggregations(plugins)?;
        self.drain_sinks(plugins, graph, processor, run_id)?;

        if let Some(manager) = manager.as_mut() {
            if manager.due_on_flush() {
                if let Some(last_token) = &last_initial_token {
                    let state = processor.aggregations.get_checkpoint_state(self.clock)?;
                    manager.take_checkpoint(
                        self.recorder,
                        self.clock,
                        run_id,
                        last_token,
                        graph.source_id(),
                        row_index.saturating_sub(1),
                        state,
                        graph.topology_hash(),
                    )?;
                }
            }
        }

        let now = self.clock.now();
        progress.elapsed_seconds = millis_to_seconds(now.millis_since(started_at));
        self.observer.on_event(&EngineEvent::Progress(progress));
        tracing::info!(
            target: "elspeth::run",
            %run_id,
            rows = progress.rows_processed,
            "source exhausted"
        );
        Ok(RowLoopOutcome {
            progress,
            cancelled,
        })
    }

    /// Records a quarantined source row and stages it for its sink.
    #[allow(clippy::too_many_arguments, reason = "helper threads the run-body locals")]
    fn quarantine_row(
        &self,
        processor: &mut RowProcessor<'_>,
        graph: &ExecutionGraph,
        run_id: &RunId,
        row_index: u64,
        data: Value,
        error: Value,
        destination: &SinkName,
    ) -> Result<(), EngineError> {
        // Raw data is stored before any processing, quarantined or not.
        let row_data: RowData = match data {
            Value::Object(map) => map,
            other => {
                let mut map = RowData::new();
                map.insert("raw".to_string(), other);
                map
            }
        };
        let row = self.recorder.create_row(
            run_id,
            graph.source_id(),
            row_index,
            &row_data,
            None,
            self.clock.now(),
        )?;
        let token = processor.tokens.create_initial(&row.row_id, row_data);
        self.recorder.create_token(&row.row_id, &token.token_id, self.clock.now())?;
        self.recorder.record_token_outcome(&TokenOutcomeRecord {
            run_id: run_id.clone(),
            row_id: row.row_id.clone(),
            token_id: token.token_id.clone(),
            outcome: RowOutcome::Quarantined,
            sink_name: Some(destination.clone()),
            is_terminal: true,
            recorded_at: self.clock.now(),
        })?;
        self.observer.on_event(&EngineEvent::TokenCompleted {
            token_id: token.token_id.clone(),
            outcome: RowOutcome::Quarantined,
        });
        tracing::warn!(
            target: "elspeth::row",
            row = row_index,
            error = %error,
            destination = destination.as_str(),
            "source row quarantined"
        );
        processor.enqueue_sink(destination.clone(), token, None);
        Ok(())
    }

    /// Drains every pending sink batch in deterministic sink order.
    fn drain_sinks(
        &self,
        plugins: &mut PluginSet,
        graph: &ExecutionGraph,
        processor: &mut RowProcessor<'_>,
        run_id: &RunId,
    ) -> Result<(), EngineError> {
        for sink_name in graph.sink_names() {
            let entries = processor.take_pending(&sink_name);
            if entries.is_empty() {
                continue;
            }
            let node_id = graph.sink_id(&sink_name).cloned().ok_or_else(|| {
                EngineError::InternalCorruption(format!(
                    "pending batch for unknown sink {sink_name}"
                ))
            })?;
            let node = graph.node(&node_id).cloned().ok_or_else(|| {
                EngineError::InternalCorruption(format!("unknown sink node {node_id}"))
            })?;
            let sink = plugins.sinks.get_mut(&sink_name).ok_or_else(|| {
                EngineError::InternalCorruption(format!(
                    "no sink instance named {sink_name}"
                ))
            })?;
            let _artifact = execute_sink(
                self.recorder,
                self.clock,
                run_id,
                &node,
                sink.as_mut(),
                &sink_name,
                entries,
                self.observer,
            )?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Completion Hooks
// ============================================================================

/// Runs `on_complete` and `close` on every plugin, collecting the first
/// failure without skipping later hooks.
fn run_completion_hooks(
    plugins: &mut PluginSet,
    run_id: &RunId,
    source_config: &Value,
) -> Result<(), EngineError> {
    let empty_config = json!({});
    let mut first_error: Option<EngineError> = None;

    let source_ctx = PluginContext {
        run_id,
        config: source_config,
        state_id: None,
        operation_id: None,
        recorder: None,
    };
    if let Err(error) = plugins.source.on_complete(&source_ctx) {
        tracing::warn!(target: "elspeth::run", error = %error, "source on_complete failed");
        first_error.get_or_insert(EngineError::Plugin(error));
    }

    let ctx = PluginContext {
        run_id,
        config: &empty_config,
        state_id: None,
        operation_id: None,
        recorder: None,
    };
    for transform in &mut plugins.transforms {
        if let Err(error) = transform.on_complete(&ctx) {
            tracing::warn!(target: "elspeth::run", error = %error, "transform on_complete failed");
            first_error.get_or_insert(EngineError::Plugin(error));
        }
    }
    for transform in plugins.batch_transforms.values_mut() {
        if let Err(error) = transform.on_complete(&ctx) {
            tracing::warn!(target: "elspeth::run", error = %error, "batch transform on_complete failed");
            first_error.get_or_insert(EngineError::Plugin(error));
        }
    }
    for sink in plugins.sinks.values_mut() {
        if let Err(error) = sink.on_complete(&ctx) {
            tracing::warn!(target: "elspeth::run", error = %error, "sink on_complete failed");
            first_error.get_or_insert(EngineError::Plugin(error));
        }
    }

    // close() runs last on every plugin.
    plugins.source.close();
    for transform in &mut plugins.transforms {
        transform.close();
    }
    for transform in plugins.batch_transforms.values_mut() {
        transform.close();
    }
    for gate in plugins.gates.values_mut() {
        gate.close();
    }
    for sink in plugins.sinks.values_mut() {
        sink.close();
    }

    first_error.map_or(Ok(()), Err)
}

/// Converts elapsed milliseconds to fractional seconds.
fn millis_to_seconds(millis: u64) -> f64 {
    // Progress reporting precision; u64 row times fit f64 comfortably.
    #[allow(clippy::cast_precision_loss, reason = "progress display only")]
    {
        millis as f64 / 1_000.0
    }
}
