// elspeth-config/src/settings.rs
// ============================================================================
// Module: Elspeth Pipeline Settings
// Description: Resolved settings model for one pipeline.
// Purpose: Describe the DAG the graph builder constructs, with serde forms.
// Dependencies: elspeth-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Settings describe a pipeline as a source, an ordered list of steps
//! (transforms, gates, aggregations, coalesces), and a set of named sinks.
//! The model is already resolved: plugin discovery and environment expansion
//! happen in outer layers, so everything here is literal and hashable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use elspeth_core::OnErrorPolicy;
use elspeth_core::PluginErrorKind;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default fork budget per row.
pub const DEFAULT_MAX_FORKS_PER_ROW: u64 = 64;

/// Returns the default fork budget for serde.
const fn default_max_forks() -> u64 {
    DEFAULT_MAX_FORKS_PER_ROW
}

// ============================================================================
// SECTION: Source and Sink Settings
// ============================================================================

/// Settings for the pipeline source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Plugin name to instantiate.
    pub plugin: String,
    /// Resolved plugin configuration.
    #[serde(default)]
    pub config: Value,
    /// Sink receiving quarantined source rows, when declared.
    #[serde(default)]
    pub quarantine_sink: Option<String>,
}

/// Settings for one named sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSettings {
    /// Plugin name to instantiate.
    pub plugin: String,
    /// Resolved plugin configuration.
    #[serde(default)]
    pub config: Value,
}

// ============================================================================
// SECTION: Transform Settings
// ============================================================================

/// Settings for one transform step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    /// Plugin name to instantiate.
    pub plugin: String,
    /// Resolved plugin configuration.
    #[serde(default)]
    pub config: Value,
    /// Declared on-error policy.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    /// Per-call timeout in milliseconds, if declared.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// SECTION: Gate Settings
// ============================================================================

/// Target of one gate route entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// Proceed along the continue edge.
    Continue,
    /// Fork into the gate's declared branches.
    Fork,
    /// Route to the named sink.
    Sink(String),
}

/// Settings for one gate step.
///
/// A gate is either config-driven (`condition` present, evaluated by the
/// sandboxed predicate language) or plugin-driven (`plugin` present). The
/// `routes` map turns the evaluation result into a [`RouteTarget`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Gate name, unique within the pipeline.
    pub name: String,
    /// Predicate source text for config-driven gates.
    #[serde(default)]
    pub condition: Option<String>,
    /// Plugin name for plugin-driven gates.
    #[serde(default)]
    pub plugin: Option<String>,
    /// Resolved plugin configuration.
    #[serde(default)]
    pub config: Value,
    /// Result label to routing target ("true"/"false" for config gates).
    #[serde(default)]
    pub routes: BTreeMap<String, RouteTarget>,
    /// Branch names created when a route resolves to `Fork`.
    #[serde(default)]
    pub fork_to: Vec<String>,
}

// ============================================================================
// SECTION: Aggregation Settings
// ============================================================================

/// Trigger configuration for an aggregation buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSettings {
    /// Fire when the buffer reaches a row count.
    Count(u64),
    /// Fire when the oldest buffered row exceeds an age in seconds.
    TimeoutSeconds(u64),
    /// Fire when the predicate holds for the newest buffered row.
    Condition(String),
    /// Fire when any inner trigger fires.
    AnyOf(Vec<TriggerSettings>),
}

/// Settings for one aggregation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Aggregation name, unique within the pipeline.
    pub name: String,
    /// Batch-aware transform plugin applied at flush.
    pub transform: String,
    /// Resolved transform configuration.
    #[serde(default)]
    pub config: Value,
    /// Trigger deciding when the buffer flushes.
    pub trigger: TriggerSettings,
}

// ============================================================================
// SECTION: Coalesce Settings
// ============================================================================

/// Join policy for a coalesce step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// Wait for all named branches.
    RequireAll,
    /// Merge whatever arrived once the run drains.
    BestEffort,
    /// First `k` branches win.
    Quorum(usize),
    /// Pick the named branch.
    SelectBranch(String),
}

/// Merge strategy for joined rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Key-wise map merge; collisions follow the collision policy.
    Union,
    /// Keep the first arrived branch row.
    First,
    /// Keep the last arrived branch row.
    Last,
    /// Concatenate rows under per-branch keys.
    Concat,
}

/// Collision policy for union merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Last writer wins.
    #[default]
    LastWins,
    /// First writer wins.
    FirstWins,
    /// Collisions fail the merge.
    Error,
}

/// Settings for one coalesce step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalesceSettings {
    /// Coalesce name, unique within the pipeline.
    pub name: String,
    /// Branch names this coalesce joins.
    pub branches: Vec<String>,
    /// Join policy.
    pub policy: CoalescePolicy,
    /// Merge strategy.
    pub merge: MergeStrategy,
    /// Collision policy for union merges.
    #[serde(default)]
    pub collision: CollisionPolicy,
}

// ============================================================================
// SECTION: Steps
// ============================================================================

/// One step in the pipeline's main chain, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSettings {
    /// A transform step.
    Transform(TransformSettings),
    /// A gate step.
    Gate(GateSettings),
    /// An aggregation step.
    Aggregation(AggregationSettings),
    /// A coalesce step.
    Coalesce(CoalesceSettings),
}

// ============================================================================
// SECTION: Retry and Checkpoint Settings
// ============================================================================

/// Retry configuration for classified-retryable plugin failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
    /// Failure kinds eligible for retry.
    pub retryable: Vec<PluginErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            retryable: vec![PluginErrorKind::Io, PluginErrorKind::Network],
        }
    }
}

/// Checkpoint cadence policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Checkpoint after every row.
    EveryRow,
    /// Checkpoint after every N rows.
    EveryN(u64),
    /// Checkpoint only at flush boundaries.
    OnFlush,
    /// Never checkpoint.
    #[default]
    None,
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CheckpointSettings {
    /// Cadence policy.
    pub policy: CheckpointPolicy,
}

// ============================================================================
// SECTION: Pipeline Settings
// ============================================================================

/// The resolved settings object for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Pipeline name.
    pub name: String,
    /// Source settings.
    pub source: SourceSettings,
    /// Ordered steps of the main chain.
    #[serde(default)]
    pub steps: Vec<StepSettings>,
    /// Named sinks.
    pub sinks: BTreeMap<String, SinkSettings>,
    /// Sink receiving tokens that complete the main chain.
    pub default_sink: String,
    /// Retry configuration, when enabled.
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// Checkpoint configuration, when enabled.
    #[serde(default)]
    pub checkpoint: Option<CheckpointSettings>,
    /// Fork budget per row.
    #[serde(default = "default_max_forks")]
    pub max_forks_per_row: u64,
}

impl PipelineSettings {
    /// Serializes the settings to a JSON value for hashing and audit capture.
    ///
    /// # Errors
    ///
    /// Returns the underlying serde error when serialization fails.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Returns every gate step in order.
    #[must_use]
    pub fn gates(&self) -> Vec<&GateSettings> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                StepSettings::Gate(gate) => Some(gate),
                _ => None,
            })
            .collect()
    }

    /// Returns every coalesce step in order.
    #[must_use]
    pub fn coalesces(&self) -> Vec<&CoalesceSettings> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                StepSettings::Coalesce(coalesce) => Some(coalesce),
                _ => None,
            })
            .collect()
    }
}
