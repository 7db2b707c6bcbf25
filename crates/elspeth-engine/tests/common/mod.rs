// elspeth-engine/tests/common/mod.rs
// ============================================================================
// Module: Engine Test Fixtures
// Description: Shared pipelines, plugins, and recorders for engine tests.
// ============================================================================
//! ## Overview
//! Builders for minimal pipelines plus plugin doubles that fail on demand,
//! used across the executor and orchestrator test suites.

#![allow(
    dead_code,
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only fixtures; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_config::PipelineSettings;
use elspeth_config::SinkSettings;
use elspeth_config::SourceSettings;
use elspeth_core::ArtifactDescriptor;
use elspeth_core::DeterminismClass;
use elspeth_core::ManualClock;
use elspeth_core::MemoryPayloadStore;
use elspeth_core::MemoryRecorder;
use elspeth_core::NodeId;
use elspeth_core::PluginContext;
use elspeth_core::PluginError;
use elspeth_core::RowData;
use elspeth_core::SinkName;
use elspeth_core::SinkPlugin;
use elspeth_core::TransformOutput;
use elspeth_core::TransformPlugin;
use elspeth_engine::PluginSet;
use elspeth_plugins::InlineSource;
use elspeth_plugins::MemorySink;
use elspeth_plugins::MemorySinkHandle;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Settings Builders
// ============================================================================

/// Builds settings with one inline source and the named memory sinks.
pub fn settings_with_sinks(sink_names: &[&str], default_sink: &str) -> PipelineSettings {
    let mut sinks = BTreeMap::new();
    for name in sink_names {
        sinks.insert((*name).to_string(), SinkSettings {
            plugin: "memory".to_string(),
            config: json!({}),
        });
    }
    PipelineSettings {
        name: "test".to_string(),
        source: SourceSettings {
            plugin: "inline".to_string(),
            config: json!({}),
            quarantine_sink: None,
        },
        steps: Vec::new(),
        sinks,
        default_sink: default_sink.to_string(),
        retry: None,
        checkpoint: None,
        max_forks_per_row: 64,
    }
}

/// Builds a default single-sink settings value.
pub fn base_settings() -> PipelineSettings {
    settings_with_sinks(&["default"], "default")
}

// ============================================================================
// SECTION: Plugin Set Builders
// ============================================================================

/// Assembled plugin set plus the handles tests assert against.
pub struct Fixture {
    /// The plugin set handed to the orchestrator.
    pub plugins: PluginSet,
    /// Memory sink handles keyed by sink name.
    pub sink_handles: BTreeMap<String, MemorySinkHandle>,
}

/// Builds a plugin set over inline rows and memory sinks.
pub fn fixture(rows: Vec<Value>, settings: &PipelineSettings) -> Fixture {
    let source = Box::new(InlineSource::new(rows));
    let mut sinks: BTreeMap<SinkName, Box<dyn SinkPlugin>> = BTreeMap::new();
    let mut sink_handles = BTreeMap::new();
    for name in settings.sinks.keys() {
        let sink = MemorySink::new(name.clone());
        sink_handles.insert(name.clone(), sink.handle());
        sinks.insert(SinkName::new(name.clone()), Box::new(sink));
    }
    Fixture {
        plugins: PluginSet::new(source, sinks),
        sink_handles,
    }
}

/// Builds the standard recorder/payload/clock trio.
pub fn recorder_and_clock() -> (MemoryRecorder, Arc<MemoryPayloadStore>, ManualClock) {
    let payloads = Arc::new(MemoryPayloadStore::new());
    let recorder = MemoryRecorder::new(payloads.clone());
    let clock = ManualClock::starting_at(1_000);
    (recorder, payloads, clock)
}

// ============================================================================
// SECTION: Failing Plugins
// ============================================================================

/// Transform that fails every row with a configurable error kind.
#[derive(Debug)]
pub struct FailingTransform {
    /// Declared on-error policy.
    pub policy: elspeth_core::OnErrorPolicy,
    /// Error kind label baked into the structured error.
    pub kind: &'static str,
}

impl TransformPlugin for FailingTransform {
    fn name(&self) -> &str {
        "failing"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn on_error(&self) -> elspeth_core::OnErrorPolicy {
        self.policy.clone()
    }

    fn process(&mut self, _row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        TransformOutput::Error {
            error: json!({ "kind": self.kind, "message": "boom" }),
        }
    }
}

/// Transform that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyTransform {
    /// Remaining failures before success.
    pub failures_left: u32,
}

impl TransformPlugin for FlakyTransform {
    fn name(&self) -> &str {
        "flaky"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::ExternalCall
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return TransformOutput::Error {
                error: json!({ "kind": "network", "message": "transient" }),
            };
        }
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "recovered" }),
        }
    }
}

/// Sink whose `write` or `flush` fails on demand.
#[derive(Debug)]
pub struct FailingSink {
    /// Fail the write call.
    pub fail_write: bool,
    /// Fail the flush call.
    pub fail_flush: bool,
    /// Node identifier assigned by the graph.
    node_id: Option<NodeId>,
}

impl FailingSink {
    /// Creates a sink that fails at the chosen phase.
    pub fn new(fail_write: bool, fail_flush: bool) -> Self {
        Self {
            fail_write,
            fail_flush,
            node_id: None,
        }
    }
}

impl SinkPlugin for FailingSink {
    fn name(&self) -> &str {
        "failing_sink"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = Some(node_id);
    }

    fn write(
        &mut self,
        rows: &[RowData],
        _ctx: &PluginContext<'_>,
    ) -> Result<ArtifactDescriptor, PluginError> {
        if self.fail_write {
            return Err(PluginError::io("disk unavailable"));
        }
        let bytes = serde_json::to_vec(&json!(rows)).map_err(|err| PluginError::io(err.to_string()))?;
        Ok(ArtifactDescriptor {
            artifact_type: "memory".to_string(),
            uri: "memory://failing".to_string(),
            size_bytes: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            content_hash: elspeth_core::hashing::hash_bytes(
                elspeth_core::hashing::DEFAULT_HASH_ALGORITHM,
                &bytes,
            ),
        })
    }

    fn flush(&mut self) -> Result<(), PluginError> {
        if self.fail_flush {
            return Err(PluginError::io("disk quota exceeded"));
        }
        Ok(())
    }
}

/// Transform that raises on the Nth row it sees (1-based), passing others.
#[derive(Debug)]
pub struct FailAtTransform {
    /// Row ordinal that fails, 1-based.
    pub fail_at: u64,
    /// Rows seen so far.
    pub seen: u64,
}

impl FailAtTransform {
    /// Creates a transform failing at the given 1-based ordinal.
    pub fn new(fail_at: u64) -> Self {
        Self {
            fail_at,
            seen: 0,
        }
    }
}

impl TransformPlugin for FailAtTransform {
    fn name(&self) -> &str {
        "fail_at"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        self.seen += 1;
        if self.seen == self.fail_at {
            return TransformOutput::Error {
                error: json!({ "kind": "logic", "message": "induced crash" }),
            };
        }
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "passed" }),
        }
    }
}

// ============================================================================
// SECTION: Lifecycle Probe
// ============================================================================

/// Shared event journal recording lifecycle hook invocations.
#[derive(Debug, Default, Clone)]
pub struct LifecycleJournal {
    /// Recorded hook labels in invocation order.
    events: Arc<std::sync::Mutex<Vec<String>>>,
}

impl LifecycleJournal {
    /// Records one hook invocation.
    pub fn record(&self, label: impl Into<String>) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(label.into());
        }
    }

    /// Returns a snapshot of recorded labels.
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }
}

/// Transform recording its lifecycle hooks into a journal.
#[derive(Debug)]
pub struct JournalingTransform {
    /// Shared journal.
    pub journal: LifecycleJournal,
}

impl TransformPlugin for JournalingTransform {
    fn name(&self) -> &str {
        "journaling"
    }

    fn plugin_version(&self) -> &str {
        "1.0.0"
    }

    fn determinism(&self) -> DeterminismClass {
        DeterminismClass::Deterministic
    }

    fn on_start(&mut self, _ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        self.journal.record("transform.on_start");
        Ok(())
    }

    fn process(&mut self, row: RowData, _ctx: &PluginContext<'_>) -> TransformOutput {
        self.journal.record("transform.process");
        TransformOutput::Success {
            data: row,
            reason: json!({ "reason": "journaled" }),
        }
    }

    fn on_complete(&mut self, _ctx: &PluginContext<'_>) -> Result<(), PluginError> {
        self.journal.record("transform.on_complete");
        Ok(())
    }

    fn close(&mut self) {
        self.journal.record("transform.close");
    }
}
