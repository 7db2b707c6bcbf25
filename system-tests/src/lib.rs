// system-tests/src/lib.rs
// ============================================================================
// Module: Elspeth System Test Support
// Description: Shared fixtures for end-to-end scenarios over durable stores.
// Purpose: Build pipelines against SQLite audit stores and filesystem payloads.
// Dependencies: elspeth-config, elspeth-core, elspeth-engine, elspeth-plugins,
//               elspeth-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! System scenarios run the engine against the durable backends: the SQLite
//! recorder and the filesystem payload store, both rooted in a temporary
//! directory owned by the scenario.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use elspeth_config::PipelineSettings;
use elspeth_config::SinkSettings;
use elspeth_config::SourceSettings;
use elspeth_core::SinkName;
use elspeth_core::SinkPlugin;
use elspeth_engine::PluginSet;
use elspeth_plugins::InlineSource;
use elspeth_plugins::MemorySink;
use elspeth_plugins::MemorySinkHandle;
use elspeth_store_sqlite::FsPayloadStore;
use elspeth_store_sqlite::SqliteRecorder;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Durable Harness
// ============================================================================

/// Durable stores rooted in one scenario-owned temporary directory.
pub struct Harness {
    /// Owning temporary directory; dropped last.
    pub dir: TempDir,
    /// SQLite audit recorder.
    pub recorder: SqliteRecorder,
    /// Filesystem payload store.
    pub payloads: Arc<FsPayloadStore>,
}

impl Harness {
    /// Creates the durable stores in a fresh temporary directory.
    ///
    /// # Panics
    ///
    /// Panics when the stores cannot be created; system tests treat that as
    /// a broken environment.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "test harness setup failures should abort loudly")]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let payloads = Arc::new(FsPayloadStore::open(dir.path().join("payloads")).unwrap());
        let recorder =
            SqliteRecorder::open(dir.path().join("audit.db"), Some(payloads.clone())).unwrap();
        Self {
            dir,
            recorder,
            payloads,
        }
    }

    /// Reopens the recorder as a new process would.
    ///
    /// # Panics
    ///
    /// Panics when the database cannot be reopened.
    #[must_use]
    #[allow(clippy::unwrap_used, reason = "test harness setup failures should abort loudly")]
    pub fn reopen(&self) -> SqliteRecorder {
        SqliteRecorder::open_existing(self.dir.path().join("audit.db"), Some(self.payloads.clone()))
            .unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Settings Builders
// ============================================================================

/// Builds settings with an inline source and the named memory sinks.
#[must_use]
pub fn settings_with_sinks(sink_names: &[&str], default_sink: &str) -> PipelineSettings {
    let mut sinks = BTreeMap::new();
    for name in sink_names {
        sinks.insert((*name).to_string(), SinkSettings {
            plugin: "memory".to_string(),
            config: json!({}),
        });
    }
    PipelineSettings {
        name: "system-test".to_string(),
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

/// Assembled plugin set plus the sink handles scenarios assert against.
pub struct Plugins {
    /// Plugin set handed to the orchestrator.
    pub set: PluginSet,
    /// Memory sink handles keyed by sink name.
    pub sink_handles: BTreeMap<String, MemorySinkHandle>,
}

/// Builds a plugin set over inline rows and memory sinks.
#[must_use]
pub fn plugins(rows: Vec<Value>, settings: &PipelineSettings) -> Plugins {
    let source = Box::new(InlineSource::new(rows));
    let mut sinks: BTreeMap<SinkName, Box<dyn SinkPlugin>> = BTreeMap::new();
    let mut sink_handles = BTreeMap::new();
    for name in settings.sinks.keys() {
        let sink = MemorySink::new(name.clone());
        sink_handles.insert(name.clone(), sink.handle());
        sinks.insert(SinkName::new(name.clone()), Box::new(sink));
    }
    Plugins {
        set: PluginSet::new(source, sinks),
        sink_handles,
    }
}
