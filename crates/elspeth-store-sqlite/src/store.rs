// elspeth-store-sqlite/src/store.rs
// ============================================================================
// Module: Elspeth SQLite Audit Recorder
// Description: Durable AuditRecorder backed by SQLite WAL.
// Purpose: Persist the audit trail transactionally with state-machine checks.
// Dependencies: elspeth-core, rusqlite, serde_json, thiserror, uuid
// ============================================================================

//! ## Overview
//! The recorder persists the eleven-table logical audit schema. Every call
//! is transactional with respect to its emitted records: a failed close
//! leaves the state `Open` and the caller must retry or crash. Foreign keys
//! and unique constraints enforce the state machine: opening a state whose
//! node is not registered is a runtime error, and closing a state twice is
//! rejected as corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use elspeth_core::ArtifactId;
use elspeth_core::ArtifactRecord;
use elspeth_core::AuditRecorder;
use elspeth_core::BranchName;
use elspeth_core::CheckpointRecord;
use elspeth_core::DeterminismClass;
use elspeth_core::EdgeId;
use elspeth_core::EdgeRecord;
use elspeth_core::HashAlgorithm;
use elspeth_core::HashDigest;
use elspeth_core::NodeId;
use elspeth_core::NodeRecord;
use elspeth_core::NodeRegistration;
use elspeth_core::NodeStateRecord;
use elspeth_core::NodeStateStatus;
use elspeth_core::OperationCallRecord;
use elspeth_core::OperationId;
use elspeth_core::OperationKind;
use elspeth_core::OperationRecord;
use elspeth_core::PayloadStore;
use elspeth_core::RecorderError;
use elspeth_core::RouteLabel;
use elspeth_core::RoutingMode;
use elspeth_core::RowData;
use elspeth_core::RowId;
use elspeth_core::RowRecord;
use elspeth_core::RunId;
use elspeth_core::RunRecord;
use elspeth_core::RunStatus;
use elspeth_core::SchemaContract;
use elspeth_core::SinkName;
use elspeth_core::StateCompletion;
use elspeth_core::StateId;
use elspeth_core::Timestamp;
use elspeth_core::TokenId;
use elspeth_core::TokenOutcomeRecord;
use elspeth_core::TokenRecord;
use elspeth_core::hashing::CANONICAL_VERSION;
use elspeth_core::hashing::canonical_json_bytes;
use elspeth_core::hashing::hash_canonical_json;
use elspeth_core::row_value;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the audit store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

impl From<SqliteStoreError> for RecorderError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Storage(error.to_string())
    }
}

// ============================================================================
// SECTION: Recorder
// ============================================================================

/// `SQLite`-backed audit recorder with WAL durability.
pub struct SqliteRecorder {
    /// Database path for diagnostics.
    path: PathBuf,
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
    /// Payload store backing `create_row`, when configured.
    payload_store: Option<Arc<dyn PayloadStore + Send + Sync>>,
}

impl SqliteRecorder {
    /// Opens (creating if needed) an audit store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(
        path: impl Into<PathBuf>,
        payload_store: Option<Arc<dyn PayloadStore + Send + Sync>>,
    ) -> Result<Self, SqliteStoreError> {
        let path = path.into();
        let mut connection = open_connection(&path, true)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            path,
            connection: Arc::new(Mutex::new(connection)),
            payload_store,
        })
    }

    /// Opens an existing audit store, never creating the file.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Io`] when the database file is missing.
    pub fn open_existing(
        path: impl Into<PathBuf>,
        payload_store: Option<Arc<dyn PayloadStore + Send + Sync>>,
    ) -> Result<Self, SqliteStoreError> {
        let path = path.into();
        if !path.exists() {
            return Err(SqliteStoreError::Io(format!(
                "database file not found: {}",
                path.display()
            )));
        }
        let mut connection = open_connection(&path, false)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            path,
            connection: Arc::new(Mutex::new(connection)),
            payload_store,
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locks the connection, mapping poisoning onto a storage error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RecorderError> {
        self.connection
            .lock()
            .map_err(|_| RecorderError::Storage("sqlite connection mutex poisoned".to_string()))
    }

    /// Returns run identifiers whose terminal `completed_at` is older than
    /// the cutoff.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the query fails.
    pub fn runs_completed_before(&self, cutoff: Timestamp) -> Result<Vec<RunId>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT run_id FROM runs WHERE completed_at IS NOT NULL AND completed_at < ?1 \
                 AND status IN ('completed', 'failed', 'cancelled')",
            )
            .map_err(SqliteStoreError::from)?;
        let rows = statement
            .query_map(params![cutoff.as_unix_millis()], |row| {
                row.get::<_, String>(0).map(RunId::new)
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows)
    }

    /// Returns the distinct payload references recorded for a set of runs.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the query fails.
    pub fn payload_refs_for_runs(
        &self,
        run_ids: &[RunId],
    ) -> Result<Vec<String>, RecorderError> {
        let guard = self.lock()?;
        let mut refs = Vec::new();
        let mut statement = guard
            .prepare("SELECT DISTINCT source_data_ref FROM rows WHERE run_id = ?1")
            .map_err(SqliteStoreError::from)?;
        for run_id in run_ids {
            let found = statement
                .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
                .map_err(SqliteStoreError::from)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(SqliteStoreError::from)?;
            refs.extend(found);
        }
        refs.sort_unstable();
        refs.dedup();
        Ok(refs)
    }

    /// Returns true when any run outside the given set references the
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError`] when the query fails.
    pub fn payload_referenced_elsewhere(
        &self,
        payload_ref: &str,
        excluded_runs: &[RunId],
    ) -> Result<bool, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare("SELECT run_id FROM rows WHERE source_data_ref = ?1")
            .map_err(SqliteStoreError::from)?;
        let referencing = statement
            .query_map(params![payload_ref], |row| row.get::<_, String>(0))
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(referencing
            .iter()
            .any(|run| !excluded_runs.iter().any(|excluded| excluded.as_str() == run)))
    }
}

impl std::fmt::Debug for SqliteRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecorder").field("path", &self.path).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Opens a connection with the store pragmas applied.
fn open_connection(path: &Path, create: bool) -> Result<Connection, SqliteStoreError> {
    if let Some(parent) = path.parent() {
        if create && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        }
    }
    let flags = if create {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
    };
    let connection = Connection::open_with_flags(path, flags)?;
    connection.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch("PRAGMA journal_mode = wal;")?;
    connection.execute_batch("PRAGMA synchronous = full;")?;
    Ok(connection)
}

/// Creates or verifies the audit schema.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0)).optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    completed_at INTEGER,
                    config_hash TEXT NOT NULL,
                    settings_json TEXT NOT NULL,
                    schema_contract_json TEXT,
                    engine_version TEXT NOT NULL,
                    canonical_version TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS nodes (
                    node_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    plugin_name TEXT NOT NULL,
                    node_type TEXT NOT NULL,
                    plugin_version TEXT NOT NULL,
                    determinism TEXT NOT NULL,
                    config_hash TEXT NOT NULL,
                    config_json TEXT NOT NULL,
                    input_contract_json TEXT,
                    output_contract_json TEXT,
                    registered_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS edges (
                    edge_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    from_node TEXT NOT NULL REFERENCES nodes (node_id),
                    to_node TEXT NOT NULL REFERENCES nodes (node_id),
                    label TEXT NOT NULL,
                    mode TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS rows (
                    row_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    source_node_id TEXT NOT NULL REFERENCES nodes (node_id),
                    row_index INTEGER NOT NULL,
                    source_data_hash TEXT NOT NULL,
                    source_data_ref TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS tokens (
                    token_id TEXT PRIMARY KEY,
                    row_id TEXT NOT NULL REFERENCES rows (row_id),
                    parent_token_id TEXT,
                    branch_name TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS node_states (
                    state_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    node_id TEXT NOT NULL REFERENCES nodes (node_id),
                    token_id TEXT NOT NULL REFERENCES tokens (token_id),
                    status TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    duration_ms INTEGER,
                    input_hash TEXT,
                    output_hash TEXT,
                    success_reason_json TEXT,
                    error_json TEXT,
                    error_phase TEXT,
                    sequence_number INTEGER NOT NULL,
                    metadata_json TEXT,
                    UNIQUE (run_id, sequence_number)
                );
                CREATE TABLE IF NOT EXISTS routing_events (
                    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    state_id TEXT NOT NULL REFERENCES node_states (state_id),
                    edge_id TEXT NOT NULL REFERENCES edges (edge_id),
                    mode TEXT NOT NULL,
                    routing_group_id TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS token_outcomes (
                    outcome_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    row_id TEXT NOT NULL REFERENCES rows (row_id),
                    token_id TEXT NOT NULL REFERENCES tokens (token_id),
                    outcome TEXT NOT NULL,
                    sink_name TEXT,
                    is_terminal INTEGER NOT NULL,
                    recorded_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS artifacts (
                    artifact_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    sink_node_id TEXT NOT NULL REFERENCES nodes (node_id),
                    produced_by_state_id TEXT NOT NULL REFERENCES node_states (state_id),
                    artifact_type TEXT NOT NULL,
                    path_or_uri TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    content_hash TEXT NOT NULL,
                    registered_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS operations (
                    operation_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    node_id TEXT NOT NULL REFERENCES nodes (node_id),
                    kind TEXT NOT NULL,
                    started_at INTEGER NOT NULL,
                    completed_at INTEGER,
                    token_count INTEGER NOT NULL,
                    outcome_json TEXT
                );
                CREATE TABLE IF NOT EXISTS operation_calls (
                    call_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation_id TEXT NOT NULL REFERENCES operations (operation_id),
                    call_kind TEXT NOT NULL,
                    target TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    status_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS checkpoints (
                    checkpoint_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs (run_id),
                    token_id TEXT NOT NULL,
                    node_id TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    aggregation_state_json TEXT,
                    topology_hash TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_rows_run ON rows (run_id, row_index);
                CREATE INDEX IF NOT EXISTS idx_states_run ON node_states (run_id, sequence_number);
                CREATE INDEX IF NOT EXISTS idx_outcomes_run ON token_outcomes (run_id);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_run
                    ON checkpoints (run_id, sequence_number);",
            )?;
        }
        Some(found) if found == SCHEMA_VERSION => {}
        Some(found) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "audit store schema version {found} (expected {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit()?;
    Ok(())
}

// ============================================================================
// SECTION: Label Helpers
// ============================================================================

/// Returns the stable label for a run status.
const fn run_status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

/// Parses a run status label.
fn parse_run_status(label: &str) -> Result<RunStatus, SqliteStoreError> {
    match label {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(SqliteStoreError::Invalid(format!("unknown run status `{other}`"))),
    }
}

/// Returns the stable label for a routing mode.
const fn routing_mode_label(mode: RoutingMode) -> &'static str {
    match mode {
        RoutingMode::Move => "move",
        RoutingMode::Copy => "copy",
    }
}

/// Returns the stable label for an operation kind.
const fn operation_kind_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::SinkWrite => "sink_write",
        OperationKind::BatchFlush => "batch_flush",
    }
}

/// Parses an operation kind label.
fn parse_operation_kind(label: &str) -> Result<OperationKind, SqliteStoreError> {
    match label {
        "sink_write" => Ok(OperationKind::SinkWrite),
        "batch_flush" => Ok(OperationKind::BatchFlush),
        other => Err(SqliteStoreError::Invalid(format!("unknown operation kind `{other}`"))),
    }
}

/// Returns the stable label for a determinism class.
const fn determinism_label(determinism: DeterminismClass) -> &'static str {
    match determinism {
        DeterminismClass::Deterministic => "deterministic",
        DeterminismClass::IoRead => "io_read",
        DeterminismClass::IoWrite => "io_write",
        DeterminismClass::ExternalCall => "external_call",
        DeterminismClass::NonDeterministic => "non_deterministic",
    }
}

/// Serializes a JSON value column.
fn json_column(value: &Value) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Parses a JSON value column.
fn parse_json(text: &str) -> Result<Value, SqliteStoreError> {
    serde_json::from_str(text).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Issues a fresh prefixed identifier.
fn issue_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Reconstructs a digest from its stored hex form.
fn digest_from_hex(value: String) -> HashDigest {
    HashDigest {
        algorithm: HashAlgorithm::Sha256,
        value,
    }
}

// ============================================================================
// SECTION: AuditRecorder Implementation
// ============================================================================

impl AuditRecorder for SqliteRecorder {
    fn begin_run(
        &self,
        settings: &Value,
        engine_version: &str,
        started_at: Timestamp,
    ) -> Result<RunRecord, RecorderError> {
        let config_hash = hash_canonical_json(settings)?;
        let run_id = RunId::new(issue_id("run"));
        let settings_json = json_column(settings).map_err(RecorderError::from)?;
        let guard = self.lock()?;
        // Open in pending, advance to running in the same transaction.
        guard
            .execute(
                "INSERT INTO runs (run_id, status, started_at, config_hash, settings_json, \
                 engine_version, canonical_version) VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id.as_str(),
                    started_at.as_unix_millis(),
                    config_hash.as_str(),
                    settings_json,
                    engine_version,
                    CANONICAL_VERSION,
                ],
            )
            .map_err(SqliteStoreError::from)?;
        guard
            .execute(
                "UPDATE runs SET status = 'running' WHERE run_id = ?1",
                params![run_id.as_str()],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(RunRecord {
            run_id,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            config_hash,
            settings: settings.clone(),
            schema_contract: None,
            engine_version: engine_version.to_string(),
            canonical_version: CANONICAL_VERSION.to_string(),
        })
    }

    fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError> {
        if !status.is_terminal() {
            return Err(RecorderError::InvalidTransition(format!(
                "finish_run requires a terminal status, got {}",
                run_status_label(status)
            )));
        }
        let guard = self.lock()?;
        let current: Option<String> = guard
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        let current = current.ok_or_else(|| RecorderError::NotFound(format!("run {run_id}")))?;
        let parsed = parse_run_status(&current).map_err(RecorderError::from)?;
        if parsed.is_terminal() {
            return Err(RecorderError::InvalidTransition(format!(
                "run {run_id} is already closed as {current}"
            )));
        }
        guard
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2 WHERE run_id = ?3",
                params![
                    run_status_label(status),
                    completed_at.as_unix_millis(),
                    run_id.as_str()
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn record_schema_contract(
        &self,
        run_id: &RunId,
        contract: &SchemaContract,
    ) -> Result<(), RecorderError> {
        let contract_json = serde_json::to_string(contract)
            .map_err(|err| RecorderError::Storage(err.to_string()))?;
        let guard = self.lock()?;
        let updated = guard
            .execute(
                "UPDATE runs SET schema_contract_json = ?1 WHERE run_id = ?2",
                params![contract_json, run_id.as_str()],
            )
            .map_err(SqliteStoreError::from)?;
        if updated == 0 {
            return Err(RecorderError::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    fn register_node(&self, registration: NodeRegistration) -> Result<NodeRecord, RecorderError> {
        let config_hash = hash_canonical_json(&registration.config)?;
        let config_json = json_column(&registration.config).map_err(RecorderError::from)?;
        let input_json = registration
            .input_contract
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RecorderError::Storage(err.to_string()))?;
        let output_json = registration
            .output_contract
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| RecorderError::Storage(err.to_string()))?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO nodes (node_id, run_id, plugin_name, node_type, plugin_version, \
                 determinism, config_hash, config_json, input_contract_json, \
                 output_contract_json, registered_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    registration.node_id.as_str(),
                    registration.run_id.as_str(),
                    registration.plugin_name,
                    registration.kind.label(),
                    registration.plugin_version,
                    determinism_label(registration.determinism),
                    config_hash.as_str(),
                    config_json,
                    input_json,
                    output_json,
                    registration.registered_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(NodeRecord {
            node_id: registration.node_id,
            run_id: registration.run_id,
            plugin_name: registration.plugin_name,
            kind: registration.kind,
            plugin_version: registration.plugin_version,
            determinism: registration.determinism,
            config_hash,
            config: registration.config,
            input_contract: registration.input_contract,
            output_contract: registration.output_contract,
            registered_at: registration.registered_at,
        })
    }

    fn register_edge(
        &self,
        run_id: &RunId,
        from: &NodeId,
        to: &NodeId,
        label: &RouteLabel,
        mode: RoutingMode,
    ) -> Result<EdgeRecord, RecorderError> {
        let edge_id = EdgeId::new(issue_id("edge"));
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO edges (edge_id, run_id, from_node, to_node, label, mode) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    edge_id.as_str(),
                    run_id.as_str(),
                    from.as_str(),
                    to.as_str(),
                    label.as_str(),
                    routing_mode_label(mode),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(EdgeRecord {
            edge_id,
            run_id: run_id.clone(),
            from_node: from.clone(),
            to_node: to.clone(),
            label: label.clone(),
            mode,
        })
    }

    fn create_row(
        &self,
        run_id: &RunId,
        source_node: &NodeId,
        row_index: u64,
        data: &RowData,
        row_id: Option<RowId>,
        created_at: Timestamp,
    ) -> Result<RowRecord, RecorderError> {
        let store = self.payload_store.as_ref().ok_or_else(|| {
            RecorderError::PayloadStoreMissing(
                "create_row requires a configured payload store".to_string(),
            )
        })?;
        let value = row_value(data);
        let canonical = canonical_json_bytes(&value)?;
        let payload_ref = store.store(&canonical)?;
        let source_data_hash = hash_canonical_json(&value)?;
        let row_id = row_id.unwrap_or_else(|| RowId::new(issue_id("row")));
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO rows (row_id, run_id, source_node_id, row_index, source_data_hash, \
                 source_data_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row_id.as_str(),
                    run_id.as_str(),
                    source_node.as_str(),
                    i64::try_from(row_index).unwrap_or(i64::MAX),
                    source_data_hash.as_str(),
                    payload_ref.as_str(),
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(RowRecord {
            row_id,
            run_id: run_id.clone(),
            source_node_id: source_node.clone(),
            row_index,
            source_data_hash,
            source_data_ref: payload_ref.as_str().to_string(),
            created_at,
        })
    }

    fn create_token(
        &self,
        row_id: &RowId,
        token_id: &TokenId,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO tokens (token_id, row_id, created_at) VALUES (?1, ?2, ?3)",
                params![token_id.as_str(), row_id.as_str(), created_at.as_unix_millis()],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(TokenRecord {
            token_id: token_id.clone(),
            row_id: row_id.clone(),
            parent_token_id: None,
            branch_name: None,
            created_at,
        })
    }

    fn fork_token(
        &self,
        parent: &TokenId,
        child: &TokenId,
        branch: &BranchName,
        created_at: Timestamp,
    ) -> Result<TokenRecord, RecorderError> {
        let guard = self.lock()?;
        let row_id: Option<String> = guard
            .query_row(
                "SELECT row_id FROM tokens WHERE token_id = ?1",
                params![parent.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        let row_id = row_id.ok_or_else(|| RecorderError::NotFound(format!("token {parent}")))?;
        guard
            .execute(
                "INSERT INTO tokens (token_id, row_id, parent_token_id, branch_name, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    child.as_str(),
                    row_id,
                    parent.as_str(),
                    branch.as_str(),
                    created_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(TokenRecord {
            token_id: child.clone(),
            row_id: RowId::new(row_id),
            parent_token_id: Some(parent.clone()),
            branch_name: Some(branch.clone()),
            created_at,
        })
    }

    fn begin_node_state(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        token_id: &TokenId,
        started_at: Timestamp,
    ) -> Result<StateId, RecorderError> {
        let state_id = StateId::new(issue_id("state"));
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        let node_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM nodes WHERE node_id = ?1",
                params![node_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        if node_exists.is_none() {
            return Err(RecorderError::NotFound(format!(
                "node {node_id} is not registered for run {run_id}"
            )));
        }
        let sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM node_states WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .map_err(SqliteStoreError::from)?;
        tx.execute(
            "INSERT INTO node_states (state_id, run_id, node_id, token_id, status, started_at, \
             sequence_number) VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6)",
            params![
                state_id.as_str(),
                run_id.as_str(),
                node_id.as_str(),
                token_id.as_str(),
                started_at.as_unix_millis(),
                sequence,
            ],
        )
        .map_err(SqliteStoreError::from)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(state_id)
    }

    fn complete_node_state(
        &self,
        state_id: &StateId,
        completion: StateCompletion,
    ) -> Result<(), RecorderError> {
        let reason_json = json_column(&completion.success_reason).map_err(RecorderError::from)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        check_state_open(&tx, state_id)?;
        tx.execute(
            "UPDATE node_states SET status = 'completed', duration_ms = ?1, input_hash = ?2, \
             output_hash = ?3, success_reason_json = ?4 WHERE state_id = ?5",
            params![
                i64::try_from(completion.duration_ms).unwrap_or(i64::MAX),
                completion.input_hash.as_str(),
                completion.output_hash.as_str(),
                reason_json,
                state_id.as_str(),
            ],
        )
        .map_err(SqliteStoreError::from)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn fail_node_state(
        &self,
        state_id: &StateId,
        error: Value,
        error_phase: &str,
        duration_ms: u64,
    ) -> Result<(), RecorderError> {
        let error_json = json_column(&error).map_err(RecorderError::from)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        check_state_open(&tx, state_id)?;
        tx.execute(
            "UPDATE node_states SET status = 'failed', duration_ms = ?1, error_json = ?2, \
             error_phase = ?3 WHERE state_id = ?4",
            params![
                i64::try_from(duration_ms).unwrap_or(i64::MAX),
                error_json,
                error_phase,
                state_id.as_str(),
            ],
        )
        .map_err(SqliteStoreError::from)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn set_state_metadata(&self, state_id: &StateId, metadata: Value) -> Result<(), RecorderError> {
        let metadata_json = json_column(&metadata).map_err(RecorderError::from)?;
        let guard = self.lock()?;
        let updated = guard
            .execute(
                "UPDATE node_states SET metadata_json = ?1 WHERE state_id = ?2",
                params![metadata_json, state_id.as_str()],
            )
            .map_err(SqliteStoreError::from)?;
        if updated == 0 {
            return Err(RecorderError::NotFound(format!("state {state_id}")));
        }
        Ok(())
    }

    fn record_routing(
        &self,
        state_id: &StateId,
        edge_id: &EdgeId,
        mode: RoutingMode,
        routing_group_id: &str,
    ) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO routing_events (state_id, edge_id, mode, routing_group_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    state_id.as_str(),
                    edge_id.as_str(),
                    routing_mode_label(mode),
                    routing_group_id,
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn record_token_outcome(&self, outcome: &TokenOutcomeRecord) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO token_outcomes (run_id, row_id, token_id, outcome, sink_name, \
                 is_terminal, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    outcome.run_id.as_str(),
                    outcome.row_id.as_str(),
                    outcome.token_id.as_str(),
                    outcome.outcome.label(),
                    outcome.sink_name.as_ref().map(SinkName::as_str),
                    i64::from(outcome.is_terminal),
                    outcome.recorded_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn register_artifact(
        &self,
        run_id: &RunId,
        sink_node: &NodeId,
        state_id: &StateId,
        artifact_type: &str,
        uri: &str,
        size_bytes: u64,
        content_hash: &HashDigest,
        registered_at: Timestamp,
    ) -> Result<ArtifactRecord, RecorderError> {
        let artifact_id = ArtifactId::new(issue_id("artifact"));
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO artifacts (artifact_id, run_id, sink_node_id, produced_by_state_id, \
                 artifact_type, path_or_uri, size_bytes, content_hash, registered_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    artifact_id.as_str(),
                    run_id.as_str(),
                    sink_node.as_str(),
                    state_id.as_str(),
                    artifact_type,
                    uri,
                    i64::try_from(size_bytes).unwrap_or(i64::MAX),
                    content_hash.as_str(),
                    registered_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(ArtifactRecord {
            artifact_id,
            run_id: run_id.clone(),
            sink_node_id: sink_node.clone(),
            produced_by_state_id: state_id.clone(),
            artifact_type: artifact_type.to_string(),
            path_or_uri: uri.to_string(),
            size_bytes,
            content_hash: content_hash.clone(),
            registered_at,
        })
    }

    fn begin_operation(
        &self,
        run_id: &RunId,
        node_id: &NodeId,
        kind: OperationKind,
        token_count: u64,
        started_at: Timestamp,
    ) -> Result<OperationId, RecorderError> {
        let operation_id = OperationId::new(issue_id("operation"));
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO operations (operation_id, run_id, node_id, kind, started_at, \
                 token_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    operation_id.as_str(),
                    run_id.as_str(),
                    node_id.as_str(),
                    operation_kind_label(kind),
                    started_at.as_unix_millis(),
                    i64::try_from(token_count).unwrap_or(i64::MAX),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(operation_id)
    }

    fn complete_operation(
        &self,
        operation_id: &OperationId,
        outcome: Value,
        completed_at: Timestamp,
    ) -> Result<(), RecorderError> {
        let outcome_json = json_column(&outcome).map_err(RecorderError::from)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;
        let current: Option<Option<i64>> = tx
            .query_row(
                "SELECT completed_at FROM operations WHERE operation_id = ?1",
                params![operation_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        match current {
            None => {
                return Err(RecorderError::StateCorruption(format!(
                    "operation {operation_id} was never opened"
                )));
            }
            Some(Some(_)) => {
                return Err(RecorderError::StateCorruption(format!(
                    "operation {operation_id} is already closed"
                )));
            }
            Some(None) => {}
        }
        tx.execute(
            "UPDATE operations SET completed_at = ?1, outcome_json = ?2 WHERE operation_id = ?3",
            params![completed_at.as_unix_millis(), outcome_json, operation_id.as_str()],
        )
        .map_err(SqliteStoreError::from)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn record_call(&self, call: OperationCallRecord) -> Result<(), RecorderError> {
        let status_json = json_column(&call.status).map_err(RecorderError::from)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO operation_calls (operation_id, call_kind, target, duration_ms, \
                 status_json) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    call.operation_id.as_str(),
                    call.call_kind,
                    call.target,
                    i64::try_from(call.duration_ms).unwrap_or(i64::MAX),
                    status_json,
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &CheckpointRecord) -> Result<(), RecorderError> {
        let aggregation_json = checkpoint
            .aggregation_state
            .as_ref()
            .map(json_column)
            .transpose()
            .map_err(RecorderError::from)?;
        let guard = self.lock()?;
        guard
            .execute(
                "INSERT INTO checkpoints (checkpoint_id, run_id, token_id, node_id, \
                 sequence_number, aggregation_state_json, topology_hash, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    checkpoint.checkpoint_id.as_str(),
                    checkpoint.run_id.as_str(),
                    checkpoint.token_id.as_str(),
                    checkpoint.node_id.as_str(),
                    i64::try_from(checkpoint.sequence).unwrap_or(i64::MAX),
                    aggregation_json,
                    checkpoint.topology_hash.as_ref().map(HashDigest::as_str),
                    checkpoint.created_at.as_unix_millis(),
                ],
            )
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn latest_checkpoint(&self, run_id: &RunId) -> Result<Option<CheckpointRecord>, RecorderError> {
        let guard = self.lock()?;
        let record = guard
            .query_row(
                "SELECT checkpoint_id, token_id, node_id, sequence_number, \
                 aggregation_state_json, topology_hash, created_at FROM checkpoints \
                 WHERE run_id = ?1 ORDER BY sequence_number DESC, created_at DESC LIMIT 1",
                params![run_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some((checkpoint_id, token_id, node_id, sequence, aggregation, topology, created)) =
            record
        else {
            return Ok(None);
        };
        let aggregation_state = aggregation
            .map(|text| parse_json(&text))
            .transpose()
            .map_err(RecorderError::from)?;
        Ok(Some(CheckpointRecord {
            checkpoint_id: elspeth_core::CheckpointId::new(checkpoint_id),
            run_id: run_id.clone(),
            token_id: TokenId::new(token_id),
            node_id: NodeId::new(node_id),
            sequence: u64::try_from(sequence).unwrap_or(0),
            aggregation_state,
            topology_hash: topology.map(digest_from_hex),
            created_at: Timestamp::from_unix_millis(created),
        }))
    }

    fn delete_checkpoints(&self, run_id: &RunId) -> Result<(), RecorderError> {
        let guard = self.lock()?;
        guard
            .execute("DELETE FROM checkpoints WHERE run_id = ?1", params![run_id.as_str()])
            .map_err(SqliteStoreError::from)?;
        Ok(())
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, RecorderError> {
        let guard = self.lock()?;
        let record = guard
            .query_row(
                "SELECT status, started_at, completed_at, config_hash, settings_json, \
                 schema_contract_json, engine_version, canonical_version FROM runs \
                 WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        let Some((status, started, completed, config_hash, settings, contract, engine, canonical)) =
            record
        else {
            return Ok(None);
        };
        let schema_contract = contract
            .map(|text| {
                serde_json::from_str::<SchemaContract>(&text)
                    .map_err(|err| RecorderError::Storage(err.to_string()))
            })
            .transpose()?;
        Ok(Some(RunRecord {
            run_id: run_id.clone(),
            status: parse_run_status(&status).map_err(RecorderError::from)?,
            started_at: Timestamp::from_unix_millis(started),
            completed_at: completed.map(Timestamp::from_unix_millis),
            config_hash: digest_from_hex(config_hash),
            settings: parse_json(&settings).map_err(RecorderError::from)?,
            schema_contract,
            engine_version: engine,
            canonical_version: canonical,
        }))
    }

    fn rows(&self, run_id: &RunId) -> Result<Vec<RowRecord>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT row_id, source_node_id, row_index, source_data_hash, source_data_ref, \
                 created_at FROM rows WHERE run_id = ?1 ORDER BY row_index",
            )
            .map_err(SqliteStoreError::from)?;
        let rows = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok(RowRecord {
                    row_id: RowId::new(row.get::<_, String>(0)?),
                    run_id: run_id.clone(),
                    source_node_id: NodeId::new(row.get::<_, String>(1)?),
                    row_index: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                    source_data_hash: digest_from_hex(row.get::<_, String>(3)?),
                    source_data_ref: row.get::<_, String>(4)?,
                    created_at: Timestamp::from_unix_millis(row.get::<_, i64>(5)?),
                })
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(rows)
    }

    fn token_outcomes(&self, run_id: &RunId) -> Result<Vec<TokenOutcomeRecord>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT row_id, token_id, outcome, sink_name, is_terminal, recorded_at \
                 FROM token_outcomes WHERE run_id = ?1 ORDER BY outcome_id",
            )
            .map_err(SqliteStoreError::from)?;
        let outcomes = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        outcomes
            .into_iter()
            .map(|(row_id, token_id, outcome, sink, terminal, recorded)| {
                Ok(TokenOutcomeRecord {
                    run_id: run_id.clone(),
                    row_id: RowId::new(row_id),
                    token_id: TokenId::new(token_id),
                    outcome: parse_row_outcome(&outcome)?,
                    sink_name: sink.map(SinkName::new),
                    is_terminal: terminal != 0,
                    recorded_at: Timestamp::from_unix_millis(recorded),
                })
            })
            .collect()
    }

    fn node_states(&self, run_id: &RunId) -> Result<Vec<NodeStateRecord>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT state_id, node_id, token_id, status, started_at, duration_ms, \
                 input_hash, output_hash, success_reason_json, error_json, error_phase, \
                 sequence_number, metadata_json FROM node_states WHERE run_id = ?1 \
                 ORDER BY sequence_number",
            )
            .map_err(SqliteStoreError::from)?;
        let states = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, i64>(11)?,
                    row.get::<_, Option<String>>(12)?,
                ))
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        states
            .into_iter()
            .map(|columns| build_state_record(run_id, columns))
            .collect()
    }

    fn artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT artifact_id, sink_node_id, produced_by_state_id, artifact_type, \
                 path_or_uri, size_bytes, content_hash, registered_at FROM artifacts \
                 WHERE run_id = ?1 ORDER BY artifact_id",
            )
            .map_err(SqliteStoreError::from)?;
        let artifacts = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok(ArtifactRecord {
                    artifact_id: ArtifactId::new(row.get::<_, String>(0)?),
                    run_id: run_id.clone(),
                    sink_node_id: NodeId::new(row.get::<_, String>(1)?),
                    produced_by_state_id: StateId::new(row.get::<_, String>(2)?),
                    artifact_type: row.get::<_, String>(3)?,
                    path_or_uri: row.get::<_, String>(4)?,
                    size_bytes: u64::try_from(row.get::<_, i64>(5)?).unwrap_or(0),
                    content_hash: digest_from_hex(row.get::<_, String>(6)?),
                    registered_at: Timestamp::from_unix_millis(row.get::<_, i64>(7)?),
                })
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        Ok(artifacts)
    }

    fn operations(&self, run_id: &RunId) -> Result<Vec<OperationRecord>, RecorderError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT operation_id, node_id, kind, started_at, completed_at, token_count, \
                 outcome_json FROM operations WHERE run_id = ?1 ORDER BY operation_id",
            )
            .map_err(SqliteStoreError::from)?;
        let operations = statement
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(SqliteStoreError::from)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SqliteStoreError::from)?;
        operations
            .into_iter()
            .map(|(operation_id, node_id, kind, started, completed, count, outcome)| {
                Ok(OperationRecord {
                    operation_id: OperationId::new(operation_id),
                    run_id: run_id.clone(),
                    node_id: NodeId::new(node_id),
                    kind: parse_operation_kind(&kind).map_err(RecorderError::from)?,
                    started_at: Timestamp::from_unix_millis(started),
                    completed_at: completed.map(Timestamp::from_unix_millis),
                    token_count: u64::try_from(count).unwrap_or(0),
                    outcome: outcome
                        .map(|text| parse_json(&text))
                        .transpose()
                        .map_err(RecorderError::from)?,
                })
            })
            .collect()
    }
}

// ============================================================================
// SECTION: Row Parsing Helpers
// ============================================================================

/// Raw node-state columns selected from the store.
type StateColumns = (
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
);

/// Reconstructs a node state record from its columns.
fn build_state_record(
    run_id: &RunId,
    columns: StateColumns,
) -> Result<NodeStateRecord, RecorderError> {
    let (
        state_id,
        node_id,
        token_id,
        status,
        started_at,
        duration_ms,
        input_hash,
        output_hash,
        success_reason,
        error_json,
        error_phase,
        sequence,
        metadata,
    ) = columns;
    let status = match status.as_str() {
        "open" => NodeStateStatus::Open,
        "skipped" => NodeStateStatus::Skipped,
        "completed" => NodeStateStatus::Completed {
            duration_ms: duration_ms.and_then(|ms| u64::try_from(ms).ok()).unwrap_or(0),
            input_hash: digest_from_hex(input_hash.unwrap_or_default()),
            output_hash: digest_from_hex(output_hash.unwrap_or_default()),
            success_reason: success_reason
                .map(|text| parse_json(&text))
                .transpose()
                .map_err(RecorderError::from)?
                .unwrap_or(Value::Null),
        },
        "failed" => NodeStateStatus::Failed {
            duration_ms: duration_ms.and_then(|ms| u64::try_from(ms).ok()).unwrap_or(0),
            error: error_json
                .map(|text| parse_json(&text))
                .transpose()
                .map_err(RecorderError::from)?
                .unwrap_or(Value::Null),
            error_phase: error_phase.unwrap_or_default(),
        },
        other => {
            return Err(RecorderError::Storage(format!("unknown state status `{other}`")));
        }
    };
    Ok(NodeStateRecord {
        state_id: StateId::new(state_id),
        run_id: run_id.clone(),
        node_id: NodeId::new(node_id),
        token_id: TokenId::new(token_id),
        status,
        sequence: u64::try_from(sequence).unwrap_or(0),
        started_at: Timestamp::from_unix_millis(started_at),
        metadata: metadata
            .map(|text| parse_json(&text))
            .transpose()
            .map_err(RecorderError::from)?,
    })
}

/// Parses a row outcome label.
fn parse_row_outcome(label: &str) -> Result<elspeth_core::RowOutcome, RecorderError> {
    use elspeth_core::RowOutcome;
    match label {
        "completed" => Ok(RowOutcome::Completed),
        "routed" => Ok(RowOutcome::Routed),
        "forked" => Ok(RowOutcome::Forked),
        "failed" => Ok(RowOutcome::Failed),
        "quarantined" => Ok(RowOutcome::Quarantined),
        "consumed_in_batch" => Ok(RowOutcome::ConsumedInBatch),
        "coalesced" => Ok(RowOutcome::Coalesced),
        "expanded" => Ok(RowOutcome::Expanded),
        "buffered" => Ok(RowOutcome::Buffered),
        other => Err(RecorderError::Storage(format!("unknown outcome `{other}`"))),
    }
}

/// Rejects closing a state that is absent or already closed.
fn check_state_open(
    tx: &rusqlite::Transaction<'_>,
    state_id: &StateId,
) -> Result<(), RecorderError> {
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM node_states WHERE state_id = ?1",
            params![state_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(SqliteStoreError::from)?;
    match status.as_deref() {
        None => Err(RecorderError::StateCorruption(format!(
            "state {state_id} was never opened"
        ))),
        Some("open") => Ok(()),
        Some(other) => Err(RecorderError::StateCorruption(format!(
            "state {state_id} is already closed as {other}"
        ))),
    }
}
