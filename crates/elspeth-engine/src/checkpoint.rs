// elspeth-engine/src/checkpoint.rs
// ============================================================================
// Module: Elspeth Checkpoint Manager
// Description: Cadence policy and checkpoint persistence for resume.
// Purpose: Persist resumable markers atomically on the configured cadence.
// Dependencies: crate::error, elspeth-core, elspeth-config
// ============================================================================

//! ## Overview
//! The checkpoint manager decides when to persist a marker (`every_row`,
//! `every_n`, `on_flush`, or never) and writes the snapshot through the
//! recorder, whose checkpoint write is atomic: the position, node, and
//! aggregation state land together or not at all. Checkpoints are deleted
//! when a run completes and preserved when it fails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_config::CheckpointPolicy;
use elspeth_config::CheckpointSettings;
use elspeth_core::AuditRecorder;
use elspeth_core::CheckpointId;
use elspeth_core::CheckpointRecord;
use elspeth_core::Clock;
use elspeth_core::HashDigest;
use elspeth_core::NodeId;
use elspeth_core::RunId;
use elspeth_core::TokenId;
use serde_json::Value;

use crate::error::EngineError;

// ============================================================================
// SECTION: Checkpoint Manager
// ============================================================================

/// Applies the checkpoint cadence policy for one run.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    /// Checkpoint configuration.
    settings: CheckpointSettings,
    /// Monotonic counter feeding checkpoint identifiers.
    next_id: u64,
}

impl CheckpointManager {
    /// Creates a manager from settings.
    #[must_use]
    pub const fn new(settings: CheckpointSettings) -> Self {
        Self {
            settings,
            next_id: 0,
        }
    }

    /// Returns the configured policy.
    #[must_use]
    pub const fn policy(&self) -> CheckpointPolicy {
        self.settings.policy
    }

    /// Reports whether a checkpoint is due after `rows_processed` rows.
    #[must_use]
    pub const fn due_after_row(&self, rows_processed: u64) -> bool {
        match self.settings.policy {
            CheckpointPolicy::EveryRow => true,
            CheckpointPolicy::EveryN(interval) => {
                interval > 0 && rows_processed % interval == 0
            }
            CheckpointPolicy::OnFlush | CheckpointPolicy::None => false,
        }
    }

    /// Reports whether a checkpoint is due at a flush boundary.
    #[must_use]
    pub const fn due_on_flush(&self) -> bool {
        matches!(self.settings.policy, CheckpointPolicy::OnFlush)
    }

    /// Persists one checkpoint atomically.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the snapshot cannot be made durable.
    #[allow(clippy::too_many_arguments, reason = "snapshot fields mirror the checkpoint record")]
    pub fn take_checkpoint(
        &mut self,
        recorder: &dyn AuditRecorder,
        clock: &dyn Clock,
        run_id: &RunId,
        token_id: &TokenId,
        node_id: &NodeId,
        sequence: u64,
        aggregation_state: Option<Value>,
        topology_hash: &HashDigest,
    ) -> Result<CheckpointRecord, EngineError> {
        self.next_id += 1;
        let record = CheckpointRecord {
            checkpoint_id: CheckpointId::new(format!("ckpt-{}", self.next_id)),
            run_id: run_id.clone(),
            token_id: token_id.clone(),
            node_id: node_id.clone(),
            sequence,
            aggregation_state,
            topology_hash: Some(topology_hash.clone()),
            created_at: clock.now(),
        };
        recorder.save_checkpoint(&record)?;
        Ok(record)
    }
}
