// elspeth-store-sqlite/src/purge.rs
// ============================================================================
// Module: Elspeth Payload Retention Purge
// Description: Deletes expired payloads for eligible runs.
// Purpose: Bound payload store growth without touching the audit log.
// Dependencies: crate::{payload, store}, elspeth-core
// ============================================================================

//! ## Overview
//! Purging deletes payload blobs whose owning runs reached a terminal status
//! before the retention cutoff. The audit rows stay: only the raw bytes
//! leave, and a payload still referenced by a non-eligible run is never
//! touched. Dry-run mode reports the candidates without deleting anything.

// ============================================================================
// SECTION: Imports
// ============================================================================

use elspeth_core::RecorderError;
use elspeth_core::RunId;
use elspeth_core::Timestamp;
use elspeth_core::hashing::HashAlgorithm;
use elspeth_core::hashing::HashDigest;

use crate::payload::FsPayloadStore;
use crate::store::SqliteRecorder;

// ============================================================================
// SECTION: Purge Report
// ============================================================================

/// Result of one purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Runs whose payloads were eligible.
    pub eligible_runs: Vec<RunId>,
    /// Payload references considered.
    pub candidate_payloads: u64,
    /// Payloads deleted, or deletable when running dry.
    pub payloads_deleted: u64,
    /// Bytes freed, or freeable when running dry.
    pub bytes_freed: u64,
    /// Payloads kept because a non-eligible run still references them.
    pub payloads_retained: u64,
}

// ============================================================================
// SECTION: Purge
// ============================================================================

/// Milliseconds per day.
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

/// Purges payloads for runs that reached a terminal status more than
/// `retention_days` before `now`.
///
/// # Errors
///
/// Returns [`RecorderError`] when eligibility queries or deletions fail.
pub fn purge_expired_payloads(
    recorder: &SqliteRecorder,
    payloads: &FsPayloadStore,
    retention_days: u32,
    now: Timestamp,
    dry_run: bool,
) -> Result<PurgeReport, RecorderError> {
    let cutoff = Timestamp::from_unix_millis(
        now.as_unix_millis()
            .saturating_sub(i64::from(retention_days).saturating_mul(MILLIS_PER_DAY)),
    );
    let eligible_runs = recorder.runs_completed_before(cutoff)?;
    let mut report = PurgeReport {
        eligible_runs: eligible_runs.clone(),
        ..PurgeReport::default()
    };
    if eligible_runs.is_empty() {
        return Ok(report);
    }

    let refs = recorder.payload_refs_for_runs(&eligible_runs)?;
    report.candidate_payloads = u64::try_from(refs.len()).unwrap_or(u64::MAX);

    for payload_ref in refs {
        if recorder.payload_referenced_elsewhere(&payload_ref, &eligible_runs)? {
            report.payloads_retained += 1;
            continue;
        }
        let digest = HashDigest {
            algorithm: HashAlgorithm::Sha256,
            value: payload_ref,
        };
        if dry_run {
            if let Some(size) = payloads.size_of(&digest)? {
                report.payloads_deleted += 1;
                report.bytes_freed += size;
            }
        } else {
            let freed = payloads.remove(&digest)?;
            if freed > 0 {
                report.payloads_deleted += 1;
                report.bytes_freed += freed;
            }
        }
    }
    Ok(report)
}
