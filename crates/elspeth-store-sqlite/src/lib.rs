// elspeth-store-sqlite/src/lib.rs
// ============================================================================
// Module: Elspeth SQLite Store Library
// Description: Durable audit recorder and filesystem payload store.
// Purpose: Persist the full audit trail with WAL durability and purge support.
// Dependencies: crate::{payload, purge, store}
// ============================================================================

//! ## Overview
//! This crate provides the durable backends: a `SQLite`-backed
//! [`SqliteRecorder`] implementing the full audit recorder surface over the
//! eleven-table logical schema, a content-addressed [`FsPayloadStore`] with
//! the hash-path layout, and the retention [`purge`] workflow the CLI
//! exposes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod payload;
pub mod purge;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use payload::FsPayloadStore;
pub use purge::PurgeReport;
pub use purge::purge_expired_payloads;
pub use store::SqliteRecorder;
pub use store::SqliteStoreError;
