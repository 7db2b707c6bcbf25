// elspeth-store-sqlite/tests/fs_payload.rs
// ============================================================================
// Module: Filesystem Payload Store Tests
// Description: Hash-path layout, idempotence, and corruption detection.
// ============================================================================
//! ## Overview
//! Validates the content-addressed layout and the fail-closed retrieve path.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use elspeth_core::PayloadStore;
use elspeth_core::PayloadStoreError;
use elspeth_store_sqlite::FsPayloadStore;

// ============================================================================
// SECTION: Round Trips
// ============================================================================

/// Tests store/retrieve round-trips bytes exactly.
#[test]
fn test_store_retrieve_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();

    let digest = store.store(b"row bytes").unwrap();
    assert!(store.exists(&digest).unwrap());
    assert_eq!(store.retrieve(&digest).unwrap(), b"row bytes");
}

/// Tests the on-disk layout is `<first-two-hex>/<remaining-hex>`.
#[test]
fn test_hash_path_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();

    let digest = store.store(b"payload").unwrap();
    let (prefix, rest) = digest.as_str().split_at(2);
    assert!(dir.path().join(prefix).join(rest).exists());
}

/// Tests store is idempotent by hash.
#[test]
fn test_store_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();

    let first = store.store(b"same").unwrap();
    let second = store.store(b"same").unwrap();
    assert_eq!(first, second);
}

/// Tests a missing payload reports not-found.
#[test]
fn test_missing_payload_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();
    let absent = elspeth_core::hashing::hash_bytes(
        elspeth_core::hashing::DEFAULT_HASH_ALGORITHM,
        b"never stored",
    );

    assert!(!store.exists(&absent).unwrap());
    assert!(matches!(store.retrieve(&absent), Err(PayloadStoreError::NotFound(_))));
}

// ============================================================================
// SECTION: Corruption
// ============================================================================

/// Tests retrieve fails closed when stored bytes no longer match the key.
#[test]
fn test_retrieve_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();

    let digest = store.store(b"original").unwrap();
    let (prefix, rest) = digest.as_str().split_at(2);
    std::fs::write(dir.path().join(prefix).join(rest), b"tampered").unwrap();

    assert!(matches!(store.retrieve(&digest), Err(PayloadStoreError::Corrupt(_))));
}

/// Tests remove frees the payload and reports the freed size.
#[test]
fn test_remove_frees_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsPayloadStore::open(dir.path()).unwrap();

    let digest = store.store(b"removable").unwrap();
    let freed = store.remove(&digest).unwrap();
    assert_eq!(freed, 9);
    assert!(!store.exists(&digest).unwrap());
    assert_eq!(store.remove(&digest).unwrap(), 0);
}
