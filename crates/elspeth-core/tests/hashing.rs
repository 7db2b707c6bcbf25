// elspeth-core/tests/hashing.rs
// ============================================================================
// Module: Hashing Tests
// Description: Tests for canonical JSON hashing.
// ============================================================================
//! ## Overview
//! Validates deterministic hashing using RFC 8785 canonicalization.

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

use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::hash_bytes;
use elspeth_core::hashing::hash_canonical_json;
use serde_json::json;

// ============================================================================
// SECTION: Canonical Hashing
// ============================================================================

/// Tests canonical json hash is invariant under key insertion order.
#[test]
fn test_canonical_json_hash_is_key_order_invariant() {
    let value_a = json!({"b": 1, "a": 2, "nested": {"y": true, "x": false}});
    let value_b = json!({"nested": {"x": false, "y": true}, "a": 2, "b": 1});

    let hash_a = hash_canonical_json(&value_a).unwrap();
    let hash_b = hash_canonical_json(&value_b).unwrap();

    assert_eq!(hash_a, hash_b);
}

/// Tests distinct values produce distinct hashes.
#[test]
fn test_distinct_values_produce_distinct_hashes() {
    let hash_a = hash_canonical_json(&json!({"value": 1})).unwrap();
    let hash_b = hash_canonical_json(&json!({"value": 2})).unwrap();

    assert_ne!(hash_a, hash_b);
}

/// Tests byte hashing yields lowercase hex of the expected length.
#[test]
fn test_hash_bytes_is_lowercase_hex_sha256() {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, b"elspeth");

    assert_eq!(digest.value.len(), 64);
    assert!(digest.value.chars().all(|ch| ch.is_ascii_hexdigit()));
    assert_eq!(digest.value, digest.value.to_lowercase());
}

/// Tests byte hashing is stable across calls.
#[test]
fn test_hash_bytes_is_stable() {
    let first = hash_bytes(DEFAULT_HASH_ALGORITHM, b"same input");
    let second = hash_bytes(DEFAULT_HASH_ALGORITHM, b"same input");

    assert_eq!(first, second);
}
