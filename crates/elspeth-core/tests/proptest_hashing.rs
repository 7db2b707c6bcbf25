// elspeth-core/tests/proptest_hashing.rs
// ============================================================================
// Module: Hashing Property-Based Tests
// Description: Property tests for canonical hash stability.
// Purpose: Detect ordering sensitivity across wide input ranges.
// ============================================================================

//! Property-based tests for canonical hashing invariants.

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
    reason = "Test-only assertions and helpers are permitted."
)]

use elspeth_core::MemoryPayloadStore;
use elspeth_core::PayloadStore;
use elspeth_core::hashing::hash_canonical_json;
use proptest::prelude::*;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

/// Strategy for scalar JSON leaves.
fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|v| Value::Number(v.into())),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Strategy for flat row objects with unique keys.
fn row_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,6}", leaf_strategy(), 0 .. 8)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    /// Canonical hashes are invariant under key insertion order.
    #[test]
    fn hash_is_invariant_under_key_reordering(entries in row_strategy(), seed in any::<u64>()) {
        let forward: Map<String, Value> = entries.iter().cloned().collect();

        let mut shuffled = entries.clone();
        let len = shuffled.len();
        if len > 1 {
            // Deterministic permutation derived from the seed.
            for index in 0 .. len {
                let seed_base = usize::try_from(seed % 1_000_003).unwrap_or(0);
                let swap_with = seed_base.wrapping_add(index * 7) % len;
                shuffled.swap(index, swap_with);
            }
        }
        let reordered: Map<String, Value> = shuffled.into_iter().collect();

        let hash_a = hash_canonical_json(&Value::Object(forward)).unwrap();
        let hash_b = hash_canonical_json(&Value::Object(reordered)).unwrap();
        prop_assert_eq!(hash_a, hash_b);
    }

    /// Payload store round-trips arbitrary bytes exactly.
    #[test]
    fn payload_store_roundtrips_bytes(bytes in prop::collection::vec(any::<u8>(), 0 .. 512)) {
        let store = MemoryPayloadStore::new();
        let digest = store.store(&bytes).unwrap();
        prop_assert!(store.exists(&digest).unwrap());
        prop_assert_eq!(store.retrieve(&digest).unwrap(), bytes);
    }

    /// Storing the same bytes twice is idempotent by hash.
    #[test]
    fn payload_store_is_idempotent(bytes in prop::collection::vec(any::<u8>(), 0 .. 128)) {
        let store = MemoryPayloadStore::new();
        let first = store.store(&bytes).unwrap();
        let second = store.store(&bytes).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(store.len().unwrap(), 1);
    }

    /// Row hashes equal the canonical hash of the row value.
    #[test]
    fn row_hash_matches_canonical_hash(entries in row_strategy()) {
        let row: Map<String, Value> = entries.into_iter().collect();
        let direct = hash_canonical_json(&Value::Object(row.clone())).unwrap();
        let via_json = hash_canonical_json(&json!(row)).unwrap();
        prop_assert_eq!(direct, via_json);
    }
}
