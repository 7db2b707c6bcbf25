// elspeth-core/src/runtime/payload.rs
// ============================================================================
// Module: Elspeth In-Memory Payload Store
// Description: Content-addressed blob store backed by a map.
// Purpose: Provide a deterministic payload store for tests and local demos.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! This module provides a simple in-memory implementation of
//! [`PayloadStore`] keyed by SHA-256 content hash. `store` is idempotent by
//! hash and `retrieve` verifies the stored bytes still match their key
//! before returning them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::hash_bytes;
use crate::interfaces::recorder::PayloadStore;
use crate::interfaces::recorder::PayloadStoreError;

// ============================================================================
// SECTION: In-Memory Payload Store
// ============================================================================

/// In-memory content-addressed payload store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct MemoryPayloadStore {
    /// Blob map keyed by lowercase hex digest, protected by a mutex.
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryPayloadStore {
    /// Creates a new empty payload store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Returns the number of stored payloads.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when the store mutex is poisoned.
    pub fn len(&self) -> Result<usize, PayloadStoreError> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| PayloadStoreError::Io("payload store mutex poisoned".to_string()))?;
        Ok(guard.len())
    }

    /// Returns true when the store holds no payloads.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when the store mutex is poisoned.
    pub fn is_empty(&self) -> Result<bool, PayloadStoreError> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| PayloadStoreError::Io("payload store mutex poisoned".to_string()))?;
        Ok(guard.is_empty())
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError> {
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        let mut guard = self
            .blobs
            .lock()
            .map_err(|_| PayloadStoreError::Io("payload store mutex poisoned".to_string()))?;
        guard.entry(digest.value.clone()).or_insert_with(|| bytes.to_vec());
        Ok(digest)
    }

    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| PayloadStoreError::Io("payload store mutex poisoned".to_string()))?;
        let bytes = guard
            .get(hash.as_str())
            .ok_or_else(|| PayloadStoreError::NotFound(hash.as_str().to_string()))?;
        let check = hash_bytes(hash.algorithm, bytes);
        if check.value != hash.value {
            return Err(PayloadStoreError::Corrupt(format!(
                "stored bytes for {} hash to {}",
                hash.value, check.value
            )));
        }
        Ok(bytes.clone())
    }

    fn exists(&self, hash: &HashDigest) -> Result<bool, PayloadStoreError> {
        let guard = self
            .blobs
            .lock()
            .map_err(|_| PayloadStoreError::Io("payload store mutex poisoned".to_string()))?;
        Ok(guard.contains_key(hash.as_str()))
    }
}
