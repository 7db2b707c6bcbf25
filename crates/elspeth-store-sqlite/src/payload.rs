// elspeth-store-sqlite/src/payload.rs
// ============================================================================
// Module: Elspeth Filesystem Payload Store
// Description: Content-addressed blob store with hash-path layout.
// Purpose: Persist raw row bytes under their SHA-256 digest.
// Dependencies: elspeth-core, std::fs
// ============================================================================

//! ## Overview
//! Payloads live at `base_path/<first-two-hex>/<remaining-hex>`. `store` is
//! idempotent by hash: writing the same bytes twice touches nothing.
//! `retrieve` reads exactly and re-verifies the digest so silent corruption
//! fails closed instead of feeding bad bytes into replay.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use elspeth_core::PayloadStore;
use elspeth_core::PayloadStoreError;
use elspeth_core::hashing::DEFAULT_HASH_ALGORITHM;
use elspeth_core::hashing::HashDigest;
use elspeth_core::hashing::hash_bytes;

// ============================================================================
// SECTION: Filesystem Payload Store
// ============================================================================

/// Filesystem payload store with the hash-path layout.
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    /// Root directory for all payloads.
    base_path: PathBuf,
}

impl FsPayloadStore {
    /// Opens (creating if needed) a payload store rooted at `base_path`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when the root cannot be created.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, PayloadStoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)
            .map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        Ok(Self {
            base_path,
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the on-disk path for a digest.
    fn path_for(&self, hash: &HashDigest) -> PathBuf {
        let value = hash.as_str();
        let (prefix, rest) = value.split_at(2.min(value.len()));
        self.base_path.join(prefix).join(rest)
    }

    /// Removes a payload by digest, returning the freed bytes.
    ///
    /// Used by the retention purge; absent payloads free zero bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when deletion fails.
    pub fn remove(&self, hash: &HashDigest) -> Result<u64, PayloadStoreError> {
        let path = self.path_for(hash);
        match fs::metadata(&path) {
            Err(_) => Ok(0),
            Ok(metadata) => {
                let size = metadata.len();
                fs::remove_file(&path).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
                Ok(size)
            }
        }
    }

    /// Returns the stored size of a payload, if present.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadStoreError::Io`] when metadata cannot be read for an
    /// existing file.
    pub fn size_of(&self, hash: &HashDigest) -> Result<Option<u64>, PayloadStoreError> {
        let path = self.path_for(hash);
        if !path.exists() {
            return Ok(None);
        }
        fs::metadata(&path)
            .map(|metadata| Some(metadata.len()))
            .map_err(|err| PayloadStoreError::Io(err.to_string()))
    }
}

impl PayloadStore for FsPayloadStore {
    fn store(&self, bytes: &[u8]) -> Result<HashDigest, PayloadStoreError> {
        let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, bytes);
        let path = self.path_for(&digest);
        if path.exists() {
            return Ok(digest);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        }
        // Write-then-rename keeps partially written blobs out of the store.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        fs::rename(&tmp, &path).map_err(|err| PayloadStoreError::Io(err.to_string()))?;
        Ok(digest)
    }

    fn retrieve(&self, hash: &HashDigest) -> Result<Vec<u8>, PayloadStoreError> {
        let path = self.path_for(hash);
        let bytes = fs::read(&path)
            .map_err(|_| PayloadStoreError::NotFound(hash.as_str().to_string()))?;
        let check = hash_bytes(hash.algorithm, &bytes);
        if check.value != hash.value {
            return Err(PayloadStoreError::Corrupt(format!(
                "stored bytes for {} hash to {}",
                hash.value, check.value
            )));
        }
        Ok(bytes)
    }

    fn exists(&self, hash: &HashDigest) -> Result<bool, PayloadStoreError> {
        Ok(self.path_for(hash).exists())
    }
}
