//! Key-value storage collaborator.
//!
//! The client persists group records and account secrets through the
//! [`Storage`] trait. Hosts plug in their own durable backend; the crate ships
//! [`MemoryStorage`], a `HashMap` that zeroizes its values on drop.
//!
//! Key format: `[LABEL || key_bytes]`. Values are `serde_json` documents.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroize;

// ═══════════════════════════════════════════════════════════════
// ERROR TYPE
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

// ═══════════════════════════════════════════════════════════════
// LABELS
// ═══════════════════════════════════════════════════════════════

pub(crate) const GROUP_LABEL: &[u8] = b"Group";
pub(crate) const IDENTITY_KEY_LABEL: &[u8] = b"IdentityKey";
pub(crate) const SIGNALING_KEY_LABEL: &[u8] = b"SignalingKey";
pub(crate) const PASSWORD_LABEL: &[u8] = b"Password";
pub(crate) const REGISTRATION_ID_LABEL: &[u8] = b"RegistrationId";
pub(crate) const NUMBER_ID_LABEL: &[u8] = b"NumberId";
pub(crate) const REGISTRATION_DONE_LABEL: &[u8] = b"RegistrationDone";

// ═══════════════════════════════════════════════════════════════
// STORAGE TRAIT
// ═══════════════════════════════════════════════════════════════

/// Byte-oriented key-value store.
///
/// Implementations must make each single call atomic. Callers that need a
/// read-modify-write sequence serialize it themselves.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError>;
    fn remove(&self, key: &[u8]) -> Result<(), StorageError>;
}

/// Build composite key: `[label || key_bytes]`
pub(crate) fn build_key(label: &[u8], key_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len() + key_bytes.len());
    out.extend_from_slice(label);
    out.extend_from_slice(key_bytes);
    out
}

/// Serialize `value` and write it under `label || key`.
pub(crate) fn write_val(
    storage: &dyn Storage,
    label: &[u8],
    key: &[u8],
    value: &impl serde::Serialize,
) -> Result<(), StorageError> {
    let val_bytes =
        serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    storage.put(build_key(label, key), val_bytes)
}

/// Read and deserialize the value under `label || key`.
pub(crate) fn read_val<Val: serde::de::DeserializeOwned>(
    storage: &dyn Storage,
    label: &[u8],
    key: &[u8],
) -> Result<Option<Val>, StorageError> {
    match storage.get(&build_key(label, key))? {
        Some(mut bytes) => {
            let val = serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()));
            bytes.zeroize();
            val.map(Some)
        }
        None => Ok(None),
    }
}

// ═══════════════════════════════════════════════════════════════
// MEMORY STORAGE
// ═══════════════════════════════════════════════════════════════

/// In-memory [`Storage`] backend.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        for (_k, mut v) in self.entries.get_mut().drain() {
            v.zeroize();
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        if let Some(mut old) = self.entries.write().insert(key, value) {
            old.zeroize();
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), StorageError> {
        if let Some(mut old) = self.entries.write().remove(key) {
            old.zeroize();
        }
        Ok(())
    }
}
