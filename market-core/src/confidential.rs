//! Confidential payload capability
//!
//! The ledgers never interpret ciphertext. They hand each [`EncryptedInput`]
//! to a [`ConfidentialStore`], keep the returned handle on the record, and
//! grant disclosure to the principals the record's access rules allow.

use crate::{
    storage::{Storage, CF_SEALED},
    types::{Address, EncryptedInput, SealedHandle},
    Error, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Store, grant and disclose opaque encrypted payloads
pub trait ConfidentialStore: Send + Sync + std::fmt::Debug {
    /// Keep `input` and return its handle
    fn store(&self, input: &EncryptedInput) -> Result<SealedHandle>;

    /// Allow `principal` to disclose the payload behind `handle`
    fn grant(&self, handle: &SealedHandle, principal: &Address) -> Result<()>;

    /// Return the ciphertext for `principal`, if granted
    fn disclose(&self, handle: &SealedHandle, principal: &Address) -> Result<EncryptedInput>;
}

/// Derive the content handle of a payload
pub fn seal_handle(input: &EncryptedInput) -> SealedHandle {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(input.ciphertext.len() as u64).to_be_bytes());
    hasher.update(&input.ciphertext);
    hasher.update(&input.proof);
    SealedHandle::from_bytes(*hasher.finalize().as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    payload: EncryptedInput,
    grants: BTreeSet<Address>,
}

/// [`ConfidentialStore`] persisted in the `sealed` column family
///
/// Handles are content addressed, so storing the same payload twice is a
/// no-op and grants accumulate.
#[derive(Debug)]
pub struct SealedVault {
    storage: Arc<Storage>,
    // Serializes read-modify-write of grant sets across ledgers
    lock: Mutex<()>,
}

impl SealedVault {
    /// Create vault on shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    fn load(&self, handle: &SealedHandle) -> Result<Option<SealedEntry>> {
        self.storage.get(CF_SEALED, handle.as_bytes())
    }
}

impl ConfidentialStore for SealedVault {
    fn store(&self, input: &EncryptedInput) -> Result<SealedHandle> {
        input.ensure_present("sealed payload")?;
        let handle = seal_handle(input);

        let _guard = self.lock.lock();
        if self.load(&handle)?.is_none() {
            let entry = SealedEntry {
                payload: input.clone(),
                grants: BTreeSet::new(),
            };
            self.storage.put_direct(CF_SEALED, handle.as_bytes(), &entry)?;
            tracing::debug!(handle = %handle, bytes = input.ciphertext.len(), "Payload sealed");
        }

        Ok(handle)
    }

    fn grant(&self, handle: &SealedHandle, principal: &Address) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entry = self
            .load(handle)?
            .ok_or_else(|| Error::Storage(format!("Sealed payload {} missing", handle)))?;

        if entry.grants.insert(*principal) {
            self.storage.put_direct(CF_SEALED, handle.as_bytes(), &entry)?;
            tracing::debug!(handle = %handle, principal = %principal, "Disclosure granted");
        }
        Ok(())
    }

    fn disclose(&self, handle: &SealedHandle, principal: &Address) -> Result<EncryptedInput> {
        let entry = self
            .load(handle)?
            .ok_or_else(|| Error::Storage(format!("Sealed payload {} missing", handle)))?;

        if !entry.grants.contains(principal) {
            return Err(Error::Unauthorized {
                caller: *principal,
                role: crate::access::Role::Grantee,
            });
        }
        Ok(entry.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn vault() -> (SealedVault, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        let storage = Arc::new(Storage::open(&config).unwrap());
        (SealedVault::new(storage), temp_dir)
    }

    #[test]
    fn test_store_grant_disclose() {
        let (vault, _temp) = vault();
        let owner = Address::from_bytes([1u8; 20]);
        let stranger = Address::from_bytes([2u8; 20]);
        let input = EncryptedInput::new(b"ct".to_vec(), b"proof".to_vec());

        let handle = vault.store(&input).unwrap();
        assert!(vault.disclose(&handle, &owner).is_err());

        vault.grant(&handle, &owner).unwrap();
        assert_eq!(vault.disclose(&handle, &owner).unwrap(), input);
        assert!(matches!(
            vault.disclose(&handle, &stranger),
            Err(Error::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_store_is_idempotent_and_keeps_grants() {
        let (vault, _temp) = vault();
        let owner = Address::from_bytes([1u8; 20]);
        let input = EncryptedInput::new(b"ct".to_vec(), b"proof".to_vec());

        let handle = vault.store(&input).unwrap();
        vault.grant(&handle, &owner).unwrap();
        assert_eq!(vault.store(&input).unwrap(), handle);
        assert!(vault.disclose(&handle, &owner).is_ok());
    }

    #[test]
    fn test_handle_separates_ciphertext_from_proof() {
        let a = EncryptedInput::new(b"ab".to_vec(), b"c".to_vec());
        let b = EncryptedInput::new(b"a".to_vec(), b"bc".to_vec());
        assert_ne!(seal_handle(&a), seal_handle(&b));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let (vault, _temp) = vault();
        let err = vault.store(&EncryptedInput::new(vec![], vec![1])).unwrap_err();
        assert!(matches!(err, Error::InvalidEncryptedPayload(_)));
    }
}
