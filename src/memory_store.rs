//! In-memory [`KeyMaterialStore`] for tests and embedding.
//!
//! Pairs are kept PEM-encoded, exactly as the file store writes them, so a
//! load exercises the same decoding path. The lock is process-local and never
//! waits.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CaError, Result};
use crate::key_material::{Certificate, KeyPair};
use crate::serial::SerialNumber;
use crate::storage::{decode_pair, ensure_pair_matches, KeyMaterialStore, Slot, StoreLock};

const MEMORY_STORE_LOCATION: &str = "<memory>";

#[derive(Default)]
struct MemoryState {
    pairs: HashMap<Slot, StoredPair>,
    serials: HashMap<Slot, BTreeSet<SerialNumber>>,
}

struct StoredPair {
    key_pem: Vec<u8>,
    cert_pem: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    locked: Arc<AtomicBool>,
}

struct FlagGuard(Arc<AtomicBool>);

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored key/certificate pairs.
    pub fn len(&self) -> Result<usize> {
        Ok(self.state()?.pairs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| CaError::Internal("memory store state poisoned".into()))
    }
}

impl KeyMaterialStore for MemoryStore {
    fn exists(&self, slot: &Slot) -> Result<bool> {
        Ok(self.state()?.pairs.contains_key(slot))
    }

    fn load(&self, slot: &Slot) -> Result<(KeyPair, Certificate)> {
        let state = self.state()?;
        let stored = state.pairs.get(slot).ok_or_else(|| CaError::NotFound {
            slot: slot.to_string(),
        })?;
        decode_pair(slot, &stored.key_pem, &stored.cert_pem)
    }

    fn save(&self, _lock: &StoreLock, slot: &Slot, key: &KeyPair, certificate: &Certificate) -> Result<()> {
        ensure_pair_matches(slot, key, certificate)?;
        let stored = StoredPair {
            key_pem: key.to_pem()?,
            cert_pem: certificate.to_pem()?,
        };
        self.state()?.pairs.insert(slot.clone(), stored);
        tracing::debug!(slot = %slot, "Stored key material in memory");
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CaError::StoreLocked {
                path: PathBuf::from(MEMORY_STORE_LOCATION),
            })?;
        Ok(StoreLock::new(FlagGuard(Arc::clone(&self.locked))))
    }

    fn issued_serials(&self, issuer: &Slot) -> Result<BTreeSet<SerialNumber>> {
        Ok(self
            .state()?
            .serials
            .get(issuer)
            .cloned()
            .unwrap_or_default())
    }

    fn record_serial(&self, _lock: &StoreLock, issuer: &Slot, serial: &SerialNumber) -> Result<()> {
        let mut state = self.state()?;
        if !state.serials.entry(issuer.clone()).or_default().insert(serial.clone()) {
            return Err(CaError::Internal(format!(
                "serial {} already recorded for {}",
                serial, issuer
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_fails_fast_and_releases_on_drop() {
        let store = MemoryStore::new();
        let lock = store.lock().unwrap();
        let err = store.lock().unwrap_err();
        assert!(matches!(err, CaError::StoreLocked { .. }));
        assert!(err.is_transient());

        drop(lock);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_missing_slot_is_not_found() {
        let store = MemoryStore::new();
        assert!(!store.exists(&Slot::Root).unwrap());
        assert!(matches!(store.load(&Slot::Root), Err(CaError::NotFound { .. })));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_duplicate_serial_is_rejected() {
        let store = MemoryStore::new();
        let lock = store.lock().unwrap();
        let serial = SerialNumber::from_hex("7F01").unwrap();
        store.record_serial(&lock, &Slot::Intermediate, &serial).unwrap();

        let err = store.record_serial(&lock, &Slot::Intermediate, &serial).unwrap_err();
        assert!(matches!(err, CaError::Internal(_)));
        assert_eq!(store.issued_serials(&Slot::Intermediate).unwrap().len(), 1);

        // Another issuer keeps its own ledger
        store.record_serial(&lock, &Slot::Root, &serial).unwrap();
    }
}
