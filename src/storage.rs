//! Persistence contract for CA key material.
//!
//! A store holds one key/certificate pair per [`Slot`] and a ledger of serial
//! numbers per issuer. A key and its certificate are saved as a unit: a reader
//! sees either both or neither, never one without the other.
//!
//! Mutating calls take a [`StoreLock`] obtained from the same store. The lock
//! is store-wide and, for file-backed stores, held across processes.

use std::collections::BTreeSet;
use std::fmt;

use crate::cert_template::Role;
use crate::error::{CaError, Result};
use crate::key_material::{Certificate, KeyPair};
use crate::serial::SerialNumber;

/// Stands in for `*` in leaf ids. DNS names never contain it, so distinct
/// subjects cannot share a slot.
const WILDCARD_MARKER: char = '~';

/// Named location of a key/certificate pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Root,
    Intermediate,
    Leaf(String),
}

impl Slot {
    /// Slot for a server certificate, derived from its subject.
    ///
    /// Labels are reversed so related names sort together
    /// (`api.example.com` becomes `com.example.api`) and `*` is stored as
    /// `~`, so `*.example.com` becomes `com.example.~`.
    pub fn leaf_for_subject(subject: &str) -> Result<Self> {
        if subject.is_empty() {
            return Err(CaError::invalid_subject(subject, "name is empty"));
        }
        let id = subject
            .split('.')
            .rev()
            .map(|label| label.replace('*', &WILDCARD_MARKER.to_string()))
            .collect::<Vec<_>>()
            .join(".");
        Self::leaf(id)
    }

    /// Slot for a leaf identifier, which must be safe as a single path
    /// component.
    pub fn leaf(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | WILDCARD_MARKER));
        if !valid {
            return Err(CaError::invalid_subject(&id, "not a valid leaf identifier"));
        }
        Ok(Slot::Leaf(id))
    }

    pub fn role(&self) -> Role {
        match self {
            Slot::Root => Role::Root,
            Slot::Intermediate => Role::Intermediate,
            Slot::Leaf(_) => Role::Leaf,
        }
    }

    /// File-system friendly name: `root`, `intermediate` or `leaf-<id>`.
    pub fn file_stem(&self) -> String {
        match self {
            Slot::Root => "root".to_string(),
            Slot::Intermediate => "intermediate".to_string(),
            Slot::Leaf(id) => format!("leaf-{}", id),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Root => f.write_str("root"),
            Slot::Intermediate => f.write_str("intermediate"),
            Slot::Leaf(id) => write!(f, "leaf:{}", id),
        }
    }
}

/// Proof that the holder owns the store-wide lock. Released on drop.
pub struct StoreLock {
    _guard: Box<dyn Send>,
}

impl StoreLock {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreLock")
    }
}

pub trait KeyMaterialStore {
    /// Whether both the key and the certificate are present for `slot`.
    fn exists(&self, slot: &Slot) -> Result<bool>;

    /// Load the pair stored under `slot`.
    ///
    /// Fails with `NotFound` if nothing is stored and with `Corrupt` if the
    /// stored material cannot be decoded or the key does not belong to the
    /// certificate.
    fn load(&self, slot: &Slot) -> Result<(KeyPair, Certificate)>;

    /// Persist `key` and `certificate` together, replacing any previous pair.
    fn save(&self, lock: &StoreLock, slot: &Slot, key: &KeyPair, certificate: &Certificate) -> Result<()>;

    /// Acquire the store-wide lock, failing with `StoreLocked` if it cannot
    /// be obtained in time.
    fn lock(&self) -> Result<StoreLock>;

    /// Serial numbers already used by `issuer`.
    fn issued_serials(&self, issuer: &Slot) -> Result<BTreeSet<SerialNumber>>;

    /// Add `serial` to `issuer`'s ledger.
    fn record_serial(&self, lock: &StoreLock, issuer: &Slot, serial: &SerialNumber) -> Result<()>;
}

/// Reject a pair whose key does not belong to its certificate before it is
/// written.
pub(crate) fn ensure_pair_matches(slot: &Slot, key: &KeyPair, certificate: &Certificate) -> Result<()> {
    if !certificate.matches_key(key)? {
        return Err(CaError::Internal(format!(
            "refusing to store mismatched key and certificate for {}",
            slot
        )));
    }
    Ok(())
}

/// Decode a stored pair, mapping every failure to `Corrupt`.
pub(crate) fn decode_pair(slot: &Slot, key_pem: &[u8], cert_pem: &[u8]) -> Result<(KeyPair, Certificate)> {
    let key = KeyPair::from_pem(key_pem).map_err(|e| CaError::corrupt(slot, e))?;
    let certificate = Certificate::from_pem(cert_pem).map_err(|e| CaError::corrupt(slot, e))?;
    let matches = certificate
        .matches_key(&key)
        .map_err(|e| CaError::corrupt(slot, e))?;
    if !matches {
        return Err(CaError::corrupt(slot, "private key does not belong to the certificate"));
    }
    Ok((key, certificate))
}
