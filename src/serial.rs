//! Serial number allocation.
//!
//! Serials are random positive integers with the top bit forced on, so every
//! value has exactly the configured width (128 bits by default). Uniqueness
//! per issuer is guaranteed rather than merely probable: each issuer has a
//! ledger of serials it has handed out, kept by the [`KeyMaterialStore`], and
//! a candidate found in the ledger is discarded and redrawn.

use std::fmt;

use openssl::asn1::Asn1Integer;
use openssl::bn::{BigNum, BigNumRef, MsbOption};
use serde::{Deserialize, Serialize};

use crate::error::{CaError, Result};
use crate::storage::{KeyMaterialStore, Slot};

pub const DEFAULT_SERIAL_BITS: i32 = 128;

const MAX_ALLOCATION_ATTEMPTS: usize = 32;

/// Certificate serial number in upper-case hexadecimal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerialNumber(String);

impl SerialNumber {
    pub fn from_bignum(bn: &BigNumRef) -> Result<Self> {
        let hex = bn
            .to_hex_str()
            .map_err(|e| CaError::crypto("Failed to encode serial number", e))?;
        Ok(Self(hex.to_uppercase()))
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bn = BigNum::from_hex_str(hex)
            .map_err(|e| CaError::crypto("Failed to decode serial number", e))?;
        Self::from_bignum(&bn)
    }

    /// A random serial of exactly `bits` bits.
    fn random(bits: i32) -> Result<Self> {
        let mut serial = BigNum::new().map_err(|e| CaError::crypto("Failed to allocate serial", e))?;
        serial
            .rand(bits, MsbOption::ONE, false)
            .map_err(|e| CaError::crypto("Failed to generate serial number", e))?;
        Self::from_bignum(&serial)
    }

    pub fn to_asn1_integer(&self) -> Result<Asn1Integer> {
        let bn = BigNum::from_hex_str(&self.0)
            .map_err(|e| CaError::crypto("Failed to decode serial number", e))?;
        bn.to_asn1_integer()
            .map_err(|e| CaError::crypto("Failed to encode serial number", e))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SerialNumber {
    type Error = CaError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<SerialNumber> for String {
    fn from(value: SerialNumber) -> Self {
        value.0
    }
}

/// Hands out serial numbers that no issuer has used before.
#[derive(Debug, Clone, Copy)]
pub struct SerialNumberAllocator {
    bits: i32,
}

impl Default for SerialNumberAllocator {
    fn default() -> Self {
        Self {
            bits: DEFAULT_SERIAL_BITS,
        }
    }
}

impl SerialNumberAllocator {
    /// Allocator with a non-default width. Narrow widths make collisions
    /// reachable in tests.
    #[cfg(test)]
    pub(crate) fn with_bits(bits: i32) -> Result<Self> {
        // RFC 5280 caps serials at 20 octets; keep one octet for the sign padding.
        const MAX_SERIAL_BITS: i32 = 152;
        const MIN_SERIAL_BITS: i32 = 64;
        if !(MIN_SERIAL_BITS..=MAX_SERIAL_BITS).contains(&bits) {
            return Err(CaError::Config(format!(
                "serial width must be between {} and {} bits",
                MIN_SERIAL_BITS, MAX_SERIAL_BITS
            )));
        }
        Ok(Self { bits })
    }

    /// Draw a serial not yet present in `issuer`'s ledger.
    ///
    /// The caller must record the serial with
    /// [`KeyMaterialStore::record_serial`] under the same store lock before the
    /// certificate carrying it is persisted.
    pub fn next<S: KeyMaterialStore + ?Sized>(&self, store: &S, issuer: &Slot) -> Result<SerialNumber> {
        let issued = store.issued_serials(issuer)?;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = SerialNumber::random(self.bits)?;
            if !issued.contains(&candidate) {
                tracing::debug!(issuer = %issuer, serial = %candidate, "Allocated serial number");
                return Ok(candidate);
            }
            tracing::warn!(issuer = %issuer, serial = %candidate, "Serial number collision, redrawing");
        }
        Err(CaError::Internal(format!(
            "could not allocate an unused serial number for {} after {} attempts",
            issuer, MAX_ALLOCATION_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::collections::HashSet;

    #[test]
    fn test_random_serial_has_full_width() {
        let serial = SerialNumber::random(128).unwrap();
        // 128 bits with the top bit set is 32 hex digits starting at 8..F
        assert_eq!(serial.as_hex().len(), 32);
        assert!(matches!(serial.as_hex().as_bytes()[0], b'8'..=b'9' | b'A'..=b'F'));
    }

    #[test]
    fn test_hex_round_trip() {
        let serial = SerialNumber::from_hex("00ff10").unwrap();
        assert_eq!(serial.as_hex(), "FF10");
        let asn1 = serial.to_asn1_integer().unwrap();
        let back = SerialNumber::from_bignum(&asn1.to_bn().unwrap()).unwrap();
        assert_eq!(back, serial);
    }

    #[test]
    fn test_serde_rejects_non_hex() {
        let ok: SerialNumber = serde_json::from_str("\"000A1B\"").unwrap();
        // Canonical form is whole bytes without leading zero bytes
        assert_eq!(ok.as_hex(), "0A1B");
        assert!(serde_json::from_str::<SerialNumber>("\"not-hex\"").is_err());
    }

    #[test]
    fn test_width_bounds() {
        assert!(SerialNumberAllocator::with_bits(32).is_err());
        assert!(SerialNumberAllocator::with_bits(64).is_ok());
        assert!(SerialNumberAllocator::with_bits(160).is_err());
    }

    #[test]
    fn test_allocations_are_distinct_once_recorded() {
        let store = MemoryStore::new();
        let lock = store.lock().unwrap();
        let allocator = SerialNumberAllocator::with_bits(64).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let serial = allocator.next(&store, &Slot::Intermediate).unwrap();
            store.record_serial(&lock, &Slot::Intermediate, &serial).unwrap();
            assert!(seen.insert(serial));
        }
        assert_eq!(store.issued_serials(&Slot::Intermediate).unwrap().len(), 500);
    }

    #[test]
    fn test_skips_serials_in_ledger() {
        let store = MemoryStore::new();
        let lock = store.lock().unwrap();
        // Two-bit serials with the top bit set can only be 2 or 3
        let allocator = SerialNumberAllocator { bits: 2 };
        store
            .record_serial(&lock, &Slot::Root, &SerialNumber::from_hex("2").unwrap())
            .unwrap();

        let serial = allocator.next(&store, &Slot::Root).unwrap();
        assert_eq!(serial, SerialNumber::from_hex("3").unwrap());

        store.record_serial(&lock, &Slot::Root, &serial).unwrap();
        let err = allocator.next(&store, &Slot::Root).unwrap_err();
        assert!(matches!(err, CaError::Internal(_)));
    }

    #[test]
    fn test_ledgers_are_per_issuer() {
        let store = MemoryStore::new();
        let lock = store.lock().unwrap();
        let serial = SerialNumber::from_hex("ABCDEF").unwrap();
        store.record_serial(&lock, &Slot::Root, &serial).unwrap();
        assert!(store.issued_serials(&Slot::Intermediate).unwrap().is_empty());
    }
}
