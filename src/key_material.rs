//! Key pairs and certificates handled by the CA.
//!
//! Thin owned wrappers over OpenSSL types. [`KeyPair`] never prints key
//! material through `Debug`. [`Certificate`] adds the accessors the chain
//! checks need: issuer/subject comparison, signature verification, and an
//! [`ExtensionProfile`] decoded with `x509-parser`.

use std::fmt;

use openssl::pkey::{PKey, Private, Public};
use openssl::x509::{X509Ref, X509};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::cert_template::{ExtendedKeyUsageFlag, KeyUsageFlag};
use crate::distinguished_name::DistinguishedName;
use crate::error::{CaError, Result};
use crate::serial::SerialNumber;

// ================= Key Pair =================

/// An RSA private key together with its public half.
#[derive(Clone)]
pub struct KeyPair {
    private_key: PKey<Private>,
}

impl KeyPair {
    /// Generate a fresh RSA key pair with the given modulus size.
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        let rsa = openssl::rsa::Rsa::generate(bits)
            .map_err(|e| CaError::crypto("Failed to generate RSA keypair", e))?;
        let private_key =
            PKey::from_rsa(rsa).map_err(|e| CaError::crypto("Failed to create private key", e))?;
        Ok(Self { private_key })
    }

    /// Parse a PEM private key (PKCS#8 or traditional RSA).
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let private_key = PKey::private_key_from_pem(pem)
            .map_err(|e| CaError::crypto("Failed to parse private key PEM", e))?;
        Ok(Self { private_key })
    }

    /// Serialize as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        self.private_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| CaError::crypto("Failed to serialize private key", e))
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let der = self
            .private_key
            .public_key_to_der()
            .map_err(|e| CaError::crypto("Failed to export public key", e))?;
        PublicKey::from_der(&der)
    }

    pub fn bits(&self) -> u32 {
        self.private_key.bits()
    }

    pub(crate) fn as_pkey(&self) -> &PKey<Private> {
        &self.private_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// The public half of a [`KeyPair`], as placed into a certificate.
#[derive(Clone)]
pub struct PublicKey {
    key: PKey<Public>,
}

impl PublicKey {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let key = PKey::public_key_from_der(der)
            .map_err(|e| CaError::crypto("Failed to parse public key", e))?;
        Ok(Self { key })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.key
            .public_key_to_der()
            .map_err(|e| CaError::crypto("Failed to serialize public key", e))
    }

    pub(crate) fn as_pkey(&self) -> &PKey<Public> {
        &self.key
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.public_eq(&other.key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.key.bits())
            .finish()
    }
}

// ================= Certificate =================

/// A signed X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
}

impl Certificate {
    pub(crate) fn from_x509(x509: X509) -> Self {
        Self { x509 }
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let x509 = X509::from_pem(pem)
            .map_err(|e| CaError::crypto("Failed to parse certificate PEM", e))?;
        Ok(Self { x509 })
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        self.x509
            .to_pem()
            .map_err(|e| CaError::crypto("Failed to serialize certificate", e))
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.x509
            .to_der()
            .map_err(|e| CaError::crypto("Failed to serialize certificate", e))
    }

    pub(crate) fn as_x509(&self) -> &X509Ref {
        &self.x509
    }

    pub fn serial(&self) -> Result<SerialNumber> {
        let bn = self
            .x509
            .serial_number()
            .to_bn()
            .map_err(|e| CaError::crypto("Failed to read serial number", e))?;
        SerialNumber::from_bignum(&bn)
    }

    pub fn subject(&self) -> Result<DistinguishedName> {
        DistinguishedName::from_x509_name(self.x509.subject_name())
    }

    pub fn issuer(&self) -> Result<DistinguishedName> {
        DistinguishedName::from_x509_name(self.x509.issuer_name())
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        let key = self
            .x509
            .public_key()
            .map_err(|e| CaError::crypto("Failed to read certificate public key", e))?;
        Ok(PublicKey { key })
    }

    /// Whether `key` is the private half of this certificate's public key.
    pub fn matches_key(&self, key: &KeyPair) -> Result<bool> {
        let cert_key = self
            .x509
            .public_key()
            .map_err(|e| CaError::crypto("Failed to read certificate public key", e))?;
        Ok(cert_key.public_eq(key.as_pkey()))
    }

    /// Verify this certificate's signature against `issuer_key`.
    pub fn is_signed_by(&self, issuer_key: &PublicKey) -> Result<bool> {
        self.x509
            .verify(issuer_key.as_pkey())
            .map_err(|e| CaError::crypto("Failed to verify certificate signature", e))
    }

    /// Whether this certificate's encoded issuer name is byte-identical to
    /// `parent`'s encoded subject name.
    pub fn issuer_is_subject_of(&self, parent: &Certificate) -> Result<bool> {
        let own_der = self.to_der()?;
        let parent_der = parent.to_der()?;
        let own = parse_der(&own_der)?;
        let parent = parse_der(&parent_der)?;
        Ok(own.issuer().as_raw() == parent.subject().as_raw())
    }

    /// A parent→child trust edge: names chain and the signature verifies.
    pub fn is_issued_by(&self, parent: &Certificate) -> Result<bool> {
        Ok(self.issuer_is_subject_of(parent)? && self.is_signed_by(&parent.public_key()?)?)
    }

    pub fn is_self_signed(&self) -> Result<bool> {
        self.is_issued_by(self)
    }

    pub fn not_before(&self) -> String {
        self.x509.not_before().to_string()
    }

    pub fn not_after(&self) -> String {
        self.x509.not_after().to_string()
    }

    /// Decode the extensions that carry the role policy.
    pub fn profile(&self) -> Result<ExtensionProfile> {
        let der = self.to_der()?;
        let parsed = parse_der(&der)?;
        let ext_err = |e: x509_parser::error::X509Error| {
            CaError::Internal(format!("malformed certificate extension: {}", e))
        };

        let (is_ca, path_len) = match parsed.basic_constraints().map_err(ext_err)? {
            Some(bc) => (bc.value.ca, bc.value.path_len_constraint),
            None => (false, None),
        };

        let mut key_usage = Vec::new();
        if let Some(ku) = parsed.key_usage().map_err(ext_err)? {
            let ku = ku.value;
            let flags = [
                (ku.digital_signature(), KeyUsageFlag::DigitalSignature),
                (ku.key_encipherment(), KeyUsageFlag::KeyEncipherment),
                (ku.key_cert_sign(), KeyUsageFlag::KeyCertSign),
                (ku.crl_sign(), KeyUsageFlag::CrlSign),
            ];
            key_usage.extend(flags.into_iter().filter(|(set, _)| *set).map(|(_, f)| f));
        }

        let mut extended_key_usage = Vec::new();
        if let Some(eku) = parsed.extended_key_usage().map_err(ext_err)? {
            if eku.value.server_auth {
                extended_key_usage.push(ExtendedKeyUsageFlag::ServerAuth);
            }
            if eku.value.client_auth {
                extended_key_usage.push(ExtendedKeyUsageFlag::ClientAuth);
            }
        }

        let mut dns_names = Vec::new();
        if let Some(san) = parsed.subject_alternative_name().map_err(ext_err)? {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }

        Ok(ExtensionProfile {
            is_ca,
            path_len,
            key_usage,
            extended_key_usage,
            dns_names,
        })
    }
}

fn parse_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, parsed) = X509Certificate::from_der(der)
        .map_err(|e| CaError::Internal(format!("failed to decode certificate DER: {}", e)))?;
    Ok(parsed)
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = self.subject().map(|dn| dn.to_string()).unwrap_or_default();
        let serial = self.serial().map(|s| s.to_string()).unwrap_or_default();
        f.debug_struct("Certificate")
            .field("subject", &subject)
            .field("serial", &serial)
            .field("not_after", &self.not_after())
            .finish()
    }
}

/// Role-relevant extensions of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionProfile {
    pub is_ca: bool,
    pub path_len: Option<u32>,
    pub key_usage: Vec<KeyUsageFlag>,
    pub extended_key_usage: Vec<ExtendedKeyUsageFlag>,
    pub dns_names: Vec<String>,
}
