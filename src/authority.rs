//! The certificate authority engine.
//!
//! [`CertificateAuthority`] drives the chain lifecycle on top of any
//! [`KeyMaterialStore`]. Every mutating operation takes the store lock first
//! and re-reads the chain status under it, so two invocations racing on the
//! same store cannot both bootstrap or issue against a half-built chain.

use crate::cert_template::{CertificateTemplateBuilder, Role};
use crate::chain_state::ChainStatus;
use crate::configs::AppConfig;
use crate::distinguished_name::DistinguishedName;
use crate::error::{CaError, Result};
use crate::key_material::{Certificate, KeyPair};
use crate::serial::SerialNumberAllocator;
use crate::signer::{self, SigningIdentity};
use crate::storage::{KeyMaterialStore, Slot, StoreLock};

/// A freshly issued server certificate with everything needed to deploy it.
#[derive(Debug, Clone)]
pub struct IssuedLeaf {
    pub slot: Slot,
    pub certificate: Certificate,
    pub key: KeyPair,
    pub intermediate: Certificate,
}

impl IssuedLeaf {
    /// Leaf certificate followed by the intermediate, as TLS servers send it.
    pub fn fullchain_pem(&self) -> Result<Vec<u8>> {
        let mut pem = self.certificate.to_pem()?;
        pem.extend_from_slice(&self.intermediate.to_pem()?);
        Ok(pem)
    }

    pub fn into_parts(self) -> (Certificate, KeyPair) {
        (self.certificate, self.key)
    }
}

pub struct CertificateAuthority<S: KeyMaterialStore> {
    store: S,
    config: AppConfig,
    serials: SerialNumberAllocator,
}

impl<S: KeyMaterialStore> CertificateAuthority<S> {
    pub fn new(store: S, config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            serials: SerialNumberAllocator::default(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current lifecycle state, read without taking the store lock.
    pub fn chain_status(&self) -> Result<ChainStatus> {
        let root = self.store.exists(&Slot::Root)?;
        let intermediate = self.store.exists(&Slot::Intermediate)?;
        ChainStatus::from_presence(root, intermediate)
            .ok_or_else(|| CaError::corrupt(Slot::Intermediate, "intermediate CA present without a root CA"))
    }

    /// Create the root and the intermediate CA on an empty store.
    pub fn bootstrap(&self) -> Result<(Certificate, Certificate)> {
        let lock = self.store.lock()?;
        let status = self.chain_status()?;
        if status != ChainStatus::Empty {
            return Err(CaError::AlreadyBootstrapped { status });
        }

        let (root_key, root) = self.create_root(&lock)?;
        let intermediate = self.create_intermediate(&lock, &root_key, &root)?;
        Ok((root, intermediate))
    }

    /// Finish a bootstrap that stopped after the root was persisted.
    ///
    /// Valid only from `RootOnly`. The existing root is kept so certificates
    /// already trusting it stay valid.
    pub fn complete_bootstrap(&self) -> Result<Certificate> {
        let lock = self.store.lock()?;
        match self.chain_status()? {
            ChainStatus::RootOnly => {
                let (root_key, root) = self.signing_identity(&Slot::Root)?;
                tracing::warn!("Resuming interrupted bootstrap with the existing root CA");
                self.create_intermediate(&lock, &root_key, &root)
            }
            ChainStatus::Empty => Err(CaError::NotFound {
                slot: Slot::Root.to_string(),
            }),
            status @ ChainStatus::ChainReady => Err(CaError::AlreadyBootstrapped { status }),
        }
    }

    /// Issue a server certificate whose subject carries only `subject` as its
    /// common name. `sans` are used verbatim.
    pub fn issue_leaf<N: AsRef<str>>(&self, subject: &str, sans: &[N]) -> Result<IssuedLeaf> {
        self.issue_leaf_named(DistinguishedName::common_name(subject), sans)
    }

    /// Issue a server certificate with a full subject name.
    ///
    /// Re-issuing for a subject replaces the stored pair with a new key and a
    /// new serial.
    pub fn issue_leaf_named<N: AsRef<str>>(&self, subject: DistinguishedName, sans: &[N]) -> Result<IssuedLeaf> {
        let lock = self.store.lock()?;
        let status = self.chain_status()?;
        if !status.is_ready() {
            return Err(CaError::ChainNotReady { status });
        }

        let (intermediate_key, intermediate) = self.signing_identity(&Slot::Intermediate)?;
        let serial = self.serials.next(&self.store, &Slot::Intermediate)?;
        let template = CertificateTemplateBuilder::new(Role::Leaf, serial)
            .subject(subject)
            .subject_alt_names(sans)
            .issuer(intermediate.subject()?)
            .validity(&self.config.validity)
            .build()?;
        let slot = Slot::leaf_for_subject(&template.subject.common_name)?;

        let key = KeyPair::generate_rsa(Role::Leaf.key_bits(&self.config.keys))?;
        let certificate = signer::sign(
            &template,
            &key.public_key()?,
            SigningIdentity::parent(&intermediate_key, &intermediate),
        )?;

        self.store.record_serial(&lock, &Slot::Intermediate, &template.serial)?;
        self.store.save(&lock, &slot, &key, &certificate)?;
        tracing::info!(
            subject = %template.subject,
            sans = ?template.subject_alt_names,
            serial = %template.serial,
            slot = %slot,
            "Issued server certificate"
        );

        Ok(IssuedLeaf {
            slot,
            certificate,
            key,
            intermediate,
        })
    }

    pub fn root_certificate(&self) -> Result<Certificate> {
        Ok(self.store.load(&Slot::Root)?.1)
    }

    pub fn intermediate_certificate(&self) -> Result<Certificate> {
        Ok(self.store.load(&Slot::Intermediate)?.1)
    }

    /// The stored certificate for a previously issued subject.
    pub fn leaf(&self, subject: &str) -> Result<Certificate> {
        Ok(self.store.load(&Slot::leaf_for_subject(subject)?)?.1)
    }

    fn create_root(&self, lock: &StoreLock) -> Result<(KeyPair, Certificate)> {
        let key = KeyPair::generate_rsa(Role::Root.key_bits(&self.config.keys))?;
        let serial = self.serials.next(&self.store, &Slot::Root)?;
        let template = CertificateTemplateBuilder::new(Role::Root, serial)
            .subject(DistinguishedName::root_ca(&self.config.identity))
            .validity(&self.config.validity)
            .build()?;
        let certificate = signer::sign(&template, &key.public_key()?, SigningIdentity::self_signed(&key))?;

        self.store.record_serial(lock, &Slot::Root, &template.serial)?;
        self.store.save(lock, &Slot::Root, &key, &certificate)?;
        tracing::info!(subject = %template.subject, serial = %template.serial, "Created root CA");
        Ok((key, certificate))
    }

    fn create_intermediate(&self, lock: &StoreLock, root_key: &KeyPair, root: &Certificate) -> Result<Certificate> {
        let key = KeyPair::generate_rsa(Role::Intermediate.key_bits(&self.config.keys))?;
        // The root signs intermediates, so its ledger holds their serials
        let serial = self.serials.next(&self.store, &Slot::Root)?;
        let template = CertificateTemplateBuilder::new(Role::Intermediate, serial)
            .subject(DistinguishedName::intermediate_ca(&self.config.identity))
            .issuer(root.subject()?)
            .validity(&self.config.validity)
            .build()?;
        let certificate = signer::sign(&template, &key.public_key()?, SigningIdentity::parent(root_key, root))?;

        self.store.record_serial(lock, &Slot::Root, &template.serial)?;
        self.store.save(lock, &Slot::Intermediate, &key, &certificate)?;
        tracing::info!(subject = %template.subject, serial = %template.serial, "Created intermediate CA");
        Ok(certificate)
    }

    /// Load a parent pair for signing. A slot that vanished after the status
    /// check means the chain can no longer sign.
    fn signing_identity(&self, slot: &Slot) -> Result<(KeyPair, Certificate)> {
        self.store.load(slot).map_err(|e| match e {
            CaError::NotFound { slot } => CaError::SigningKeyUnavailable {
                slot,
                reason: "key material disappeared after the chain status check".into(),
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_template::{ExtendedKeyUsageFlag, KeyUsageFlag};
    use crate::configs::KeyPolicy;
    use crate::memory_store::MemoryStore;
    use std::collections::HashSet;

    fn test_config() -> AppConfig {
        AppConfig {
            keys: KeyPolicy {
                ca_rsa_bits: 2048,
                leaf_rsa_bits: 2048,
            },
            ..AppConfig::default()
        }
    }

    fn authority() -> CertificateAuthority<MemoryStore> {
        CertificateAuthority::new(MemoryStore::new(), test_config()).unwrap()
    }

    #[test]
    fn test_bootstrap_builds_linked_chain() {
        let ca = authority();
        assert_eq!(ca.chain_status().unwrap(), ChainStatus::Empty);

        let (root, intermediate) = ca.bootstrap().unwrap();
        assert_eq!(ca.chain_status().unwrap(), ChainStatus::ChainReady);

        assert!(root.is_self_signed().unwrap());
        assert_eq!(root.issuer().unwrap(), root.subject().unwrap());
        assert_eq!(root.subject().unwrap().common_name, "Simple CA Root CA");

        assert!(intermediate.is_issued_by(&root).unwrap());
        assert_eq!(intermediate.issuer().unwrap(), root.subject().unwrap());
        assert_eq!(intermediate.subject().unwrap().common_name, "Simple CA Intermediate CA");
        assert_ne!(root.serial().unwrap(), intermediate.serial().unwrap());

        let root_profile = root.profile().unwrap();
        assert!(root_profile.is_ca);
        assert_eq!(root_profile.path_len, Some(1));
        let intermediate_profile = intermediate.profile().unwrap();
        assert!(intermediate_profile.is_ca);
        assert_eq!(intermediate_profile.path_len, Some(0));
        assert_eq!(
            intermediate_profile.key_usage,
            vec![KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]
        );
    }

    #[test]
    fn test_second_bootstrap_leaves_chain_untouched() {
        let ca = authority();
        let (root, intermediate) = ca.bootstrap().unwrap();

        let err = ca.bootstrap().unwrap_err();
        assert!(matches!(
            err,
            CaError::AlreadyBootstrapped {
                status: ChainStatus::ChainReady
            }
        ));

        let stored_root = ca.root_certificate().unwrap();
        let stored_intermediate = ca.intermediate_certificate().unwrap();
        assert_eq!(stored_root.to_der().unwrap(), root.to_der().unwrap());
        assert_eq!(stored_intermediate.to_der().unwrap(), intermediate.to_der().unwrap());
    }

    #[test]
    fn test_issue_before_bootstrap_writes_nothing() {
        let ca = authority();
        let err = ca.issue_leaf("api.local", &["api.local"]).unwrap_err();
        assert!(matches!(
            err,
            CaError::ChainNotReady {
                status: ChainStatus::Empty
            }
        ));
        assert!(ca.store().is_empty().unwrap());
        assert!(ca.store().issued_serials(&Slot::Intermediate).unwrap().is_empty());
    }

    #[test]
    fn test_wildcard_leaf() {
        let ca = authority();
        let (_, intermediate) = ca.bootstrap().unwrap();

        let issued = ca.issue_leaf("*.example.com", &["*.example.com"]).unwrap();
        let leaf = &issued.certificate;
        let profile = leaf.profile().unwrap();
        assert_eq!(profile.dns_names, vec!["*.example.com"]);
        assert_eq!(leaf.subject().unwrap().common_name, "*.example.com");
        assert!(!profile.is_ca);
        assert_eq!(profile.extended_key_usage, vec![ExtendedKeyUsageFlag::ServerAuth]);
        assert_eq!(leaf.issuer().unwrap(), intermediate.subject().unwrap());
        assert!(leaf.is_issued_by(&intermediate).unwrap());
        assert!(leaf.matches_key(&issued.key).unwrap());

        assert_eq!(issued.slot, Slot::Leaf("com.example.~".to_string()));
        let stored = ca.leaf("*.example.com").unwrap();
        assert_eq!(stored.to_der().unwrap(), leaf.to_der().unwrap());
    }

    #[test]
    fn test_wildcard_and_literal_label_keep_separate_slots() {
        let ca = authority();
        ca.bootstrap().unwrap();

        let wildcard = ca.issue_leaf("*.example.com", &["*.example.com"]).unwrap();
        let literal = ca
            .issue_leaf("_wildcard.example.com", &["_wildcard.example.com"])
            .unwrap();
        assert_ne!(wildcard.slot, literal.slot);

        let stored = ca.leaf("*.example.com").unwrap();
        assert_eq!(stored.subject().unwrap().common_name, "*.example.com");
        assert_eq!(stored.to_der().unwrap(), wildcard.certificate.to_der().unwrap());
        let stored = ca.leaf("_wildcard.example.com").unwrap();
        assert_eq!(stored.subject().unwrap().common_name, "_wildcard.example.com");
    }

    #[test]
    fn test_overlong_common_name_is_invalid_subject() {
        let ca = authority();
        ca.bootstrap().unwrap();
        let before = ca.store().len().unwrap();

        let long = format!("{}.{}.example.com", "a".repeat(40), "b".repeat(40));
        let err = ca.issue_leaf(&long, &[long.as_str()]).unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));
        assert_eq!(ca.store().len().unwrap(), before);
        assert!(ca.store().issued_serials(&Slot::Intermediate).unwrap().is_empty());

        let issued = ca.issue_leaf("app.example.com", &[long.as_str()]).unwrap();
        assert_eq!(issued.certificate.profile().unwrap().dns_names, vec![long]);
    }

    #[test]
    fn test_sans_are_not_inferred_from_subject() {
        let ca = authority();
        ca.bootstrap().unwrap();
        let issued = ca.issue_leaf("api.local", &["other.local"]).unwrap();
        assert_eq!(issued.certificate.profile().unwrap().dns_names, vec!["other.local"]);
    }

    #[test]
    fn test_leaf_serials_are_distinct() {
        let ca = authority();
        ca.bootstrap().unwrap();

        let mut serials = HashSet::new();
        for i in 0..8 {
            let name = format!("host{}.local", i % 3);
            let issued = ca.issue_leaf(&name, &[name.as_str()]).unwrap();
            assert!(serials.insert(issued.certificate.serial().unwrap()));
        }
        assert_eq!(ca.store().issued_serials(&Slot::Intermediate).unwrap().len(), 8);
    }

    #[test]
    fn test_invalid_subject_writes_nothing() {
        let ca = authority();
        ca.bootstrap().unwrap();
        let before = ca.store().len().unwrap();

        let err = ca.issue_leaf("bad name", &["bad name"]).unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));
        let err = ca.issue_leaf("ok.local", &[""]).unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));

        assert_eq!(ca.store().len().unwrap(), before);
        assert!(ca.store().issued_serials(&Slot::Intermediate).unwrap().is_empty());
    }

    #[test]
    fn test_issue_fails_while_locked() {
        let ca = authority();
        ca.bootstrap().unwrap();
        let held = ca.store().lock().unwrap();
        let err = ca.issue_leaf("api.local", &["api.local"]).unwrap_err();
        assert!(err.is_transient());
        drop(held);
        assert!(ca.issue_leaf("api.local", &["api.local"]).is_ok());
    }

    #[test]
    fn test_complete_bootstrap_from_root_only() {
        let ca = authority();
        assert!(matches!(ca.complete_bootstrap(), Err(CaError::NotFound { .. })));

        {
            let lock = ca.store().lock().unwrap();
            ca.create_root(&lock).unwrap();
        }
        assert_eq!(ca.chain_status().unwrap(), ChainStatus::RootOnly);
        assert!(matches!(
            ca.bootstrap(),
            Err(CaError::AlreadyBootstrapped {
                status: ChainStatus::RootOnly
            })
        ));
        assert!(matches!(ca.issue_leaf("a.local", &["a.local"]), Err(CaError::ChainNotReady { .. })));

        let intermediate = ca.complete_bootstrap().unwrap();
        assert!(intermediate.is_issued_by(&ca.root_certificate().unwrap()).unwrap());
        assert_eq!(ca.chain_status().unwrap(), ChainStatus::ChainReady);
        assert!(matches!(ca.complete_bootstrap(), Err(CaError::AlreadyBootstrapped { .. })));
    }

    #[test]
    fn test_named_leaf_and_fullchain() {
        let ca = authority();
        ca.bootstrap().unwrap();
        let subject = DistinguishedName {
            organization: "Dev Shop".to_string(),
            ..DistinguishedName::common_name("api.local")
        };
        let issued = ca.issue_leaf_named(subject.clone(), &["api.local"]).unwrap();
        assert_eq!(issued.certificate.subject().unwrap(), subject);

        let fullchain = String::from_utf8(issued.fullchain_pem().unwrap()).unwrap();
        assert_eq!(fullchain.matches("BEGIN CERTIFICATE").count(), 2);

        let (certificate, key) = issued.into_parts();
        assert!(certificate.matches_key(&key).unwrap());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = test_config();
        config.keys.leaf_rsa_bits = 512;
        assert!(matches!(
            CertificateAuthority::new(MemoryStore::new(), config),
            Err(CaError::Config(_))
        ));
    }
}
