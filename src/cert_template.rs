//! Certificate templates: the role-specific content of a certificate before it
//! is signed.
//!
//! The extension policy is fixed per [`Role`]:
//!
//! | Role | BasicConstraints | KeyUsage | ExtendedKeyUsage |
//! |---|---|---|---|
//! | Root | CA, pathlen 1 | keyCertSign, cRLSign | none |
//! | Intermediate | CA, pathlen 0 | keyCertSign, cRLSign | none |
//! | Leaf | not CA | digitalSignature, keyEncipherment | serverAuth |
//!
//! Leaf subject alternative names are taken verbatim from the caller; nothing
//! is added, dropped or rewritten, and wildcard labels pass through.

use crate::configs::{KeyPolicy, ValidityPolicy};
use crate::distinguished_name::DistinguishedName;
use crate::error::{CaError, Result};
use crate::serial::SerialNumber;

pub const ROOT_CA_PATH_LENGTH: u32 = 1;
pub const INTERMEDIATE_CA_PATH_LENGTH: u32 = 0;

/// Upper bound for X.509 CommonName (RFC 5280 `ub-common-name`).
pub const MAX_COMMON_NAME_LENGTH: usize = 64;
const MAX_DNS_NAME_LENGTH: usize = 253;
const MAX_DNS_LABEL_LENGTH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Root,
    Intermediate,
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsageFlag {
    DigitalSignature,
    KeyEncipherment,
    KeyCertSign,
    CrlSign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtendedKeyUsageFlag {
    ServerAuth,
    ClientAuth,
}

/// Extensions every certificate of a role carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionPolicy {
    pub is_ca: bool,
    pub path_len: Option<u32>,
    pub key_usage: &'static [KeyUsageFlag],
    pub extended_key_usage: &'static [ExtendedKeyUsageFlag],
}

const CA_KEY_USAGE: &[KeyUsageFlag] = &[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign];
const LEAF_KEY_USAGE: &[KeyUsageFlag] =
    &[KeyUsageFlag::DigitalSignature, KeyUsageFlag::KeyEncipherment];
const LEAF_EXTENDED_KEY_USAGE: &[ExtendedKeyUsageFlag] = &[ExtendedKeyUsageFlag::ServerAuth];

impl Role {
    pub fn extension_policy(self) -> ExtensionPolicy {
        match self {
            Role::Root => ExtensionPolicy {
                is_ca: true,
                path_len: Some(ROOT_CA_PATH_LENGTH),
                key_usage: CA_KEY_USAGE,
                extended_key_usage: &[],
            },
            Role::Intermediate => ExtensionPolicy {
                is_ca: true,
                path_len: Some(INTERMEDIATE_CA_PATH_LENGTH),
                key_usage: CA_KEY_USAGE,
                extended_key_usage: &[],
            },
            Role::Leaf => ExtensionPolicy {
                is_ca: false,
                path_len: None,
                key_usage: LEAF_KEY_USAGE,
                extended_key_usage: LEAF_EXTENDED_KEY_USAGE,
            },
        }
    }

    pub fn validity_days(self, policy: &ValidityPolicy) -> u32 {
        match self {
            Role::Root => policy.root_days,
            Role::Intermediate => policy.intermediate_days,
            Role::Leaf => policy.leaf_days,
        }
    }

    pub fn key_bits(self, policy: &KeyPolicy) -> u32 {
        match self {
            Role::Root | Role::Intermediate => policy.ca_rsa_bits,
            Role::Leaf => policy.leaf_rsa_bits,
        }
    }

    fn is_self_issued(self) -> bool {
        self == Role::Root
    }
}

/// Everything needed to sign a certificate except the keys.
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    pub role: Role,
    pub subject: DistinguishedName,
    /// `None` for the self-issued root.
    pub issuer: Option<DistinguishedName>,
    pub subject_alt_names: Vec<String>,
    pub serial: SerialNumber,
    pub validity_days: u32,
    pub extensions: ExtensionPolicy,
}

/// Builder for [`CertificateTemplate`].
///
/// # Example
///
/// ```no_run
/// # use simple_ca::cert_template::{CertificateTemplateBuilder, Role};
/// # use simple_ca::configs::ValidityPolicy;
/// # use simple_ca::distinguished_name::DistinguishedName;
/// # fn demo(serial: simple_ca::serial::SerialNumber, issuer: DistinguishedName) -> simple_ca::Result<()> {
/// let template = CertificateTemplateBuilder::new(Role::Leaf, serial)
///     .subject(DistinguishedName::common_name("*.example.com"))
///     .subject_alt_names(["*.example.com", "example.com"])
///     .issuer(issuer)
///     .validity(&ValidityPolicy::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct CertificateTemplateBuilder {
    role: Role,
    serial: SerialNumber,
    subject: DistinguishedName,
    issuer: Option<DistinguishedName>,
    subject_alt_names: Vec<String>,
    validity: ValidityPolicy,
}

impl CertificateTemplateBuilder {
    pub fn new(role: Role, serial: SerialNumber) -> Self {
        Self {
            role,
            serial,
            subject: DistinguishedName::default(),
            issuer: None,
            subject_alt_names: Vec::new(),
            validity: ValidityPolicy::default(),
        }
    }

    pub fn subject(mut self, subject: DistinguishedName) -> Self {
        self.subject = subject;
        self
    }

    /// Subject name of the certificate that will sign this one.
    pub fn issuer(mut self, issuer: DistinguishedName) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn subject_alt_names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        self.subject_alt_names = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn validity(mut self, policy: &ValidityPolicy) -> Self {
        self.validity = *policy;
        self
    }

    pub fn build(self) -> Result<CertificateTemplate> {
        let cn = &self.subject.common_name;
        if cn.trim().is_empty() {
            return Err(CaError::invalid_subject(cn, "common name must not be empty"));
        }
        if cn.chars().count() > MAX_COMMON_NAME_LENGTH {
            return Err(CaError::invalid_subject(
                cn,
                format!(
                    "common name is longer than {} characters; use a shorter subject and list the long name as a subject alternative name",
                    MAX_COMMON_NAME_LENGTH
                ),
            ));
        }

        match (self.role.is_self_issued(), &self.issuer) {
            (true, Some(_)) => {
                return Err(CaError::Internal("root certificate cannot name a parent issuer".into()))
            }
            (false, None) => {
                return Err(CaError::Internal(format!(
                    "{:?} certificate requires a parent issuer",
                    self.role
                )))
            }
            _ => {}
        }

        if self.role == Role::Leaf {
            validate_dns_name(cn)?;
            for name in &self.subject_alt_names {
                validate_dns_name(name)?;
            }
        } else if !self.subject_alt_names.is_empty() {
            return Err(CaError::invalid_subject(
                cn,
                "CA certificates carry no subject alternative names",
            ));
        }

        Ok(CertificateTemplate {
            role: self.role,
            validity_days: self.role.validity_days(&self.validity),
            extensions: self.role.extension_policy(),
            subject: self.subject,
            issuer: self.issuer,
            subject_alt_names: self.subject_alt_names,
            serial: self.serial,
        })
    }
}

/// Check that `name` is usable as a DNS subject alternative name.
///
/// Labels are letters, digits, `-`, `_` and `*`; hyphens may not start or end
/// a label. Wildcards are accepted in any label.
pub fn validate_dns_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CaError::invalid_subject(name, "name is empty"));
    }
    if name.len() > MAX_DNS_NAME_LENGTH {
        return Err(CaError::invalid_subject(
            name,
            format!("name is longer than {} characters", MAX_DNS_NAME_LENGTH),
        ));
    }
    for label in name.split('.') {
        if label.is_empty() {
            return Err(CaError::invalid_subject(name, "name contains an empty label"));
        }
        if label.len() > MAX_DNS_LABEL_LENGTH {
            return Err(CaError::invalid_subject(
                name,
                format!("label {:?} is longer than {} characters", label, MAX_DNS_LABEL_LENGTH),
            ));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '*')))
        {
            return Err(CaError::invalid_subject(name, format!("illegal character {:?}", c)));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(CaError::invalid_subject(
                name,
                format!("label {:?} starts or ends with '-'", label),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial() -> SerialNumber {
        SerialNumber::from_hex("1A2B").unwrap()
    }

    fn leaf(cn: &str, sans: &[&str]) -> Result<CertificateTemplate> {
        CertificateTemplateBuilder::new(Role::Leaf, serial())
            .subject(DistinguishedName::common_name(cn))
            .subject_alt_names(sans)
            .issuer(DistinguishedName::common_name("Test Intermediate CA"))
            .build()
    }

    #[test]
    fn test_extension_policy_per_role() {
        let root = Role::Root.extension_policy();
        assert!(root.is_ca);
        assert_eq!(root.path_len, Some(1));
        assert_eq!(root.key_usage, &[KeyUsageFlag::KeyCertSign, KeyUsageFlag::CrlSign]);
        assert!(root.extended_key_usage.is_empty());

        let intermediate = Role::Intermediate.extension_policy();
        assert!(intermediate.is_ca);
        assert_eq!(intermediate.path_len, Some(0));
        assert!(intermediate.extended_key_usage.is_empty());

        let leaf = Role::Leaf.extension_policy();
        assert!(!leaf.is_ca);
        assert_eq!(leaf.path_len, None);
        assert_eq!(
            leaf.key_usage,
            &[KeyUsageFlag::DigitalSignature, KeyUsageFlag::KeyEncipherment]
        );
        assert_eq!(leaf.extended_key_usage, &[ExtendedKeyUsageFlag::ServerAuth]);
    }

    #[test]
    fn test_leaf_sans_are_taken_verbatim() {
        let template = leaf("*.example.com", &["*.example.com", "example.com"]).unwrap();
        assert_eq!(template.subject_alt_names, vec!["*.example.com", "example.com"]);
        assert_eq!(template.validity_days, ValidityPolicy::default().leaf_days);
        assert_eq!(template.serial, serial());
    }

    #[test]
    fn test_leaf_rejects_bad_names() {
        assert!(matches!(leaf("", &[]), Err(CaError::InvalidSubject { .. })));
        assert!(matches!(
            leaf("ok.local", &["bad name.local"]),
            Err(CaError::InvalidSubject { .. })
        ));
        assert!(matches!(leaf("a..b", &[]), Err(CaError::InvalidSubject { .. })));
    }

    #[test]
    fn test_common_name_length_is_bounded() {
        // Valid DNS name (labels under 63) that exceeds the CommonName bound
        let long = format!("{}.{}.example.com", "a".repeat(40), "b".repeat(40));
        assert!(validate_dns_name(&long).is_ok());
        assert!(long.len() > MAX_COMMON_NAME_LENGTH);

        let err = leaf(&long, &[long.as_str()]).unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));

        let exact = format!("{}.example.com", "c".repeat(MAX_COMMON_NAME_LENGTH - ".example.com".len()));
        assert_eq!(exact.len(), MAX_COMMON_NAME_LENGTH);
        assert!(leaf(&exact, &[exact.as_str()]).is_ok());

        // The long name still fits as a SAN under a short subject
        let template = leaf("app.example.com", &["app.example.com", long.as_str()]).unwrap();
        assert_eq!(template.subject_alt_names[1], long);

        let err = CertificateTemplateBuilder::new(Role::Root, serial())
            .subject(DistinguishedName::common_name("R".repeat(65)))
            .build()
            .unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));
    }

    #[test]
    fn test_root_is_self_issued() {
        let err = CertificateTemplateBuilder::new(Role::Root, serial())
            .subject(DistinguishedName::common_name("Root"))
            .issuer(DistinguishedName::common_name("Other"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CaError::Internal(_)));

        let err = CertificateTemplateBuilder::new(Role::Intermediate, serial())
            .subject(DistinguishedName::common_name("Intermediate"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CaError::Internal(_)));
    }

    #[test]
    fn test_ca_templates_have_no_sans() {
        let err = CertificateTemplateBuilder::new(Role::Root, serial())
            .subject(DistinguishedName::common_name("Root"))
            .subject_alt_names(["root.local"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CaError::InvalidSubject { .. }));
    }

    #[test]
    fn test_ca_common_name_may_contain_spaces() {
        let template = CertificateTemplateBuilder::new(Role::Root, serial())
            .subject(DistinguishedName::common_name("Simple CA Root CA"))
            .build()
            .unwrap();
        assert_eq!(template.validity_days, 7200);
        assert!(template.issuer.is_none());
    }

    #[test]
    fn test_validate_dns_name() {
        for ok in ["localhost", "*.example.com", "api.local", "a_b.internal", "x-1.y"] {
            assert!(validate_dns_name(ok).is_ok(), "{ok}");
        }
        let long_label = "a".repeat(64);
        let long_name = vec!["abcdefghi"; 26].join(".");
        for bad in ["", ".", "a.", "-a.b", "a-.b", "a/b", "ü.de", long_label.as_str(), long_name.as_str()] {
            assert!(validate_dns_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_key_bits_per_role() {
        let keys = KeyPolicy::default();
        assert_eq!(Role::Root.key_bits(&keys), 4096);
        assert_eq!(Role::Intermediate.key_bits(&keys), 4096);
        assert_eq!(Role::Leaf.key_bits(&keys), 2048);
    }
}
