use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509NameRef, X509};

use crate::cert_template::{CertificateTemplate, ExtendedKeyUsageFlag, KeyUsageFlag};
use crate::error::{CaError, Result};
use crate::key_material::{Certificate, KeyPair, PublicKey};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// The key that signs a certificate, and the certificate that vouches for it.
///
/// With no certificate the signature is a self-signature, which is only valid
/// for the root.
#[derive(Debug, Clone, Copy)]
pub struct SigningIdentity<'a> {
    key: &'a KeyPair,
    certificate: Option<&'a Certificate>,
}

impl<'a> SigningIdentity<'a> {
    pub fn self_signed(key: &'a KeyPair) -> Self {
        Self {
            key,
            certificate: None,
        }
    }

    pub fn parent(key: &'a KeyPair, certificate: &'a Certificate) -> Self {
        Self {
            key,
            certificate: Some(certificate),
        }
    }
}

/// Sign `template` for `subject_key` with `identity`.
///
/// The result is checked against the signer's public key before it is
/// returned.
pub fn sign(
    template: &CertificateTemplate,
    subject_key: &PublicKey,
    identity: SigningIdentity<'_>,
) -> Result<Certificate> {
    check_identity(template, subject_key, identity)?;

    let mut builder = X509::builder().map_err(|e| CaError::crypto("Failed to create X509 builder", e))?;

    builder
        .set_version(X509_VERSION_3)
        .map_err(|e| CaError::crypto("Failed to set version", e))?;

    let serial = template.serial.to_asn1_integer()?;
    builder
        .set_serial_number(&serial)
        .map_err(|e| CaError::crypto("Failed to set serial number", e))?;

    let subject_name = template.subject.to_x509_name()?;
    builder
        .set_subject_name(&subject_name)
        .map_err(|e| CaError::crypto("Failed to set subject", e))?;
    // Copy the parent's encoded subject so issuer/subject compare byte for byte
    let issuer_name: &X509NameRef = match identity.certificate {
        Some(parent) => parent.as_x509().subject_name(),
        None => &subject_name,
    };
    builder
        .set_issuer_name(issuer_name)
        .map_err(|e| CaError::crypto("Failed to set issuer", e))?;

    let not_before =
        Asn1Time::days_from_now(0).map_err(|e| CaError::crypto("Failed to create not_before", e))?;
    builder
        .set_not_before(&not_before)
        .map_err(|e| CaError::crypto("Failed to set not_before", e))?;
    let not_after = Asn1Time::days_from_now(template.validity_days)
        .map_err(|e| CaError::crypto("Failed to create not_after", e))?;
    builder
        .set_not_after(&not_after)
        .map_err(|e| CaError::crypto("Failed to set not_after", e))?;

    builder
        .set_pubkey(subject_key.as_pkey())
        .map_err(|e| CaError::crypto("Failed to set public key", e))?;

    let policy = &template.extensions;

    let mut bc = BasicConstraints::new();
    bc.critical();
    if policy.is_ca {
        bc.ca();
        if let Some(path_len) = policy.path_len {
            bc.pathlen(path_len);
        }
    }
    let bc = bc
        .build()
        .map_err(|e| CaError::crypto("Failed to build BasicConstraints", e))?;
    builder
        .append_extension(bc)
        .map_err(|e| CaError::crypto("Failed to add BasicConstraints", e))?;

    let mut ku = KeyUsage::new();
    ku.critical();
    for flag in policy.key_usage {
        match flag {
            KeyUsageFlag::DigitalSignature => ku.digital_signature(),
            KeyUsageFlag::KeyEncipherment => ku.key_encipherment(),
            KeyUsageFlag::KeyCertSign => ku.key_cert_sign(),
            KeyUsageFlag::CrlSign => ku.crl_sign(),
        };
    }
    let ku = ku
        .build()
        .map_err(|e| CaError::crypto("Failed to build KeyUsage", e))?;
    builder
        .append_extension(ku)
        .map_err(|e| CaError::crypto("Failed to add KeyUsage", e))?;

    if !policy.extended_key_usage.is_empty() {
        let mut eku = ExtendedKeyUsage::new();
        for flag in policy.extended_key_usage {
            match flag {
                ExtendedKeyUsageFlag::ServerAuth => eku.server_auth(),
                ExtendedKeyUsageFlag::ClientAuth => eku.client_auth(),
            };
        }
        let eku = eku
            .build()
            .map_err(|e| CaError::crypto("Failed to build ExtendedKeyUsage", e))?;
        builder
            .append_extension(eku)
            .map_err(|e| CaError::crypto("Failed to add ExtendedKeyUsage", e))?;
    }

    let ski = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .map_err(|e| CaError::crypto("Failed to build SubjectKeyIdentifier", e))?;
    builder
        .append_extension(ski)
        .map_err(|e| CaError::crypto("Failed to add SubjectKeyIdentifier", e))?;

    // For the root the context issuer falls back to the certificate being
    // built, whose SKI was appended above
    let parent_x509 = identity.certificate.map(Certificate::as_x509);
    let aki = AuthorityKeyIdentifier::new()
        .keyid(true)
        .build(&builder.x509v3_context(parent_x509, None))
        .map_err(|e| CaError::crypto("Failed to build AuthorityKeyIdentifier", e))?;
    builder
        .append_extension(aki)
        .map_err(|e| CaError::crypto("Failed to add AuthorityKeyIdentifier", e))?;

    if !template.subject_alt_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for name in &template.subject_alt_names {
            san.dns(name);
        }
        let san = san
            .build(&builder.x509v3_context(parent_x509, None))
            .map_err(|e| CaError::crypto("Failed to build SubjectAlternativeName", e))?;
        builder
            .append_extension(san)
            .map_err(|e| CaError::crypto("Failed to add SubjectAlternativeName", e))?;
    }

    builder
        .sign(identity.key.as_pkey(), MessageDigest::sha256())
        .map_err(|e| CaError::crypto("Failed to sign certificate", e))?;

    let certificate = Certificate::from_x509(builder.build());
    if !certificate.is_signed_by(&identity.key.public_key()?)? {
        return Err(CaError::Internal(format!(
            "signature on {} does not verify",
            template.subject
        )));
    }

    tracing::debug!(
        role = ?template.role,
        subject = %template.subject,
        serial = %template.serial,
        "Signed certificate"
    );
    Ok(certificate)
}

fn check_identity(
    template: &CertificateTemplate,
    subject_key: &PublicKey,
    identity: SigningIdentity<'_>,
) -> Result<()> {
    match (identity.certificate, &template.issuer) {
        (None, None) => {
            if identity.key.public_key()? != *subject_key {
                return Err(CaError::Internal(
                    "self-signed certificate must be signed by its own key".into(),
                ));
            }
        }
        (Some(parent), Some(issuer)) => {
            let parent_subject = parent.subject()?;
            if parent_subject != *issuer {
                return Err(CaError::Internal(format!(
                    "template issuer {} does not match signing certificate {}",
                    issuer, parent_subject
                )));
            }
            if !parent.matches_key(identity.key)? {
                return Err(CaError::SigningKeyUnavailable {
                    slot: parent_subject.to_string(),
                    reason: "private key does not belong to the issuing certificate".into(),
                });
            }
            if !parent.profile()?.is_ca {
                return Err(CaError::Internal(format!("{} is not a CA certificate", parent_subject)));
            }
        }
        (Some(_), None) => {
            return Err(CaError::Internal("self-issued template given a parent identity".into()))
        }
        (None, Some(issuer)) => {
            return Err(CaError::Internal(format!("no signing certificate for issuer {}", issuer)))
        }
    }
    Ok(())
}
