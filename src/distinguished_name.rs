//! X.509 distinguished names for CA and server certificates.

use std::fmt;

use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};

use crate::configs::IdentityDefaults;
use crate::error::{CaError, Result};

/// Subject or issuer identity.
///
/// Empty fields are omitted from the encoded name, so a leaf certificate for
/// `api.local` can carry nothing but a common name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
    pub common_name: String,
}

impl DistinguishedName {
    /// A name carrying only a common name.
    pub fn common_name(cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            ..Self::default()
        }
    }

    /// The root CA name derived from the configured identity:
    /// `"<organization> Root CA"`.
    pub fn root_ca(identity: &IdentityDefaults) -> Self {
        Self::from_identity(identity, format!("{} Root CA", identity.organization))
    }

    /// The intermediate CA name: `"<organization> Intermediate CA"`.
    pub fn intermediate_ca(identity: &IdentityDefaults) -> Self {
        Self::from_identity(identity, format!("{} Intermediate CA", identity.organization))
    }

    fn from_identity(identity: &IdentityDefaults, common_name: String) -> Self {
        Self {
            country: identity.country.clone(),
            state: identity.state.clone(),
            locality: identity.locality.clone(),
            organization: identity.organization.clone(),
            organizational_unit: identity.organizational_unit.clone(),
            common_name,
        }
    }

    /// Same identity fields, different common name.
    pub fn with_common_name(&self, cn: impl Into<String>) -> Self {
        Self {
            common_name: cn.into(),
            ..self.clone()
        }
    }

    /// Encode as an OpenSSL name in C, ST, L, O, OU, CN order.
    pub fn to_x509_name(&self) -> Result<X509Name> {
        let mut name_builder = X509Name::builder()
            .map_err(|e| CaError::crypto("Failed to create name builder", e))?;

        let fields = [
            (Nid::COUNTRYNAME, &self.country, "Failed to set country"),
            (Nid::STATEORPROVINCENAME, &self.state, "Failed to set state/province"),
            (Nid::LOCALITYNAME, &self.locality, "Failed to set locality"),
            (Nid::ORGANIZATIONNAME, &self.organization, "Failed to set organization"),
            (
                Nid::ORGANIZATIONALUNITNAME,
                &self.organizational_unit,
                "Failed to set organizational unit",
            ),
            (Nid::COMMONNAME, &self.common_name, "Failed to set CN"),
        ];
        for (nid, value, context) in fields {
            if !value.is_empty() {
                name_builder
                    .append_entry_by_nid(nid, value)
                    .map_err(|e| CaError::crypto(context, e))?;
            }
        }

        Ok(name_builder.build())
    }

    /// Decode the fields this crate writes; other attributes are ignored.
    pub fn from_x509_name(name: &X509NameRef) -> Result<Self> {
        let field = |nid: Nid| -> Result<String> {
            match name.entries_by_nid(nid).next() {
                Some(entry) => entry
                    .data()
                    .as_utf8()
                    .map(|s| s.to_string())
                    .map_err(|e| CaError::crypto("Failed to decode name entry", e)),
                None => Ok(String::new()),
            }
        };

        Ok(Self {
            country: field(Nid::COUNTRYNAME)?,
            state: field(Nid::STATEORPROVINCENAME)?,
            locality: field(Nid::LOCALITYNAME)?,
            organization: field(Nid::ORGANIZATIONNAME)?,
            organizational_unit: field(Nid::ORGANIZATIONALUNITNAME)?,
            common_name: field(Nid::COMMONNAME)?,
        })
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("C", &self.country),
            ("ST", &self.state),
            ("L", &self.locality),
            ("O", &self.organization),
            ("OU", &self.organizational_unit),
            ("CN", &self.common_name),
        ];
        let mut first = true;
        for (key, value) in parts {
            if value.is_empty() {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}
