//! Writing issued server certificates to an output directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::authority::IssuedLeaf;
use crate::error::Result;
use crate::storage::Slot;

/// Paths written by [`write_leaf_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafFiles {
    pub key: PathBuf,
    pub certificate: PathBuf,
    pub fullchain: PathBuf,
}

/// Write `<name>.key.pem`, `<name>.cert.pem` and `<name>.fullchain.pem` into
/// `dir`, where `<name>` is the leaf's slot identifier.
///
/// On Unix the key file is set to 0600.
pub fn write_leaf_files(dir: &Path, issued: &IssuedLeaf) -> Result<LeafFiles> {
    fs::create_dir_all(dir)?;
    let name = match &issued.slot {
        Slot::Leaf(id) => id.clone(),
        other => other.file_stem(),
    };

    let files = LeafFiles {
        key: dir.join(format!("{}.key.pem", name)),
        certificate: dir.join(format!("{}.cert.pem", name)),
        fullchain: dir.join(format!("{}.fullchain.pem", name)),
    };

    fs::write(&files.key, issued.key.to_pem()?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&files.key, fs::Permissions::from_mode(0o600))?;
    }
    fs::write(&files.certificate, issued.certificate.to_pem()?)?;
    fs::write(&files.fullchain, issued.fullchain_pem()?)?;

    tracing::info!(path = %dir.display(), name = %name, "Certificate files written");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::CertificateAuthority;
    use crate::configs::{AppConfig, KeyPolicy};
    use crate::key_material::{Certificate, KeyPair};
    use crate::memory_store::MemoryStore;

    #[test]
    fn test_writes_three_files() {
        let config = AppConfig {
            keys: KeyPolicy {
                ca_rsa_bits: 2048,
                leaf_rsa_bits: 2048,
            },
            ..AppConfig::default()
        };
        let ca = CertificateAuthority::new(MemoryStore::new(), config).unwrap();
        ca.bootstrap().unwrap();
        let issued = ca.issue_leaf("*.example.com", &["*.example.com"]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let files = write_leaf_files(&out, &issued).unwrap();
        assert_eq!(files.certificate, out.join("com.example.~.cert.pem"));

        let key = KeyPair::from_pem(&fs::read(&files.key).unwrap()).unwrap();
        let cert = Certificate::from_pem(&fs::read(&files.certificate).unwrap()).unwrap();
        assert!(cert.matches_key(&key).unwrap());

        let fullchain = fs::read_to_string(&files.fullchain).unwrap();
        assert_eq!(fullchain.matches("BEGIN CERTIFICATE").count(), 2);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&files.key).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
