//! Directory-backed [`KeyMaterialStore`].
//!
//! ```text
//! <root>/
//!   .lock                      cross-process lock file
//!   config.toml
//!   root/{key.pem,cert.pem}
//!   intermediate/{key.pem,cert.pem}
//!   leaf/<id>/{key.pem,cert.pem}
//!   serials/<issuer>.json      serial ledger per issuer
//! ```
//!
//! A pair is written into a fresh staging directory next to its slot and then
//! renamed into place, so a slot directory always holds a complete pair. Key
//! files are created with mode 0600 on Unix.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CaError, Result};
use crate::key_material::{Certificate, KeyPair};
use crate::serial::SerialNumber;
use crate::storage::{decode_pair, ensure_pair_matches, KeyMaterialStore, Slot, StoreLock};

const LOCK_FILE_NAME: &str = ".lock";
const KEY_FILE_NAME: &str = "key.pem";
const CERT_FILE_NAME: &str = "cert.pem";
const ROOT_DIR: &str = "root";
const INTERMEDIATE_DIR: &str = "intermediate";
const LEAF_DIR: &str = "leaf";
const SERIALS_DIR: &str = "serials";
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
}

struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(error = %e, "Failed to release store lock");
        }
    }
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// `lock_timeout` bounds how long [`KeyMaterialStore::lock`] waits for
    /// another process; zero fails immediately.
    pub fn open(root: impl Into<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        // Created up front so read-only calls never write to the store
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(LOCK_FILE_NAME))?;
        tracing::debug!(path = %root.display(), "Opened file store");
        Ok(Self { root, lock_timeout })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, slot: &Slot) -> PathBuf {
        match slot {
            Slot::Root => self.root.join(ROOT_DIR),
            Slot::Intermediate => self.root.join(INTERMEDIATE_DIR),
            Slot::Leaf(id) => self.root.join(LEAF_DIR).join(id),
        }
    }

    pub fn key_path(&self, slot: &Slot) -> PathBuf {
        self.slot_dir(slot).join(KEY_FILE_NAME)
    }

    pub fn cert_path(&self, slot: &Slot) -> PathBuf {
        self.slot_dir(slot).join(CERT_FILE_NAME)
    }

    fn ledger_path(&self, issuer: &Slot) -> PathBuf {
        self.root
            .join(SERIALS_DIR)
            .join(format!("{}.json", issuer.file_stem()))
    }

    fn write_staged_pair(&self, staging: &Path, key_pem: &[u8], cert_pem: &[u8]) -> io::Result<()> {
        write_synced(&staging.join(KEY_FILE_NAME), key_pem, true)?;
        write_synced(&staging.join(CERT_FILE_NAME), cert_pem, false)?;
        Ok(())
    }
}

fn write_synced(path: &Path, contents: &[u8], private: bool) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl KeyMaterialStore for FileStore {
    fn exists(&self, slot: &Slot) -> Result<bool> {
        Ok(self.key_path(slot).is_file() && self.cert_path(slot).is_file())
    }

    fn load(&self, slot: &Slot) -> Result<(KeyPair, Certificate)> {
        let key_path = self.key_path(slot);
        let cert_path = self.cert_path(slot);
        match (key_path.is_file(), cert_path.is_file()) {
            (false, false) => {
                return Err(CaError::NotFound {
                    slot: slot.to_string(),
                })
            }
            (true, false) => return Err(CaError::corrupt(slot, "private key present without certificate")),
            (false, true) => return Err(CaError::corrupt(slot, "certificate present without private key")),
            (true, true) => {}
        }

        let key_pem = fs::read(&key_path)
            .map_err(|e| CaError::corrupt(slot, format!("cannot read {}: {}", key_path.display(), e)))?;
        let cert_pem = fs::read(&cert_path)
            .map_err(|e| CaError::corrupt(slot, format!("cannot read {}: {}", cert_path.display(), e)))?;
        decode_pair(slot, &key_pem, &cert_pem)
    }

    fn save(&self, _lock: &StoreLock, slot: &Slot, key: &KeyPair, certificate: &Certificate) -> Result<()> {
        ensure_pair_matches(slot, key, certificate)?;
        let key_pem = key.to_pem()?;
        let cert_pem = certificate.to_pem()?;

        let target = self.slot_dir(slot);
        let parent = target
            .parent()
            .ok_or_else(|| CaError::Internal(format!("slot {} has no parent directory", slot)))?;
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(parent)?;
        self.write_staged_pair(staging.path(), &key_pem, &cert_pem)?;

        // A directory cannot be renamed over a non-empty one, so move the old
        // pair aside first. It is removed when `retired` drops.
        let retired = if target.exists() {
            let retired = tempfile::Builder::new()
                .prefix(".retired-")
                .tempdir_in(parent)?;
            fs::rename(&target, retired.path().join("previous"))?;
            Some(retired)
        } else {
            None
        };

        if let Err(e) = fs::rename(staging.path(), &target) {
            if let Some(retired) = &retired {
                if let Err(restore) = fs::rename(retired.path().join("previous"), &target) {
                    tracing::error!(slot = %slot, error = %restore, "Failed to restore previous key material");
                }
            }
            return Err(e.into());
        }
        sync_dir(parent)?;
        drop(retired);

        tracing::info!(slot = %slot, path = %target.display(), "Stored key material");
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock> {
        let path = self.root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock() {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Acquired store lock");
                    return Ok(StoreLock::new(FileLockGuard { file }));
                }
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CaError::StoreLocked { path });
                    }
                    tracing::debug!(path = %path.display(), "Store lock busy, waiting");
                    thread::sleep(LOCK_RETRY_INTERVAL.min(deadline - now));
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    fn issued_serials(&self, issuer: &Slot) -> Result<BTreeSet<SerialNumber>> {
        let path = self.ledger_path(issuer);
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        let json = fs::read_to_string(&path)?;
        serde_json::from_str(&json)
            .map_err(|e| CaError::corrupt(format!("serial ledger of {}", issuer), e))
    }

    fn record_serial(&self, _lock: &StoreLock, issuer: &Slot, serial: &SerialNumber) -> Result<()> {
        let mut serials = self.issued_serials(issuer)?;
        if !serials.insert(serial.clone()) {
            return Err(CaError::Internal(format!(
                "serial {} already recorded for {}",
                serial, issuer
            )));
        }

        let path = self.ledger_path(issuer);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&serials)
            .map_err(|e| CaError::Internal(format!("failed to encode serial ledger: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
