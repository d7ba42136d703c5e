//! Simple CA - private certificate authority for development environments
//!
//! Creates a root CA and an intermediate CA once, then issues TLS server
//! certificates from the intermediate on demand. All key material lives in a
//! store directory as PEM files so operating-system trust stores and other
//! tools can consume it directly.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, pathlen=1, keyCertSign+cRLSign)
//!   └── Intermediate CA (signed by Root, pathlen=0, keyCertSign+cRLSign)
//!       └── Server certificate (signed by Intermediate, CA=false, serverAuth)
//! ```
//!
//! The chain moves through three states, [`ChainStatus::Empty`],
//! [`ChainStatus::RootOnly`] and [`ChainStatus::ChainReady`]. Bootstrapping
//! is allowed exactly once; issuing requires a ready chain.
//!
//! # Quick Start
//!
//! ```bash
//! simple-ca ca                                   # root + intermediate
//! simple-ca server '*.example.com' '*.example.com' example.com
//! simple-ca status
//! ```
//!
//! # As a Library
//!
//! ```no_run
//! use simple_ca::{AppConfig, CertificateAuthority, FileStore};
//!
//! fn main() -> simple_ca::Result<()> {
//!     let config = AppConfig::load_or_init("/tmp/ca".as_ref())?;
//!     let store = FileStore::open("/tmp/ca", config.store.lock_timeout())?;
//!     let ca = CertificateAuthority::new(store, config)?;
//!
//!     let (root, _intermediate) = ca.bootstrap()?;
//!     println!("root serial {}", root.serial()?);
//!
//!     let issued = ca.issue_leaf("*.example.com", &["*.example.com"])?;
//!     assert!(!issued.certificate.profile()?.is_ca);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`authority`]: the engine; bootstrap, leaf issuance, status
//! - [`cert_template`]: per-role extension policy and the template builder
//! - [`signer`]: turns a template into a signed X.509 certificate
//! - [`serial`]: serial numbers unique per issuer
//! - [`storage`]: the [`KeyMaterialStore`] contract, with [`file_store`] and
//!   [`memory_store`] implementations
//! - [`certfiles`]: writes an issued certificate, key and full chain to disk
//!
//! # Concurrency
//!
//! Mutating operations hold a store-wide lock. For [`FileStore`] this is an
//! advisory file lock on `<store>/.lock`, so separate `simple-ca` processes
//! are serialized too. Acquisition gives up after the configured timeout with
//! [`CaError::StoreLocked`] instead of blocking forever.
//!
//! # Error Handling
//!
//! Every operation returns [`Result`] with a [`CaError`]. Precondition errors
//! carry a hint for the user:
//!
//! ```no_run
//! # use simple_ca::{CaError, CertificateAuthority, MemoryStore, AppConfig};
//! # let ca = CertificateAuthority::new(MemoryStore::new(), AppConfig::default()).unwrap();
//! match ca.issue_leaf("api.local", &["api.local"]) {
//!     Err(e @ CaError::ChainNotReady { .. }) => eprintln!("{e}: {}", e.guidance().unwrap_or("")),
//!     other => { other.unwrap(); }
//! }
//! ```

pub mod authority;
pub mod cert_template;
pub mod certfiles;
pub mod chain_state;
pub mod configs;
pub mod distinguished_name;
pub mod error;
pub mod file_store;
pub mod key_material;
pub mod memory_store;
pub mod serial;
pub mod signer;
pub mod storage;

pub use authority::{CertificateAuthority, IssuedLeaf};
pub use chain_state::ChainStatus;
pub use configs::AppConfig;
pub use error::{CaError, Result};
pub use file_store::FileStore;
pub use key_material::{Certificate, ExtensionProfile, KeyPair};
pub use memory_store::MemoryStore;
pub use storage::{KeyMaterialStore, Slot};
