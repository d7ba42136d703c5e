//! Error taxonomy for the certificate authority core.
//!
//! Every fallible operation in the library returns [`Result`]. Variants map
//! one-to-one onto the failure categories callers need to distinguish:
//!
//! | Variant | Meaning | Recoverable |
//! |---|---|---|
//! | `NotFound` | predecessor material missing | run the prerequisite step |
//! | `Corrupt` | stored material unreadable | no, inspect the store |
//! | `AlreadyBootstrapped` / `ChainNotReady` | state machine precondition | user error |
//! | `InvalidSubject` | malformed subject or SAN | user error |
//! | `SigningKeyUnavailable` | parent key/cert missing at signing time | no |
//! | `StoreLocked` | another invocation holds the store lock | retry |

use std::path::PathBuf;

use openssl::error::ErrorStack;

use crate::chain_state::ChainStatus;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("no key material stored for {slot}")]
    NotFound { slot: String },

    #[error("stored material for {slot} is corrupt: {reason}")]
    Corrupt { slot: String, reason: String },

    #[error("certificate authority already bootstrapped (chain status: {status})")]
    AlreadyBootstrapped { status: ChainStatus },

    #[error("certificate chain not ready (chain status: {status})")]
    ChainNotReady { status: ChainStatus },

    #[error("invalid subject {name:?}: {reason}")]
    InvalidSubject { name: String, reason: String },

    #[error("signing key for {slot} unavailable: {reason}")]
    SigningKeyUnavailable { slot: String, reason: String },

    #[error("store at {} is locked by another invocation", path.display())]
    StoreLocked { path: PathBuf },

    #[error("{context}: {source}")]
    Crypto {
        context: &'static str,
        #[source]
        source: ErrorStack,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl CaError {
    pub(crate) fn crypto(context: &'static str, source: ErrorStack) -> Self {
        Self::Crypto { context, source }
    }

    pub(crate) fn corrupt(slot: impl ToString, reason: impl ToString) -> Self {
        Self::Corrupt {
            slot: slot.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_subject(name: &str, reason: impl ToString) -> Self {
        Self::InvalidSubject {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreLocked { .. })
    }

    /// Short hint telling the user how to get past a precondition error.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } | Self::ChainNotReady { .. } => {
                Some("run `simple-ca ca` to create the root and intermediate CA first")
            }
            Self::AlreadyBootstrapped {
                status: ChainStatus::RootOnly,
            } => Some("the root CA exists but the intermediate does not; run `simple-ca ca --resume`"),
            Self::AlreadyBootstrapped { .. } => Some(
                "the existing CA is kept; delete the store directory to start over \
                 (this invalidates every certificate it issued)",
            ),
            Self::Corrupt { .. } | Self::SigningKeyUnavailable { .. } => {
                Some("inspect the store directory manually; nothing was overwritten")
            }
            Self::StoreLocked { .. } => Some("another simple-ca process is running; retry shortly"),
            Self::InvalidSubject { .. } => {
                Some("names must be non-empty DNS names (letters, digits, '-', '_', '*')")
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaError>;
