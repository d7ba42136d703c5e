//! Lifecycle states of a certificate authority store.
//!
//! ```text
//! Empty ──bootstrap──▶ RootOnly ──(same call)──▶ ChainReady
//! ```
//!
//! `RootOnly` is normally transient: it is only observable from outside the
//! store lock if a bootstrap was interrupted after the root was persisted.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// No root certificate.
    Empty,
    /// Root present, intermediate missing.
    RootOnly,
    /// Root and intermediate present; leaf certificates can be issued.
    ChainReady,
}

impl ChainStatus {
    pub fn from_presence(root: bool, intermediate: bool) -> Option<Self> {
        match (root, intermediate) {
            (false, false) => Some(Self::Empty),
            (true, false) => Some(Self::RootOnly),
            (true, true) => Some(Self::ChainReady),
            // An intermediate without the root that signed it cannot be trusted
            (false, true) => None,
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::ChainReady
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::RootOnly => "root-only",
            Self::ChainReady => "chain-ready",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_presence() {
        assert_eq!(ChainStatus::from_presence(false, false), Some(ChainStatus::Empty));
        assert_eq!(ChainStatus::from_presence(true, false), Some(ChainStatus::RootOnly));
        assert_eq!(ChainStatus::from_presence(true, true), Some(ChainStatus::ChainReady));
        assert_eq!(ChainStatus::from_presence(false, true), None);
    }

    #[test]
    fn test_only_chain_ready_is_ready() {
        assert!(ChainStatus::ChainReady.is_ready());
        assert!(!ChainStatus::RootOnly.is_ready());
        assert!(!ChainStatus::Empty.is_ready());
    }
}
