use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{CaError, Result};

/// Name of the configuration file inside the store directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

const MIN_RSA_BITS: u32 = 2048;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub identity: IdentityDefaults,
    #[serde(default)]
    pub validity: ValidityPolicy,
    #[serde(default)]
    pub keys: KeyPolicy,
    #[serde(default)]
    pub store: StoreSettings,
}

/// Distinguished name fields shared by the root and intermediate CA.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IdentityDefaults {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default)]
    pub organizational_unit: String,
}

impl Default for IdentityDefaults {
    fn default() -> Self {
        Self {
            country: String::new(),
            state: String::new(),
            locality: String::new(),
            organization: default_organization(),
            organizational_unit: String::new(),
        }
    }
}

fn default_organization() -> String {
    "Simple CA".to_string()
}

/// Validity windows per certificate role, in days.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPolicy {
    #[serde(default = "default_root_days")]
    pub root_days: u32,
    #[serde(default = "default_intermediate_days")]
    pub intermediate_days: u32,
    #[serde(default = "default_leaf_days")]
    pub leaf_days: u32,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            root_days: default_root_days(),
            intermediate_days: default_intermediate_days(),
            leaf_days: default_leaf_days(),
        }
    }
}

fn default_root_days() -> u32 {
    7200 // ~20 years
}

fn default_intermediate_days() -> u32 {
    3600 // ~10 years
}

fn default_leaf_days() -> u32 {
    370
}

/// RSA modulus sizes used when generating key pairs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    #[serde(default = "default_ca_rsa_bits")]
    pub ca_rsa_bits: u32,
    #[serde(default = "default_leaf_rsa_bits")]
    pub leaf_rsa_bits: u32,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            ca_rsa_bits: default_ca_rsa_bits(),
            leaf_rsa_bits: default_leaf_rsa_bits(),
        }
    }
}

fn default_ca_rsa_bits() -> u32 {
    4096
}

fn default_leaf_rsa_bits() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// How long a mutating operation waits for the store lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl StoreSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(config_str)
            .map_err(|e| CaError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration stored in `store_dir`, writing the defaults first
    /// if the store has no configuration file yet.
    pub fn load_or_init(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            return Self::from_file(&path);
        }

        let config = Self::default();
        fs::create_dir_all(store_dir)?;
        let rendered = toml::to_string_pretty(&config)
            .map_err(|e| CaError::Config(format!("failed to render default config: {}", e)))?;
        fs::write(&path, rendered)?;
        tracing::info!(path = %path.display(), "Wrote default configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let v = &self.validity;
        if v.leaf_days == 0 || v.intermediate_days == 0 || v.root_days == 0 {
            return Err(CaError::Config("validity periods must be at least one day".into()));
        }
        if v.leaf_days > v.intermediate_days || v.intermediate_days > v.root_days {
            return Err(CaError::Config(format!(
                "validity must not grow down the chain (root {} >= intermediate {} >= leaf {})",
                v.root_days, v.intermediate_days, v.leaf_days
            )));
        }
        if self.keys.ca_rsa_bits < MIN_RSA_BITS || self.keys.leaf_rsa_bits < MIN_RSA_BITS {
            return Err(CaError::Config(format!(
                "RSA keys must be at least {} bits",
                MIN_RSA_BITS
            )));
        }
        if self.identity.organization.trim().is_empty() {
            return Err(CaError::Config("identity.organization must not be empty".into()));
        }
        Ok(())
    }
}
