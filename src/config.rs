//! Configuration for the wallet custody service

use crate::engine::KdfParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vault password environment variable name
pub const PASSWORD_ENV: &str = "VAULT_PASSWORD";

/// Recovery phrase environment variable name, read by `restore`
pub const MNEMONIC_ENV: &str = "VAULT_MNEMONIC";

/// Session storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the session file used by the CLI
    pub path: String,
    /// Per-call timeout (milliseconds); unbounded when null
    pub timeout_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "wallet-session.json".to_string(),
            timeout_ms: Some(5_000),
        }
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Signing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Per-call timeout (milliseconds); unbounded when null
    pub timeout_ms: Option<u64>,
    /// Chain id applied to transactions that don't carry one
    pub chain_id: Option<u64>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(30_000),
            chain_id: Some(1),
        }
    }
}

impl SigningConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    /// Argon2id cost for newly sealed vaults
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub signing: SigningConfig,
}

impl Config {
    /// Parse a JSON config document
    pub fn from_json(content: &str) -> crate::Result<Self> {
        serde_json::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}
