//! Vault engine seam
//!
//! The engine owns key derivation, vault encryption and raw signature math.
//! The rest of the crate only orchestrates calls through [`VaultEngine`].
//! [`LocalVaultEngine`] is the bundled implementation.

mod crypto;
mod keyring;
mod local;

pub use crypto::KdfParams;
pub use keyring::{HdKeyring, SimpleKeyring, DEFAULT_HD_PATH};
pub use local::{LocalEngineBuilder, LocalVaultEngine};

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Keyring type holding a BIP-39 mnemonic and its derived accounts
pub const HD_KEY_TREE: &str = "HD Key Tree";

/// Keyring type holding independent raw private keys
pub const SIMPLE_KEY_PAIR: &str = "Simple Key Pair";

/// Failures raised inside a vault engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("incorrect password")]
    IncorrectPassword,

    #[error("no vault has been created")]
    NoVault,

    #[error("vault is locked")]
    Locked,

    #[error("unknown account {0}")]
    UnknownAccount(Address),

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("vault encryption failed: {0}")]
    Encryption(String),

    #[error("malformed vault state: {0}")]
    MalformedState(String),

    #[error("signature generation failed: {0}")]
    Signature(String),
}

/// Opaque engine-serialized vault blob
///
/// Persisted verbatim under the `KEY` storage entry; only the engine that
/// produced it interprets the contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultState(Value);

impl VaultState {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Request to sign a pre-hashed 32-byte message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRequest {
    pub from: Address,
    pub data: B256,
}

/// Caller-supplied parameters of a legacy transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionParams {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` deploys a contract
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    /// EIP-155 replay protection when set
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// Engine-defined signed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedTransaction {
    pub from: Address,
    pub hash: B256,
    /// EIP-2718 encoded transaction, ready for broadcast
    pub raw: Bytes,
}

/// Keyring contents as written into the vault
pub struct SerializedKeyring(Value);

impl SerializedKeyring {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Recovery phrase, present only for HD keyrings
    pub fn mnemonic(&self) -> Option<SecretString> {
        self.0
            .get("mnemonic")
            .and_then(Value::as_str)
            .filter(|phrase| !phrase.is_empty())
            .map(|phrase| SecretString::from(phrase.to_string()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl std::fmt::Debug for SerializedKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerializedKeyring([REDACTED])")
    }
}

/// Group of keys generated under one derivation scheme
#[async_trait]
pub trait Keyring: Send + Sync {
    fn keyring_type(&self) -> &'static str;

    fn accounts(&self) -> Vec<Address>;

    async fn serialize(&self) -> Result<SerializedKeyring, EngineError>;
}

/// External vault engine
#[async_trait]
pub trait VaultEngine: Send + Sync {
    /// Create a fresh vault holding one HD keyring; leaves it unlocked
    async fn create_new_vault_and_keychain(
        &self,
        password: SecretString,
    ) -> Result<VaultState, EngineError>;

    /// Create a fresh vault whose HD keyring is rebuilt from `mnemonic`
    async fn create_new_vault_and_restore(
        &self,
        password: SecretString,
        mnemonic: SecretString,
    ) -> Result<VaultState, EngineError>;

    /// Decrypt the persisted vault and load its keyrings
    async fn unlock_keyrings(&self, password: SecretString) -> Result<Vec<Address>, EngineError>;

    /// Drop decrypted keyrings
    async fn lock(&self) -> Result<(), EngineError>;

    async fn get_accounts(&self) -> Result<Vec<Address>, EngineError>;

    /// Sign `data` as-is; returns `r ‖ s ‖ v` (65 bytes)
    async fn sign_message(&self, request: MessageRequest) -> Result<Bytes, EngineError>;

    async fn sign_transaction(
        &self,
        tx: TransactionParams,
        from: Address,
    ) -> Result<SignedTransaction, EngineError>;

    async fn keyrings_by_type(&self, keyring_type: &str) -> Vec<Arc<dyn Keyring>>;

    /// Current persisted vault blob, if any
    async fn state(&self) -> Option<VaultState>;
}

/// Constructs an engine from previously persisted state
pub trait VaultEngineBuilder: Send + Sync {
    fn build(&self, init_state: Option<VaultState>) -> Result<Arc<dyn VaultEngine>, EngineError>;
}

impl<F> VaultEngineBuilder for F
where
    F: Fn(Option<VaultState>) -> Result<Arc<dyn VaultEngine>, EngineError> + Send + Sync,
{
    fn build(&self, init_state: Option<VaultState>) -> Result<Arc<dyn VaultEngine>, EngineError> {
        self(init_state)
    }
}

pub(crate) fn phrase_word_count(mnemonic: &SecretString) -> usize {
    mnemonic.expose_secret().split_whitespace().count()
}
