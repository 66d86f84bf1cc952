//! Keyrings held inside the local vault
//!
//! SECURITY: private keys live only in alloy's `PrivateKeySigner`s inside
//! these types.
//! - `Debug` is redacted
//! - Key material leaves only through `serialize`, which feeds vault
//!   encryption and recovery-phrase export
//! - Nothing here logs

use super::{EngineError, Keyring, SerializedKeyring, HD_KEY_TREE, SIMPLE_KEY_PAIR};
use alloy::primitives::{hex, Address};
use alloy::signers::local::coins_bip39::English;
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// BIP-44 account path for Ethereum; account `i` lives at `{path}/{i}`
pub const DEFAULT_HD_PATH: &str = "m/44'/60'/0'/0";

/// Keyring derived from a BIP-39 recovery phrase
pub struct HdKeyring {
    mnemonic: SecretString,
    hd_path: String,
    signers: Vec<PrivateKeySigner>,
}

impl HdKeyring {
    /// Generate a fresh 12-word phrase and derive `number_of_accounts` accounts
    pub fn generate(number_of_accounts: u32) -> Result<Self, EngineError> {
        let entropy: [u8; 16] = rand::random();
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| EngineError::Derivation(format!("mnemonic generation failed: {e}")))?;
        Self::from_mnemonic(
            SecretString::from(mnemonic.to_string()),
            number_of_accounts,
            DEFAULT_HD_PATH,
        )
    }

    /// Rebuild the keyring from an existing phrase
    pub fn from_mnemonic(
        mnemonic: SecretString,
        number_of_accounts: u32,
        hd_path: &str,
    ) -> Result<Self, EngineError> {
        bip39::Mnemonic::parse(mnemonic.expose_secret())
            .map_err(|e| EngineError::Derivation(format!("invalid recovery phrase: {e}")))?;

        let signers = (0..number_of_accounts)
            .map(|index| {
                MnemonicBuilder::<English>::default()
                    .phrase(mnemonic.expose_secret())
                    .derivation_path(format!("{hd_path}/{index}"))?
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Derivation(e.to_string()))?;

        Ok(Self {
            mnemonic,
            hd_path: hd_path.to_string(),
            signers,
        })
    }

    fn data(&self) -> Value {
        json!({
            "mnemonic": self.mnemonic.expose_secret(),
            "numberOfAccounts": self.signers.len(),
            "hdPath": self.hd_path,
        })
    }

    fn from_data(data: Value) -> Result<Self, EngineError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct HdData {
            mnemonic: String,
            number_of_accounts: u32,
            #[serde(default)]
            hd_path: Option<String>,
        }

        let data: HdData = serde_json::from_value(data)
            .map_err(|e| EngineError::MalformedState(format!("HD keyring: {e}")))?;
        let hd_path = data.hd_path.unwrap_or_else(|| DEFAULT_HD_PATH.to_string());
        Self::from_mnemonic(
            SecretString::from(data.mnemonic),
            data.number_of_accounts,
            &hd_path,
        )
    }
}

#[async_trait]
impl Keyring for HdKeyring {
    fn keyring_type(&self) -> &'static str {
        HD_KEY_TREE
    }

    fn accounts(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    async fn serialize(&self) -> Result<SerializedKeyring, EngineError> {
        Ok(SerializedKeyring::new(self.data()))
    }
}

impl std::fmt::Debug for HdKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdKeyring")
            .field("hd_path", &self.hd_path)
            .field("accounts", &self.accounts())
            .field("mnemonic", &"[REDACTED]")
            .finish()
    }
}

/// Keyring of independent imported private keys
pub struct SimpleKeyring {
    signers: Vec<PrivateKeySigner>,
}

impl SimpleKeyring {
    /// Import hex-encoded private keys, with or without `0x`
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, EngineError> {
        let signers = keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                key.strip_prefix("0x")
                    .unwrap_or(key)
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| EngineError::MalformedState(format!("invalid private key: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { signers })
    }

    fn data(&self) -> Value {
        let keys: Vec<String> = self
            .signers
            .iter()
            .map(|s| hex::encode(s.to_bytes()))
            .collect();
        json!(keys)
    }

    fn from_data(data: Value) -> Result<Self, EngineError> {
        let keys: Vec<String> = serde_json::from_value(data)
            .map_err(|e| EngineError::MalformedState(format!("simple keyring: {e}")))?;
        Self::from_hex_keys(&keys)
    }
}

#[async_trait]
impl Keyring for SimpleKeyring {
    fn keyring_type(&self) -> &'static str {
        SIMPLE_KEY_PAIR
    }

    fn accounts(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.address()).collect()
    }

    async fn serialize(&self) -> Result<SerializedKeyring, EngineError> {
        Ok(SerializedKeyring::new(self.data()))
    }
}

impl std::fmt::Debug for SimpleKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleKeyring")
            .field("accounts", &self.accounts())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Keyring record as stored inside the encrypted vault
#[derive(Serialize, Deserialize)]
pub(crate) struct KeyringRecord {
    #[serde(rename = "type")]
    keyring_type: String,
    data: Value,
}

/// A decrypted keyring the engine can sign with
#[derive(Clone, Debug)]
pub(crate) enum LoadedKeyring {
    Hd(Arc<HdKeyring>),
    Simple(Arc<SimpleKeyring>),
}

impl LoadedKeyring {
    pub fn keyring_type(&self) -> &'static str {
        match self {
            LoadedKeyring::Hd(k) => k.keyring_type(),
            LoadedKeyring::Simple(k) => k.keyring_type(),
        }
    }

    pub fn accounts(&self) -> Vec<Address> {
        match self {
            LoadedKeyring::Hd(k) => k.accounts(),
            LoadedKeyring::Simple(k) => k.accounts(),
        }
    }

    pub fn signer(&self, address: &Address) -> Option<&PrivateKeySigner> {
        let signers = match self {
            LoadedKeyring::Hd(k) => &k.signers,
            LoadedKeyring::Simple(k) => &k.signers,
        };
        signers.iter().find(|s| s.address() == *address)
    }

    pub fn as_dyn(&self) -> Arc<dyn Keyring> {
        match self {
            LoadedKeyring::Hd(k) => k.clone(),
            LoadedKeyring::Simple(k) => k.clone(),
        }
    }

    pub fn to_record(&self) -> KeyringRecord {
        let data = match self {
            LoadedKeyring::Hd(k) => k.data(),
            LoadedKeyring::Simple(k) => k.data(),
        };
        KeyringRecord {
            keyring_type: self.keyring_type().to_string(),
            data,
        }
    }

    pub fn from_record(record: KeyringRecord) -> Result<Self, EngineError> {
        match record.keyring_type.as_str() {
            HD_KEY_TREE => Ok(LoadedKeyring::Hd(Arc::new(HdKeyring::from_data(
                record.data,
            )?))),
            SIMPLE_KEY_PAIR => Ok(LoadedKeyring::Simple(Arc::new(SimpleKeyring::from_data(
                record.data,
            )?))),
            other => Err(EngineError::MalformedState(format!(
                "unknown keyring type {other}"
            ))),
        }
    }
}
