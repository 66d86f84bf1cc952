//! Bundled vault engine
//!
//! Keeps the sealed vault and, while unlocked, the decrypted keyrings. Key
//! derivation and sealing run on the blocking pool so the async runtime is not
//! stalled by Argon2.

use super::crypto::{self, EncryptedVault, KdfParams};
use super::keyring::{HdKeyring, KeyringRecord, LoadedKeyring, DEFAULT_HD_PATH};
use super::{
    EngineError, Keyring, MessageRequest, SignedTransaction, TransactionParams, VaultEngine,
    VaultEngineBuilder, VaultState,
};
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

#[derive(Default)]
struct EngineInner {
    vault: Option<EncryptedVault>,
    keyrings: Vec<LoadedKeyring>,
}

impl EngineInner {
    fn accounts(&self) -> Vec<Address> {
        self.keyrings.iter().flat_map(|k| k.accounts()).collect()
    }

    fn signer(&self, address: &Address) -> Result<&PrivateKeySigner, EngineError> {
        if self.keyrings.is_empty() {
            return Err(if self.vault.is_some() {
                EngineError::Locked
            } else {
                EngineError::NoVault
            });
        }
        self.keyrings
            .iter()
            .find_map(|k| k.signer(address))
            .ok_or(EngineError::UnknownAccount(*address))
    }
}

pub struct LocalVaultEngine {
    kdf: KdfParams,
    inner: RwLock<EngineInner>,
}

impl LocalVaultEngine {
    /// Build from a persisted vault blob, or empty when there is none
    pub fn new(init_state: Option<VaultState>, kdf: KdfParams) -> Result<Self, EngineError> {
        let vault = init_state
            .map(|state| serde_json::from_value::<EncryptedVault>(state.into_value()))
            .transpose()
            .map_err(|e| EngineError::MalformedState(e.to_string()))?;

        Ok(Self {
            kdf,
            inner: RwLock::new(EngineInner {
                vault,
                keyrings: Vec::new(),
            }),
        })
    }

    /// Seal `keyrings` under `password`, replacing any existing vault
    async fn replace_vault(
        &self,
        password: SecretString,
        keyrings: Vec<LoadedKeyring>,
    ) -> Result<VaultState, EngineError> {
        let records: Vec<KeyringRecord> = keyrings.iter().map(LoadedKeyring::to_record).collect();
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&records).map_err(|e| EngineError::Encryption(e.to_string()))?,
        );

        let kdf = self.kdf;
        let sealed = blocking(move || crypto::seal(&password, &plaintext, kdf)).await?;
        let state = serde_json::to_value(&sealed)
            .map(VaultState::from_value)
            .map_err(|e| EngineError::Encryption(e.to_string()))?;

        let mut inner = self.inner.write().await;
        inner.vault = Some(sealed);
        inner.keyrings = keyrings;
        Ok(state)
    }
}

/// Run CPU-heavy key work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Derivation(format!("key derivation task failed: {e}")))?
}

#[async_trait]
impl VaultEngine for LocalVaultEngine {
    async fn create_new_vault_and_keychain(
        &self,
        password: SecretString,
    ) -> Result<VaultState, EngineError> {
        let keyring = blocking(|| HdKeyring::generate(1)).await?;
        self.replace_vault(password, vec![LoadedKeyring::Hd(Arc::new(keyring))])
            .await
    }

    async fn create_new_vault_and_restore(
        &self,
        password: SecretString,
        mnemonic: SecretString,
    ) -> Result<VaultState, EngineError> {
        let keyring = blocking(move || HdKeyring::from_mnemonic(mnemonic, 1, DEFAULT_HD_PATH)).await?;
        self.replace_vault(password, vec![LoadedKeyring::Hd(Arc::new(keyring))])
            .await
    }

    async fn unlock_keyrings(&self, password: SecretString) -> Result<Vec<Address>, EngineError> {
        let sealed = self
            .inner
            .read()
            .await
            .vault
            .clone()
            .ok_or(EngineError::NoVault)?;

        let keyrings = blocking(move || {
            let plaintext = crypto::open(&password, &sealed)?;
            let records: Vec<KeyringRecord> = serde_json::from_slice(&plaintext)
                .map_err(|e| EngineError::MalformedState(e.to_string()))?;
            records
                .into_iter()
                .map(LoadedKeyring::from_record)
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;

        let mut inner = self.inner.write().await;
        inner.keyrings = keyrings;
        Ok(inner.accounts())
    }

    async fn lock(&self) -> Result<(), EngineError> {
        self.inner.write().await.keyrings.clear();
        Ok(())
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, EngineError> {
        Ok(self.inner.read().await.accounts())
    }

    async fn sign_message(&self, request: MessageRequest) -> Result<Bytes, EngineError> {
        let inner = self.inner.read().await;
        let signer = inner.signer(&request.from)?;
        let signature = signer
            .sign_hash_sync(&request.data)
            .map_err(|e| EngineError::Signature(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    async fn sign_transaction(
        &self,
        tx: TransactionParams,
        from: Address,
    ) -> Result<SignedTransaction, EngineError> {
        let inner = self.inner.read().await;
        let signer = inner.signer(&from)?;

        let tx = TxLegacy {
            chain_id: tx.chain_id,
            nonce: tx.nonce,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            to: tx.to.map(TxKind::Call).unwrap_or(TxKind::Create),
            value: tx.value,
            input: tx.data,
        };
        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| EngineError::Signature(e.to_string()))?;
        let envelope = TxEnvelope::Legacy(tx.into_signed(signature));

        Ok(SignedTransaction {
            from,
            hash: *envelope.tx_hash(),
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }

    async fn keyrings_by_type(&self, keyring_type: &str) -> Vec<Arc<dyn Keyring>> {
        self.inner
            .read()
            .await
            .keyrings
            .iter()
            .filter(|k| k.keyring_type() == keyring_type)
            .map(LoadedKeyring::as_dyn)
            .collect()
    }

    async fn state(&self) -> Option<VaultState> {
        let inner = self.inner.read().await;
        let sealed = inner.vault.as_ref()?;
        serde_json::to_value(sealed).ok().map(VaultState::from_value)
    }
}

impl std::fmt::Debug for LocalVaultEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVaultEngine")
            .field("kdf", &self.kdf)
            .field("keyrings", &"[REDACTED]")
            .finish()
    }
}

/// Builds [`LocalVaultEngine`]s with fixed KDF costs
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngineBuilder {
    kdf: KdfParams,
}

impl LocalEngineBuilder {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }
}

impl VaultEngineBuilder for LocalEngineBuilder {
    fn build(&self, init_state: Option<VaultState>) -> Result<Arc<dyn VaultEngine>, EngineError> {
        Ok(Arc::new(LocalVaultEngine::new(init_state, self.kdf)?))
    }
}
