//! Account service
//!
//! Owns one of each component and runs the account flows. Every session
//! field is written to storage first and published only once the write
//! succeeded, so observers never see state that a restart would lose.
//! Flows that replace or unlock the vault hold one lock from the engine call
//! through the `KEY` write, so the persisted vault is always the live one.
//! `USER`, `EMAIL` and `KEY` are written one at a time; a failure part way
//! through leaves the earlier entries persisted.

use crate::bootstrap::{BootstrapOutcome, SessionBootstrapper};
use crate::config::Config;
use crate::engine::{
    LocalEngineBuilder, SignedTransaction, TransactionParams, VaultEngineBuilder, VaultState,
};
use crate::signing::{AuthorizationDigest, AuthorizationSignature, SigningService};
use crate::state::AccountStateStore;
use crate::storage::{StorageAdapter, StorageEnvironment, StorageKey};
use crate::vault::{VaultController, VaultView};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A created account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub username: String,
    pub email: String,
    pub active_addresses: Vec<Address>,
}

impl AccountRecord {
    pub fn active_address(&self) -> Option<Address> {
        self.active_addresses.first().copied()
    }
}

pub struct AccountService {
    storage: StorageAdapter,
    vault: Arc<VaultController>,
    state: AccountStateStore,
    signing: SigningService,
    default_chain_id: Option<u64>,
    flow: Mutex<()>,
}

impl AccountService {
    pub fn new(storage: StorageAdapter, builder: Arc<dyn VaultEngineBuilder>) -> Self {
        let vault = Arc::new(VaultController::new(builder));
        Self {
            storage,
            signing: SigningService::new(vault.clone()),
            vault,
            state: AccountStateStore::new(),
            default_chain_id: None,
            flow: Mutex::new(()),
        }
    }

    /// Wire up the bundled engine and probed storage from `config`
    pub fn from_config(config: &Config, env: StorageEnvironment) -> Self {
        let mut storage = StorageAdapter::probe(env);
        if let Some(timeout) = config.storage.timeout() {
            storage = storage.with_timeout(timeout);
        }

        let builder = Arc::new(LocalEngineBuilder::new(config.kdf));
        let mut service = Self::new(storage, builder);
        if let Some(timeout) = config.signing.timeout() {
            service.signing = SigningService::new(service.vault.clone()).with_timeout(timeout);
        }
        service.default_chain_id = config.signing.chain_id;
        service
    }

    /// Load the persisted session; never fails
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        SessionBootstrapper::new(&self.storage, &self.vault, &self.state)
            .run()
            .await
    }

    /// Create a vault for a new account and persist the session
    pub async fn create_account(
        &self,
        email: &str,
        username: &str,
        password: SecretString,
    ) -> Result<AccountRecord> {
        if username.trim().is_empty() {
            return Err(Error::InvalidArgument("username must not be empty".to_string()));
        }
        if !email.contains('@') {
            return Err(Error::InvalidArgument(format!("not an email address: {email}")));
        }

        let _flow = self.flow.lock().await;
        let vault_state = self.vault.create_vault(password).await?;
        self.persist_vault_state(vault_state).await?;

        self.storage
            .save_entry(StorageKey::User, Value::String(username.to_string()))
            .await?;
        self.state.user().publish(username.to_string());

        self.storage
            .save_entry(StorageKey::Email, Value::String(email.to_string()))
            .await?;
        self.state.email().publish(email.to_string());

        let record = AccountRecord {
            username: username.to_string(),
            email: email.to_string(),
            active_addresses: self.vault.view().await.active_addresses,
        };
        tracing::info!(
            username = %record.username,
            address = ?record.active_address(),
            "Account created"
        );
        Ok(record)
    }

    /// Unlock the persisted vault and refresh the session
    ///
    /// A wrong password fails with `InvalidCredentials` and leaves the active
    /// addresses as they were.
    pub async fn login(&self, password: SecretString) -> Result<Vec<Address>> {
        let _flow = self.flow.lock().await;
        let addresses = self.vault.unlock(password).await?;
        if let Some(vault_state) = self.vault.vault_state().await? {
            self.persist_vault_state(vault_state).await?;
        }
        Ok(addresses)
    }

    /// Replace the vault with one rebuilt from a recovery phrase
    pub async fn restore_account(
        &self,
        password: SecretString,
        mnemonic: SecretString,
    ) -> Result<Vec<Address>> {
        let _flow = self.flow.lock().await;
        let vault_state = self.vault.restore_vault(password, mnemonic).await?;
        self.persist_vault_state(vault_state).await?;
        Ok(self.vault.view().await.active_addresses)
    }

    pub async fn lock(&self) -> Result<()> {
        let _flow = self.flow.lock().await;
        self.vault.lock().await
    }

    pub async fn export_mnemonic(&self) -> Result<SecretString> {
        self.vault.export_mnemonic().await
    }

    /// The persisted account, once a user and an email are known
    pub async fn account(&self) -> Option<AccountRecord> {
        let session = self.state.snapshot();
        Some(AccountRecord {
            username: session.user?,
            email: session.email?,
            active_addresses: self.vault.view().await.active_addresses,
        })
    }

    pub fn build_authorization_digest(
        &self,
        party_a: Address,
        party_b: Address,
        nonce: U256,
    ) -> AuthorizationDigest {
        self.signing.build_authorization_digest(party_a, party_b, nonce)
    }

    pub async fn sign_authorization(
        &self,
        digest: &AuthorizationDigest,
    ) -> Result<AuthorizationSignature> {
        self.signing.sign_authorization(digest).await
    }

    /// Sign with the active address, applying the configured chain id if unset
    pub async fn sign_transaction(
        &self,
        mut params: TransactionParams,
    ) -> Result<SignedTransaction> {
        if params.chain_id.is_none() {
            params.chain_id = self.default_chain_id;
        }
        self.signing.sign_transaction(params).await
    }

    pub async fn view(&self) -> VaultView {
        self.vault.view().await
    }

    pub fn state(&self) -> &AccountStateStore {
        &self.state
    }

    pub fn signing(&self) -> &SigningService {
        &self.signing
    }

    pub fn storage_backend(&self) -> &'static str {
        self.storage.backend_name()
    }

    async fn persist_vault_state(&self, vault_state: VaultState) -> Result<()> {
        self.storage
            .save_entry(StorageKey::Key, vault_state.as_value().clone())
            .await?;
        self.state.vault_state().publish(vault_state);
        Ok(())
    }
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService")
            .field("storage", &self.storage)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
