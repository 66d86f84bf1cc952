//! Test doubles shared by the unit tests

use crate::engine::{
    EngineError, Keyring, MessageRequest, SignedTransaction, SimpleKeyring, TransactionParams,
    VaultEngine, VaultState,
};
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Test private key (DO NOT use in production!)
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Scripted engine with a single simple keyring and no recovery phrase
pub struct StubEngine {
    password: String,
    keyring: Arc<SimpleKeyring>,
    unlocked: Mutex<bool>,
    latency: Duration,
    signature: Mutex<Option<Bytes>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubEngine {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            keyring: Arc::new(SimpleKeyring::from_hex_keys(&[TEST_KEY]).unwrap()),
            unlocked: Mutex::new(false),
            latency: Duration::ZERO,
            signature: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Return these bytes from `sign_message` instead of a real signature
    pub fn script_signature(&self, bytes: Bytes) {
        *self.signature.lock().unwrap() = Some(bytes);
    }

    pub fn address(&self) -> Address {
        self.keyring.accounts()[0]
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn blob() -> VaultState {
        VaultState::from_value(json!({ "stub": true }))
    }
}

#[async_trait]
impl VaultEngine for StubEngine {
    async fn create_new_vault_and_keychain(
        &self,
        password: SecretString,
    ) -> Result<VaultState, EngineError> {
        self.enter().await;
        if password.expose_secret().is_empty() {
            return Err(EngineError::Derivation("empty password".to_string()));
        }
        *self.unlocked.lock().unwrap() = true;
        Ok(Self::blob())
    }

    async fn create_new_vault_and_restore(
        &self,
        password: SecretString,
        _mnemonic: SecretString,
    ) -> Result<VaultState, EngineError> {
        self.create_new_vault_and_keychain(password).await
    }

    async fn unlock_keyrings(&self, password: SecretString) -> Result<Vec<Address>, EngineError> {
        self.enter().await;
        if password.expose_secret() != self.password {
            return Err(EngineError::IncorrectPassword);
        }
        *self.unlocked.lock().unwrap() = true;
        Ok(self.keyring.accounts())
    }

    async fn lock(&self) -> Result<(), EngineError> {
        *self.unlocked.lock().unwrap() = false;
        Ok(())
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, EngineError> {
        Ok(if *self.unlocked.lock().unwrap() {
            self.keyring.accounts()
        } else {
            Vec::new()
        })
    }

    async fn sign_message(&self, request: MessageRequest) -> Result<Bytes, EngineError> {
        if request.from != self.address() {
            return Err(EngineError::UnknownAccount(request.from));
        }
        let scripted = self.signature.lock().unwrap().clone();
        Ok(scripted.unwrap_or_else(|| Bytes::from(vec![0u8; 65])))
    }

    async fn sign_transaction(
        &self,
        _tx: TransactionParams,
        from: Address,
    ) -> Result<SignedTransaction, EngineError> {
        Ok(SignedTransaction {
            from,
            hash: B256::ZERO,
            raw: Bytes::new(),
        })
    }

    async fn keyrings_by_type(&self, keyring_type: &str) -> Vec<Arc<dyn Keyring>> {
        if *self.unlocked.lock().unwrap() && keyring_type == self.keyring.keyring_type() {
            vec![self.keyring.clone() as Arc<dyn Keyring>]
        } else {
            Vec::new()
        }
    }

    async fn state(&self) -> Option<VaultState> {
        Some(Self::blob())
    }
}
