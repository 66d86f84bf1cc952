//! Vault lifecycle controller
//!
//! State machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Locked <-> Unlocked
//! ```
//!
//! Mutating calls (`create_vault`, `restore_vault`, `unlock`, `lock`) queue
//! behind one async mutex so two of them never race to replace the persisted
//! vault. Status and the active address list live under one lock and are
//! always read together.

use crate::engine::{
    phrase_word_count, EngineError, VaultEngine, VaultEngineBuilder, VaultState, HD_KEY_TREE,
};
use crate::{Error, Result};
use alloy::primitives::Address;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Uninitialized,
    Initializing,
    Locked,
    Unlocked,
}

/// Consistent read of the controller's status and addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultView {
    pub status: VaultStatus,
    pub active_addresses: Vec<Address>,
}

impl VaultView {
    /// The implicit signer: first address of the unlocked vault
    pub fn active_address(&self) -> Option<Address> {
        self.active_addresses.first().copied()
    }
}

struct ControllerState {
    status: VaultStatus,
    engine: Option<Arc<dyn VaultEngine>>,
    active_addresses: Vec<Address>,
}

pub struct VaultController {
    builder: Arc<dyn VaultEngineBuilder>,
    state: RwLock<ControllerState>,
    mutation: Mutex<()>,
}

impl VaultController {
    pub fn new(builder: Arc<dyn VaultEngineBuilder>) -> Self {
        Self {
            builder,
            state: RwLock::new(ControllerState {
                status: VaultStatus::Uninitialized,
                engine: None,
                active_addresses: Vec::new(),
            }),
            mutation: Mutex::new(()),
        }
    }

    /// Build the engine from persisted state, or an empty vault
    ///
    /// Ends `Locked` whether or not a prior vault existed. Only one vault is
    /// active per controller, so a second call fails.
    pub async fn initialize(&self, prior: Option<VaultState>) -> Result<()> {
        let _guard = self.mutation.lock().await;
        {
            let mut state = self.state.write().await;
            if state.status != VaultStatus::Uninitialized {
                return Err(Error::AlreadyInitialized);
            }
            state.status = VaultStatus::Initializing;
        }

        let had_vault = prior.is_some();
        let built = self.builder.build(prior);

        let mut state = self.state.write().await;
        match built {
            Ok(engine) => {
                state.engine = Some(engine);
                state.status = VaultStatus::Locked;
                tracing::info!(had_vault, "Vault controller initialized");
                Ok(())
            }
            Err(e) => {
                state.status = VaultStatus::Uninitialized;
                tracing::warn!(error = %e, "Vault engine construction failed");
                Err(Error::Engine(e))
            }
        }
    }

    /// Create a new vault with one HD keyring and unlock it
    pub async fn create_vault(&self, password: SecretString) -> Result<VaultState> {
        let _guard = self.mutation.lock().await;
        let engine = self.engine().await?;

        let vault_state = engine
            .create_new_vault_and_keychain(password)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Vault creation rejected by engine");
                Error::VaultCreation(e.to_string())
            })?;

        self.mark_unlocked(engine.as_ref()).await?;
        Ok(vault_state)
    }

    /// Replace the vault with one rebuilt from a recovery phrase and unlock it
    pub async fn restore_vault(
        &self,
        password: SecretString,
        mnemonic: SecretString,
    ) -> Result<VaultState> {
        let _guard = self.mutation.lock().await;
        let engine = self.engine().await?;

        tracing::info!(words = phrase_word_count(&mnemonic), "Restoring vault from recovery phrase");
        let vault_state = engine
            .create_new_vault_and_restore(password, mnemonic)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Vault restore rejected by engine");
                Error::VaultCreation(e.to_string())
            })?;

        self.mark_unlocked(engine.as_ref()).await?;
        Ok(vault_state)
    }

    /// Verify `password` against the persisted vault and unlock it
    ///
    /// A wrong password fails with `InvalidCredentials` and changes nothing.
    pub async fn unlock(&self, password: SecretString) -> Result<Vec<Address>> {
        let _guard = self.mutation.lock().await;
        let engine = self.engine().await?;

        match engine.unlock_keyrings(password).await {
            Ok(_) => {}
            Err(EngineError::IncorrectPassword) => {
                tracing::warn!("Vault unlock failed: incorrect password");
                return Err(Error::InvalidCredentials);
            }
            Err(e) => return Err(Error::Engine(e)),
        }

        self.mark_unlocked(engine.as_ref()).await
    }

    /// Drop decrypted keys; a no-op unless unlocked
    pub async fn lock(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        let engine = self.engine().await?;
        if self.status().await != VaultStatus::Unlocked {
            return Ok(());
        }

        engine.lock().await?;
        let mut state = self.state.write().await;
        state.status = VaultStatus::Locked;
        state.active_addresses.clear();
        tracing::info!("Vault locked");
        Ok(())
    }

    /// Recovery phrase of the first HD keyring
    ///
    /// The phrase grants full control of the vault; never log or persist it.
    pub async fn export_mnemonic(&self) -> Result<SecretString> {
        let engine = self.engine().await?;
        let keyring = engine
            .keyrings_by_type(HD_KEY_TREE)
            .await
            .into_iter()
            .next()
            .ok_or(Error::NoRecoverablePhrase)?;

        let serialized = keyring.serialize().await?;
        let phrase = serialized.mnemonic().ok_or(Error::NoRecoverablePhrase)?;
        tracing::info!(words = phrase_word_count(&phrase), "Recovery phrase exported");
        Ok(phrase)
    }

    pub async fn status(&self) -> VaultStatus {
        self.state.read().await.status
    }

    pub async fn view(&self) -> VaultView {
        let state = self.state.read().await;
        VaultView {
            status: state.status,
            active_addresses: state.active_addresses.clone(),
        }
    }

    pub async fn active_address(&self) -> Option<Address> {
        self.state.read().await.active_addresses.first().copied()
    }

    /// Current persisted vault blob, if a vault exists
    pub async fn vault_state(&self) -> Result<Option<VaultState>> {
        Ok(self.engine().await?.state().await)
    }

    /// Engine plus active addresses, only while unlocked
    pub(crate) async fn unlocked_engine(&self) -> Option<(Arc<dyn VaultEngine>, Vec<Address>)> {
        let state = self.state.read().await;
        match (&state.engine, state.status) {
            (Some(engine), VaultStatus::Unlocked) => {
                Some((engine.clone(), state.active_addresses.clone()))
            }
            _ => None,
        }
    }

    async fn engine(&self) -> Result<Arc<dyn VaultEngine>> {
        self.state
            .read()
            .await
            .engine
            .clone()
            .ok_or(Error::NotInitialized)
    }

    async fn mark_unlocked(&self, engine: &dyn VaultEngine) -> Result<Vec<Address>> {
        let addresses = engine.get_accounts().await?;
        let mut state = self.state.write().await;
        state.status = VaultStatus::Unlocked;
        state.active_addresses = addresses.clone();
        match addresses.first() {
            Some(active) => tracing::info!(address = %active, accounts = addresses.len(), "Vault unlocked"),
            None => tracing::warn!("Vault unlocked but holds no accounts"),
        }
        Ok(addresses)
    }
}

impl std::fmt::Debug for VaultController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultController").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{KdfParams, LocalEngineBuilder};
    use crate::testing::StubEngine;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn local_controller() -> VaultController {
        VaultController::new(Arc::new(LocalEngineBuilder::new(KdfParams::insecure_fast())))
    }

    fn stub_controller(engine: Arc<StubEngine>) -> VaultController {
        VaultController::new(Arc::new(
            move |_prior: Option<VaultState>| -> std::result::Result<Arc<dyn VaultEngine>, EngineError> {
                Ok(engine.clone())
            },
        ))
    }

    #[tokio::test]
    async fn initialize_without_prior_state_ends_locked() {
        let controller = local_controller();
        assert_eq!(controller.status().await, VaultStatus::Uninitialized);

        controller.initialize(None).await.unwrap();
        assert_eq!(controller.status().await, VaultStatus::Locked);
        assert!(controller.vault_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        let err = controller.initialize(None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
        assert_eq!(controller.status().await, VaultStatus::Locked);
    }

    #[tokio::test]
    async fn failed_build_returns_to_uninitialized() {
        let controller = local_controller();
        let garbage = VaultState::from_value(serde_json::json!("not a vault"));

        let err = controller.initialize(Some(garbage)).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::MalformedState(_))));
        assert_eq!(controller.status().await, VaultStatus::Uninitialized);
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let controller = local_controller();
        let err = controller.create_vault(password("pw1")).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn create_vault_unlocks_with_active_address() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        let vault_state = controller.create_vault(password("pw1")).await.unwrap();
        let view = controller.view().await;

        assert_eq!(view.status, VaultStatus::Unlocked);
        assert_eq!(view.active_addresses.len(), 1);
        assert_eq!(view.active_address(), controller.active_address().await);
        assert_eq!(controller.vault_state().await.unwrap(), Some(vault_state));
    }

    #[tokio::test]
    async fn engine_rejection_is_a_creation_error() {
        let controller = stub_controller(Arc::new(StubEngine::new("pw1")));
        controller.initialize(None).await.unwrap();

        let err = controller.create_vault(password("")).await.unwrap_err();
        assert!(matches!(err, Error::VaultCreation(_)));
        assert_eq!(controller.status().await, VaultStatus::Locked);
    }

    #[tokio::test]
    async fn persisted_vault_unlocks_after_restart() {
        let first = local_controller();
        first.initialize(None).await.unwrap();
        let vault_state = first.create_vault(password("pw1")).await.unwrap();
        let expected = first.view().await.active_addresses;

        let second = local_controller();
        second.initialize(Some(vault_state)).await.unwrap();
        assert!(second.active_address().await.is_none());

        let addresses = second.unlock(password("pw1")).await.unwrap();
        assert_eq!(addresses, expected);
        assert_eq!(second.status().await, VaultStatus::Unlocked);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials_and_changes_nothing() {
        let first = local_controller();
        first.initialize(None).await.unwrap();
        let vault_state = first.create_vault(password("pw1")).await.unwrap();

        let second = local_controller();
        second.initialize(Some(vault_state)).await.unwrap();

        let err = second.unlock(password("wrong")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
        assert_eq!(
            second.view().await,
            VaultView {
                status: VaultStatus::Locked,
                active_addresses: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn unlock_without_vault_passes_engine_error_through() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        let err = controller.unlock(password("pw1")).await.unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::NoVault)));
    }

    #[tokio::test]
    async fn lock_clears_addresses() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();
        controller.create_vault(password("pw1")).await.unwrap();

        controller.lock().await.unwrap();
        let view = controller.view().await;
        assert_eq!(view.status, VaultStatus::Locked);
        assert!(view.active_address().is_none());

        controller.unlock(password("pw1")).await.unwrap();
        assert_eq!(controller.status().await, VaultStatus::Unlocked);
    }

    #[tokio::test]
    async fn exports_phrase_of_hd_keyring() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();
        controller.create_vault(password("pw1")).await.unwrap();

        let phrase = controller.export_mnemonic().await.unwrap();
        assert_eq!(phrase.expose_secret().split_whitespace().count(), 12);
    }

    #[tokio::test]
    async fn restore_reproduces_exported_phrase() {
        let phrase = "test test test test test test test test test test test junk";
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        controller
            .restore_vault(password("pw2"), SecretString::from(phrase.to_string()))
            .await
            .unwrap();
        assert_eq!(
            controller.export_mnemonic().await.unwrap().expose_secret(),
            phrase
        );
        assert_eq!(
            format!("{:?}", controller.active_address().await.unwrap()).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn invalid_restore_phrase_is_a_creation_error() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        let err = controller
            .restore_vault(password("pw2"), SecretString::from("one two three".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VaultCreation(_)));
    }

    #[tokio::test]
    async fn locked_vault_has_no_recoverable_phrase() {
        let controller = local_controller();
        controller.initialize(None).await.unwrap();

        let err = controller.export_mnemonic().await.unwrap_err();
        assert!(matches!(err, Error::NoRecoverablePhrase));
    }

    #[tokio::test]
    async fn simple_keyring_only_has_no_recoverable_phrase() {
        let controller = stub_controller(Arc::new(StubEngine::new("pw1")));
        controller.initialize(None).await.unwrap();
        controller.unlock(password("pw1")).await.unwrap();

        let err = controller.export_mnemonic().await.unwrap_err();
        assert!(matches!(err, Error::NoRecoverablePhrase));
    }

    #[tokio::test]
    async fn mutating_calls_never_overlap() {
        let engine = Arc::new(StubEngine::new("pw1").with_latency(Duration::from_millis(20)));
        let controller = stub_controller(engine.clone());
        controller.initialize(None).await.unwrap();

        let (created, unlocked, again) = tokio::join!(
            controller.create_vault(password("pw1")),
            controller.unlock(password("pw1")),
            controller.unlock(password("wrong")),
        );

        tokio_test::assert_ok!(created);
        tokio_test::assert_ok!(unlocked);
        assert!(matches!(again, Err(Error::InvalidCredentials)));
        assert_eq!(
            engine
                .max_in_flight
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
