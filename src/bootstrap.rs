//! Session bootstrap
//!
//! On startup: load everything from storage, build the vault from the
//! persisted `KEY`, then republish `USER` and `EMAIL`. Nothing here is fatal;
//! on any failure the session starts logged out with an empty vault.

use crate::engine::VaultState;
use crate::state::AccountStateStore;
use crate::storage::{KeySelection, StorageAdapter, StorageKey, StorageMap};
use crate::vault::{VaultController, VaultStatus};
use crate::{Error, Result};
use serde_json::Value;

/// How startup went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Persisted state was loaded; `has_vault` tells whether a vault existed
    Restored { has_vault: bool },
    /// Loading failed and the session fell back to the logged-out default
    LoggedOut,
}

impl BootstrapOutcome {
    /// A persisted vault was found and loaded
    pub fn has_vault(&self) -> bool {
        matches!(self, BootstrapOutcome::Restored { has_vault: true })
    }

    /// Refuse to overwrite a vault that may exist unless `force` is set
    ///
    /// A failed bootstrap counts as "may exist": storage could not be read,
    /// so nothing proves the persisted `KEY` is absent.
    pub fn ensure_replaceable(&self, force: bool) -> Result<()> {
        match self {
            BootstrapOutcome::Restored { has_vault: false } => Ok(()),
            _ if force => Ok(()),
            _ => Err(Error::InvalidArgument(
                "a vault already exists; pass --force to replace it".to_string(),
            )),
        }
    }
}

pub struct SessionBootstrapper<'a> {
    storage: &'a StorageAdapter,
    vault: &'a VaultController,
    state: &'a AccountStateStore,
}

impl<'a> SessionBootstrapper<'a> {
    pub fn new(
        storage: &'a StorageAdapter,
        vault: &'a VaultController,
        state: &'a AccountStateStore,
    ) -> Self {
        Self {
            storage,
            vault,
            state,
        }
    }

    pub async fn run(&self) -> BootstrapOutcome {
        match self.restore().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Session bootstrap failed, continuing logged out");
                self.fall_back().await;
                BootstrapOutcome::LoggedOut
            }
        }
    }

    async fn restore(&self) -> Result<BootstrapOutcome> {
        let mut data = self.storage.load(KeySelection::All).await?;

        let prior = data
            .remove(StorageKey::Key.as_str())
            .filter(|v| !v.is_null())
            .map(VaultState::from_value);
        let has_vault = prior.is_some();
        self.vault.initialize(prior).await?;

        if let Some(user) = string_entry(&data, StorageKey::User) {
            self.state.user().publish(user);
        }
        if let Some(email) = string_entry(&data, StorageKey::Email) {
            self.state.email().publish(email);
        }

        tracing::info!(
            backend = self.storage.backend_name(),
            has_vault,
            "Session restored"
        );
        Ok(BootstrapOutcome::Restored { has_vault })
    }

    async fn fall_back(&self) {
        if self.vault.status().await != VaultStatus::Uninitialized {
            return;
        }
        if let Err(e) = self.vault.initialize(None).await {
            tracing::error!(error = %e, "Could not initialize an empty vault");
        }
    }
}

fn string_entry(data: &StorageMap, key: StorageKey) -> Option<String> {
    match data.get(key.as_str())? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => {
            tracing::debug!(key = %key, kind = ?other, "Ignoring non-string session entry");
            None
        }
    }
}
