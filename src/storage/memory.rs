//! In-memory storage backends

use super::{ExtensionStorageArea, KeySelection, KeyValueStore, LastError, StorageMap};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extension-style async storage area held in memory
///
/// A failure can be injected with [`fail_with`](Self::fail_with); every call
/// then reports it as the runtime's last error until it is cleared.
#[derive(Debug, Default)]
pub struct MemoryStorageArea {
    entries: Mutex<StorageMap>,
    last_error: Mutex<Option<String>>,
    latency: Option<Duration>,
}

impl MemoryStorageArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, for exercising timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *locked(&self.last_error) = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *locked(&self.last_error) = None;
    }

    async fn settle(&self) -> Result<(), LastError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match locked(&self.last_error).clone() {
            Some(message) => Err(LastError(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExtensionStorageArea for MemoryStorageArea {
    async fn get(&self, keys: KeySelection) -> Result<StorageMap, LastError> {
        self.settle().await?;
        let entries = locked(&self.entries);
        Ok(match keys {
            KeySelection::All => entries.clone(),
            KeySelection::Only(keys) => keys
                .into_iter()
                .filter_map(|k| entries.get(&k).map(|v| (k, v.clone())))
                .collect(),
        })
    }

    async fn set(&self, new_entries: StorageMap) -> Result<(), LastError> {
        self.settle().await?;
        locked(&self.entries).extend(new_entries);
        Ok(())
    }
}

/// Synchronous string store held in memory
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> Option<String> {
        locked(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> std::io::Result<()> {
        locked(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        locked(&self.items).keys().cloned().collect()
    }
}
