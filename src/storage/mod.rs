//! Session persistence
//!
//! Two storage backends with incompatible contracts sit behind one
//! [`StorageAdapter`]:
//! - an extension-provided async storage area that reports failures through a
//!   runtime "last error" condition
//! - a synchronous string-keyed store (the ambient fallback) with per-key
//!   get/set and no structured error reporting
//!
//! The backend is chosen once, at construction, by [`StorageAdapter::probe`].
//! Neither backend batches: a multi-entry `save` may partially apply if it is
//! interrupted.

mod file;
mod memory;

pub use file::FileKeyValueStore;
pub use memory::{MemoryKeyValueStore, MemoryStorageArea};

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Key/value entries exchanged with a storage backend
pub type StorageMap = BTreeMap<String, Value>;

/// Keys of the persisted session schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    User,
    Email,
    Key,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [StorageKey::User, StorageKey::Email, StorageKey::Key];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::User => "USER",
            StorageKey::Email => "EMAIL",
            StorageKey::Key => "KEY",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which keys a `load` asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelection {
    All,
    Only(Vec<String>),
}

impl KeySelection {
    pub fn keys(keys: &[StorageKey]) -> Self {
        KeySelection::Only(keys.iter().map(|k| k.as_str().to_string()).collect())
    }
}

/// Failure condition reported by the extension runtime after a storage call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError(pub String);

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Async keyed storage area provided by an extension runtime
#[async_trait]
pub trait ExtensionStorageArea: Send + Sync {
    /// Fetch the selected keys; missing keys are absent from the result
    async fn get(&self, keys: KeySelection) -> std::result::Result<StorageMap, LastError>;

    /// Write all entries
    async fn set(&self, entries: StorageMap) -> std::result::Result<(), LastError>;
}

/// Synchronous string-keyed store (the fallback backend)
///
/// There is no structured error channel here: `set_item` fails the way the
/// underlying primitive fails (quota, I/O), and the adapter passes that
/// through untouched.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> std::io::Result<()>;

    /// Every key currently in the store
    fn keys(&self) -> Vec<String>;
}

/// What the host offers; probed once to pick a backend
#[derive(Clone)]
pub struct StorageEnvironment {
    pub extension: Option<Arc<dyn ExtensionStorageArea>>,
    pub local: Arc<dyn KeyValueStore>,
}

/// Storage backend selected at construction
#[derive(Clone)]
pub enum StorageBackend {
    Extension(Arc<dyn ExtensionStorageArea>),
    Local(Arc<dyn KeyValueStore>),
}

/// Single async get/set contract over either backend
#[derive(Clone)]
pub struct StorageAdapter {
    backend: StorageBackend,
    timeout: Option<Duration>,
}

impl StorageAdapter {
    pub fn new(backend: StorageBackend) -> Self {
        Self {
            backend,
            timeout: None,
        }
    }

    /// Pick the extension storage area if the host provides one, otherwise
    /// fall back to the synchronous store
    pub fn probe(env: StorageEnvironment) -> Self {
        match env.extension {
            Some(area) => {
                tracing::debug!("Using extension storage area");
                Self::new(StorageBackend::Extension(area))
            }
            None => {
                tracing::debug!("Extension storage unavailable, using local key-value store");
                Self::new(StorageBackend::Local(env.local))
            }
        }
    }

    /// Bound every storage call; expiry surfaces as `StorageUnavailable`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            StorageBackend::Extension(_) => "extension",
            StorageBackend::Local(_) => "local",
        }
    }

    /// Load entries
    ///
    /// The local backend ignores `keys` and resolves with its whole key space.
    pub async fn load(&self, keys: KeySelection) -> Result<StorageMap> {
        match &self.backend {
            StorageBackend::Extension(area) => {
                let area = Arc::clone(area);
                self.bounded("load", async move {
                    area.get(keys).await.map_err(|e| {
                        tracing::warn!(error = %e, "Extension storage load failed");
                        Error::StorageUnavailable(e.0)
                    })
                })
                .await
            }
            StorageBackend::Local(store) => Ok(load_local(store.as_ref())),
        }
    }

    /// Save entries, last write wins per key
    pub async fn save(&self, entries: StorageMap) -> Result<()> {
        match &self.backend {
            StorageBackend::Extension(area) => {
                let area = Arc::clone(area);
                self.bounded("save", async move {
                    area.set(entries).await.map_err(|e| {
                        tracing::warn!(error = %e, "Extension storage save failed");
                        Error::StorageUnavailable(e.0)
                    })
                })
                .await
            }
            StorageBackend::Local(store) => save_local(store.as_ref(), &entries),
        }
    }

    /// Save a single session entry
    pub async fn save_entry(&self, key: StorageKey, value: Value) -> Result<()> {
        let mut entries = StorageMap::new();
        entries.insert(key.as_str().to_string(), value);
        self.save(entries).await
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "Storage call timed out");
                Error::StorageUnavailable(format!("storage {op} timed out"))
            })?,
            None => fut.await,
        }
    }
}

impl fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("backend", &self.backend_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn load_local(store: &dyn KeyValueStore) -> StorageMap {
    store
        .keys()
        .into_iter()
        .filter_map(|key| {
            let raw = store.get_item(&key)?;
            let value = decode_local(&key, raw);
            Some((key, value))
        })
        .collect()
}

fn save_local(store: &dyn KeyValueStore, entries: &StorageMap) -> Result<()> {
    for (key, value) in entries {
        let encoded = serde_json::to_string(value)?;
        store.set_item(key, &encoded)?;
    }
    Ok(())
}

/// Values are written as JSON text; anything that does not parse was written
/// by someone else and is kept as a plain string
///
/// `USER` and `EMAIL` only ever hold strings, so a foreign value there that
/// happens to parse as a number or object stays the text it was.
fn decode_local(key: &str, raw: String) -> Value {
    match serde_json::from_str(&raw) {
        Ok(Value::String(s)) => Value::String(s),
        Ok(_) if is_string_key(key) => Value::String(raw),
        Ok(value) => value,
        Err(_) => Value::String(raw),
    }
}

fn is_string_key(key: &str) -> bool {
    key == StorageKey::User.as_str() || key == StorageKey::Email.as_str()
}
