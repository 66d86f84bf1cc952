//! Reactive session state
//!
//! Each session field is a [`Channel`]: the latest value is retained and
//! replayed to anyone who subscribes later, and every publish notifies live
//! subscribers synchronously, in the order they subscribed.
//!
//! The store never persists anything. Callers write to storage first and
//! publish afterwards.

use crate::engine::VaultState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

struct ChannelInner<T> {
    value: Option<T>,
    next_id: u64,
    subscribers: Vec<(u64, Callback<T>)>,
}

/// Replay-latest broadcast of a single value
pub struct Channel<T> {
    inner: Arc<Mutex<ChannelInner<T>>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelInner {
                value: None,
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Channel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, `None` while unset
    pub fn current(&self) -> Option<T> {
        locked(&self.inner).value.clone()
    }

    /// Replace the value and notify subscribers
    pub fn publish(&self, value: T) {
        self.set(Some(value));
    }

    /// Return the channel to unset and notify subscribers
    pub fn clear(&self) {
        self.set(None);
    }

    fn set(&self, value: Option<T>) {
        // Callbacks run outside the lock so they may read or publish
        let subscribers: Vec<Callback<T>> = {
            let mut inner = locked(&self.inner);
            inner.value = value.clone();
            inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in subscribers {
            callback(value.as_ref());
        }
    }

    /// Register a callback; it is invoked immediately with the current value
    ///
    /// The subscription lasts until the returned handle is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, current) = {
            let mut inner = locked(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push((id, callback.clone()));
            (id, inner.value.clone())
        };
        callback(current.as_ref());

        let weak: Weak<Mutex<ChannelInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    locked(&inner).subscribers.retain(|(sid, _)| *sid != id);
                }
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        locked(&self.inner).subscribers.len()
    }
}

/// Live subscription; unsubscribes on drop
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Point-in-time copy of all session fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<String>,
    pub email: Option<String>,
    pub vault_state: Option<VaultState>,
}

/// The three observable session channels
#[derive(Default)]
pub struct AccountStateStore {
    user: Channel<String>,
    email: Channel<String>,
    vault_state: Channel<VaultState>,
}

impl AccountStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self) -> &Channel<String> {
        &self.user
    }

    pub fn email(&self) -> &Channel<String> {
        &self.email
    }

    pub fn vault_state(&self) -> &Channel<VaultState> {
        &self.vault_state
    }

    pub fn snapshot(&self) -> SessionState {
        SessionState {
            user: self.user.current(),
            email: self.email.current(),
            vault_state: self.vault_state.current(),
        }
    }
}

impl std::fmt::Debug for AccountStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.snapshot();
        f.debug_struct("AccountStateStore")
            .field("user", &session.user)
            .field("email", &session.email)
            .field("vault_state", &session.vault_state.is_some())
            .finish()
    }
}
