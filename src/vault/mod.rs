//! Vault lifecycle
//!
//! The controller is the only owner of the vault engine. Passwords pass
//! through by value and are never stored.

mod controller;

pub use controller::{VaultController, VaultStatus, VaultView};
