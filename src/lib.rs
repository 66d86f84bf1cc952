//! Wallet Custody
//!
//! Account and key custody for an Ethereum wallet:
//! - Encrypted vault lifecycle (create, unlock, lock, restore from phrase)
//! - Session persistence over an extension storage area or a local key-value store
//! - Replay-latest session channels (user, email, vault state)
//! - Authorization digests and message/transaction signing
//!
//! # Security Model
//!
//! - Passwords and recovery phrases are `SecretString`s, moved into the one call that uses them
//! - Private keys never leave the vault engine
//! - Secrets are never logged; `Debug` output of secret-holding types is redacted

pub mod account;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod signing;
pub mod state;
pub mod storage;
pub mod vault;

mod error;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use account::{AccountRecord, AccountService};
pub use bootstrap::BootstrapOutcome;
pub use config::{Config, MNEMONIC_ENV, PASSWORD_ENV};
pub use error::{Error, Result};
pub use signing::{AuthorizationDigest, AuthorizationSignature, SigningService};
pub use state::{AccountStateStore, SessionState};
pub use vault::{VaultController, VaultStatus, VaultView};
