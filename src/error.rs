//! Error types for wallet custody

use crate::engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Vault creation failed: {0}")]
    VaultCreation(String),

    #[error("No recoverable phrase: vault holds no HD key tree")]
    NoRecoverablePhrase,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Vault engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Vault controller is not initialized")]
    NotInitialized,

    #[error("Vault controller is already initialized")]
    AlreadyInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
