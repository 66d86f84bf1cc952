//! Wallet Custody CLI
//!
//! Command-line interface over a file-backed session. Every command starts by
//! restoring the persisted session; commands that need keys unlock with the
//! password from `VAULT_PASSWORD`.

use alloy::primitives::{Address, Bytes, U256};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wallet_custody::engine::TransactionParams;
use wallet_custody::storage::{FileKeyValueStore, StorageEnvironment};
use wallet_custody::{AccountService, Config, Error, Result, MNEMONIC_ENV, PASSWORD_ENV};

#[derive(Parser)]
#[command(name = "wallet-custody")]
#[command(about = "Encrypted key vault, session storage and Ethereum signing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the session file from the config
    #[arg(short, long, global = true)]
    session: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account and vault (password from VAULT_PASSWORD)
    Create {
        #[arg(long)]
        email: String,

        #[arg(long)]
        username: String,

        /// Replace an existing vault
        #[arg(long)]
        force: bool,
    },

    /// Unlock the vault and print its addresses
    Login,

    /// Show the persisted session
    Status,

    /// Build an authorization digest without signing it
    Digest {
        #[arg(long)]
        party_a: String,

        #[arg(long)]
        party_b: String,

        /// Nonce (decimal or 0x-prefixed hex)
        #[arg(long)]
        nonce: String,
    },

    /// Sign an authorization digest with the active address
    SignAuth {
        #[arg(long)]
        party_a: String,

        #[arg(long)]
        party_b: String,

        /// Nonce (decimal or 0x-prefixed hex)
        #[arg(long)]
        nonce: String,
    },

    /// Sign a legacy transaction with the active address
    SignTx {
        /// Destination address; omit for contract creation
        #[arg(long)]
        to: Option<String>,

        #[arg(long)]
        nonce: u64,

        /// Gas price in wei
        #[arg(long)]
        gas_price: u128,

        #[arg(long, default_value_t = 21_000)]
        gas_limit: u64,

        /// Value in wei (defaults to 0)
        #[arg(long)]
        value: Option<String>,

        /// Calldata (hex encoded, with or without 0x prefix)
        #[arg(long)]
        data: Option<String>,

        /// Chain id (defaults to the configured one)
        #[arg(long)]
        chain_id: Option<u64>,
    },

    /// Print the recovery phrase of the HD keyring
    ExportMnemonic,

    /// Rebuild the vault from a recovery phrase (VAULT_MNEMONIC)
    Restore {
        /// Replace an existing vault
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let (plain, json) = if cli.json_logs {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    // Load config
    let mut config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("{}: {e}", config_path.display())))?;
        Config::from_json(&content)?
    } else {
        Config::default()
    };
    if let Some(session) = &cli.session {
        config.storage.path = session.display().to_string();
    }

    if let Commands::Config = cli.command {
        print_json(&config)?;
        return Ok(());
    }

    let store = FileKeyValueStore::open(&config.storage.path)?;
    let service = AccountService::from_config(
        &config,
        StorageEnvironment {
            extension: None,
            local: Arc::new(store),
        },
    );
    let outcome = service.bootstrap().await;

    match cli.command {
        Commands::Create {
            email,
            username,
            force,
        } => {
            outcome.ensure_replaceable(force)?;
            let record = service
                .create_account(&email, &username, secret_from_env(PASSWORD_ENV)?)
                .await?;
            print_json(&record)?;
        }
        Commands::Login => {
            let addresses = service.login(secret_from_env(PASSWORD_ENV)?).await?;
            print_json(&addresses)?;
        }
        Commands::Status => {
            let session = service.state().snapshot();
            print_json(&serde_json::json!({
                "backend": service.storage_backend(),
                "session_file": config.storage.path,
                "user": session.user,
                "email": session.email,
                "has_vault": outcome.has_vault(),
                "vault": service.view().await,
            }))?;
        }
        Commands::Digest {
            party_a,
            party_b,
            nonce,
        } => {
            let digest = service.build_authorization_digest(
                parse_address(&party_a)?,
                parse_address(&party_b)?,
                parse_u256(&nonce)?,
            );
            print_json(&digest)?;
        }
        Commands::SignAuth {
            party_a,
            party_b,
            nonce,
        } => {
            let digest = service.build_authorization_digest(
                parse_address(&party_a)?,
                parse_address(&party_b)?,
                parse_u256(&nonce)?,
            );
            service.login(secret_from_env(PASSWORD_ENV)?).await?;
            let signature = service.sign_authorization(&digest).await?;
            print_json(&serde_json::json!({
                "digest": digest,
                "signature": signature,
                "signer": service.view().await.active_address(),
            }))?;
        }
        Commands::SignTx {
            to,
            nonce,
            gas_price,
            gas_limit,
            value,
            data,
            chain_id,
        } => {
            let params = TransactionParams {
                nonce,
                gas_price,
                gas_limit,
                to: to.as_deref().map(parse_address).transpose()?,
                value: value.as_deref().map(parse_u256).transpose()?.unwrap_or_default(),
                data: data.as_deref().map(parse_bytes).transpose()?.unwrap_or_default(),
                chain_id,
            };
            service.login(secret_from_env(PASSWORD_ENV)?).await?;
            let signed = service.sign_transaction(params).await?;
            print_json(&signed)?;
        }
        Commands::ExportMnemonic => {
            service.login(secret_from_env(PASSWORD_ENV)?).await?;
            let phrase = service.export_mnemonic().await?;
            eprintln!("Anyone holding this phrase controls the wallet. Store it offline.");
            println!("{}", phrase.expose_secret());
        }
        Commands::Restore { force } => {
            outcome.ensure_replaceable(force)?;
            let addresses = service
                .restore_account(
                    secret_from_env(PASSWORD_ENV)?,
                    secret_from_env(MNEMONIC_ENV)?,
                )
                .await?;
            print_json(&addresses)?;
        }
        // Printed before the session is opened
        Commands::Config => {}
    }

    Ok(())
}

fn secret_from_env(name: &str) -> Result<SecretString> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(Error::Config(format!("{name} is not set"))),
    }
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid address {s}: {e}")))
}

fn parse_u256(s: &str) -> Result<U256> {
    s.parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid integer {s}: {e}")))
}

fn parse_bytes(s: &str) -> Result<Bytes> {
    s.parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid hex data: {e}")))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
