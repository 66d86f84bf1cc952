//! Password-based vault encryption
//!
//! Argon2id stretches the password into a 256-bit key; AES-256-GCM seals the
//! serialized keyrings. The envelope is plain JSON so it can sit in any
//! string-valued store.

use super::EngineError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use alloy::primitives::hex;
use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Binds ciphertexts to this envelope format
const VAULT_AAD: &[u8] = b"wallet-custody-vault-v1";

const ENVELOPE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Upper bounds on persisted Argon2 costs; a stored envelope is untrusted
const MAX_M_COST: u32 = 262_144; // 256 MiB
const MAX_T_COST: u32 = 16;
const MAX_P_COST: u32 = 16;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19_456, // 19 MiB
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost, for tests only
    pub fn insecure_fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }

    fn check_bounds(&self) -> Result<(), String> {
        if self.m_cost > MAX_M_COST || self.t_cost > MAX_T_COST || self.p_cost > MAX_P_COST {
            return Err(format!(
                "kdf cost m={} t={} p={} exceeds m={MAX_M_COST} t={MAX_T_COST} p={MAX_P_COST}",
                self.m_cost, self.t_cost, self.p_cost
            ));
        }
        Ok(())
    }
}

/// Sealed vault as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct EncryptedVault {
    pub version: u32,
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub data: String,
}

fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 32]>, EngineError> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| EngineError::Derivation(e.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| EngineError::Derivation(e.to_string()))?;
    Ok(key)
}

pub(crate) fn seal(
    password: &SecretString,
    plaintext: &[u8],
    params: KdfParams,
) -> Result<EncryptedVault, EngineError> {
    params.check_bounds().map_err(EngineError::Derivation)?;
    let salt: [u8; SALT_LEN] = rand::random();
    let nonce: [u8; NONCE_LEN] = rand::random();
    let key = derive_key(password, &salt, params)?;

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: VAULT_AAD,
            },
        )
        .map_err(|e| EngineError::Encryption(e.to_string()))?;

    Ok(EncryptedVault {
        version: ENVELOPE_VERSION,
        kdf: params,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        data: hex::encode(ciphertext),
    })
}

/// Open a sealed vault; an authentication failure means the password is wrong
pub(crate) fn open(
    password: &SecretString,
    vault: &EncryptedVault,
) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    if vault.version != ENVELOPE_VERSION {
        return Err(EngineError::MalformedState(format!(
            "unsupported vault version {}",
            vault.version
        )));
    }

    let salt = decode_field("salt", &vault.salt)?;
    let nonce = decode_field("nonce", &vault.nonce)?;
    if nonce.len() != NONCE_LEN {
        return Err(EngineError::MalformedState("nonce must be 12 bytes".to_string()));
    }
    let ciphertext = decode_field("data", &vault.data)?;
    vault.kdf.check_bounds().map_err(EngineError::MalformedState)?;

    let key = derive_key(password, &salt, vault.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| EngineError::Encryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: VAULT_AAD,
            },
        )
        .map_err(|_| EngineError::IncorrectPassword)?;

    Ok(Zeroizing::new(plaintext))
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, EngineError> {
    hex::decode(value).map_err(|e| EngineError::MalformedState(format!("invalid {name}: {e}")))
}
