//! Authorization digests and signing
//!
//! An authorization covers the ordered triple `(party_a, party_b, nonce)`.
//! It is hashed twice:
//! 1. `keccak256(party_a ‖ party_b ‖ uint256(nonce))`, Solidity packed encoding
//! 2. `keccak256("\x19Ethereum Signed Message:\n32" ‖ step1)`
//!
//! The engine signs any 32-byte value blindly, so the personal-message prefix
//! of step 2 is what keeps an authorization signature from ever validating as
//! a transaction signature.

use crate::engine::{EngineError, MessageRequest, SignedTransaction, TransactionParams, VaultEngine};
use crate::vault::VaultController;
use crate::{Error, Result};
use alloy::primitives::{eip191_hash_message, keccak256, Address, Signature, B256, U256};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Domain-separation prefix of a personal message over a 32-byte payload
pub const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n32";

const SIGNATURE_LEN: usize = 65;

/// Both stages of an authorization hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AuthorizationDigest {
    /// Hash of the packed triple
    pub inner: B256,
    /// Prefixed re-hash; this is what gets signed
    pub prefixed: B256,
}

/// Build the authorization digest for `(party_a, party_b, nonce)`
pub fn build_authorization_digest(
    party_a: Address,
    party_b: Address,
    nonce: U256,
) -> AuthorizationDigest {
    let mut packed = Vec::with_capacity(20 + 20 + 32);
    packed.extend_from_slice(party_a.as_slice());
    packed.extend_from_slice(party_b.as_slice());
    packed.extend_from_slice(&nonce.to_be_bytes::<32>());

    let inner = keccak256(&packed);
    AuthorizationDigest {
        inner,
        prefixed: eip191_hash_message(inner),
    }
}

/// Signature split into its protocol fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthorizationSignature {
    pub r: B256,
    pub s: B256,
    pub v: u8,
}

impl AuthorizationSignature {
    /// Split `r ‖ s ‖ v`: bytes 0..32, 32..64 and 64
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(Error::Signing(format!(
                "expected {SIGNATURE_LEN}-byte signature, engine returned {}",
                bytes.len()
            )));
        }
        Ok(Self {
            r: B256::from_slice(&bytes[0..32]),
            s: B256::from_slice(&bytes[32..64]),
            v: bytes[64],
        })
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[0..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    /// Address that produced this signature over `digest`
    pub fn recover_signer(&self, digest: &AuthorizationDigest) -> Result<Address> {
        Signature::from_raw(&self.to_bytes())
            .and_then(|sig| sig.recover_address_from_prehash(&digest.prefixed))
            .map_err(|e| Error::Signing(format!("signature does not recover: {e}")))
    }
}

/// Signs on behalf of the vault's active address
pub struct SigningService {
    vault: Arc<VaultController>,
    timeout: Option<Duration>,
}

impl SigningService {
    pub fn new(vault: Arc<VaultController>) -> Self {
        Self {
            vault,
            timeout: None,
        }
    }

    /// Bound every engine call; expiry surfaces as `Signing`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build_authorization_digest(
        &self,
        party_a: Address,
        party_b: Address,
        nonce: U256,
    ) -> AuthorizationDigest {
        build_authorization_digest(party_a, party_b, nonce)
    }

    /// Sign the prefixed digest with the active address
    pub async fn sign_authorization(
        &self,
        digest: &AuthorizationDigest,
    ) -> Result<AuthorizationSignature> {
        let (engine, from) = self.signer().await?;
        let request = MessageRequest {
            from,
            data: digest.prefixed,
        };

        let bytes = self
            .bounded(engine.sign_message(request))
            .await?
            .map_err(signing_failure)?;
        let signature = AuthorizationSignature::from_bytes(&bytes)?;

        tracing::info!(from = %from, digest = %digest.prefixed, "Signed authorization");
        Ok(signature)
    }

    /// Sign a transaction with the active address
    pub async fn sign_transaction(&self, params: TransactionParams) -> Result<SignedTransaction> {
        let (engine, from) = self.signer().await?;
        tracing::info!(
            from = %from,
            nonce = params.nonce,
            to = ?params.to,
            "Signing transaction"
        );

        let signed = self
            .bounded(engine.sign_transaction(params, from))
            .await?
            .map_err(signing_failure)?;

        tracing::info!(hash = %signed.hash, "Transaction signed");
        Ok(signed)
    }

    async fn signer(&self) -> Result<(Arc<dyn VaultEngine>, Address)> {
        let (engine, addresses) = self
            .vault
            .unlocked_engine()
            .await
            .ok_or_else(|| Error::Signing("vault is not unlocked".to_string()))?;
        let from = addresses
            .first()
            .copied()
            .ok_or_else(|| Error::Signing("no active address".to_string()))?;
        Ok((engine, from))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Signing timed out");
                Error::Signing("signing timed out".to_string())
            }),
            None => Ok(fut.await),
        }
    }
}

/// Engine failures that mean "cannot sign for this address" become
/// `Signing`; anything else passes through unchanged
fn signing_failure(e: EngineError) -> Error {
    match e {
        EngineError::Locked
        | EngineError::NoVault
        | EngineError::UnknownAccount(_)
        | EngineError::Signature(_) => Error::Signing(e.to_string()),
        other => Error::Engine(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{KdfParams, LocalEngineBuilder, VaultState};
    use crate::testing::StubEngine;
    use alloy::primitives::{address, Bytes};
    use secrecy::SecretString;

    const CONSUMER: Address = address!("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    const RETAILER: Address = address!("0x70997970c51812dc3a010c7d01b50e0d17dc79c8");

    async fn unlocked_local() -> (Arc<VaultController>, SigningService) {
        let vault = Arc::new(VaultController::new(Arc::new(LocalEngineBuilder::new(
            KdfParams::insecure_fast(),
        ))));
        vault.initialize(None).await.unwrap();
        vault
            .create_vault(SecretString::from("pw1".to_string()))
            .await
            .unwrap();
        let service = SigningService::new(vault.clone());
        (vault, service)
    }

    async fn unlocked_stub(engine: Arc<StubEngine>) -> SigningService {
        let vault = Arc::new(VaultController::new(Arc::new(
            move |_prior: Option<VaultState>| -> std::result::Result<Arc<dyn VaultEngine>, EngineError> {
                Ok(engine.clone())
            },
        )));
        vault.initialize(None).await.unwrap();
        vault
            .unlock(SecretString::from("pw1".to_string()))
            .await
            .unwrap();
        SigningService::new(vault)
    }

    #[test]
    fn digest_is_deterministic() {
        let a = build_authorization_digest(CONSUMER, RETAILER, U256::from(1));
        let b = build_authorization_digest(CONSUMER, RETAILER, U256::from(1));
        assert_eq!(a, b);
    }

    #[test]
    fn digest_depends_on_every_input() {
        let base = build_authorization_digest(CONSUMER, RETAILER, U256::from(1));

        let swapped = build_authorization_digest(RETAILER, CONSUMER, U256::from(1));
        let other_b = build_authorization_digest(CONSUMER, Address::ZERO, U256::from(1));
        let other_nonce = build_authorization_digest(CONSUMER, RETAILER, U256::from(2));

        for changed in [swapped, other_b, other_nonce] {
            assert_ne!(changed.inner, base.inner);
            assert_ne!(changed.prefixed, base.prefixed);
        }
    }

    #[test]
    fn digest_uses_packed_encoding_and_personal_prefix() {
        let nonce = U256::from(0x0102_0304u64);
        let digest = build_authorization_digest(CONSUMER, RETAILER, nonce);

        let mut packed = Vec::new();
        packed.extend_from_slice(CONSUMER.as_slice());
        packed.extend_from_slice(RETAILER.as_slice());
        let mut word = [0u8; 32];
        word[28..].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        packed.extend_from_slice(&word);
        assert_eq!(packed.len(), 72);
        assert_eq!(digest.inner, keccak256(&packed));

        let mut prefixed = PERSONAL_MESSAGE_PREFIX.as_bytes().to_vec();
        prefixed.extend_from_slice(digest.inner.as_slice());
        assert_eq!(digest.prefixed, keccak256(&prefixed));
        assert_ne!(digest.prefixed, digest.inner);
    }

    #[test]
    fn splits_signature_by_offset() {
        let mut raw = vec![0xaa; 32];
        raw.extend(vec![0xbb; 32]);
        raw.push(0x1c);

        let sig = AuthorizationSignature::from_bytes(&raw).unwrap();
        assert_eq!(sig.r, B256::repeat_byte(0xaa));
        assert_eq!(sig.s, B256::repeat_byte(0xbb));
        assert_eq!(sig.v, 0x1c);
        assert_eq!(sig.to_bytes().to_vec(), raw);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = AuthorizationSignature::from_bytes(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[tokio::test]
    async fn authorization_signature_recovers_to_active_address() {
        let (vault, service) = unlocked_local().await;
        let active = vault.active_address().await.unwrap();

        let digest = service.build_authorization_digest(CONSUMER, RETAILER, U256::from(42));
        let sig = service.sign_authorization(&digest).await.unwrap();

        assert!(sig.v == 27 || sig.v == 28);
        assert_eq!(sig.to_bytes().len(), 32 + 32 + 1);
        assert_eq!(sig.recover_signer(&digest).unwrap(), active);
    }

    #[tokio::test]
    async fn signature_does_not_verify_against_unprefixed_hash() {
        let (vault, service) = unlocked_local().await;
        let active = vault.active_address().await.unwrap();

        let digest = build_authorization_digest(CONSUMER, RETAILER, U256::from(42));
        let sig = service.sign_authorization(&digest).await.unwrap();

        let raw_view = AuthorizationDigest {
            inner: digest.inner,
            prefixed: digest.inner,
        };
        let recovered = sig.recover_signer(&raw_view);
        assert!(recovered.map(|a| a != active).unwrap_or(true));
    }

    #[tokio::test]
    async fn concurrent_authorizations_all_recover() {
        let (vault, service) = unlocked_local().await;
        let active = vault.active_address().await.unwrap();

        let digests: Vec<AuthorizationDigest> = (0..4u64)
            .map(|n| build_authorization_digest(CONSUMER, RETAILER, U256::from(n)))
            .collect();
        let signatures =
            futures::future::join_all(digests.iter().map(|d| service.sign_authorization(d))).await;

        for (digest, signature) in digests.iter().zip(signatures) {
            assert_eq!(signature.unwrap().recover_signer(digest).unwrap(), active);
        }
    }

    #[tokio::test]
    async fn locked_vault_cannot_sign() {
        let (vault, service) = unlocked_local().await;
        vault.lock().await.unwrap();

        let digest = build_authorization_digest(CONSUMER, RETAILER, U256::from(1));
        let err = service.sign_authorization(&digest).await.unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[tokio::test]
    async fn short_engine_output_is_a_signing_error() {
        let engine = Arc::new(StubEngine::new("pw1"));
        engine.script_signature(Bytes::from(vec![1u8; 64]));
        let service = unlocked_stub(engine).await;

        let digest = build_authorization_digest(CONSUMER, RETAILER, U256::from(1));
        let err = service.sign_authorization(&digest).await.unwrap_err();
        assert!(matches!(err, Error::Signing(ref m) if m.contains("65-byte")));
    }

    #[tokio::test]
    async fn signs_transaction_for_active_address() {
        let (vault, service) = unlocked_local().await;
        let active = vault.active_address().await.unwrap();

        let signed = service
            .sign_transaction(TransactionParams {
                nonce: 0,
                gas_price: 1_000_000_000,
                gas_limit: 21_000,
                to: Some(RETAILER),
                value: U256::from(1),
                data: Bytes::new(),
                chain_id: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(signed.from, active);
        assert!(!signed.raw.is_empty());
    }

    #[tokio::test]
    async fn uninitialized_vault_cannot_sign_transactions() {
        let vault = Arc::new(VaultController::new(Arc::new(LocalEngineBuilder::default())));
        let service = SigningService::new(vault);

        let err = service
            .sign_transaction(TransactionParams {
                nonce: 0,
                gas_price: 1,
                gas_limit: 21_000,
                to: None,
                value: U256::ZERO,
                data: Bytes::new(),
                chain_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn engine_errors_map_by_kind() {
        assert!(matches!(
            signing_failure(EngineError::UnknownAccount(Address::ZERO)),
            Error::Signing(_)
        ));
        assert!(matches!(
            signing_failure(EngineError::MalformedState("x".to_string())),
            Error::Engine(_)
        ));
    }
}
