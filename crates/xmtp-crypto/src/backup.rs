//! Wallet-keyed backup of a [`PrivateKeyBundle`].
//!
//! The backup key is not a password: a random 32-byte `wallet_pre_key` is
//! signed by the user's wallet and the signature bytes become the AEAD key
//! material. Restoring asks the same wallet to sign the same bytes again.

use std::future::Future;

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::bundle::PrivateKeyBundle;
use crate::ciphertext::{self, Ciphertext};
use crate::error::CryptoError;
use crate::wire::{EncryptedPrivateKeyBundleEncoded, PrivateKeyBundleEncoded};

pub const WALLET_PRE_KEY_LEN: usize = 32;

/// `r ‖ s ‖ v` signatures with a trailing recovery id.
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// A wallet that can sign arbitrary bytes.
///
/// # Determinism
///
/// Backups are only recoverable if the signer returns the same signature for
/// the same input under the same key (RFC 6979 ECDSA, Ed25519). A randomized
/// signer produces a different key on restore and decoding fails; use
/// [`check_signer_determinism`] before trusting a signer with backups.
///
/// Hardware and browser wallets disagree on the recovery id of a 65-byte
/// signature (0/1 or 27/28); both spellings derive the same backup key.
///
/// Signing may wait for user approval on a hardware device. Do not hold a
/// lock across the returned future.
pub trait WalletSigner: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn sign(&self, message: &[u8]) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}

/// Software wallet backed by an Ed25519 key. Signatures are deterministic.
#[derive(ZeroizeOnDrop)]
pub struct Ed25519WalletSigner {
    signing_key: SigningKey,
}

impl Ed25519WalletSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl WalletSigner for Ed25519WalletSigner {
    type Error = std::convert::Infallible;

    fn sign(&self, message: &[u8]) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send {
        std::future::ready(Ok(self.signing_key.sign(message).to_bytes().to_vec()))
    }
}

/// At-rest form of a private bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPrivateKeyBundle {
    wallet_pre_key: [u8; WALLET_PRE_KEY_LEN],
    payload: Ciphertext,
}

impl EncryptedPrivateKeyBundle {
    pub fn wallet_pre_key(&self) -> &[u8; WALLET_PRE_KEY_LEN] {
        &self.wallet_pre_key
    }

    pub fn payload(&self) -> &Ciphertext {
        &self.payload
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        crate::wire::to_bytes(
            &EncryptedPrivateKeyBundleEncoded {
                wallet_pre_key: Some(self.wallet_pre_key.to_vec()),
                payload: Some(self.payload.to_encoded()),
            },
            "encrypted private key bundle",
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let encoded: EncryptedPrivateKeyBundleEncoded =
            crate::wire::from_bytes(bytes, "encrypted private key bundle")?;
        let wallet_pre_key = encoded
            .wallet_pre_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(CryptoError::MissingField("wallet pre-key"))?;
        let wallet_pre_key: [u8; WALLET_PRE_KEY_LEN] =
            wallet_pre_key
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    field: "wallet pre-key",
                    actual: wallet_pre_key.len(),
                })?;
        let payload = encoded
            .payload
            .as_ref()
            .ok_or(CryptoError::MissingField("bundle payload"))?;
        Ok(Self {
            wallet_pre_key,
            payload: Ciphertext::from_encoded(payload)?,
        })
    }
}

/// Encrypt `bundle` for storage using key material from `signer`.
pub async fn encode<S: WalletSigner>(
    signer: &S,
    bundle: &PrivateKeyBundle,
) -> Result<Vec<u8>, CryptoError> {
    encode_with_rng(signer, bundle, &mut OsRng).await
}

pub async fn encode_with_rng<S, R>(
    signer: &S,
    bundle: &PrivateKeyBundle,
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError>
where
    S: WalletSigner,
    R: CryptoRng + RngCore + Send,
{
    let mut wallet_pre_key = [0u8; WALLET_PRE_KEY_LEN];
    rng.fill_bytes(&mut wallet_pre_key);
    let secret = sign_challenge(signer, &wallet_pre_key).await?;

    // Serialized only once the signer has answered, to keep the plaintext short-lived.
    let plaintext = crate::wire::to_secret_bytes(&bundle.to_encoded(), "private key bundle")?;
    let payload = ciphertext::encrypt(rng, &plaintext, &secret, &[])?;
    tracing::debug!("private key bundle encrypted for backup");

    EncryptedPrivateKeyBundle {
        wallet_pre_key,
        payload,
    }
    .to_bytes()
}

/// Restore a bundle produced by [`encode`] with the same signer.
pub async fn decode<S: WalletSigner>(
    signer: &S,
    bytes: &[u8],
) -> Result<PrivateKeyBundle, CryptoError> {
    let encrypted = EncryptedPrivateKeyBundle::from_bytes(bytes)?;
    let secret = sign_challenge(signer, encrypted.wallet_pre_key()).await?;

    let plaintext = Zeroizing::new(ciphertext::decrypt(encrypted.payload(), &secret, &[])?);
    let encoded: PrivateKeyBundleEncoded = crate::wire::from_bytes(&plaintext, "private key bundle")?;
    let bundle = PrivateKeyBundle::from_encoded(&encoded)?;
    tracing::debug!("private key bundle restored from backup");
    Ok(bundle)
}

/// Sign one random challenge twice and require identical signatures.
pub async fn check_signer_determinism<S: WalletSigner>(signer: &S) -> Result<(), CryptoError> {
    check_signer_determinism_with_rng(signer, &mut OsRng).await
}

pub async fn check_signer_determinism_with_rng<S, R>(
    signer: &S,
    rng: &mut R,
) -> Result<(), CryptoError>
where
    S: WalletSigner,
    R: CryptoRng + RngCore + Send,
{
    let mut challenge = [0u8; WALLET_PRE_KEY_LEN];
    rng.fill_bytes(&mut challenge);

    let first = sign_challenge(signer, &challenge).await?;
    let second = sign_challenge(signer, &challenge).await?;
    if *first != *second {
        tracing::warn!("wallet signer returned different signatures for the same input");
        return Err(CryptoError::NondeterministicSigner);
    }
    Ok(())
}

async fn sign_challenge<S: WalletSigner>(
    signer: &S,
    challenge: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let signature = signer
        .sign(challenge)
        .await
        .map_err(|e| CryptoError::Signer(Box::new(e)))?;
    if signature.is_empty() {
        return Err(CryptoError::Signer("wallet returned an empty signature".into()));
    }
    Ok(normalize_signature(signature))
}

/// Map a 27/28 recovery id to 0/1 so every wallet spelling keys the same backup.
fn normalize_signature(signature: Vec<u8>) -> Zeroizing<Vec<u8>> {
    let mut signature = Zeroizing::new(signature);
    if signature.len() == RECOVERABLE_SIGNATURE_LEN {
        if let Some(v) = signature.last_mut().filter(|v| matches!(**v, 27 | 28)) {
            *v -= 27;
        }
    }
    signature
}
