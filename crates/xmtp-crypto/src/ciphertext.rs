//! AES-256-GCM payloads keyed through HKDF-SHA256.
//!
//! Every encryption draws a fresh salt, so every message is sealed under a
//! fresh key and the random nonce never repeats under the same key.

use aes_gcm::aead::{Aead, KeyInit, Payload as AeadPayload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::wire::{Aes256GcmHkdfSha256, CiphertextEncoded};

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Salt, nonce and sealed bytes (with the trailing GCM tag).
///
/// Lengths are validated on construction, so a value of this type is always
/// well-formed. Salt and nonce are not secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    payload: Vec<u8>,
}

/// The same envelope under its other wire name.
pub type Payload = Ciphertext;

impl Ciphertext {
    pub fn new(salt: &[u8], nonce: &[u8], payload: Vec<u8>) -> Result<Self, CryptoError> {
        if payload.len() < TAG_LEN {
            return Err(CryptoError::InvalidLength {
                field: "ciphertext",
                actual: payload.len(),
            });
        }
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| CryptoError::InvalidLength {
            field: "salt",
            actual: salt.len(),
        })?;
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::InvalidLength {
            field: "nonce",
            actual: nonce.len(),
        })?;
        Ok(Self {
            salt,
            nonce,
            payload,
        })
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Sealed bytes including the authentication tag.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_encoded(&self) -> CiphertextEncoded {
        CiphertextEncoded {
            aes256_gcm_hkdf_sha256: Some(Aes256GcmHkdfSha256 {
                hkdf_salt: self.salt.to_vec(),
                gcm_nonce: self.nonce.to_vec(),
                payload: self.payload.clone(),
            }),
        }
    }

    pub fn from_encoded(encoded: &CiphertextEncoded) -> Result<Self, CryptoError> {
        let inner = encoded
            .aes256_gcm_hkdf_sha256
            .as_ref()
            .ok_or(CryptoError::MissingField("aes256-gcm-hkdf-sha256 payload"))?;
        Self::new(&inner.hkdf_salt, &inner.gcm_nonce, inner.payload.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        crate::wire::to_bytes(&self.to_encoded(), "ciphertext")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_encoded(&crate::wire::from_bytes(bytes, "ciphertext")?)
    }
}

/// Derive the AEAD key for `secret` under `salt` (HKDF-SHA256, empty info).
pub fn derive_key(secret: &[u8], salt: &[u8; SALT_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), secret);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(&[], &mut key[..])
        .expect("32-byte output is valid for HKDF-SHA256");
    key
}

/// AES-256-GCM seal with an explicit key and nonce.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            AeadPayload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::InvalidLength {
            field: "plaintext",
            actual: plaintext.len(),
        })
}

/// AES-256-GCM open. Every failure is the same opaque [`CryptoError::Authentication`].
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            AeadPayload {
                msg: sealed,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Authentication)
}

/// Encrypt `plaintext` under key material `secret`, binding `associated_data`.
pub fn encrypt<R: CryptoRng + RngCore>(
    rng: &mut R,
    plaintext: &[u8],
    secret: &[u8],
    associated_data: &[u8],
) -> Result<Ciphertext, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let key = derive_key(secret, &salt);

    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let payload = seal(&key, &nonce, plaintext, associated_data)?;
    Ok(Ciphertext {
        salt,
        nonce,
        payload,
    })
}

/// Decrypt `ciphertext` with key material `secret` and the same associated data.
pub fn decrypt(
    ciphertext: &Ciphertext,
    secret: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = derive_key(secret, &ciphertext.salt);
    open(&key, &ciphertext.nonce, &ciphertext.payload, associated_data)
}
