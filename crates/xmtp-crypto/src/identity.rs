use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use x25519_dalek::StaticSecret;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::wire::{PrivateKeyEncoded, PublicKeyEncoded};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Public half of an identity or pre-key.
///
/// A pre-key carries a signature by the identity key that vouches for it.
/// Equality compares the key and the attached signature.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
    signature: Option<Signature>,
}

impl PublicKey {
    /// Parse an unsigned public key from its 32-byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
            field: "public key",
            actual: bytes.len(),
        })?;
        let key = VerifyingKey::from_bytes(&key)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
        Ok(Self {
            key,
            signature: None,
        })
    }

    /// Canonical encoding; this is what signatures are computed over.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.to_bytes()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Check that `signed` carries a valid signature made by this key.
    ///
    /// Unsigned keys never verify.
    pub fn verify_key(&self, signed: &PublicKey) -> bool {
        signed.signature.as_ref().is_some_and(|signature| {
            self.key
                .verify_strict(signed.key.as_bytes(), signature)
                .is_ok()
        })
    }

    /// Map to the X25519 key used for Diffie-Hellman.
    ///
    /// Small-order points are rejected so DH never runs against a point that
    /// would force a predictable output.
    fn to_x25519(&self) -> Result<x25519_dalek::PublicKey, CryptoError> {
        if self.key.is_weak() {
            return Err(CryptoError::InvalidKey("small-order public key".into()));
        }
        Ok(x25519_dalek::PublicKey::from(self.key.to_montgomery().to_bytes()))
    }

    pub fn to_encoded(&self) -> PublicKeyEncoded {
        PublicKeyEncoded {
            key: self.key.to_bytes().to_vec(),
            signature: self.signature.map(|s| s.to_bytes().to_vec()),
        }
    }

    pub fn from_encoded(encoded: &PublicKeyEncoded) -> Result<Self, CryptoError> {
        let mut public = Self::from_bytes(&encoded.key)?;
        if let Some(bytes) = &encoded.signature {
            let bytes: [u8; SIGNATURE_LEN] =
                bytes.as_slice().try_into().map_err(|_| CryptoError::InvalidLength {
                    field: "signature",
                    actual: bytes.len(),
                })?;
            public.signature = Some(Signature::from_bytes(&bytes));
        }
        Ok(public)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("key", &hex::encode(self.key.as_bytes()))
            .field("signed", &self.signature.is_some())
            .finish()
    }
}

/// Secret half of an identity or pre-key.
///
/// The only operations on the secret are signing keys and Diffie-Hellman.
/// The Ed25519 scalar doubles as the X25519 secret through the
/// Edwards→Montgomery map, so a single key pair serves both purposes.
///
/// Keys are Ed25519, not the secp256k1 keys of Ethereum-style wallets, so
/// bundles and backups are not interchangeable with secp256k1 deployments of
/// this protocol.
#[derive(ZeroizeOnDrop)]
pub struct PrivateKey {
    signing_key: SigningKey,
    #[zeroize(skip)]
    public_key: PublicKey,
}

impl PrivateKey {
    /// Generate a fresh key pair from `rng`.
    pub fn generate_keys<R: CryptoRng + RngCore>(rng: &mut R) -> (Self, PublicKey) {
        let signing_key = SigningKey::generate(rng);
        let public_key = PublicKey {
            key: signing_key.verifying_key(),
            signature: None,
        };
        let private = Self {
            signing_key,
            public_key: public_key.clone(),
        };
        (private, public_key)
    }

    /// Generate a fresh key pair from the operating system's CSPRNG.
    pub fn generate() -> (Self, PublicKey) {
        Self::generate_keys(&mut OsRng)
    }

    /// Restore a key from its 32-byte secret. The public half is unsigned.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let secret: Zeroizing<[u8; SECRET_KEY_LEN]> =
            Zeroizing::new(bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                field: "secret key",
                actual: bytes.len(),
            })?);
        let signing_key = SigningKey::from_bytes(&secret);
        let public_key = PublicKey {
            key: signing_key.verifying_key(),
            signature: None,
        };
        Ok(Self {
            signing_key,
            public_key,
        })
    }

    /// The public half, including its signature once one is attached.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign `subject`'s canonical encoding and return it with the signature attached.
    pub fn sign_key(&self, subject: &PublicKey) -> PublicKey {
        let signature = self.signing_key.sign(subject.key.as_bytes());
        PublicKey {
            key: subject.key,
            signature: Some(signature),
        }
    }

    /// Replace the public half with a signed copy of itself.
    pub(crate) fn attach_signed_public(&mut self, signed: PublicKey) -> Result<(), CryptoError> {
        if signed.key != self.public_key.key {
            return Err(CryptoError::InvalidKey(
                "signed public key does not belong to this secret".into(),
            ));
        }
        self.public_key = signed;
        Ok(())
    }

    /// X25519 Diffie-Hellman with a peer key.
    ///
    /// Symmetric: `a.shared_secret(b.public_key()) == b.shared_secret(a.public_key())`.
    pub fn shared_secret(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer = peer.to_x25519()?;
        let secret = StaticSecret::from(*Zeroizing::new(self.signing_key.to_scalar_bytes()));
        let shared = secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "non-contributory Diffie-Hellman output".into(),
            ));
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }

    /// True when `candidate` is this key's public half. Signatures are ignored.
    pub fn matches(&self, candidate: &PublicKey) -> bool {
        self.public_key.key == candidate.key
    }

    /// Raw secret bytes. Only the backup codec should call this.
    pub(crate) fn export_secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    pub(crate) fn to_encoded(&self) -> PrivateKeyEncoded {
        PrivateKeyEncoded {
            secret_key: *self.export_secret_bytes(),
            public_key: Some(self.public_key.to_encoded()),
        }
    }

    /// The public half is required: it carries the pre-key signature, which
    /// cannot be recomputed from the secret alone.
    pub(crate) fn from_encoded(encoded: &PrivateKeyEncoded) -> Result<Self, CryptoError> {
        let public = encoded
            .public_key
            .as_ref()
            .ok_or(CryptoError::MissingField("public key"))?;
        let mut private = Self::from_secret_bytes(&encoded.secret_key)?;
        private.attach_signed_public(PublicKey::from_encoded(public)?)?;
        Ok(private)
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
