//! Identity + signed pre-key bundles and the X3DH-style agreement between them.
//!
//! This is a variation of X3DH where the sender's ephemeral key is replaced by
//! the sender's pre-key, so both sides can derive the secret from published
//! bundles alone.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::backup::{self, WalletSigner};
use crate::ciphertext::{self, Ciphertext};
use crate::error::CryptoError;
use crate::identity::{PrivateKey, PublicKey};
use crate::message::{Header, Message};
use crate::wire::{KeyBundleEncoded, PrivateKeyBundleEncoded};

/// Which side of the exchange is deriving the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Encrypting side.
    Sender,
    /// Decrypting side.
    Recipient,
}

/// Public identity key plus a pre-key signed by it. Safe to share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    identity_key: PublicKey,
    pre_key: PublicKey,
}

impl KeyBundle {
    pub fn new(identity_key: PublicKey, pre_key: PublicKey) -> Self {
        Self {
            identity_key,
            pre_key,
        }
    }

    pub fn identity_key(&self) -> &PublicKey {
        &self.identity_key
    }

    pub fn pre_key(&self) -> &PublicKey {
        &self.pre_key
    }

    /// True when the pre-key carries a valid signature by the identity key.
    pub fn verify_pre_key(&self) -> bool {
        self.identity_key.verify_key(&self.pre_key)
    }

    pub fn to_encoded(&self) -> KeyBundleEncoded {
        KeyBundleEncoded {
            identity_key: Some(self.identity_key.to_encoded()),
            pre_key: Some(self.pre_key.to_encoded()),
        }
    }

    pub fn from_encoded(encoded: &KeyBundleEncoded) -> Result<Self, CryptoError> {
        let identity_key = encoded
            .identity_key
            .as_ref()
            .ok_or(CryptoError::MissingField("identity key"))?;
        let pre_key = encoded
            .pre_key
            .as_ref()
            .ok_or(CryptoError::MissingField("pre-key"))?;
        Ok(Self::new(
            PublicKey::from_encoded(identity_key)?,
            PublicKey::from_encoded(pre_key)?,
        ))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        crate::wire::to_bytes(&self.to_encoded(), "key bundle")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Self::from_encoded(&crate::wire::from_bytes(bytes, "key bundle")?)
    }
}

/// Private keys behind a [`KeyBundle`].
///
/// Must never be shared. It is persisted only through [`PrivateKeyBundle::encode`],
/// so that older messages can be decrypted again after a restart.
#[derive(Debug)]
pub struct PrivateKeyBundle {
    identity_key: PrivateKey,
    pre_key: PrivateKey,
}

impl PrivateKeyBundle {
    pub fn new(identity_key: PrivateKey, pre_key: PrivateKey) -> Self {
        Self {
            identity_key,
            pre_key,
        }
    }

    /// Generate identity and pre-key pairs, with the pre-key signed by the identity key.
    pub fn generate_bundles<R: CryptoRng + RngCore>(
        rng: &mut R,
    ) -> Result<(Self, KeyBundle), CryptoError> {
        let (identity_key, identity_public) = PrivateKey::generate_keys(rng);
        let pre_key = signed_pre_key(&identity_key, rng)?;
        let bundle = KeyBundle::new(identity_public, pre_key.public_key().clone());
        Ok((Self::new(identity_key, pre_key), bundle))
    }

    pub fn generate() -> Result<(Self, KeyBundle), CryptoError> {
        Self::generate_bundles(&mut OsRng)
    }

    pub fn identity_key(&self) -> &PrivateKey {
        &self.identity_key
    }

    pub fn pre_key(&self) -> &PrivateKey {
        &self.pre_key
    }

    /// The public counterpart, with the signed pre-key.
    pub fn key_bundle(&self) -> KeyBundle {
        KeyBundle::new(
            self.identity_key.public_key().clone(),
            self.pre_key.public_key().clone(),
        )
    }

    /// Replace the pre-key with a fresh one signed by the same identity key.
    ///
    /// Messages addressed to the previous pre-key can no longer be decoded.
    pub fn rotate_pre_key<R: CryptoRng + RngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<KeyBundle, CryptoError> {
        self.pre_key = signed_pre_key(&self.identity_key, rng)?;
        tracing::debug!("pre-key rotated");
        Ok(self.key_bundle())
    }

    /// Derive `dh1 ‖ dh2 ‖ dh3` with a peer bundle.
    ///
    /// The peer's pre-key signature is checked first; an unauthenticated
    /// pre-key is never used. The DH order depends on `role` so that the
    /// sender and the recipient arrive at the same bytes.
    pub fn shared_secret(
        &self,
        peer: &KeyBundle,
        role: Role,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if !peer.verify_pre_key() {
            tracing::warn!(
                peer_identity = %hex::encode(peer.identity_key().to_bytes()),
                "peer pre-key signature invalid"
            );
            return Err(CryptoError::PreKeySignature);
        }

        let (dh1, dh2) = match role {
            Role::Sender => (
                self.identity_key.shared_secret(peer.pre_key())?,
                self.pre_key.shared_secret(peer.identity_key())?,
            ),
            Role::Recipient => (
                self.pre_key.shared_secret(peer.identity_key())?,
                self.identity_key.shared_secret(peer.pre_key())?,
            ),
        };
        let dh3 = self.pre_key.shared_secret(peer.pre_key())?;

        let mut secret = Zeroizing::new(Vec::with_capacity(dh1.len() + dh2.len() + dh3.len()));
        secret.extend_from_slice(dh1.as_slice());
        secret.extend_from_slice(dh2.as_slice());
        secret.extend_from_slice(dh3.as_slice());
        Ok(secret)
    }

    /// Encrypt for `recipient`, binding the sender/recipient header as associated data.
    pub fn encrypt_with_rng<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
        recipient: &KeyBundle,
    ) -> Result<Ciphertext, CryptoError> {
        let secret = self.shared_secret(recipient, Role::Sender)?;
        let ad = Header::new(self.key_bundle(), recipient.clone()).associated_data()?;
        ciphertext::encrypt(rng, plaintext, &secret, &ad)
    }

    pub fn encrypt(&self, plaintext: &[u8], recipient: &KeyBundle) -> Result<Ciphertext, CryptoError> {
        self.encrypt_with_rng(&mut OsRng, plaintext, recipient)
    }

    /// Decrypt a ciphertext from `sender`. Any tampering fails authentication.
    pub fn decrypt(&self, encrypted: &Ciphertext, sender: &KeyBundle) -> Result<Vec<u8>, CryptoError> {
        self.open_with_header(encrypted, &Header::new(sender.clone(), self.key_bundle()))
    }

    fn open_with_header(&self, encrypted: &Ciphertext, header: &Header) -> Result<Vec<u8>, CryptoError> {
        let secret = self.shared_secret(header.sender(), Role::Recipient)?;
        ciphertext::decrypt(encrypted, &secret, &header.associated_data()?)
    }

    /// Encrypt `text` for `recipient` and serialize it as a wire message.
    pub fn encode_message_with_rng<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        recipient: &KeyBundle,
        text: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = self.encrypt_with_rng(rng, text.as_bytes(), recipient)?;
        Message::new(Header::new(self.key_bundle(), recipient.clone()), payload).to_bytes()
    }

    pub fn encode_message(&self, recipient: &KeyBundle, text: &str) -> Result<Vec<u8>, CryptoError> {
        self.encode_message_with_rng(&mut OsRng, recipient, text)
    }

    /// Deserialize and decrypt a wire message addressed to this bundle.
    ///
    /// A message whose recipient pre-key is not ours fails with
    /// [`CryptoError::RecipientMismatch`] before any decryption is attempted.
    pub fn decode_message(&self, bytes: &[u8]) -> Result<String, CryptoError> {
        let message = Message::from_bytes(bytes)?;
        let header = message.header();
        if !self.pre_key.matches(header.recipient().pre_key()) {
            tracing::debug!(
                recipient_pre_key = %hex::encode(header.recipient().pre_key().to_bytes()),
                "message not addressed to this pre-key"
            );
            return Err(CryptoError::RecipientMismatch);
        }
        // The header as received is the associated data, so an altered
        // recipient identity fails authentication as well.
        let plaintext = self.open_with_header(message.payload(), header)?;
        String::from_utf8(plaintext).map_err(|e| CryptoError::malformed("message text", e))
    }

    /// Encrypt this bundle for storage, keyed by `signer`. See [`backup::encode`].
    pub async fn encode<S: WalletSigner>(&self, signer: &S) -> Result<Vec<u8>, CryptoError> {
        backup::encode(signer, self).await
    }

    /// Restore a bundle written by [`PrivateKeyBundle::encode`]. See [`backup::decode`].
    pub async fn decode<S: WalletSigner>(signer: &S, bytes: &[u8]) -> Result<Self, CryptoError> {
        backup::decode(signer, bytes).await
    }

    pub(crate) fn to_encoded(&self) -> PrivateKeyBundleEncoded {
        PrivateKeyBundleEncoded {
            identity_key: Some(self.identity_key.to_encoded()),
            pre_keys: vec![self.pre_key.to_encoded()],
        }
    }

    pub(crate) fn from_encoded(encoded: &PrivateKeyBundleEncoded) -> Result<Self, CryptoError> {
        let identity_key = encoded
            .identity_key
            .as_ref()
            .ok_or(CryptoError::MissingField("identity key"))?;
        let pre_key = encoded
            .pre_keys
            .first()
            .ok_or(CryptoError::MissingField("pre-keys"))?;
        let bundle = Self::new(
            PrivateKey::from_encoded(identity_key)?,
            PrivateKey::from_encoded(pre_key)?,
        );
        // A restored bundle is republished as-is, so its pre-key must still
        // pass the peers' signature gate.
        if !bundle.key_bundle().verify_pre_key() {
            return Err(CryptoError::PreKeySignature);
        }
        Ok(bundle)
    }
}

fn signed_pre_key<R: CryptoRng + RngCore>(
    identity_key: &PrivateKey,
    rng: &mut R,
) -> Result<PrivateKey, CryptoError> {
    let (mut pre_key, pre_public) = PrivateKey::generate_keys(rng);
    pre_key.attach_signed_public(identity_key.sign_key(&pre_public))?;
    Ok(pre_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pair() -> ((PrivateKeyBundle, KeyBundle), (PrivateKeyBundle, KeyBundle)) {
        (
            PrivateKeyBundle::generate().unwrap(),
            PrivateKeyBundle::generate().unwrap(),
        )
    }

    #[test]
    fn generated_bundle_is_signed() {
        let (private, public) = PrivateKeyBundle::generate().unwrap();
        assert!(public.verify_pre_key());
        assert_eq!(private.key_bundle(), public);
    }

    #[test]
    fn role_symmetry() {
        let ((alice, alice_pub), (bob, bob_pub)) = pair();
        let a = alice.shared_secret(&bob_pub, Role::Sender).unwrap();
        let b = bob.shared_secret(&alice_pub, Role::Recipient).unwrap();
        assert_eq!(a.len(), 96);
        assert_eq!(*a, *b);

        // Both parties acting as sender derive different secrets.
        let b_as_sender = bob.shared_secret(&alice_pub, Role::Sender).unwrap();
        assert_ne!(*a, *b_as_sender);
    }

    #[test]
    fn unsigned_pre_key_rejected() {
        let ((alice, _), (_, bob_pub)) = pair();
        let (_, stray) = PrivateKey::generate();
        let forged = KeyBundle::new(bob_pub.identity_key().clone(), stray);

        let err = alice.shared_secret(&forged, Role::Sender).unwrap_err();
        assert!(matches!(err, CryptoError::PreKeySignature));
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[test]
    fn pre_key_signed_by_other_identity_rejected() {
        let ((alice, _), (_, bob_pub)) = pair();
        let (_, carol_pub) = PrivateKeyBundle::generate().unwrap();
        // Carol's correctly signed pre-key under Bob's identity.
        let mixed = KeyBundle::new(bob_pub.identity_key().clone(), carol_pub.pre_key().clone());
        assert!(matches!(
            alice.shared_secret(&mixed, Role::Sender),
            Err(CryptoError::PreKeySignature)
        ));
        assert!(alice.encrypt(b"hi", &mixed).is_err());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let ((alice, alice_pub), (bob, bob_pub)) = pair();
        let ct = alice.encrypt(b"hello bob", &bob_pub).unwrap();
        assert_eq!(bob.decrypt(&ct, &alice_pub).unwrap(), b"hello bob");

        let empty = alice.encrypt(b"", &bob_pub).unwrap();
        assert!(bob.decrypt(&empty, &alice_pub).unwrap().is_empty());
    }

    #[test]
    fn wrong_sender_fails_authentication() {
        let ((alice, _), (bob, bob_pub)) = pair();
        let (_, carol_pub) = PrivateKeyBundle::generate().unwrap();
        let ct = alice.encrypt(b"hello", &bob_pub).unwrap();
        assert!(matches!(
            bob.decrypt(&ct, &carol_pub),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn message_roundtrip() {
        let ((alice, alice_pub), (bob, bob_pub)) = pair();
        let bytes = alice.encode_message(&bob_pub, "hi there ✉").unwrap();
        assert_eq!(bob.decode_message(&bytes).unwrap(), "hi there ✉");

        let reply = bob.encode_message(&alice_pub, "").unwrap();
        assert_eq!(alice.decode_message(&reply).unwrap(), "");
    }

    #[test]
    fn message_for_other_pre_key_is_routing_error() {
        let ((alice, _), (_, bob_pub)) = pair();
        let (carol, _) = PrivateKeyBundle::generate().unwrap();
        let bytes = alice.encode_message(&bob_pub, "for bob").unwrap();

        let err = carol.decode_message(&bytes).unwrap_err();
        assert!(matches!(err, CryptoError::RecipientMismatch));
        assert_eq!(err.category(), ErrorCategory::Routing);
    }

    #[test]
    fn rotated_pre_key_stays_signed() {
        let mut rng = StdRng::seed_from_u64(42);
        let ((alice, _), _) = pair();
        let (mut bob, old_pub) = PrivateKeyBundle::generate_bundles(&mut rng).unwrap();

        let new_pub = bob.rotate_pre_key(&mut rng).unwrap();
        assert!(new_pub.verify_pre_key());
        assert_eq!(new_pub.identity_key(), old_pub.identity_key());
        assert_ne!(new_pub.pre_key(), old_pub.pre_key());

        let stale = alice.encode_message(&old_pub, "old").unwrap();
        assert!(matches!(
            bob.decode_message(&stale),
            Err(CryptoError::RecipientMismatch)
        ));
        let fresh = alice.encode_message(&new_pub, "new").unwrap();
        assert_eq!(bob.decode_message(&fresh).unwrap(), "new");
    }

    #[test]
    fn key_bundle_bytes_roundtrip() {
        let (_, public) = PrivateKeyBundle::generate().unwrap();
        let restored = KeyBundle::from_bytes(&public.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, public);
        assert!(restored.verify_pre_key());
    }

    #[test]
    fn key_bundle_without_pre_key_is_structural() {
        let (_, public) = PrivateKeyBundle::generate().unwrap();
        let mut encoded = public.to_encoded();
        encoded.pre_key = None;
        let err = KeyBundle::from_encoded(&encoded).unwrap_err();
        assert!(matches!(err, CryptoError::MissingField("pre-key")));
        assert_eq!(err.category(), ErrorCategory::Structural);
    }
}
