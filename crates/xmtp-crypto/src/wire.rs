//! Serialized forms of keys, bundles, payloads and messages.
//!
//! Every field that the protocol treats as optional is an `Option` so that a
//! missing field surfaces as a structural error in the domain constructors
//! rather than as an opaque parse failure. Encoding is JSON via `serde_json`;
//! struct field order is fixed, so a given value always encodes to the same
//! bytes, which the message header relies on when used as associated data.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::identity::SECRET_KEY_LEN;

/// Room for a serialized private bundle with a handful of pre-keys, so the
/// plaintext buffer is allocated once and never moved while it is written.
pub const SECRET_BUFFER_CAPACITY: usize = 8 * 1024;

/// Public key with an optional signature from the key that vouches for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyEncoded {
    #[serde(default)]
    pub key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundleEncoded {
    #[serde(default)]
    pub identity_key: Option<PublicKeyEncoded>,
    #[serde(default)]
    pub pre_key: Option<PublicKeyEncoded>,
}

/// AES-256-GCM ciphertext keyed through HKDF-SHA256.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aes256GcmHkdfSha256 {
    #[serde(default)]
    pub hkdf_salt: Vec<u8>,
    #[serde(default)]
    pub gcm_nonce: Vec<u8>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextEncoded {
    #[serde(default)]
    pub aes256_gcm_hkdf_sha256: Option<Aes256GcmHkdfSha256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEncoded {
    #[serde(default)]
    pub sender: Option<KeyBundleEncoded>,
    #[serde(default)]
    pub recipient: Option<KeyBundleEncoded>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEncoded {
    #[serde(default)]
    pub header: Option<HeaderEncoded>,
    #[serde(default)]
    pub payload: Option<CiphertextEncoded>,
}

/// Secret key bytes plus the (possibly signed) public half.
///
/// The secret is a fixed array so deserializing it never grows a heap buffer.
#[derive(Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyEncoded {
    #[serde(default)]
    pub secret_key: [u8; SECRET_KEY_LEN],
    #[serde(default)]
    #[zeroize(skip)]
    pub public_key: Option<PublicKeyEncoded>,
}

/// Plaintext form of a private bundle; only ever lives inside a backup.
#[derive(Default, Serialize, Deserialize)]
pub struct PrivateKeyBundleEncoded {
    #[serde(default)]
    pub identity_key: Option<PrivateKeyEncoded>,
    /// The first entry is the current pre-key.
    #[serde(default)]
    pub pre_keys: Vec<PrivateKeyEncoded>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPrivateKeyBundleEncoded {
    #[serde(default)]
    pub wallet_pre_key: Option<Vec<u8>>,
    #[serde(default)]
    pub payload: Option<CiphertextEncoded>,
}

pub(crate) fn to_bytes<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(value).map_err(|e| CryptoError::malformed(what, e))
}

/// Serialize secret-bearing values into a single zeroizing allocation.
pub(crate) fn to_secret_bytes<T: Serialize>(
    value: &T,
    what: &'static str,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut buf = Zeroizing::new(Vec::with_capacity(SECRET_BUFFER_CAPACITY));
    let reserved = buf.capacity();
    serde_json::to_writer(&mut *buf, value).map_err(|e| CryptoError::malformed(what, e))?;
    if buf.capacity() != reserved {
        tracing::warn!(len = buf.len(), "secret buffer outgrew its preallocation");
    }
    Ok(buf)
}

pub(crate) fn from_bytes<T: DeserializeOwned>(bytes: &[u8], what: &'static str) -> Result<T, CryptoError> {
    serde_json::from_slice(bytes).map_err(|e| CryptoError::malformed(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_decode_as_none() {
        let message: MessageEncoded = from_bytes(b"{}", "message").unwrap();
        assert!(message.header.is_none());
        assert!(message.payload.is_none());

        let bundle: PrivateKeyBundleEncoded = from_bytes(b"{}", "bundle").unwrap();
        assert!(bundle.identity_key.is_none());
        assert!(bundle.pre_keys.is_empty());
    }

    #[test]
    fn garbage_is_structural() {
        let err = from_bytes::<MessageEncoded>(b"\x00\x01not json", "message").unwrap_err();
        assert!(matches!(err, CryptoError::Malformed { field: "message", .. }));
    }

    #[test]
    fn unsigned_key_omits_signature() {
        let key = PublicKeyEncoded {
            key: vec![1, 2, 3],
            signature: None,
        };
        let json = String::from_utf8(to_bytes(&key, "key").unwrap()).unwrap();
        assert!(!json.contains("signature"));
    }

    #[test]
    fn secret_key_is_a_fixed_array() {
        let json = format!(r#"{{"secret_key":{:?}}}"#, [7u8; SECRET_KEY_LEN]);
        let key: PrivateKeyEncoded = from_bytes(json.as_bytes(), "key").unwrap();
        assert_eq!(key.secret_key, [7u8; SECRET_KEY_LEN]);

        let short = format!(r#"{{"secret_key":{:?}}}"#, [7u8; 31]);
        let err = from_bytes::<PrivateKeyEncoded>(short.as_bytes(), "key").err().unwrap();
        assert!(matches!(err, CryptoError::Malformed { field: "key", .. }));
    }

    #[test]
    fn secret_bytes_stay_in_one_allocation() {
        let (bundle, _) = crate::PrivateKeyBundle::generate().unwrap();
        let bytes = to_secret_bytes(&bundle.to_encoded(), "private key bundle").unwrap();
        assert!(bytes.capacity() >= SECRET_BUFFER_CAPACITY);
        assert!(bytes.len() < SECRET_BUFFER_CAPACITY);
    }

    #[test]
    fn encoding_is_stable() {
        let header = HeaderEncoded {
            sender: Some(KeyBundleEncoded::default()),
            recipient: None,
        };
        assert_eq!(
            to_bytes(&header, "header").unwrap(),
            to_bytes(&header.clone(), "header").unwrap()
        );
    }
}
