//! Wallet-encrypted persistence of a [`PrivateKeyBundle`].
//!
//! The crate never touches a storage backend directly; callers provide a
//! [`Keychain`] and only ever hand it backup ciphertext.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backup::WalletSigner;
use crate::bundle::PrivateKeyBundle;
use crate::error::CryptoError;

/// Vault holding wallet-encrypted key bundles.
pub const VAULT_BUNDLES: &str = "xmtp_bundles";

/// Key name of the bundle belonging to `account` (typically a wallet address).
pub fn bundle_key_name(account: &str) -> String {
    format!("private_key_bundle_{account}")
}

/// Key storage backend.
pub trait Keychain: Send + Sync {
    /// Store `data` under a vault/key pair, replacing any previous value.
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError>;

    /// Retrieve the value under a vault/key pair, if any.
    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;
}

/// Shared backends, e.g. one keychain serving several accounts.
impl<K: Keychain + ?Sized> Keychain for Arc<K> {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        (**self).store_key(vault, key, data)
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        (**self).load_key(vault, key)
    }
}

/// In-memory keychain. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.entries
            .lock()
            .map_err(|_| CryptoError::Storage("memory keychain lock poisoned".into()))?
            .insert((vault.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CryptoError::Storage("memory keychain lock poisoned".into()))?;
        Ok(entries.get(&(vault.to_string(), key.to_string())).cloned())
    }
}

/// Keychain wrapper that stores one account's bundle encrypted by its wallet.
pub struct EncryptedKeyStore<S, K> {
    signer: S,
    keychain: K,
    key_name: String,
}

impl<S: WalletSigner, K: Keychain> EncryptedKeyStore<S, K> {
    pub fn new(signer: S, keychain: K, account: &str) -> Self {
        Self {
            signer,
            keychain,
            key_name: bundle_key_name(account),
        }
    }

    pub fn keychain(&self) -> &K {
        &self.keychain
    }

    pub async fn store_private_key_bundle(&self, bundle: &PrivateKeyBundle) -> Result<(), CryptoError> {
        let bytes = bundle.encode(&self.signer).await?;
        self.keychain.store_key(VAULT_BUNDLES, &self.key_name, &bytes)?;
        tracing::debug!(key = %self.key_name, "private key bundle stored");
        Ok(())
    }

    /// `Ok(None)` when nothing has been stored for this account yet.
    pub async fn load_private_key_bundle(&self) -> Result<Option<PrivateKeyBundle>, CryptoError> {
        let Some(bytes) = self.keychain.load_key(VAULT_BUNDLES, &self.key_name)? else {
            tracing::debug!(key = %self.key_name, "no stored private key bundle");
            return Ok(None);
        };
        PrivateKeyBundle::decode(&self.signer, &bytes).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::Ed25519WalletSigner;
    use crate::error::ErrorCategory;

    const ACCOUNT: &str = "0xabc";

    #[tokio::test]
    async fn store_and_load() {
        let store = EncryptedKeyStore::new(
            Ed25519WalletSigner::from_seed(&[3; 32]),
            MemoryKeychain::new(),
            ACCOUNT,
        );
        let (bundle, public) = PrivateKeyBundle::generate().unwrap();

        store.store_private_key_bundle(&bundle).await.unwrap();
        let loaded = store.load_private_key_bundle().await.unwrap().unwrap();
        assert_eq!(loaded.key_bundle(), public);
    }

    #[tokio::test]
    async fn empty_store_loads_none() {
        let store = EncryptedKeyStore::new(
            Ed25519WalletSigner::generate(),
            MemoryKeychain::new(),
            ACCOUNT,
        );
        assert!(store.load_private_key_bundle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keychain_only_sees_ciphertext() {
        let store = EncryptedKeyStore::new(
            Ed25519WalletSigner::generate(),
            MemoryKeychain::new(),
            ACCOUNT,
        );
        let (bundle, _) = PrivateKeyBundle::generate().unwrap();
        store.store_private_key_bundle(&bundle).await.unwrap();

        let raw = store
            .keychain()
            .load_key(VAULT_BUNDLES, &bundle_key_name(ACCOUNT))
            .unwrap()
            .unwrap();
        let stored = String::from_utf8_lossy(&raw);
        assert!(stored.contains("wallet_pre_key"));
        assert!(!stored.contains("secret_key"));
    }

    #[tokio::test]
    async fn accounts_do_not_share_bundles() {
        let keychain = Arc::new(MemoryKeychain::new());
        let (bundle, public) = PrivateKeyBundle::generate().unwrap();
        let other = EncryptedKeyStore::new(
            Ed25519WalletSigner::from_seed(&[4; 32]),
            Arc::clone(&keychain),
            "other",
        );
        other.store_private_key_bundle(&bundle).await.unwrap();

        let store = EncryptedKeyStore::new(
            Ed25519WalletSigner::from_seed(&[4; 32]),
            Arc::clone(&keychain),
            ACCOUNT,
        );
        assert!(store.load_private_key_bundle().await.unwrap().is_none());
        let loaded = other.load_private_key_bundle().await.unwrap().unwrap();
        assert_eq!(loaded.key_bundle(), public);
    }

    #[test]
    fn poisoned_keychain_is_a_storage_error() {
        let keychain = MemoryKeychain::new();
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = keychain.entries.lock().unwrap();
            panic!("poison");
        }));
        assert!(poisoned.is_err());

        let err = keychain.load_key(VAULT_BUNDLES, "x").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }
}
