pub mod backup;
pub mod bundle;
pub mod ciphertext;
pub mod error;
pub mod identity;
pub mod message;
pub mod store;
pub mod wire;

pub use backup::{Ed25519WalletSigner, EncryptedPrivateKeyBundle, WalletSigner};
pub use bundle::{KeyBundle, PrivateKeyBundle, Role};
pub use ciphertext::{Ciphertext, Payload};
pub use error::{CryptoError, ErrorCategory};
pub use identity::{PrivateKey, PublicKey};
pub use message::{Header, Message};
pub use store::{EncryptedKeyStore, Keychain, MemoryKeychain};
