use thiserror::Error;

/// Boxed error returned by an external wallet signer.
pub type SignerError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("invalid {field} length: {actual}")]
    InvalidLength { field: &'static str, actual: usize },

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("peer pre-key signature invalid")]
    PreKeySignature,

    #[error("authentication failed")]
    Authentication,

    #[error("recipient pre-key mismatch")]
    RecipientMismatch,

    #[error("wallet signer failed: {0}")]
    Signer(#[source] SignerError),

    #[error("wallet signer is not deterministic")]
    NondeterministicSigner,

    #[error("keychain error: {0}")]
    Storage(String),
}

/// Coarse failure class a caller can branch on without matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or malformed wire fields.
    Structural,
    /// Wrong-length salt, nonce, ciphertext or key material.
    Validation,
    /// Signature or AEAD tag mismatch.
    Authentication,
    /// The message is not addressed to this identity.
    Routing,
    /// The external signer failed or cannot be used for backups.
    Signer,
    /// The keychain backend failed.
    Storage,
}

impl CryptoError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingField(_) | Self::Malformed { .. } => ErrorCategory::Structural,
            Self::InvalidLength { .. } | Self::InvalidKey(_) => ErrorCategory::Validation,
            Self::PreKeySignature | Self::Authentication => ErrorCategory::Authentication,
            Self::RecipientMismatch => ErrorCategory::Routing,
            Self::Signer(_) | Self::NondeterministicSigner => ErrorCategory::Signer,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    pub(crate) fn malformed(field: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            field,
            reason: err.to_string(),
        }
    }
}
