use crate::bundle::KeyBundle;
use crate::ciphertext::Ciphertext;
use crate::error::CryptoError;
use crate::wire::{HeaderEncoded, MessageEncoded};

/// Sender and recipient bundles of a message.
///
/// The serialized header is the associated data of the payload, so changing
/// either bundle in transit makes decryption fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    sender: KeyBundle,
    recipient: KeyBundle,
}

impl Header {
    pub fn new(sender: KeyBundle, recipient: KeyBundle) -> Self {
        Self { sender, recipient }
    }

    pub fn sender(&self) -> &KeyBundle {
        &self.sender
    }

    pub fn recipient(&self) -> &KeyBundle {
        &self.recipient
    }

    /// Canonical header bytes bound into the AEAD tag.
    pub fn associated_data(&self) -> Result<Vec<u8>, CryptoError> {
        crate::wire::to_bytes(&self.to_encoded(), "message header")
    }

    pub fn to_encoded(&self) -> HeaderEncoded {
        HeaderEncoded {
            sender: Some(self.sender.to_encoded()),
            recipient: Some(self.recipient.to_encoded()),
        }
    }

    pub fn from_encoded(encoded: &HeaderEncoded) -> Result<Self, CryptoError> {
        let sender = encoded
            .sender
            .as_ref()
            .ok_or(CryptoError::MissingField("message sender"))?;
        let recipient = encoded
            .recipient
            .as_ref()
            .ok_or(CryptoError::MissingField("message recipient"))?;
        Ok(Self::new(
            KeyBundle::from_encoded(sender)?,
            KeyBundle::from_encoded(recipient)?,
        ))
    }
}

/// Wire message: header in the clear, payload sealed under the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: Header,
    payload: Ciphertext,
}

impl Message {
    pub fn new(header: Header, payload: Ciphertext) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &Ciphertext {
        &self.payload
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        crate::wire::to_bytes(
            &MessageEncoded {
                header: Some(self.header.to_encoded()),
                payload: Some(self.payload.to_encoded()),
            },
            "message",
        )
    }

    /// Parse a wire message.
    ///
    /// Header, sender, recipient and payload presence is checked before
    /// anything else.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let encoded: MessageEncoded = crate::wire::from_bytes(bytes, "message")?;
        let header = encoded
            .header
            .as_ref()
            .ok_or(CryptoError::MissingField("message header"))?;
        if header.sender.is_none() {
            return Err(CryptoError::MissingField("message sender"));
        }
        if header.recipient.is_none() {
            return Err(CryptoError::MissingField("message recipient"));
        }
        let payload = encoded
            .payload
            .as_ref()
            .ok_or(CryptoError::MissingField("message payload"))?;
        Ok(Self::new(
            Header::from_encoded(header)?,
            Ciphertext::from_encoded(payload)?,
        ))
    }
}
