// ABOUTME: HMAC-SHA256 message signing and verification.
// ABOUTME: Signs a canonical JSON view of the envelope's identifying fields.

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

use crate::error::{BusError, Result};
use crate::message::Message;

type HmacSha256 = Hmac<Sha256>;

/// Signs outgoing messages and verifies incoming ones with a shared secret.
#[derive(Clone)]
pub struct MessageSigner {
    secret: Arc<[u8]>,
}

impl fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl MessageSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    fn mac(&self, message: &Message) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| BusError::InvalidMessage(format!("signing key rejected: {e}")))?;
        mac.update(&canonical_bytes(message)?);
        Ok(mac)
    }

    /// Hex-encoded signature over the message's canonical form.
    pub fn sign(&self, message: &Message) -> Result<String> {
        Ok(hex::encode(self.mac(message)?.finalize().into_bytes()))
    }

    /// Verify the attached signature in constant time.
    pub fn verify(&self, message: &Message) -> Result<()> {
        let signature = message
            .signature
            .as_deref()
            .ok_or_else(|| BusError::InvalidMessage("missing signature".to_string()))?;
        let expected = hex::decode(signature)
            .map_err(|_| BusError::InvalidMessage("malformed signature".to_string()))?;

        self.mac(message)?
            .verify_slice(&expected)
            .map_err(|_| BusError::InvalidMessage("signature mismatch".to_string()))
    }
}

/// Sorted-key JSON of the fields covered by the signature.
fn canonical_bytes(message: &Message) -> Result<Vec<u8>> {
    let view = json!({
        "id": message.id,
        "from": message.from,
        "to": message.to,
        "type": message.kind,
        "timestamp": message.timestamp,
        "payload": message.payload,
    });
    Ok(serde_json::to_vec(&view)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn sample() -> Message {
        Message::new("a", "b", MessageType::Direct, json!({"cmd": "build"}))
    }

    #[test]
    fn test_sign_is_deterministic_hex() {
        let signer = MessageSigner::new("k");
        let msg = sample();
        let first = signer.sign(&msg).unwrap();
        assert_eq!(first, signer.sign(&msg).unwrap());
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_round_trip() {
        let signer = MessageSigner::new("k");
        let mut msg = sample();
        msg.signature = Some(signer.sign(&msg).unwrap());
        assert!(signer.verify(&msg).is_ok());
    }

    #[test]
    fn test_signature_ignores_unsigned_fields() {
        let signer = MessageSigner::new("k");
        let mut msg = sample();
        msg.signature = Some(signer.sign(&msg).unwrap());
        msg.reply_to = Some("elsewhere".to_string());
        assert!(signer.verify(&msg).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_key_and_garbage() {
        let mut msg = sample();
        msg.signature = Some(MessageSigner::new("one").sign(&msg).unwrap());
        assert!(MessageSigner::new("two").verify(&msg).is_err());

        msg.signature = Some("zz-not-hex".to_string());
        let err = MessageSigner::new("one").verify(&msg).unwrap_err();
        assert_eq!(err, BusError::InvalidMessage("malformed signature".to_string()));

        msg.signature = None;
        let err = MessageSigner::new("one").verify(&msg).unwrap_err();
        assert_eq!(err, BusError::InvalidMessage("missing signature".to_string()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let out = format!("{:?}", MessageSigner::new("hunter2"));
        assert!(!out.contains("hunter2"));
    }
}
