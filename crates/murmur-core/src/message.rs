// ABOUTME: Wire message envelope, schema validation, and JSON codec.
// ABOUTME: Defines Message, MessageType, metadata, and id generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{BusError, Result};
use crate::signing::MessageSigner;

/// Recipient used for messages addressed to every agent.
pub const BROADCAST_TARGET: &str = "all";

/// Sender id used for events the bus itself publishes.
pub const SYSTEM_SENDER: &str = "system";

/// Envelope version written by this implementation.
pub const MESSAGE_VERSION: &str = "1.0";

/// Kind of message, which decides how it is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Direct,
    Broadcast,
    Request,
    Response,
    Event,
    Command,
    Query,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Direct => "direct",
            MessageType::Broadcast => "broadcast",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Command => "command",
            MessageType::Query => "query",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(MessageType::Direct),
            "broadcast" => Ok(MessageType::Broadcast),
            "request" => Ok(MessageType::Request),
            "response" => Ok(MessageType::Response),
            "event" => Ok(MessageType::Event),
            "command" => Ok(MessageType::Command),
            "query" => Ok(MessageType::Query),
            other => Err(BusError::InvalidMessage(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Brotli,
}

fn default_max_retries() -> u32 {
    3
}

/// Optional delivery hints carried with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default)]
    pub priority: Priority,
    /// Seconds after which the message is purged from history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Topic channel for broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            ttl: None,
            encrypted: false,
            compression: Compression::None,
            retry_count: 0,
            max_retries: default_max_retries(),
            topic: None,
        }
    }
}

fn default_version() -> String {
    MESSAGE_VERSION.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The wire envelope exchanged between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: DateTime<Utc>,
    /// Caller-defined content; the bus never inspects it except for event names.
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

impl Message {
    /// Create a message stamped with a fresh id and the current time.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageType,
        payload: Value,
    ) -> Self {
        Self {
            id: generate_message_id(),
            from: from.into(),
            to: to.into(),
            kind,
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            reply_to: None,
            requires_response: false,
            metadata: None,
            signature: None,
            version: default_version(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == MessageType::Broadcast || self.to == BROADCAST_TARGET
    }

    /// Heartbeats are events whose payload names the `heartbeat` event.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageType::Event && self.event_name() == Some("heartbeat")
    }

    /// The `event` field of an object payload, if any.
    pub fn event_name(&self) -> Option<&str> {
        self.payload.get("event").and_then(Value::as_str)
    }

    pub fn priority(&self) -> Priority {
        self.metadata
            .as_ref()
            .map(|m| m.priority)
            .unwrap_or_default()
    }

    pub fn topic(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.topic.as_deref())
    }

    /// Whether the message has outlived its ttl at `now`. A ttl too large to
    /// represent as a deadline never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| deadline <= now)
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = self.metadata.as_ref()?.ttl?;
        let ttl = chrono::Duration::try_seconds(i64::try_from(ttl).ok()?)?;
        self.timestamp.checked_add_signed(ttl)
    }

    /// Whether the handler's return value should be sent back as a response.
    pub fn expects_reply(&self) -> bool {
        self.requires_response || self.reply_to.is_some()
    }

    /// Check required fields and the envelope version.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BusError::InvalidMessage("missing id".to_string()));
        }
        if self.from.trim().is_empty() {
            return Err(BusError::InvalidMessage("missing sender".to_string()));
        }
        if self.to.trim().is_empty() {
            return Err(BusError::InvalidMessage("missing recipient".to_string()));
        }
        if self.version != MESSAGE_VERSION {
            return Err(BusError::InvalidMessage(format!(
                "unsupported version: {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Serializes messages for the transport and validates what comes back.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    signer: Option<MessageSigner>,
}

impl Codec {
    pub fn new(signer: Option<MessageSigner>) -> Self {
        Self { signer }
    }

    pub fn is_signing(&self) -> bool {
        self.signer.is_some()
    }

    /// Attach a signature when a signing key is configured.
    pub fn seal(&self, message: &mut Message) -> Result<()> {
        if let Some(signer) = &self.signer {
            message.signature = Some(signer.sign(message)?);
        }
        Ok(())
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Parse, validate, and verify a message from the wire.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let message: Message = serde_json::from_slice(bytes)?;
        message.validate()?;
        if let Some(signer) = &self.signer {
            signer.verify(&message)?;
        }
        Ok(message)
    }
}

/// Generate a message id: `msg-<unix-millis>-<16 hex chars>`.
pub fn generate_message_id() -> String {
    prefixed_id("msg")
}

/// Generate a correlation id: `req-<unix-millis>-<16 hex chars>`.
pub fn generate_correlation_id() -> String {
    prefixed_id("req")
}

fn prefixed_id(prefix: &str) -> String {
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}",
        prefix,
        Utc::now().timestamp_millis(),
        &entropy[..16]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_message_defaults() {
        let msg = Message::new("a", "b", MessageType::Direct, json!({"cmd": "build"}));
        assert!(msg.id.starts_with("msg-"));
        assert_eq!(msg.version, "1.0");
        assert!(msg.correlation_id.is_none());
        assert!(!msg.requires_response);
        assert_eq!(msg.priority(), Priority::Normal);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_ids_are_unique_and_shaped() {
        let a = generate_message_id();
        let b = generate_message_id();
        assert_ne!(a, b);

        let parts: Vec<&str> = a.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "msg");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 16);

        assert!(generate_correlation_id().starts_with("req-"));
    }

    #[test]
    fn test_wire_format_uses_camel_case_and_type() {
        let msg = Message::new("a", "b", MessageType::Request, json!(1))
            .with_correlation_id("req-1")
            .with_reply_to("a")
            .requiring_response();
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "request");
        assert_eq!(value["correlationId"], "req-1");
        assert_eq!(value["replyTo"], "a");
        assert_eq!(value["requiresResponse"], true);
        assert!(value.get("signature").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_decode_accepts_minimal_envelope() {
        let raw = json!({
            "id": "msg-1",
            "from": "a",
            "to": "b",
            "type": "event",
            "timestamp": "2025-01-01T00:00:00Z",
            "payload": {"event": "heartbeat"}
        });
        let msg = Codec::default()
            .decode(raw.to_string().as_bytes())
            .unwrap();
        assert!(msg.is_heartbeat());
        assert_eq!(msg.version, "1.0");
    }

    #[test]
    fn test_decode_rejects_missing_fields_and_bad_types() {
        let codec = Codec::default();

        let missing_from = json!({
            "id": "msg-1", "to": "b", "type": "direct",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        assert!(matches!(
            codec.decode(missing_from.to_string().as_bytes()),
            Err(BusError::InvalidMessage(_))
        ));

        let bad_type = json!({
            "id": "msg-1", "from": "a", "to": "b", "type": "gossip",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        assert!(matches!(
            codec.decode(bad_type.to_string().as_bytes()),
            Err(BusError::InvalidMessage(_))
        ));

        let empty_to = json!({
            "id": "msg-1", "from": "a", "to": "", "type": "direct",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        assert!(matches!(
            codec.decode(empty_to.to_string().as_bytes()),
            Err(BusError::InvalidMessage(_))
        ));

        assert!(codec.decode(b"not json").is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut msg = Message::new("a", "b", MessageType::Direct, json!(null));
        msg.version = "2.0".to_string();
        let bytes = serde_json::to_vec(&msg).unwrap();
        let err = Codec::default().decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported version"));
    }

    #[test]
    fn test_signed_codec_rejects_unsigned_and_tampered() {
        let codec = Codec::new(Some(MessageSigner::new("secret")));

        let mut msg = Message::new("a", "b", MessageType::Direct, json!({"n": 1}));
        let unsigned = codec.encode(&msg).unwrap();
        assert!(codec.decode(&unsigned).is_err());

        codec.seal(&mut msg).unwrap();
        let signed = codec.encode(&msg).unwrap();
        assert_eq!(codec.decode(&signed).unwrap(), msg);

        msg.payload = json!({"n": 2});
        let tampered = codec.encode(&msg).unwrap();
        assert!(matches!(
            codec.decode(&tampered),
            Err(BusError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut msg = Message::new("a", "b", MessageType::Direct, json!(null)).with_metadata(
            MessageMetadata {
                ttl: Some(5),
                ..Default::default()
            },
        );
        let now = msg.timestamp;
        assert!(!msg.is_expired(now));
        assert!(!msg.is_expired(now + chrono::Duration::seconds(4)));
        assert!(msg.is_expired(now + chrono::Duration::seconds(5)));

        msg.metadata = None;
        assert!(!msg.is_expired(now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        for ttl in [100_000_000_000_000, i64::MAX as u64, u64::MAX] {
            let msg = Message::new("a", "b", MessageType::Direct, json!(null)).with_metadata(
                MessageMetadata {
                    ttl: Some(ttl),
                    ..Default::default()
                },
            );
            let now = msg.timestamp;
            assert!(!msg.is_expired(now), "ttl {ttl}");
            assert!(!msg.is_expired(now + chrono::Duration::days(365)), "ttl {ttl}");
        }
    }

    #[test]
    fn test_metadata_defaults_when_partial() {
        let meta: MessageMetadata = serde_json::from_value(json!({"ttl": 10})).unwrap();
        assert_eq!(meta.priority, Priority::Normal);
        assert_eq!(meta.compression, Compression::None);
        assert_eq!(meta.max_retries, 3);
        assert_eq!(meta.ttl, Some(10));
    }

    #[test]
    fn test_message_type_parse() {
        assert_eq!("query".parse::<MessageType>().unwrap(), MessageType::Query);
        assert!("nope".parse::<MessageType>().is_err());
        assert_eq!(MessageType::Command.to_string(), "command");
    }
}
