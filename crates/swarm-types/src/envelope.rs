use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sender identity carried on every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub agent_id: String,
    pub endpoint: String,
}

/// Either a broadcast to the whole swarm or a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    Broadcast(BroadcastMarker),
    Agent(String),
}

/// Serializes/deserializes as the literal string `"broadcast"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastMarker;

impl Serialize for BroadcastMarker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("broadcast")
    }
}

impl<'de> Deserialize<'de> for BroadcastMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "broadcast" {
            Ok(BroadcastMarker)
        } else {
            Err(serde::de::Error::custom("expected \"broadcast\""))
        }
    }
}

impl Recipient {
    pub fn broadcast() -> Self {
        Recipient::Broadcast(BroadcastMarker)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Recipient::Agent(id.into())
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::Broadcast(_))
    }

    /// The wire representation: `"broadcast"` or the agent id.
    pub fn as_str(&self) -> &str {
        match self {
            Recipient::Broadcast(_) => "broadcast",
            Recipient::Agent(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Message,
    System,
    Notification,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::Message => "message",
            EnvelopeType::System => "system",
            EnvelopeType::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Wire form of a single message (§3). `timestamp` is RFC 3339 UTC,
/// millisecond precision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub protocol_version: String,
    pub message_id: String,
    pub timestamp: String,
    pub sender: Sender,
    pub recipient: Recipient,
    pub swarm_id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub content: String,
    pub signature: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl MessageEnvelope {
    /// Builds the exact byte string that is signed and verified (§4.1):
    /// `message_id || "\0" || timestamp || "\0" || swarm_id || "\0" ||
    /// recipient || "\0" || type || "\0" || content`.
    ///
    /// The null-byte delimiter is the concrete choice spec.md's design notes
    /// call out as ambiguous in the source; this is the one conformance
    /// vectors must be generated against.
    pub fn canonical_signing_payload(&self) -> Vec<u8> {
        canonical_signing_payload(
            &self.message_id,
            &self.timestamp,
            &self.swarm_id,
            self.recipient.as_str(),
            self.kind.as_str(),
            &self.content,
        )
    }

    pub fn priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

/// Standalone helper so callers that haven't built a full [`MessageEnvelope`]
/// yet (e.g. while signing outbound messages) can compute the same bytes.
pub fn canonical_signing_payload(
    message_id: &str,
    timestamp: &str,
    swarm_id: &str,
    recipient: &str,
    kind: &str,
    content: &str,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        message_id.len() + timestamp.len() + swarm_id.len() + recipient.len() + kind.len()
            + content.len()
            + 5,
    );
    buf.extend_from_slice(message_id.as_bytes());
    buf.push(0);
    buf.extend_from_slice(timestamp.as_bytes());
    buf.push(0);
    buf.extend_from_slice(swarm_id.as_bytes());
    buf.push(0);
    buf.extend_from_slice(recipient.as_bytes());
    buf.push(0);
    buf.extend_from_slice(kind.as_bytes());
    buf.push(0);
    buf.extend_from_slice(content.as_bytes());
    buf
}
