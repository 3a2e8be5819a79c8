//! Inbound envelope validation (§4.3): run before any side effect, in rule
//! order, stopping at the first failure.

use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use thiserror::Error;
use uuid::Uuid;

use crate::envelope::{EnvelopeType, MessageEnvelope};
use crate::PROTOCOL_VERSION;

/// Timestamp skew tolerance (§4.3 rule 4).
pub const TIMESTAMP_SKEW: Duration = Duration::minutes(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("unsupported protocol_version")]
    ProtocolVersion,
    #[error("required field missing or empty: {0}")]
    MissingField(&'static str),
    #[error("{0} is not a valid UUID")]
    NotUuid(&'static str),
    #[error("timestamp does not parse or is outside the skew tolerance")]
    Timestamp,
    #[error("type is not in the allowed set")]
    UnknownType,
    #[error("system envelope content is not JSON with a recognized action")]
    BadSystemContent,
    #[error("sender.endpoint is not an absolute HTTPS URL")]
    SenderEndpoint,
    #[error("recipient is neither \"broadcast\" nor a well-formed agent_id")]
    BadRecipient,
}

const RECOGNIZED_SYSTEM_ACTIONS: &[&str] = &[
    "member_joined",
    "member_left",
    "member_kicked",
    "kicked",
    "swarm_dissolved",
    "master_changed",
    "master_transfer",
    "join_request",
];

/// Runs §4.3 rules 1–7 in order against `envelope`, given the current time.
/// Stops at the first failing rule — "no partial work".
pub fn validate(envelope: &MessageEnvelope, now: OffsetDateTime) -> Result<(), EnvelopeError> {
    if envelope.protocol_version != PROTOCOL_VERSION {
        return Err(EnvelopeError::ProtocolVersion);
    }

    if envelope.message_id.is_empty() {
        return Err(EnvelopeError::MissingField("message_id"));
    }
    if envelope.swarm_id.is_empty() {
        return Err(EnvelopeError::MissingField("swarm_id"));
    }
    if envelope.timestamp.is_empty() {
        return Err(EnvelopeError::MissingField("timestamp"));
    }
    if envelope.sender.agent_id.is_empty() {
        return Err(EnvelopeError::MissingField("sender.agent_id"));
    }
    if envelope.sender.endpoint.is_empty() {
        return Err(EnvelopeError::MissingField("sender.endpoint"));
    }
    if envelope.signature.is_empty() {
        return Err(EnvelopeError::MissingField("signature"));
    }

    Uuid::parse_str(&envelope.message_id).map_err(|_| EnvelopeError::NotUuid("message_id"))?;
    Uuid::parse_str(&envelope.swarm_id).map_err(|_| EnvelopeError::NotUuid("swarm_id"))?;

    let ts = OffsetDateTime::parse(&envelope.timestamp, &Rfc3339).map_err(|_| EnvelopeError::Timestamp)?;
    if (ts - now).abs() > TIMESTAMP_SKEW {
        return Err(EnvelopeError::Timestamp);
    }

    // `kind` is a closed enum at the type level, so rule 5's "allowed set"
    // check is already enforced by deserialization; only the system-content
    // shape remains to check here.
    if envelope.kind == EnvelopeType::System {
        let parsed: serde_json::Value =
            serde_json::from_str(&envelope.content).map_err(|_| EnvelopeError::BadSystemContent)?;
        let action = parsed
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or(EnvelopeError::BadSystemContent)?;
        if !RECOGNIZED_SYSTEM_ACTIONS.contains(&action) {
            return Err(EnvelopeError::BadSystemContent);
        }
    }

    if !envelope.sender.endpoint.starts_with("https://") {
        return Err(EnvelopeError::SenderEndpoint);
    }

    match &envelope.recipient {
        crate::envelope::Recipient::Broadcast(_) => {}
        crate::envelope::Recipient::Agent(id) => {
            if id.is_empty() {
                return Err(EnvelopeError::BadRecipient);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Recipient, Sender};

    fn base_envelope() -> MessageEnvelope {
        MessageEnvelope {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: "11111111-1111-1111-1111-111111111111".into(),
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap(),
            sender: Sender {
                agent_id: "n".into(),
                endpoint: "https://n.example/swarm".into(),
            },
            recipient: Recipient::broadcast(),
            swarm_id: "22222222-2222-2222-2222-222222222222".into(),
            kind: EnvelopeType::Message,
            content: "hi".into(),
            signature: "c2ln".into(),
            in_reply_to: None,
            thread_id: None,
            priority: None,
            expires_at: None,
            references: vec![],
            attachments: vec![],
            metadata: None,
        }
    }

    #[test]
    fn well_formed_envelope_passes() {
        assert!(validate(&base_envelope(), OffsetDateTime::now_utc()).is_ok());
    }

    #[test]
    fn wrong_protocol_version_is_rejected_first() {
        let mut env = base_envelope();
        env.protocol_version = "99".into();
        env.message_id = "not-a-uuid".into();
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::ProtocolVersion)
        );
    }

    #[test]
    fn malformed_uuid_is_rejected() {
        let mut env = base_envelope();
        env.swarm_id = "not-a-uuid".into();
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::NotUuid("swarm_id"))
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let mut env = base_envelope();
        env.timestamp = (OffsetDateTime::now_utc() - Duration::hours(1)).format(&Rfc3339).unwrap();
        assert_eq!(validate(&env, OffsetDateTime::now_utc()), Err(EnvelopeError::Timestamp));
    }

    #[test]
    fn non_https_sender_endpoint_is_rejected() {
        let mut env = base_envelope();
        env.sender.endpoint = "http://n.example/swarm".into();
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::SenderEndpoint)
        );
    }

    #[test]
    fn system_envelope_requires_recognized_action() {
        let mut env = base_envelope();
        env.kind = EnvelopeType::System;
        env.content = serde_json::json!({"action": "member_joined", "swarm_id": "s", "agent_id": "n"})
            .to_string();
        assert!(validate(&env, OffsetDateTime::now_utc()).is_ok());

        env.content = serde_json::json!({"action": "not_a_real_action"}).to_string();
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::BadSystemContent)
        );

        env.content = "not json".into();
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::BadSystemContent)
        );
    }

    #[test]
    fn empty_agent_recipient_is_rejected() {
        let mut env = base_envelope();
        env.recipient = Recipient::agent("");
        assert_eq!(
            validate(&env, OffsetDateTime::now_utc()),
            Err(EnvelopeError::BadRecipient)
        );
    }
}
