//! Lifecycle notifications (§4.11): `type="system"` envelopes describing a
//! membership change, emitted into this node's own inbox and queued in the
//! outbox for every other current member. Emission is fire-and-forget —
//! callers log failures rather than unwind the originating operation.

use ed25519_dalek::SigningKey;
use swarm_store::SqliteStore;
use swarm_types::{
    EnvelopeType, InboxEntry, InboxStatus, Member, MessageEnvelope, OutboxEntry, OutboxStatus,
    Recipient, Sender, PROTOCOL_VERSION,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn build_content(
    action: &str,
    swarm_id: &str,
    agent_id: &str,
    initiated_by: Option<&str>,
    reason: Option<&str>,
) -> String {
    serde_json::json!({
        "action": action,
        "swarm_id": swarm_id,
        "agent_id": agent_id,
        "initiated_by": initiated_by,
        "reason": reason,
    })
    .to_string()
}

/// `Emit(action, swarm_id, agent_id, initiated_by?, reason?)` (§4.5, §4.11).
/// `recipients` is the set of current members (excluding this node) that
/// should receive a copy; a direct-delivery notification (e.g. `kicked`)
/// passes a single-element slice.
#[allow(clippy::too_many_arguments)]
pub async fn emit(
    store: &SqliteStore,
    signer: &SigningKey,
    self_agent_id: &str,
    self_endpoint: &str,
    swarm_id: &str,
    action: &str,
    agent_id: &str,
    initiated_by: Option<&str>,
    reason: Option<&str>,
    recipients: &[Member],
) -> Result<(), swarm_store::StoreError> {
    let content = build_content(action, swarm_id, agent_id, initiated_by, reason);
    let now = now_rfc3339();

    let self_message_id = uuid::Uuid::new_v4().to_string();
    store
        .insert_inbox_idempotent(InboxEntry {
            message_id: self_message_id,
            swarm_id: swarm_id.to_string(),
            sender_id: self_agent_id.to_string(),
            kind: "system".to_string(),
            content: content.clone(),
            received_at: now.clone(),
            status: InboxStatus::Unread,
            read_at: None,
            archived_at: None,
            deleted_at: None,
        })
        .await?;

    for recipient in recipients {
        if recipient.agent_id == self_agent_id {
            continue;
        }
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut envelope = MessageEnvelope {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: message_id.clone(),
            timestamp: now.clone(),
            sender: Sender {
                agent_id: self_agent_id.to_string(),
                endpoint: self_endpoint.to_string(),
            },
            recipient: Recipient::agent(recipient.agent_id.clone()),
            swarm_id: swarm_id.to_string(),
            kind: EnvelopeType::System,
            content: content.clone(),
            signature: String::new(),
            in_reply_to: None,
            thread_id: None,
            priority: None,
            expires_at: None,
            references: Vec::new(),
            attachments: Vec::new(),
            metadata: None,
        };
        envelope.signature = swarm_crypto::sign(&envelope.canonical_signing_payload(), signer);
        let envelope_json = serde_json::to_string(&envelope).unwrap_or_default();

        store
            .insert_outbox(OutboxEntry {
                message_id,
                swarm_id: swarm_id.to_string(),
                recipient: recipient.agent_id.clone(),
                recipient_endpoint: recipient.endpoint.clone(),
                envelope_json,
                status: OutboxStatus::Queued,
                attempts: 0,
                last_error: None,
                created_at: now.clone(),
                delivered_at: None,
            })
            .await?;
    }

    Ok(())
}
