use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboxStatus {
    Unread,
    Read,
    Archived,
    Deleted,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Unread => "unread",
            InboxStatus::Read => "read",
            InboxStatus::Archived => "archived",
            InboxStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(InboxStatus::Unread),
            "read" => Some(InboxStatus::Read),
            "archived" => Some(InboxStatus::Archived),
            "deleted" => Some(InboxStatus::Deleted),
            _ => None,
        }
    }
}

/// Durable record of a received message (§3 InboxEntry). Insertion is
/// idempotent on `message_id` (§4.2, property 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message_id: String,
    pub swarm_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub received_at: String,
    pub status: InboxStatus,
    pub read_at: Option<String>,
    pub archived_at: Option<String>,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Queued,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Queued => "queued",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Durable record of a message this node is attempting to deliver (§3
/// OutboxEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub message_id: String,
    pub swarm_id: String,
    pub recipient: String,
    pub recipient_endpoint: String,
    /// The fully signed envelope, as the exact JSON Transport sends.
    pub envelope_json: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuteScope {
    Agent,
    Swarm,
}

impl MuteScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            MuteScope::Agent => "agent",
            MuteScope::Swarm => "swarm",
        }
    }
}

/// A single entry in a node's local mute set (§3 Mute). Set, not multiset:
/// storing the same `(scope, target_id)` twice is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mute {
    pub scope: MuteScope,
    pub target_id: String,
    pub reason: Option<String>,
    pub created_at: String,
}

/// Cached sender public key (§3 PublicKeyCacheEntry), refreshed on TTL expiry
/// (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyCacheEntry {
    pub agent_id: String,
    pub public_key: String,
    pub endpoint: String,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Active,
    Suspended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Suspended => "suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SessionState::Idle),
            "active" => Some(SessionState::Active),
            "suspended" => Some(SessionState::Suspended),
            _ => None,
        }
    }
}

/// The node's single invocation-dedup session (§3 Session, §4.12). At most
/// one non-idle session exists per node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub state: SessionState,
    pub started_at: String,
    pub last_activity_at: String,
    pub context_summary: Option<String>,
}

/// A row in the per-swarm issued-tokens table (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteTokenRow {
    pub token_hash: String,
    pub swarm_id: String,
    pub max_uses: Option<u32>,
    pub uses: u32,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub revoked: bool,
}

/// An outstanding master-transfer offer (§4.5): at most one per swarm,
/// awaiting accept/decline from `to_agent` before the master swap happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub swarm_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub created_at: String,
}
