//! Wire and storage types shared by every crate in the swarm messaging node.
//!
//! This crate holds only plain data definitions and the canonical signing
//! payload construction (§4.1 of the protocol). Validation, signing, and
//! persistence live in their own crates so this one stays dependency-light
//! and usable from both the receive and send paths without cycles.

pub mod envelope;
pub mod membership;
pub mod session;
pub mod validate;

pub use envelope::{EnvelopeType, MessageEnvelope, Priority, Recipient, Sender};
pub use membership::{Member, Swarm, SwarmSettings};
pub use session::{
    InboxEntry, InboxStatus, InviteTokenRow, Mute, MuteScope, OutboxEntry, OutboxStatus,
    PendingTransfer, PublicKeyCacheEntry, SessionRecord, SessionState,
};
pub use validate::EnvelopeError;

/// Protocol major version understood by this node. Carried in every envelope
/// and checked by §4.3 rule 1.
pub const PROTOCOL_VERSION: &str = "1";
