use swarm_invite::TokenError;
use swarm_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("caller is not authorized to perform this operation")]
    NotAuthorized,
    #[error("caller is not the swarm's master")]
    NotMaster,
    #[error("caller is not a member of this swarm")]
    NotMember,
    #[error("swarm not found: {0}")]
    SwarmNotFound(String),
    #[error("member not found: {0}")]
    MemberNotFound(String),
    #[error("member-issued invites are disabled for this swarm")]
    InvitesDisabled,
    #[error("master transfer was declined")]
    TransferDeclined,
    #[error("no pending master transfer for this swarm")]
    TransferNotPending,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
