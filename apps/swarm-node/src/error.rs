//! Central HTTP error mapping (§6, §7): one `ApiError` enum, one
//! `IntoResponse` impl, no `StatusCode` literals scattered through handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use swarm_crypto::CryptoError;
use swarm_invite::TokenError;
use swarm_membership::MembershipError;
use swarm_store::StoreError;
use swarm_types::EnvelopeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidFormat(String),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("not authorized")]
    NotAuthorized,
    #[error("not the swarm's master")]
    NotMaster,
    #[error("not a member of this swarm")]
    NotMember,
    #[error("member-issued invites are disabled")]
    InvitesDisabled,
    #[error("join request is pending master approval")]
    ApprovalRequired,
    #[error("master transfer was declined")]
    TransferDeclined,
    #[error("no pending master transfer for this swarm")]
    TransferNotPending,
    #[error("swarm not found: {0}")]
    SwarmNotFound(String),
    #[error("member not found: {0}")]
    MemberNotFound(String),
    #[error("invite token is invalid")]
    InvalidToken,
    #[error("invite token has expired")]
    TokenExpired,
    #[error("invite token has reached its max_uses")]
    TokenExhausted,
    #[error("invite token was revoked")]
    TokenRevoked,
    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset: i64,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::NotAuthorized | ApiError::NotMaster | ApiError::NotMember | ApiError::InvitesDisabled => {
                StatusCode::FORBIDDEN
            }
            ApiError::ApprovalRequired => StatusCode::ACCEPTED,
            ApiError::TransferDeclined => StatusCode::CONFLICT,
            ApiError::TransferNotPending => StatusCode::CONFLICT,
            ApiError::SwarmNotFound(_) | ApiError::MemberNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidToken => StatusCode::BAD_REQUEST,
            ApiError::TokenExpired | ApiError::TokenExhausted | ApiError::TokenRevoked => {
                StatusCode::FORBIDDEN
            }
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidFormat(_) => "INVALID_FORMAT",
            ApiError::InvalidSignature => "INVALID_SIGNATURE",
            ApiError::NotAuthorized => "NOT_AUTHORIZED",
            ApiError::NotMaster => "NOT_MASTER",
            ApiError::NotMember => "NOT_MEMBER",
            ApiError::InvitesDisabled => "INVITES_DISABLED",
            ApiError::ApprovalRequired => "APPROVAL_REQUIRED",
            ApiError::TransferDeclined => "TRANSFER_DECLINED",
            ApiError::TransferNotPending => "TRANSFER_NOT_PENDING",
            ApiError::SwarmNotFound(_) => "SWARM_NOT_FOUND",
            ApiError::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::TokenExhausted => "TOKEN_EXHAUSTED",
            ApiError::TokenRevoked => "TOKEN_REVOKED",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (
            status,
            Json(json!({
                "error": {
                    "code": self.code(),
                    "message": self.to_string(),
                    "details": {},
                }
            })),
        )
            .into_response();
        if let ApiError::RateLimited { limit, remaining, reset } = self {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", limit.into());
            headers.insert("X-RateLimit-Remaining", remaining.into());
            headers.insert("X-RateLimit-Reset", reset.into());
        }
        response
    }
}

impl From<MembershipError> for ApiError {
    fn from(e: MembershipError) -> Self {
        match e {
            MembershipError::NotAuthorized => ApiError::NotAuthorized,
            MembershipError::NotMaster => ApiError::NotMaster,
            MembershipError::NotMember => ApiError::NotMember,
            MembershipError::SwarmNotFound(id) => ApiError::SwarmNotFound(id),
            MembershipError::MemberNotFound(id) => ApiError::MemberNotFound(id),
            MembershipError::InvitesDisabled => ApiError::InvitesDisabled,
            MembershipError::TransferDeclined => ApiError::TransferDeclined,
            MembershipError::TransferNotPending => ApiError::TransferNotPending,
            MembershipError::Token(token_err) => ApiError::from(token_err),
            MembershipError::Store(store_err) => ApiError::from(store_err),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::Exhausted => ApiError::TokenExhausted,
            TokenError::Revoked => ApiError::TokenRevoked,
            TokenError::NotFound
            | TokenError::Malformed
            | TokenError::WrongAlgorithm
            | TokenError::SignatureInvalid
            | TokenError::SwarmMismatch
            | TokenError::HostMismatch => ApiError::InvalidToken,
        }
    }
}

impl From<EnvelopeError> for ApiError {
    fn from(e: EnvelopeError) -> Self {
        ApiError::InvalidFormat(e.to_string())
    }
}

impl From<CryptoError> for ApiError {
    fn from(_: CryptoError) -> Self {
        ApiError::InvalidSignature
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
