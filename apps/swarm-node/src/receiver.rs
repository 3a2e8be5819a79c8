//! HTTP handlers for the swarm protocol surface (§4.7, §4.9): `/swarm/message`,
//! `/swarm/join`, `/swarm/health`, `/swarm/info`, and the conditionally
//! mounted `/api/wake`.

use std::sync::{Arc, RwLock};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use serde_json::json;
use swarm_store::SqliteStore;
use swarm_transport::Transport;
use swarm_types::{
    validate, EnvelopeType, InboxEntry, InboxStatus, Member, MessageEnvelope, MuteScope, Priority,
    PROTOCOL_VERSION,
};
use swarm_wake::{
    evaluate, EvaluationInput, Invoker, NotificationPreferences, SessionManager, WakeCondition,
    WakeDecision, WakePayload,
};
use time::OffsetDateTime;

use crate::{config::NodeConfig, error::ApiError, identity::Identity};

pub struct AppState {
    pub store: SqliteStore,
    pub identity: Identity,
    pub transport: Transport,
    pub config: NodeConfig,
    pub invoker: Arc<dyn Invoker>,
    pub wake_client: reqwest::Client,
    pub prefs: RwLock<NotificationPreferences>,
}

/// §4.7 step 1: every inbound protocol request must carry `X-Agent-ID` and
/// `X-Swarm-Protocol`.
pub async fn require_headers(req: Request<Body>, next: Next) -> Response {
    let has_agent_id = req.headers().contains_key("X-Agent-ID");
    let has_protocol = req.headers().contains_key("X-Swarm-Protocol");
    if !has_agent_id || !has_protocol {
        return ApiError::InvalidFormat("missing X-Agent-ID or X-Swarm-Protocol header".into())
            .into_response();
    }
    next.run(req).await
}

#[derive(Debug, Serialize)]
struct QueuedResponse<'a> {
    status: &'a str,
    message_id: &'a str,
}

/// Resolves `agent_id`'s public key, preferring the cache and falling back to
/// `GET <endpoint>/swarm/info` on a miss (§4.6, §4.7 step 4).
async fn resolve_public_key(
    state: &AppState,
    agent_id: &str,
    endpoint: &str,
) -> Result<VerifyingKey, ApiError> {
    let now = OffsetDateTime::now_utc();
    if let Some(cached) = state.store.get_cached_pubkey(agent_id).await? {
        if Transport::is_fresh(&cached, now, state.config.public_key_cache_ttl_secs) {
            return Ok(swarm_crypto::verifying_key_from_base64(&cached.public_key)?);
        }
    }
    let entry = state
        .transport
        .refresh_public_key(&state.store, agent_id, endpoint)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(swarm_crypto::verifying_key_from_base64(&entry.public_key)?)
}

/// `POST /swarm/message` (§4.7 steps 3–10).
pub async fn message_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<MessageEnvelope>,
) -> Result<Response, ApiError> {
    validate::validate(&envelope, OffsetDateTime::now_utc())?;

    let mut verifying_key =
        resolve_public_key(&state, &envelope.sender.agent_id, &envelope.sender.endpoint).await?;
    let payload = envelope.canonical_signing_payload();
    if swarm_crypto::verify(&payload, &envelope.signature, &verifying_key).is_err() {
        // Retry once against a freshly fetched key before failing (§4.7 step 4).
        let refreshed = state
            .transport
            .refresh_public_key(&state.store, &envelope.sender.agent_id, &envelope.sender.endpoint)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        verifying_key = swarm_crypto::verifying_key_from_base64(&refreshed.public_key)?;
        swarm_crypto::verify(&payload, &envelope.signature, &verifying_key)?;
    }

    let swarm = state
        .store
        .get_swarm(&envelope.swarm_id)
        .await?
        .ok_or_else(|| ApiError::SwarmNotFound(envelope.swarm_id.clone()))?;
    if !swarm.is_member(&envelope.sender.agent_id) {
        return Err(ApiError::NotAuthorized);
    }

    let agent_muted = state
        .store
        .is_muted(MuteScope::Agent, &envelope.sender.agent_id)
        .await?;
    let swarm_muted = state.store.is_muted(MuteScope::Swarm, &envelope.swarm_id).await?;
    if agent_muted || swarm_muted {
        return Ok(Json(QueuedResponse {
            status: "queued",
            message_id: &envelope.message_id,
        })
        .into_response());
    }

    let freshly_inserted = state
        .store
        .insert_inbox_idempotent(InboxEntry {
            message_id: envelope.message_id.clone(),
            swarm_id: envelope.swarm_id.clone(),
            sender_id: envelope.sender.agent_id.clone(),
            kind: envelope.kind.as_str().to_string(),
            content: envelope.content.clone(),
            received_at: envelope.timestamp.clone(),
            status: InboxStatus::Unread,
            read_at: None,
            archived_at: None,
            deleted_at: None,
        })
        .await?;

    if freshly_inserted {
        evaluate_wake(&state, &envelope).await;
    }

    Ok(Json(QueuedResponse {
        status: "queued",
        message_id: &envelope.message_id,
    })
    .into_response())
}

/// §4.7 step 9: wake-trigger evaluation never blocks or fails the response.
async fn evaluate_wake(state: &AppState, envelope: &MessageEnvelope) {
    let prefs = state.prefs.read().expect("notification prefs lock poisoned").clone();
    let input = EvaluationInput {
        swarm_id: &envelope.swarm_id,
        sender_id: &envelope.sender.agent_id,
        recipient: envelope.recipient.as_str(),
        this_agent_id: &state.identity.agent_id,
        priority: envelope.priority(),
        kind: envelope.kind,
        content: &envelope.content,
        now_hour_utc: OffsetDateTime::now_utc().hour(),
    };
    if evaluate(&prefs, &input) != WakeDecision::Wake {
        return;
    }
    let Some(wake_endpoint_url) = state.config.wake_endpoint_url.as_ref() else {
        return;
    };
    let payload = WakePayload {
        message_id: envelope.message_id.clone(),
        swarm_id: envelope.swarm_id.clone(),
        sender_id: envelope.sender.agent_id.clone(),
        notification_level: envelope.priority().as_str_level(),
    };
    if let Err(e) = swarm_wake::dispatch_wake(
        &state.wake_client,
        wake_endpoint_url,
        &payload,
        state.config.wake_shared_secret.as_deref(),
    )
    .await
    {
        tracing::warn!(error = %e, message_id = %envelope.message_id, "wake dispatch failed");
    }
}

#[derive(Debug, Deserialize)]
struct JoinContent {
    action: String,
    jwt: String,
    url: String,
    public_key: String,
}

/// `POST /swarm/join` (§4.7: steps 1–5, verifying the requester's own
/// signature, then Membership.Join). The requester is not yet a swarm
/// member, so its public key is self-asserted in the request content rather
/// than resolved from the cache — it becomes the member's key of record only
/// once the invite token validates.
pub async fn join_handler(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<MessageEnvelope>,
) -> Result<Response, ApiError> {
    validate::validate(&envelope, OffsetDateTime::now_utc())?;
    if envelope.kind != EnvelopeType::System {
        return Err(ApiError::InvalidFormat("join request must be a system envelope".into()));
    }

    let join_content: JoinContent =
        serde_json::from_str(&envelope.content).map_err(|e| ApiError::InvalidFormat(e.to_string()))?;
    let requester_key = swarm_crypto::verifying_key_from_base64(&join_content.public_key)?;
    swarm_crypto::verify(&envelope.canonical_signing_payload(), &envelope.signature, &requester_key)?;

    let requester = Member {
        agent_id: envelope.sender.agent_id.clone(),
        endpoint: envelope.sender.endpoint.clone(),
        public_key: join_content.public_key,
        joined_at: OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
    };

    let outcome = swarm_membership::join(
        &state.store,
        &state.identity.signing_key.verifying_key(),
        &state.identity.signing_key,
        &state.identity.agent_id,
        &state.identity.endpoint,
        &join_content.jwt,
        &join_content.url,
        requester,
    )
    .await?;

    match outcome {
        swarm_membership::JoinOutcome::AlreadyMember(swarm) | swarm_membership::JoinOutcome::Joined(swarm) => {
            Ok((StatusCode::OK, Json(json!({ "status": "joined", "swarm": swarm }))).into_response())
        }
        swarm_membership::JoinOutcome::PendingApproval => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "pending_approval" })),
        )
            .into_response()),
    }
}

/// `GET /swarm/health`.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "agent_id": state.identity.agent_id,
        "protocol_version": PROTOCOL_VERSION,
        "timestamp": OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
    }))
}

/// `GET /swarm/info`.
pub async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "agent_id": state.identity.agent_id,
        "endpoint": state.identity.endpoint,
        "public_key": swarm_crypto::public_key_to_base64(&state.identity.signing_key.verifying_key()),
        "protocol_version": PROTOCOL_VERSION,
        "capabilities": Vec::<String>::new(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct WakeRequest {
    #[serde(flatten)]
    pub payload: WakePayload,
}

/// `POST /api/wake` (§4.9): only mounted when `api_wake_enabled`.
pub async fn wake_handler(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(req): Json<WakeRequest>,
) -> Result<Response, ApiError> {
    if let Some(secret) = &state.config.wake_shared_secret {
        let provided = headers.get("X-Wake-Secret").and_then(|v| v.to_str().ok());
        if provided != Some(secret.as_str()) {
            return Err(ApiError::NotAuthorized);
        }
    }

    let sessions = SessionManager::new(&state.store, state.config.session_timeout_secs);
    let outcome = swarm_wake::handle_wake(&sessions, state.invoker.as_ref(), req.payload).await?;
    match outcome {
        swarm_wake::WakeOutcome::Invoked => Ok(Json(json!({ "status": "invoked" })).into_response()),
        swarm_wake::WakeOutcome::AlreadyActive => {
            Ok((StatusCode::OK, Json(json!({ "status": "already_active" }))).into_response())
        }
        swarm_wake::WakeOutcome::InvokerFailed(reason) => Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "detail": reason })),
        )
            .into_response()),
    }
}

trait PriorityLevel {
    fn as_str_level(&self) -> String;
}

impl PriorityLevel for Priority {
    fn as_str_level(&self) -> String {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
        .to_string()
    }
}
