use ed25519_dalek::{SigningKey, VerifyingKey};
use swarm_crypto::public_key_to_base64;
use swarm_invite::{self, TokenError};
use swarm_store::SqliteStore;
use swarm_types::{InviteTokenRow, Member, Swarm, SwarmSettings};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::{error::MembershipError, notifications};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

async fn load_swarm(store: &SqliteStore, swarm_id: &str) -> Result<Swarm, MembershipError> {
    store
        .get_swarm(swarm_id)
        .await?
        .ok_or_else(|| MembershipError::SwarmNotFound(swarm_id.to_string()))
}

fn log_notify_failure(err: impl std::fmt::Display) {
    tracing::warn!(error = %err, "lifecycle notification failed to emit");
}

/// `Create` (§4.5): anyone, locally. The caller becomes master and sole
/// member.
pub async fn create(
    store: &SqliteStore,
    agent_id: &str,
    endpoint: &str,
    public_key: &VerifyingKey,
    name: String,
    settings: SwarmSettings,
) -> Result<Swarm, MembershipError> {
    let now = now_rfc3339();
    let swarm = Swarm {
        swarm_id: Uuid::new_v4().to_string(),
        name,
        created_at: now.clone(),
        master: agent_id.to_string(),
        members: vec![Member {
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
            public_key: public_key_to_base64(public_key),
            joined_at: now,
        }],
        settings,
    };
    store.create_swarm(swarm.clone()).await?;
    Ok(swarm)
}

/// `Invite` (§4.5, §4.4): authority is the master, or any member when
/// `allow_member_invite` is set. The token is always signed with
/// `master_priv` — inviting is authorized per-caller, but the cryptographic
/// identity on the token is always the swarm's master.
pub async fn invite(
    store: &SqliteStore,
    swarm_id: &str,
    requester_agent_id: &str,
    master_priv: &SigningKey,
    expires_in: Option<time::Duration>,
    max_uses: Option<u32>,
) -> Result<(String, String, String), MembershipError> {
    let swarm = load_swarm(store, swarm_id).await?;
    if swarm.is_master(requester_agent_id) {
        // authorized
    } else if swarm.is_member(requester_agent_id) {
        if !swarm.settings.allow_member_invite {
            return Err(MembershipError::InvitesDisabled);
        }
    } else {
        return Err(MembershipError::NotMember);
    }

    let master_endpoint = swarm
        .member(&swarm.master)
        .map(|m| m.endpoint.as_str())
        .unwrap_or_default();
    let (jwt, token_hash, url) = swarm_invite::generate(
        &swarm.swarm_id,
        &swarm.master,
        master_endpoint,
        master_priv,
        expires_in,
        max_uses,
    )?;

    store
        .insert_invite_token(InviteTokenRow {
            token_hash: token_hash.clone(),
            swarm_id: swarm.swarm_id.clone(),
            max_uses,
            uses: 0,
            created_at: now_rfc3339(),
            expires_at: expires_in.map(|d| (OffsetDateTime::now_utc() + d).unix_timestamp().to_string()),
            revoked: false,
        })
        .await?;

    Ok((jwt, token_hash, url))
}

/// Outcome of the master-side join state machine (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Idempotent re-join (property 3): membership unchanged, no
    /// notification, HTTP 200.
    AlreadyMember(Swarm),
    /// `require_approval=true`: no membership change yet, HTTP 202.
    PendingApproval,
    /// Membership added and `member_joined` broadcast, HTTP 200.
    Joined(Swarm),
}

/// `Join` (§4.5): the requester presents a signed invite token. Runs the
/// token-level checks (§4.4) then the membership state machine.
pub async fn join(
    store: &SqliteStore,
    master_pub: &VerifyingKey,
    master_signer: &SigningKey,
    master_self_agent_id: &str,
    master_self_endpoint: &str,
    jwt: &str,
    url: &str,
    requester: Member,
) -> Result<JoinOutcome, MembershipError> {
    let now = OffsetDateTime::now_utc();
    let (claims, token_hash) = swarm_invite::verify_and_parse(jwt, url, master_pub, now)?;

    let swarm = load_swarm(store, &claims.swarm_id).await?;

    if swarm.is_member(&requester.agent_id) {
        return Ok(JoinOutcome::AlreadyMember(swarm));
    }

    let row = store
        .get_invite_token(&token_hash)
        .await?
        .ok_or(TokenError::NotFound)?;
    swarm_invite::check_usage(&row)?;

    if swarm.settings.require_approval {
        return Ok(JoinOutcome::PendingApproval);
    }

    store
        .join_member(&swarm.swarm_id, requester.clone(), &token_hash)
        .await?;
    let updated = load_swarm(store, &swarm.swarm_id).await?;

    if let Err(e) = notifications::emit(
        store,
        master_signer,
        master_self_agent_id,
        master_self_endpoint,
        &swarm.swarm_id,
        "member_joined",
        &requester.agent_id,
        None,
        None,
        &updated.members,
    )
    .await
    {
        log_notify_failure(e);
    }

    Ok(JoinOutcome::Joined(updated))
}

/// Finalizes a join previously parked in `PendingApproval` (§4.5). Re-runs
/// token validation so the approval decision cannot outlive the token's
/// expiry or usage budget.
pub async fn approve_join(
    store: &SqliteStore,
    master_pub: &VerifyingKey,
    master_signer: &SigningKey,
    master_self_agent_id: &str,
    master_self_endpoint: &str,
    approver_agent_id: &str,
    jwt: &str,
    url: &str,
    requester: Member,
) -> Result<Swarm, MembershipError> {
    let swarm_id_from_url = url
        .strip_prefix("swarm://")
        .and_then(|s| s.split_once('@'))
        .map(|(id, _)| id.to_string())
        .unwrap_or_default();
    let swarm = load_swarm(store, &swarm_id_from_url).await?;
    if !swarm.is_master(approver_agent_id) {
        return Err(MembershipError::NotMaster);
    }

    let now = OffsetDateTime::now_utc();
    let (_claims, token_hash) = swarm_invite::verify_and_parse(jwt, url, master_pub, now)?;
    let row = store
        .get_invite_token(&token_hash)
        .await?
        .ok_or(TokenError::NotFound)?;
    swarm_invite::check_usage(&row)?;

    store
        .join_member(&swarm.swarm_id, requester.clone(), &token_hash)
        .await?;
    let updated = load_swarm(store, &swarm.swarm_id).await?;

    if let Err(e) = notifications::emit(
        store,
        master_signer,
        master_self_agent_id,
        master_self_endpoint,
        &swarm.swarm_id,
        "member_joined",
        &requester.agent_id,
        None,
        None,
        &updated.members,
    )
    .await
    {
        log_notify_failure(e);
    }

    Ok(updated)
}

/// Outcome of `Leave` (§4.5): the leaving master dissolves the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    MemberRemoved,
    SwarmDissolved,
}

pub async fn leave(
    store: &SqliteStore,
    signer: &SigningKey,
    swarm_id: &str,
    agent_id: &str,
    agent_endpoint: &str,
) -> Result<LeaveOutcome, MembershipError> {
    let swarm = load_swarm(store, swarm_id).await?;
    if !swarm.is_member(agent_id) {
        return Err(MembershipError::NotMember);
    }

    if swarm.is_master(agent_id) {
        let remaining: Vec<Member> = swarm
            .members
            .iter()
            .filter(|m| m.agent_id != agent_id)
            .cloned()
            .collect();
        if let Err(e) = notifications::emit(
            store,
            signer,
            agent_id,
            agent_endpoint,
            swarm_id,
            "swarm_dissolved",
            agent_id,
            None,
            None,
            &remaining,
        )
        .await
        {
            log_notify_failure(e);
        }
        store.delete_swarm(swarm_id).await?;
        Ok(LeaveOutcome::SwarmDissolved)
    } else {
        store.remove_member(swarm_id, agent_id).await?;
        let remaining = load_swarm(store, swarm_id).await?.members;
        if let Err(e) = notifications::emit(
            store,
            signer,
            agent_id,
            agent_endpoint,
            swarm_id,
            "member_left",
            agent_id,
            None,
            None,
            &remaining,
        )
        .await
        {
            log_notify_failure(e);
        }
        Ok(LeaveOutcome::MemberRemoved)
    }
}

/// `Kick` (§4.5): master-only. Delivers `kicked` directly to the target then
/// broadcasts `member_kicked` to the remaining members.
pub async fn kick(
    store: &SqliteStore,
    master_signer: &SigningKey,
    swarm_id: &str,
    kicker_agent_id: &str,
    target_agent_id: &str,
) -> Result<(), MembershipError> {
    let swarm = load_swarm(store, swarm_id).await?;
    if !swarm.is_master(kicker_agent_id) {
        return Err(MembershipError::NotMaster);
    }
    let target = swarm
        .member(target_agent_id)
        .cloned()
        .ok_or_else(|| MembershipError::MemberNotFound(target_agent_id.to_string()))?;
    let master = swarm
        .member(&swarm.master)
        .cloned()
        .ok_or_else(|| MembershipError::MemberNotFound(swarm.master.clone()))?;

    if let Err(e) = notifications::emit(
        store,
        master_signer,
        kicker_agent_id,
        &master.endpoint,
        swarm_id,
        "kicked",
        target_agent_id,
        Some(kicker_agent_id),
        None,
        std::slice::from_ref(&target),
    )
    .await
    {
        log_notify_failure(e);
    }

    store.remove_member(swarm_id, target_agent_id).await?;
    let remaining = load_swarm(store, swarm_id).await?.members;

    if let Err(e) = notifications::emit(
        store,
        master_signer,
        kicker_agent_id,
        &master.endpoint,
        swarm_id,
        "member_kicked",
        target_agent_id,
        Some(kicker_agent_id),
        None,
        &remaining,
    )
    .await
    {
        log_notify_failure(e);
    }

    Ok(())
}

/// `Transfer` (§4.5): master-only, two-phase. `transfer_initiate` delivers a
/// `master_transfer` offer directly to `to_agent_id` and parks it in
/// `pending_transfers`; the master swap only happens once the target calls
/// `transfer_respond` with `accept=true`. A second initiate before the first
/// resolves replaces the pending offer rather than queuing both.
pub async fn transfer_initiate(
    store: &SqliteStore,
    master_signer: &SigningKey,
    swarm_id: &str,
    from_agent_id: &str,
    to_agent_id: &str,
) -> Result<(), MembershipError> {
    let swarm = load_swarm(store, swarm_id).await?;
    if !swarm.is_master(from_agent_id) {
        return Err(MembershipError::NotMaster);
    }
    let target = swarm
        .member(to_agent_id)
        .cloned()
        .ok_or_else(|| MembershipError::MemberNotFound(to_agent_id.to_string()))?;
    let from_endpoint = swarm
        .member(from_agent_id)
        .map(|m| m.endpoint.clone())
        .unwrap_or_default();

    store
        .insert_pending_transfer(swarm_types::PendingTransfer {
            swarm_id: swarm_id.to_string(),
            from_agent: from_agent_id.to_string(),
            to_agent: to_agent_id.to_string(),
            created_at: now_rfc3339(),
        })
        .await?;

    if let Err(e) = notifications::emit(
        store,
        master_signer,
        from_agent_id,
        &from_endpoint,
        swarm_id,
        "master_transfer",
        to_agent_id,
        Some(from_agent_id),
        None,
        std::slice::from_ref(&target),
    )
    .await
    {
        log_notify_failure(e);
    }

    Ok(())
}

/// Outcome of `transfer_respond` (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Accepted(Swarm),
    Declined,
}

/// Resolves the swarm's pending transfer. `responder_agent_id` must match the
/// offer's `to_agent`; on accept the master swaps and `master_changed` is
/// broadcast to the (now updated) membership, on decline the pending row is
/// simply cleared and `Err(TransferDeclined)` is returned so the caller (and
/// its HTTP mapping) can distinguish "no-op decline" from success.
pub async fn transfer_respond(
    store: &SqliteStore,
    master_signer: &SigningKey,
    swarm_id: &str,
    responder_agent_id: &str,
    accept: bool,
) -> Result<TransferOutcome, MembershipError> {
    let pending = store
        .get_pending_transfer(swarm_id)
        .await?
        .ok_or(MembershipError::TransferNotPending)?;
    if pending.to_agent != responder_agent_id {
        return Err(MembershipError::NotAuthorized);
    }

    store.delete_pending_transfer(swarm_id).await?;

    if !accept {
        return Err(MembershipError::TransferDeclined);
    }

    let swarm = load_swarm(store, swarm_id).await?;
    store.set_master(swarm_id, &pending.to_agent).await?;
    let updated = load_swarm(store, swarm_id).await?;

    let from_endpoint = swarm
        .member(&pending.from_agent)
        .map(|m| m.endpoint.clone())
        .unwrap_or_default();
    let reason = format!("{{\"old\":\"{}\",\"new\":\"{}\"}}", pending.from_agent, pending.to_agent);
    if let Err(e) = notifications::emit(
        store,
        master_signer,
        &pending.from_agent,
        &from_endpoint,
        swarm_id,
        "master_changed",
        &pending.to_agent,
        Some(&pending.from_agent),
        Some(&reason),
        &updated.members,
    )
    .await
    {
        log_notify_failure(e);
    }

    Ok(TransferOutcome::Accepted(updated))
}

/// `Mute(swarm|agent)` (§4.5): self-authority only, local-only.
pub async fn mute(
    store: &SqliteStore,
    scope: swarm_types::MuteScope,
    target_id: &str,
    reason: Option<String>,
) -> Result<(), MembershipError> {
    store
        .add_mute(swarm_types::Mute {
            scope,
            target_id: target_id.to_string(),
            reason,
            created_at: now_rfc3339(),
        })
        .await?;
    Ok(())
}

pub async fn unmute(
    store: &SqliteStore,
    scope: swarm_types::MuteScope,
    target_id: &str,
) -> Result<(), MembershipError> {
    store.remove_mute(scope, target_id).await?;
    Ok(())
}
