//! Multi-component scenarios (§8 S1/S2/S4): drives the real HTTP handlers
//! end to end against an in-memory store, without binding a socket. Sender
//! public keys are pre-seeded into the cache to stand in for a prior
//! `/swarm/info` fetch, the same shortcut the reference platform's own
//! middleware tests take to avoid a live second node.

use std::{net::SocketAddr, sync::Arc};

use axum::{extract::State, Json};
use ed25519_dalek::SigningKey;
use swarm_node::{config::NodeConfig, identity::Identity, receiver, InvokerMethod};
use swarm_store::SqliteStore;
use swarm_transport::Transport;
use swarm_types::{MessageEnvelope, MuteScope, Priority, Recipient, Sender, EnvelopeType, PublicKeyCacheEntry, PROTOCOL_VERSION};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

fn test_config() -> NodeConfig {
    NodeConfig {
        bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        endpoint: "https://m.example/swarm".into(),
        identity_dir: "unused".into(),
        data_dir: "unused".into(),
        rate_limit_msgs_per_min: 1000,
        rate_limit_joins_per_hour: 1000,
        api_wake_enabled: false,
        wake_endpoint_url: None,
        wake_shared_secret: None,
        invoker_method: InvokerMethod::Noop,
        tmux_target: None,
        subprocess_command_template: None,
        webhook_url: None,
        sdk_binary: None,
        sdk_working_dir: None,
        sdk_permission_mode: None,
        sdk_max_turns: None,
        sdk_model: None,
        session_timeout_secs: 1800,
        public_key_cache_ttl_secs: 86400,
        graceful_shutdown_secs: 10,
    }
}

fn agent(agent_id: &str, endpoint: &str) -> (Identity, SigningKey) {
    let signing_key = swarm_crypto::generate_keypair();
    (
        Identity {
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
            signing_key: signing_key.clone(),
        },
        signing_key,
    )
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap()
}

async fn state_for(identity: Identity, config: NodeConfig) -> (Arc<receiver::AppState>, SqliteStore) {
    let store = SqliteStore::open_in_memory().unwrap();
    let transport = Transport::new(identity.agent_id.clone());
    let state = swarm_node::build_state(store.clone(), identity, transport, config);
    (state, store)
}

/// Registers `signing_key`'s public key in `store`'s cache as if M had
/// already fetched it from `endpoint`'s `/swarm/info` — the fast path
/// `resolve_public_key` takes once a sender is known.
async fn seed_pubkey(store: &SqliteStore, agent_id: &str, endpoint: &str, signing_key: &SigningKey) {
    store
        .put_cached_pubkey(PublicKeyCacheEntry {
            agent_id: agent_id.to_string(),
            public_key: swarm_crypto::public_key_to_base64(&signing_key.verifying_key()),
            endpoint: endpoint.to_string(),
            fetched_at: now_rfc3339(),
        })
        .await
        .unwrap();
}

fn signed_message(
    swarm_id: &str,
    sender_id: &str,
    sender_endpoint: &str,
    signer: &SigningKey,
    content: &str,
) -> MessageEnvelope {
    let mut envelope = MessageEnvelope {
        protocol_version: PROTOCOL_VERSION.to_string(),
        message_id: Uuid::new_v4().to_string(),
        timestamp: now_rfc3339(),
        sender: Sender {
            agent_id: sender_id.to_string(),
            endpoint: sender_endpoint.to_string(),
        },
        recipient: Recipient::broadcast(),
        swarm_id: swarm_id.to_string(),
        kind: EnvelopeType::Message,
        content: content.to_string(),
        signature: String::new(),
        in_reply_to: None,
        thread_id: None,
        priority: Some(Priority::Normal),
        expires_at: None,
        references: vec![],
        attachments: vec![],
        metadata: None,
    };
    envelope.signature = swarm_crypto::sign(&envelope.canonical_signing_payload(), signer);
    envelope
}

#[tokio::test]
async fn s1_create_invite_join_message() {
    let (master_identity, master_key) = agent("m", "https://m.example/swarm");
    let (state, store) = state_for(master_identity, test_config()).await;

    let swarm = swarm_membership::create(
        &store,
        "m",
        "https://m.example/swarm",
        &master_key.verifying_key(),
        "dev".into(),
        swarm_types::SwarmSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(swarm.master, "m");
    assert_eq!(swarm.members.len(), 1);

    let (jwt, _hash, url) =
        swarm_membership::invite(&store, &swarm.swarm_id, "m", &master_key, Some(time::Duration::seconds(3600)), Some(1))
            .await
            .unwrap();
    assert!(url.starts_with(&format!("swarm://{}@", swarm.swarm_id)));

    // Node N joins over HTTP.
    let n_key = swarm_crypto::generate_keypair();
    let join_content = serde_json::json!({
        "action": "join_request",
        "jwt": jwt,
        "url": url,
        "public_key": swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
    })
    .to_string();
    let mut join_envelope = MessageEnvelope {
        protocol_version: PROTOCOL_VERSION.to_string(),
        message_id: Uuid::new_v4().to_string(),
        timestamp: now_rfc3339(),
        sender: Sender {
            agent_id: "n".into(),
            endpoint: "https://n.example/swarm".into(),
        },
        recipient: Recipient::agent("m"),
        swarm_id: swarm.swarm_id.clone(),
        kind: EnvelopeType::System,
        content: join_content,
        signature: String::new(),
        in_reply_to: None,
        thread_id: None,
        priority: None,
        expires_at: None,
        references: vec![],
        attachments: vec![],
        metadata: None,
    };
    join_envelope.signature = swarm_crypto::sign(&join_envelope.canonical_signing_payload(), &n_key);

    let response = receiver::join_handler(State(state.clone()), Json(join_envelope))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let updated = store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap();
    assert_eq!(updated.members.len(), 2);
    assert_eq!(updated.members[0].agent_id, "m");
    assert_eq!(updated.members[1].agent_id, "n");

    // A second agent tries the now-exhausted token.
    let p_key = swarm_crypto::generate_keypair();
    let p_join_content = serde_json::json!({
        "action": "join_request",
        "jwt": jwt,
        "url": url,
        "public_key": swarm_crypto::public_key_to_base64(&p_key.verifying_key()),
    })
    .to_string();
    let mut p_envelope = MessageEnvelope {
        protocol_version: PROTOCOL_VERSION.to_string(),
        message_id: Uuid::new_v4().to_string(),
        timestamp: now_rfc3339(),
        sender: Sender {
            agent_id: "p".into(),
            endpoint: "https://p.example/swarm".into(),
        },
        recipient: Recipient::agent("m"),
        swarm_id: swarm.swarm_id.clone(),
        kind: EnvelopeType::System,
        content: p_join_content,
        signature: String::new(),
        in_reply_to: None,
        thread_id: None,
        priority: None,
        expires_at: None,
        references: vec![],
        attachments: vec![],
        metadata: None,
    };
    p_envelope.signature = swarm_crypto::sign(&p_envelope.canonical_signing_payload(), &p_key);
    let err = receiver::join_handler(State(state.clone()), Json(p_envelope))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_EXHAUSTED");

    // N now sends a broadcast message; M's pubkey cache already knows N.
    seed_pubkey(&store, "n", "https://n.example/swarm", &n_key).await;
    let message = signed_message(&swarm.swarm_id, "n", "https://n.example/swarm", &n_key, "hi");
    let message_id = message.message_id.clone();
    let response = receiver::message_handler(State(state.clone()), Json(message))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let inbox = store.list_inbox(&swarm.swarm_id).await.unwrap();
    assert!(inbox.iter().any(|e| e.message_id == message_id && e.sender_id == "n"));
}

#[tokio::test]
async fn s4_mute_suppresses_inbox_insert() {
    let (master_identity, master_key) = agent("m", "https://m.example/swarm");
    let (state, store) = state_for(master_identity, test_config()).await;

    let swarm = swarm_membership::create(
        &store,
        "m",
        "https://m.example/swarm",
        &master_key.verifying_key(),
        "dev".into(),
        swarm_types::SwarmSettings::default(),
    )
    .await
    .unwrap();
    let n_key = swarm_crypto::generate_keypair();
    store
        .add_member(
            &swarm.swarm_id,
            swarm_types::Member {
                agent_id: "n".into(),
                endpoint: "https://n.example/swarm".into(),
                public_key: swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
                joined_at: now_rfc3339(),
            },
        )
        .await
        .unwrap();
    seed_pubkey(&store, "n", "https://n.example/swarm", &n_key).await;

    swarm_membership::mute(&store, MuteScope::Agent, "n", Some("testing".into()))
        .await
        .unwrap();

    let message = signed_message(&swarm.swarm_id, "n", "https://n.example/swarm", &n_key, "should be muted");
    let response = receiver::message_handler(State(state.clone()), Json(message))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let inbox = store.list_inbox(&swarm.swarm_id).await.unwrap();
    assert!(inbox.is_empty());
}

#[tokio::test]
async fn s2_rejoin_is_idempotent_over_http() {
    let (master_identity, master_key) = agent("m", "https://m.example/swarm");
    let (state, store) = state_for(master_identity, test_config()).await;

    let swarm = swarm_membership::create(
        &store,
        "m",
        "https://m.example/swarm",
        &master_key.verifying_key(),
        "dev".into(),
        swarm_types::SwarmSettings::default(),
    )
    .await
    .unwrap();

    let n_key = swarm_crypto::generate_keypair();
    let make_join = |jwt: String, url: String| {
        let content = serde_json::json!({
            "action": "join_request",
            "jwt": jwt,
            "url": url,
            "public_key": swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
        })
        .to_string();
        let mut envelope = MessageEnvelope {
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: now_rfc3339(),
            sender: Sender {
                agent_id: "n".into(),
                endpoint: "https://n.example/swarm".into(),
            },
            recipient: Recipient::agent("m"),
            swarm_id: swarm.swarm_id.clone(),
            kind: EnvelopeType::System,
            content,
            signature: String::new(),
            in_reply_to: None,
            thread_id: None,
            priority: None,
            expires_at: None,
            references: vec![],
            attachments: vec![],
            metadata: None,
        };
        envelope.signature = swarm_crypto::sign(&envelope.canonical_signing_payload(), &n_key);
        envelope
    };

    let (jwt1, _, url1) = swarm_membership::invite(&store, &swarm.swarm_id, "m", &master_key, None, None)
        .await
        .unwrap();
    receiver::join_handler(State(state.clone()), Json(make_join(jwt1, url1)))
        .await
        .unwrap();
    assert_eq!(store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap().members.len(), 2);

    let (jwt2, _, url2) = swarm_membership::invite(&store, &swarm.swarm_id, "m", &master_key, None, None)
        .await
        .unwrap();
    let response = receiver::join_handler(State(state.clone()), Json(make_join(jwt2, url2)))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    assert_eq!(store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap().members.len(), 2);
}
