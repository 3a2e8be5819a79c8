//! Swarm lifecycle operations and authority enforcement (§4.5).
//!
//! Grounded on the reference platform's conversation/session state machines
//! (`libs/session`): a small set of pure transition functions over a shared
//! [`swarm_store::SqliteStore`], with side effects (lifecycle broadcasts)
//! split into [`notifications`] so they can fail independently of the
//! state transition that triggered them.

mod error;
mod notifications;
mod ops;

pub use error::MembershipError;
pub use notifications::emit as emit_notification;
pub use ops::{
    approve_join, create, invite, join, kick, leave, mute, transfer_initiate, transfer_respond,
    unmute, JoinOutcome, LeaveOutcome, TransferOutcome,
};

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_crypto::generate_keypair;
    use swarm_store::SqliteStore;
    use swarm_types::{Member, SwarmSettings};

    async fn new_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn create_then_invite_then_join() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(swarm.members.len(), 1);
        assert!(swarm.is_master("m"));

        let (jwt, _hash, url) = invite(&store, &swarm.swarm_id, "m", &master_key, None, Some(1))
            .await
            .unwrap();

        let n_key = generate_keypair();
        let requester = Member {
            agent_id: "n".into(),
            endpoint: "https://n.example/swarm".into(),
            public_key: swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
            joined_at: String::new(),
        };
        let outcome = join(
            &store,
            &master_key.verifying_key(),
            &master_key,
            "m",
            "https://m.example/swarm",
            &jwt,
            &url,
            requester,
        )
        .await
        .unwrap();

        match outcome {
            JoinOutcome::Joined(swarm) => {
                assert_eq!(swarm.members.len(), 2);
                assert_eq!(swarm.members[0].agent_id, "m");
                assert_eq!(swarm.members[1].agent_id, "n");
            }
            other => panic!("expected Joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejoin_is_idempotent() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();

        let (jwt, _hash, url) = invite(&store, &swarm.swarm_id, "m", &master_key, None, None)
            .await
            .unwrap();
        let n_key = generate_keypair();
        let requester = Member {
            agent_id: "n".into(),
            endpoint: "https://n.example/swarm".into(),
            public_key: swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
            joined_at: String::new(),
        };
        join(
            &store,
            &master_key.verifying_key(),
            &master_key,
            "m",
            "https://m.example/swarm",
            &jwt,
            &url,
            requester.clone(),
        )
        .await
        .unwrap();

        let (jwt2, _hash2, url2) = invite(&store, &swarm.swarm_id, "m", &master_key, None, None)
            .await
            .unwrap();
        let outcome = join(
            &store,
            &master_key.verifying_key(),
            &master_key,
            "m",
            "https://m.example/swarm",
            &jwt2,
            &url2,
            requester,
        )
        .await
        .unwrap();
        match outcome {
            JoinOutcome::AlreadyMember(swarm) => assert_eq!(swarm.members.len(), 2),
            other => panic!("expected AlreadyMember, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_token_is_rejected() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        let (jwt, _hash, url) = invite(&store, &swarm.swarm_id, "m", &master_key, None, Some(1))
            .await
            .unwrap();

        let n_key = generate_keypair();
        let n = Member {
            agent_id: "n".into(),
            endpoint: "https://n.example/swarm".into(),
            public_key: swarm_crypto::public_key_to_base64(&n_key.verifying_key()),
            joined_at: String::new(),
        };
        join(
            &store,
            &master_key.verifying_key(),
            &master_key,
            "m",
            "https://m.example/swarm",
            &jwt,
            &url,
            n,
        )
        .await
        .unwrap();

        let p_key = generate_keypair();
        let p = Member {
            agent_id: "p".into(),
            endpoint: "https://p.example/swarm".into(),
            public_key: swarm_crypto::public_key_to_base64(&p_key.verifying_key()),
            joined_at: String::new(),
        };
        let err = join(
            &store,
            &master_key.verifying_key(),
            &master_key,
            "m",
            "https://m.example/swarm",
            &jwt,
            &url,
            p,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            MembershipError::Token(swarm_invite::TokenError::Exhausted)
        ));
    }

    #[tokio::test]
    async fn non_master_cannot_kick() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "n".into(),
                    endpoint: "https://n.example/swarm".into(),
                    public_key: "k".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();

        let err = kick(&store, &master_key, &swarm.swarm_id, "n", "m")
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::NotMaster));
    }

    #[tokio::test]
    async fn transfer_then_kick_by_old_master_fails() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "n".into(),
                    endpoint: "https://n.example/swarm".into(),
                    public_key: "k".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "p".into(),
                    endpoint: "https://p.example/swarm".into(),
                    public_key: "k2".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();

        transfer_initiate(&store, &master_key, &swarm.swarm_id, "m", "n")
            .await
            .unwrap();
        // Not yet the master until "n" accepts.
        let still_m = store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap();
        assert_eq!(still_m.master, "m");

        let outcome = transfer_respond(&store, &master_key, &swarm.swarm_id, "n", true)
            .await
            .unwrap();
        match outcome {
            TransferOutcome::Accepted(updated) => assert_eq!(updated.master, "n"),
            TransferOutcome::Declined => panic!("expected Accepted"),
        }

        let err = kick(&store, &master_key, &swarm.swarm_id, "m", "p")
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::NotMaster));

        kick(&store, &master_key, &swarm.swarm_id, "n", "p")
            .await
            .unwrap();
        let final_swarm = store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap();
        assert_eq!(final_swarm.members.len(), 2);
    }

    #[tokio::test]
    async fn transfer_decline_leaves_master_unchanged() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "n".into(),
                    endpoint: "https://n.example/swarm".into(),
                    public_key: "k".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();

        transfer_initiate(&store, &master_key, &swarm.swarm_id, "m", "n")
            .await
            .unwrap();
        let err = transfer_respond(&store, &master_key, &swarm.swarm_id, "n", false)
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::TransferDeclined));

        let swarm = store.get_swarm(&swarm.swarm_id).await.unwrap().unwrap();
        assert_eq!(swarm.master, "m");

        // The offer is gone — a second response has nothing to resolve.
        let err = transfer_respond(&store, &master_key, &swarm.swarm_id, "n", true)
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::TransferNotPending));
    }

    #[tokio::test]
    async fn transfer_respond_rejects_wrong_responder() {
        let store = new_store().await;
        let master_key = generate_keypair();
        let swarm = create(
            &store,
            "m",
            "https://m.example/swarm",
            &master_key.verifying_key(),
            "dev".into(),
            SwarmSettings::default(),
        )
        .await
        .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "n".into(),
                    endpoint: "https://n.example/swarm".into(),
                    public_key: "k".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();
        store
            .add_member(
                &swarm.swarm_id,
                Member {
                    agent_id: "p".into(),
                    endpoint: "https://p.example/swarm".into(),
                    public_key: "k2".into(),
                    joined_at: String::new(),
                },
            )
            .await
            .unwrap();

        transfer_initiate(&store, &master_key, &swarm.swarm_id, "m", "n")
            .await
            .unwrap();
        let err = transfer_respond(&store, &master_key, &swarm.swarm_id, "p", true)
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::NotAuthorized));
    }
}
