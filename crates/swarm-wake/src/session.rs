//! SessionManager (§4.12): `idle | active | suspended` with timeouts.
//! Session state persists across process restarts because it lives in the
//! same SQLite store as everything else, not a separate in-memory map.

use swarm_store::{SessionClaim, SqliteStore, StoreError};
use swarm_types::{SessionRecord, SessionState};
use time::OffsetDateTime;
use uuid::Uuid;

pub struct SessionManager<'a> {
    store: &'a SqliteStore,
    /// Default 30 min (§4.12): time since `last_activity_at` after which an
    /// `active`/`suspended` session reverts to `idle`.
    pub session_timeout_secs: i64,
}

impl<'a> SessionManager<'a> {
    pub fn new(store: &'a SqliteStore, session_timeout_secs: i64) -> Self {
        Self {
            store,
            session_timeout_secs,
        }
    }

    pub async fn current(&self) -> Result<Option<SessionRecord>, StoreError> {
        self.store.get_session().await
    }

    /// The single-flight check-and-set WakeEndpoint consults (§4.9).
    pub async fn claim(&self) -> Result<SessionClaim, StoreError> {
        let now = OffsetDateTime::now_utc();
        let session_id = Uuid::new_v4().to_string();
        self.store
            .claim_session(now, self.session_timeout_secs, session_id)
            .await
    }

    pub async fn update_activity(&self, context_summary: Option<String>) -> Result<(), StoreError> {
        self.store.update_session_activity(context_summary).await
    }

    pub async fn suspend(&self, context_summary: Option<String>) -> Result<(), StoreError> {
        self.store
            .set_session_state(SessionState::Suspended, context_summary)
            .await
    }

    pub async fn resume(&self) -> Result<(), StoreError> {
        self.store.set_session_state(SessionState::Active, None).await
    }

    pub async fn complete(&self) -> Result<(), StoreError> {
        self.store.set_session_state(SessionState::Idle, None).await
    }

    /// Expires sessions whose `last_activity_at` exceeds the timeout; a
    /// background sweep, not invoked on the request path.
    pub async fn expire_if_timed_out(&self) -> Result<bool, StoreError> {
        let now = OffsetDateTime::now_utc();
        self.store
            .expire_idle_sessions(now, self.session_timeout_secs)
            .await
    }
}
