use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use swarm_types::{
    InboxEntry, InboxStatus, InviteTokenRow, Member, Mute, MuteScope, OutboxEntry, OutboxStatus,
    PendingTransfer, PublicKeyCacheEntry, SessionRecord, SessionState, Swarm, SwarmSettings,
};

use crate::{error::StoreError, schema};

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The outcome of an atomic check-and-set against the node's single session
/// row (§4.9, §4.12, property 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionClaim {
    AlreadyActive,
    Claimed(SessionRecord),
}

/// Single-writer SQLite store. Cheap to clone — the connection is shared
/// behind an `Arc<Mutex<_>>`, mirroring the reference platform's
/// `SqliteConversationStore`.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::CREATE_TABLES_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite mutex poisoned");
            f(&guard)
        })
        .await?
    }

    // ---- Membership -------------------------------------------------

    pub async fn create_swarm(&self, swarm: Swarm) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let settings_json = serde_json::to_string(&swarm.settings)?;
            conn.execute(
                "INSERT INTO swarms (swarm_id, name, created_at, master, settings_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![swarm.swarm_id, swarm.name, swarm.created_at, swarm.master, settings_json],
            )?;
            for member in &swarm.members {
                conn.execute(
                    "INSERT INTO members (swarm_id, agent_id, endpoint, public_key, joined_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        swarm.swarm_id,
                        member.agent_id,
                        member.endpoint,
                        member.public_key,
                        member.joined_at
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_swarm(&self, swarm_id: &str) -> Result<Option<Swarm>, StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT name, created_at, master, settings_json FROM swarms WHERE swarm_id = ?1",
                    params![swarm_id],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            let Some((name, created_at, master, settings_json)) = row else {
                return Ok(None);
            };
            let settings: SwarmSettings = serde_json::from_str(&settings_json)?;
            let members = load_members(conn, &swarm_id)?;
            Ok(Some(Swarm {
                swarm_id,
                name,
                created_at,
                master,
                members,
                settings,
            }))
        })
        .await
    }

    pub async fn add_member(&self, swarm_id: &str, member: Member) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO members (swarm_id, agent_id, endpoint, public_key, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![swarm_id, member.agent_id, member.endpoint, member.public_key, member.joined_at],
            )?;
            Ok(())
        })
        .await
    }

    /// Adds `member` and increments the invite token's `uses` in one
    /// transaction (§4.5 "`TokenValidated -> MemberAdded` is atomic with
    /// token-uses increment").
    pub async fn join_member(
        &self,
        swarm_id: &str,
        member: Member,
        token_hash: &str,
    ) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO members (swarm_id, agent_id, endpoint, public_key, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![swarm_id, member.agent_id, member.endpoint, member.public_key, member.joined_at],
            )?;
            tx.execute(
                "UPDATE invite_tokens SET uses = uses + 1 WHERE token_hash = ?1",
                params![token_hash],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn remove_member(&self, swarm_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM members WHERE swarm_id = ?1 AND agent_id = ?2",
                params![swarm_id, agent_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_master(&self, swarm_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE swarms SET master = ?1 WHERE swarm_id = ?2",
                params![agent_id, swarm_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_swarm(&self, swarm_id: &str) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM members WHERE swarm_id = ?1", params![swarm_id])?;
            conn.execute("DELETE FROM swarms WHERE swarm_id = ?1", params![swarm_id])?;
            Ok(())
        })
        .await
    }

    // ---- Master transfer (§4.5) ----------------------------------------

    /// At most one outstanding offer per swarm (`PRIMARY KEY (swarm_id)`) — a
    /// second `transfer_initiate` before the first resolves replaces it.
    pub async fn insert_pending_transfer(&self, transfer: PendingTransfer) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_transfers (swarm_id, from_agent, to_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![transfer.swarm_id, transfer.from_agent, transfer.to_agent, transfer.created_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_pending_transfer(&self, swarm_id: &str) -> Result<Option<PendingTransfer>, StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT swarm_id, from_agent, to_agent, created_at FROM pending_transfers WHERE swarm_id = ?1",
                params![swarm_id],
                |r| {
                    Ok(PendingTransfer {
                        swarm_id: r.get(0)?,
                        from_agent: r.get(1)?,
                        to_agent: r.get(2)?,
                        created_at: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn delete_pending_transfer(&self, swarm_id: &str) -> Result<(), StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM pending_transfers WHERE swarm_id = ?1", params![swarm_id])?;
            Ok(())
        })
        .await
    }

    // ---- Inbox --------------------------------------------------------

    /// Idempotent insert keyed on `message_id` (property 2): repeat inserts
    /// succeed silently with no state change. Returns `true` on first
    /// sighting.
    pub async fn insert_inbox_idempotent(&self, entry: InboxEntry) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO inbox
                 (message_id, swarm_id, sender_id, kind, content, received_at, status, read_at, archived_at, deleted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, NULL)",
                params![
                    entry.message_id,
                    entry.swarm_id,
                    entry.sender_id,
                    entry.kind,
                    entry.content,
                    entry.received_at,
                    entry.status.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    pub async fn get_inbox(&self, message_id: &str) -> Result<Option<InboxEntry>, StoreError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT message_id, swarm_id, sender_id, kind, content, received_at, status, read_at, archived_at, deleted_at
                 FROM inbox WHERE message_id = ?1",
                params![message_id],
                row_to_inbox_entry,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    pub async fn list_inbox(&self, swarm_id: &str) -> Result<Vec<InboxEntry>, StoreError> {
        let swarm_id = swarm_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, swarm_id, sender_id, kind, content, received_at, status, read_at, archived_at, deleted_at
                 FROM inbox WHERE swarm_id = ?1 ORDER BY received_at ASC",
            )?;
            let rows = stmt
                .query_map(params![swarm_id], row_to_inbox_entry)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn update_inbox_status(
        &self,
        message_id: &str,
        status: InboxStatus,
    ) -> Result<(), StoreError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            let column = match status {
                InboxStatus::Read => "read_at",
                InboxStatus::Archived => "archived_at",
                InboxStatus::Deleted => "deleted_at",
                InboxStatus::Unread => "read_at",
            };
            conn.execute(
                &format!("UPDATE inbox SET status = ?1, {column} = ?2 WHERE message_id = ?3"),
                params![status.as_str(), now, message_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Deletes inbox rows with `status=deleted` whose `deleted_at` is older
    /// than `older_than` (default retention window 24h, §4.2).
    pub async fn purge_deleted_inbox(&self, older_than: OffsetDateTime) -> Result<usize, StoreError> {
        let cutoff = older_than
            .format(&Rfc3339)
            .map_err(|e| StoreError::SchemaVersion(e.to_string()))?;
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM inbox WHERE status = 'deleted' AND deleted_at IS NOT NULL AND deleted_at < ?1",
                params![cutoff],
            )?;
            Ok(changed)
        })
        .await
    }

    // ---- Outbox ---------------------------------------------------------

    pub async fn insert_outbox(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO outbox
                 (message_id, swarm_id, recipient, recipient_endpoint, envelope_json, status, attempts, last_error, created_at, delivered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.message_id,
                    entry.swarm_id,
                    entry.recipient,
                    entry.recipient_endpoint,
                    entry.envelope_json,
                    entry.status.as_str(),
                    entry.attempts,
                    entry.last_error,
                    entry.created_at,
                    entry.delivered_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Outbox rows still awaiting delivery (`queued` or previously `failed`),
    /// oldest first — the work list for Transport's delivery loop.
    pub async fn list_pending_outbox(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, swarm_id, recipient, recipient_endpoint, envelope_json, status, attempts, last_error, created_at, delivered_at
                 FROM outbox WHERE status IN ('queued', 'failed') ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_outbox_entry)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn update_outbox_delivery(
        &self,
        message_id: &str,
        status: OutboxStatus,
        attempts: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let message_id = message_id.to_string();
        self.with_conn(move |conn| {
            let delivered_at = matches!(status, OutboxStatus::Delivered).then(now_rfc3339);
            conn.execute(
                "UPDATE outbox SET status = ?1, attempts = ?2, last_error = ?3, delivered_at = ?4 WHERE message_id = ?5",
                params![status.as_str(), attempts, last_error, delivered_at, message_id],
            )?;
            Ok(())
        })
        .await
    }

    // ---- Mutes ------------------------------------------------------------

    pub async fn add_mute(&self, mute: Mute) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO mutes (scope, target_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![mute.scope.as_str(), mute.target_id, mute.reason, mute.created_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn remove_mute(&self, scope: MuteScope, target_id: &str) -> Result<(), StoreError> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM mutes WHERE scope = ?1 AND target_id = ?2",
                params![scope.as_str(), target_id],
            )?;
            Ok(())
        })
        .await
    }

    /// O(1) lookup against the `(scope, target_id)` primary key index.
    pub async fn is_muted(&self, scope: MuteScope, target_id: &str) -> Result<bool, StoreError> {
        let target_id = target_id.to_string();
        self.with_conn(move |conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM mutes WHERE scope = ?1 AND target_id = ?2",
                    params![scope.as_str(), target_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
        .await
    }

    // ---- Public key cache ---------------------------------------------

    pub async fn get_cached_pubkey(
        &self,
        agent_id: &str,
    ) -> Result<Option<PublicKeyCacheEntry>, StoreError> {
        let agent_id = agent_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT agent_id, public_key, endpoint, fetched_at FROM public_key_cache WHERE agent_id = ?1",
                params![agent_id],
                |r| {
                    Ok(PublicKeyCacheEntry {
                        agent_id: r.get(0)?,
                        public_key: r.get(1)?,
                        endpoint: r.get(2)?,
                        fetched_at: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Last-write-wins on `fetched_at` (§5): a newer fetch always replaces an
    /// older cached entry, never the other way round.
    pub async fn put_cached_pubkey(&self, entry: PublicKeyCacheEntry) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO public_key_cache (agent_id, public_key, endpoint, fetched_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id) DO UPDATE SET
                   public_key = excluded.public_key,
                   endpoint = excluded.endpoint,
                   fetched_at = excluded.fetched_at
                 WHERE excluded.fetched_at >= public_key_cache.fetched_at",
                params![entry.agent_id, entry.public_key, entry.endpoint, entry.fetched_at],
            )?;
            Ok(())
        })
        .await
    }

    // ---- Session (single-flight wake dedup, §4.9/§4.12) -------------------

    pub async fn get_session(&self) -> Result<Option<SessionRecord>, StoreError> {
        self.with_conn(|conn| read_session(conn)).await
    }

    /// Atomic check-and-set: reads the current session row and, if it is
    /// active/suspended with `last_activity_at` inside `timeout_secs` of
    /// `now`, returns `AlreadyActive` without writing. Otherwise claims the
    /// session for `new_session_id` inside the same connection-mutex
    /// acquisition (property 6, §5 "single logical mutex").
    pub async fn claim_session(
        &self,
        now: OffsetDateTime,
        timeout_secs: i64,
        new_session_id: String,
    ) -> Result<SessionClaim, StoreError> {
        self.with_conn(move |conn| {
            let current = read_session(conn)?;
            if let Some(existing) = &current {
                if existing.state != SessionState::Idle {
                    let last_activity = OffsetDateTime::parse(&existing.last_activity_at, &Rfc3339)
                        .unwrap_or(now);
                    if (now - last_activity).whole_seconds() < timeout_secs {
                        return Ok(SessionClaim::AlreadyActive);
                    }
                }
            }
            let now_str = now.format(&Rfc3339).unwrap_or_default();
            conn.execute(
                "INSERT INTO sessions (id, session_id, state, started_at, last_activity_at, context_summary)
                 VALUES (1, ?1, 'active', ?2, ?2, NULL)
                 ON CONFLICT(id) DO UPDATE SET
                   session_id = excluded.session_id,
                   state = excluded.state,
                   started_at = excluded.started_at,
                   last_activity_at = excluded.last_activity_at,
                   context_summary = NULL",
                params![new_session_id, now_str],
            )?;
            Ok(SessionClaim::Claimed(SessionRecord {
                session_id: new_session_id,
                state: SessionState::Active,
                started_at: now_str.clone(),
                last_activity_at: now_str,
                context_summary: None,
            }))
        })
        .await
    }

    pub async fn update_session_activity(
        &self,
        context_summary: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            conn.execute(
                "UPDATE sessions SET last_activity_at = ?1, context_summary = COALESCE(?2, context_summary) WHERE id = 1",
                params![now, context_summary],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_session_state(
        &self,
        state: SessionState,
        context_summary: Option<String>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let now = now_rfc3339();
            conn.execute(
                "UPDATE sessions SET state = ?1, last_activity_at = ?2, context_summary = ?3 WHERE id = 1",
                params![state.as_str(), now, context_summary],
            )?;
            Ok(())
        })
        .await
    }

    /// Expires sessions whose `last_activity_at` exceeds `threshold_secs`
    /// (default 60 min, §4.2) back to idle.
    pub async fn expire_idle_sessions(&self, now: OffsetDateTime, threshold_secs: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let Some(existing) = read_session(conn)? else {
                return Ok(false);
            };
            if existing.state == SessionState::Idle {
                return Ok(false);
            }
            let last_activity = OffsetDateTime::parse(&existing.last_activity_at, &Rfc3339).unwrap_or(now);
            if (now - last_activity).whole_seconds() < threshold_secs {
                return Ok(false);
            }
            conn.execute("UPDATE sessions SET state = 'idle' WHERE id = 1", [])?;
            Ok(true)
        })
        .await
    }

    // ---- Invite tokens ------------------------------------------------

    pub async fn insert_invite_token(&self, row: InviteTokenRow) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO invite_tokens (token_hash, swarm_id, max_uses, uses, created_at, expires_at, revoked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.token_hash,
                    row.swarm_id,
                    row.max_uses,
                    row.uses,
                    row.created_at,
                    row.expires_at,
                    row.revoked as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_invite_token(&self, token_hash: &str) -> Result<Option<InviteTokenRow>, StoreError> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT token_hash, swarm_id, max_uses, uses, created_at, expires_at, revoked
                 FROM invite_tokens WHERE token_hash = ?1",
                params![token_hash],
                |r| {
                    Ok(InviteTokenRow {
                        token_hash: r.get(0)?,
                        swarm_id: r.get(1)?,
                        max_uses: r.get::<_, Option<i64>>(2)?.map(|v| v as u32),
                        uses: r.get::<_, i64>(3)? as u32,
                        created_at: r.get(4)?,
                        expires_at: r.get(5)?,
                        revoked: r.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    /// Atomically increments `uses` on successful join (§4.4).
    pub async fn increment_invite_uses(&self, token_hash: &str) -> Result<(), StoreError> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE invite_tokens SET uses = uses + 1 WHERE token_hash = ?1",
                params![token_hash],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn revoke_invite_token(&self, token_hash: &str) -> Result<(), StoreError> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE invite_tokens SET revoked = 1 WHERE token_hash = ?1",
                params![token_hash],
            )?;
            Ok(())
        })
        .await
    }

    // ---- Export / import (§4.2, property 7) ----------------------------

    pub async fn export_json(&self) -> Result<Value, StoreError> {
        self.with_conn(|conn| {
            let swarms = dump_table(conn, "swarms")?;
            let members = dump_table(conn, "members")?;
            let inbox = dump_table(conn, "inbox")?;
            let outbox = dump_table(conn, "outbox")?;
            let mutes = dump_table(conn, "mutes")?;
            let public_key_cache = dump_table(conn, "public_key_cache")?;
            let sessions = dump_table(conn, "sessions")?;
            let invite_tokens = dump_table(conn, "invite_tokens")?;
            Ok(serde_json::json!({
                "schema_version": schema::CURRENT_SCHEMA_VERSION,
                "swarms": swarms,
                "members": members,
                "inbox": inbox,
                "outbox": outbox,
                "mutes": mutes,
                "public_key_cache": public_key_cache,
                "sessions": sessions,
                "invite_tokens": invite_tokens,
            }))
        })
        .await
    }

    /// Validates `schema_version` and replaces (or merges) every table from
    /// `doc`. A legacy `1.0.0` document's queue statuses are remapped per
    /// §4.2: `pending|processing -> unread`, `completed|failed -> read`.
    pub async fn import_json(&self, doc: Value, merge: bool) -> Result<(), StoreError> {
        let version = doc
            .get("schema_version")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let is_legacy = version == "1.0.0";
        if version != schema::CURRENT_SCHEMA_VERSION && !is_legacy {
            return Err(StoreError::SchemaVersion(version));
        }

        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            if !merge {
                for table in [
                    "swarms",
                    "members",
                    "inbox",
                    "outbox",
                    "mutes",
                    "public_key_cache",
                    "sessions",
                    "invite_tokens",
                ] {
                    tx.execute(&format!("DELETE FROM {table}"), [])?;
                }
            }

            if let Some(rows) = doc.get("swarms").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO swarms (swarm_id, name, created_at, master, settings_json)
                         VALUES (:swarm_id, :name, :created_at, :master, :settings_json)",
                        rusqlite::named_params! {
                            ":swarm_id": row.get("swarm_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":name": row.get("name").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":created_at": row.get("created_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":master": row.get("master").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":settings_json": row.get("settings_json").and_then(|v| v.as_str()).unwrap_or("{}"),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("members").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO members (swarm_id, agent_id, endpoint, public_key, joined_at)
                         VALUES (:swarm_id, :agent_id, :endpoint, :public_key, :joined_at)",
                        rusqlite::named_params! {
                            ":swarm_id": row.get("swarm_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":agent_id": row.get("agent_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":endpoint": row.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":public_key": row.get("public_key").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":joined_at": row.get("joined_at").and_then(|v| v.as_str()).unwrap_or_default(),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("inbox").and_then(|v| v.as_array()) {
                for row in rows {
                    let mut status = row
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unread")
                        .to_string();
                    if is_legacy {
                        status = match status.as_str() {
                            "pending" | "processing" => "unread".to_string(),
                            "completed" | "failed" => "read".to_string(),
                            other => other.to_string(),
                        };
                    }
                    tx.execute(
                        "INSERT OR REPLACE INTO inbox
                         (message_id, swarm_id, sender_id, kind, content, received_at, status, read_at, archived_at, deleted_at)
                         VALUES (:message_id, :swarm_id, :sender_id, :kind, :content, :received_at, :status, :read_at, :archived_at, :deleted_at)",
                        rusqlite::named_params! {
                            ":message_id": row.get("message_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":swarm_id": row.get("swarm_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":sender_id": row.get("sender_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":kind": row.get("kind").and_then(|v| v.as_str()).unwrap_or("message"),
                            ":content": row.get("content").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":received_at": row.get("received_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":status": status,
                            ":read_at": row.get("read_at").and_then(|v| v.as_str()),
                            ":archived_at": row.get("archived_at").and_then(|v| v.as_str()),
                            ":deleted_at": row.get("deleted_at").and_then(|v| v.as_str()),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("outbox").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO outbox
                         (message_id, swarm_id, recipient, recipient_endpoint, envelope_json, status, attempts, last_error, created_at, delivered_at)
                         VALUES (:message_id, :swarm_id, :recipient, :recipient_endpoint, :envelope_json, :status, :attempts, :last_error, :created_at, :delivered_at)",
                        rusqlite::named_params! {
                            ":message_id": row.get("message_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":swarm_id": row.get("swarm_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":recipient": row.get("recipient").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":recipient_endpoint": row.get("recipient_endpoint").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":envelope_json": row.get("envelope_json").and_then(|v| v.as_str()).unwrap_or("{}"),
                            ":status": row.get("status").and_then(|v| v.as_str()).unwrap_or("queued"),
                            ":attempts": row.get("attempts").and_then(|v| v.as_i64()).unwrap_or(0),
                            ":last_error": row.get("last_error").and_then(|v| v.as_str()),
                            ":created_at": row.get("created_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":delivered_at": row.get("delivered_at").and_then(|v| v.as_str()),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("mutes").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO mutes (scope, target_id, reason, created_at)
                         VALUES (:scope, :target_id, :reason, :created_at)",
                        rusqlite::named_params! {
                            ":scope": row.get("scope").and_then(|v| v.as_str()).unwrap_or("agent"),
                            ":target_id": row.get("target_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":reason": row.get("reason").and_then(|v| v.as_str()),
                            ":created_at": row.get("created_at").and_then(|v| v.as_str()).unwrap_or_default(),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("public_key_cache").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO public_key_cache (agent_id, public_key, endpoint, fetched_at)
                         VALUES (:agent_id, :public_key, :endpoint, :fetched_at)",
                        rusqlite::named_params! {
                            ":agent_id": row.get("agent_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":public_key": row.get("public_key").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":endpoint": row.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":fetched_at": row.get("fetched_at").and_then(|v| v.as_str()).unwrap_or_default(),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("sessions").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO sessions (id, session_id, state, started_at, last_activity_at, context_summary)
                         VALUES (1, :session_id, :state, :started_at, :last_activity_at, :context_summary)",
                        rusqlite::named_params! {
                            ":session_id": row.get("session_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":state": row.get("state").and_then(|v| v.as_str()).unwrap_or("idle"),
                            ":started_at": row.get("started_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":last_activity_at": row.get("last_activity_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":context_summary": row.get("context_summary").and_then(|v| v.as_str()),
                        },
                    )?;
                }
            }
            if let Some(rows) = doc.get("invite_tokens").and_then(|v| v.as_array()) {
                for row in rows {
                    tx.execute(
                        "INSERT OR REPLACE INTO invite_tokens (token_hash, swarm_id, max_uses, uses, created_at, expires_at, revoked)
                         VALUES (:token_hash, :swarm_id, :max_uses, :uses, :created_at, :expires_at, :revoked)",
                        rusqlite::named_params! {
                            ":token_hash": row.get("token_hash").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":swarm_id": row.get("swarm_id").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":max_uses": row.get("max_uses").and_then(|v| v.as_i64()),
                            ":uses": row.get("uses").and_then(|v| v.as_i64()).unwrap_or(0),
                            ":created_at": row.get("created_at").and_then(|v| v.as_str()).unwrap_or_default(),
                            ":expires_at": row.get("expires_at").and_then(|v| v.as_str()),
                            ":revoked": row.get("revoked").and_then(|v| v.as_bool()).unwrap_or(false) as i64,
                        },
                    )?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn load_members(conn: &Connection, swarm_id: &str) -> Result<Vec<Member>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT agent_id, endpoint, public_key, joined_at FROM members WHERE swarm_id = ?1 ORDER BY joined_at ASC",
    )?;
    let rows = stmt
        .query_map(params![swarm_id], |r| {
            Ok(Member {
                agent_id: r.get(0)?,
                endpoint: r.get(1)?,
                public_key: r.get(2)?,
                joined_at: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_inbox_entry(r: &rusqlite::Row<'_>) -> rusqlite::Result<InboxEntry> {
    let status: String = r.get(6)?;
    Ok(InboxEntry {
        message_id: r.get(0)?,
        swarm_id: r.get(1)?,
        sender_id: r.get(2)?,
        kind: r.get(3)?,
        content: r.get(4)?,
        received_at: r.get(5)?,
        status: InboxStatus::parse(&status).unwrap_or(InboxStatus::Unread),
        read_at: r.get(7)?,
        archived_at: r.get(8)?,
        deleted_at: r.get(9)?,
    })
}

fn row_to_outbox_entry(r: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let status: String = r.get(5)?;
    Ok(OutboxEntry {
        message_id: r.get(0)?,
        swarm_id: r.get(1)?,
        recipient: r.get(2)?,
        recipient_endpoint: r.get(3)?,
        envelope_json: r.get(4)?,
        status: match status.as_str() {
            "delivered" => OutboxStatus::Delivered,
            "failed" => OutboxStatus::Failed,
            _ => OutboxStatus::Queued,
        },
        attempts: r.get::<_, i64>(6)? as u32,
        last_error: r.get(7)?,
        created_at: r.get(8)?,
        delivered_at: r.get(9)?,
    })
}

fn read_session(conn: &Connection) -> Result<Option<SessionRecord>, StoreError> {
    conn.query_row(
        "SELECT session_id, state, started_at, last_activity_at, context_summary FROM sessions WHERE id = 1",
        [],
        |r| {
            let state: String = r.get(1)?;
            Ok(SessionRecord {
                session_id: r.get(0)?,
                state: SessionState::parse(&state).unwrap_or(SessionState::Idle),
                started_at: r.get(2)?,
                last_activity_at: r.get(3)?,
                context_summary: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(StoreError::from)
}

fn dump_table(conn: &Connection, table: &str) -> Result<Vec<Value>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {table}"))?;
    let column_count = stmt.column_count();
    let column_names: Vec<String> = (0..column_count)
        .map(|i| stmt.column_name(i).unwrap_or_default().to_string())
        .collect();
    let rows = stmt
        .query_map([], |r| {
            let mut obj = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value: Value = match r.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(n) => Value::from(n),
                    rusqlite::types::ValueRef::Real(f) => {
                        serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                    }
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::String(String::from_utf8_lossy(t).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Value::Null,
                };
                obj.insert(name.clone(), value);
            }
            Ok(Value::Object(obj))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_swarm() -> Swarm {
        Swarm {
            swarm_id: "s1".into(),
            name: "dev".into(),
            created_at: now_rfc3339(),
            master: "m".into(),
            members: vec![Member {
                agent_id: "m".into(),
                endpoint: "https://m.example/swarm".into(),
                public_key: "key".into(),
                joined_at: now_rfc3339(),
            }],
            settings: SwarmSettings::default(),
        }
    }

    #[tokio::test]
    async fn inbox_insert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entry = InboxEntry {
            message_id: "msg-1".into(),
            swarm_id: "s1".into(),
            sender_id: "n".into(),
            kind: "message".into(),
            content: "hi".into(),
            received_at: now_rfc3339(),
            status: InboxStatus::Unread,
            read_at: None,
            archived_at: None,
            deleted_at: None,
        };
        assert!(store.insert_inbox_idempotent(entry.clone()).await.unwrap());
        assert!(!store.insert_inbox_idempotent(entry).await.unwrap());
        assert_eq!(store.list_inbox("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn membership_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_swarm(sample_swarm()).await.unwrap();
        let loaded = store.get_swarm("s1").await.unwrap().unwrap();
        assert_eq!(loaded.members.len(), 1);
        assert!(loaded.is_master("m"));

        store
            .add_member(
                "s1",
                Member {
                    agent_id: "n".into(),
                    endpoint: "https://n.example/swarm".into(),
                    public_key: "key2".into(),
                    joined_at: now_rfc3339(),
                },
            )
            .await
            .unwrap();
        let loaded = store.get_swarm("s1").await.unwrap().unwrap();
        assert_eq!(loaded.members.len(), 2);

        store.remove_member("s1", "n").await.unwrap();
        let loaded = store.get_swarm("s1").await.unwrap().unwrap();
        assert_eq!(loaded.members.len(), 1);
    }

    #[tokio::test]
    async fn mute_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.is_muted(MuteScope::Agent, "n").await.unwrap());
        store
            .add_mute(Mute {
                scope: MuteScope::Agent,
                target_id: "n".into(),
                reason: None,
                created_at: now_rfc3339(),
            })
            .await
            .unwrap();
        assert!(store.is_muted(MuteScope::Agent, "n").await.unwrap());
    }

    #[tokio::test]
    async fn single_flight_session_claim() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        let first = store.claim_session(now, 1800, "sess-1".into()).await.unwrap();
        assert!(matches!(first, SessionClaim::Claimed(_)));
        let second = store.claim_session(now, 1800, "sess-2".into()).await.unwrap();
        assert_eq!(second, SessionClaim::AlreadyActive);

        // Past the timeout, a new claim succeeds.
        let later = now + time::Duration::seconds(2000);
        let third = store.claim_session(later, 1800, "sess-3".into()).await.unwrap();
        assert!(matches!(third, SessionClaim::Claimed(_)));
    }

    #[tokio::test]
    async fn pending_transfer_round_trips_and_resolves() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_pending_transfer("s1").await.unwrap().is_none());

        store
            .insert_pending_transfer(PendingTransfer {
                swarm_id: "s1".into(),
                from_agent: "m".into(),
                to_agent: "n".into(),
                created_at: now_rfc3339(),
            })
            .await
            .unwrap();
        let pending = store.get_pending_transfer("s1").await.unwrap().unwrap();
        assert_eq!(pending.to_agent, "n");

        // A second offer before resolution replaces, rather than duplicates.
        store
            .insert_pending_transfer(PendingTransfer {
                swarm_id: "s1".into(),
                from_agent: "m".into(),
                to_agent: "o".into(),
                created_at: now_rfc3339(),
            })
            .await
            .unwrap();
        assert_eq!(store.get_pending_transfer("s1").await.unwrap().unwrap().to_agent, "o");

        store.delete_pending_transfer("s1").await.unwrap();
        assert!(store.get_pending_transfer("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invite_token_exhaustion() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_invite_token(InviteTokenRow {
                token_hash: "hash1".into(),
                swarm_id: "s1".into(),
                max_uses: Some(1),
                uses: 0,
                created_at: now_rfc3339(),
                expires_at: None,
                revoked: false,
            })
            .await
            .unwrap();
        store.increment_invite_uses("hash1").await.unwrap();
        let row = store.get_invite_token("hash1").await.unwrap().unwrap();
        assert_eq!(row.uses, 1);
        assert_eq!(row.max_uses, Some(1));
    }

    #[tokio::test]
    async fn export_import_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_swarm(sample_swarm()).await.unwrap();
        let exported = store.export_json().await.unwrap();

        let restored = SqliteStore::open_in_memory().unwrap();
        restored.import_json(exported, false).await.unwrap();
        let swarm = restored.get_swarm("s1").await.unwrap().unwrap();
        assert_eq!(swarm.name, "dev");
        assert_eq!(swarm.members.len(), 1);
    }

    #[tokio::test]
    async fn legacy_import_remaps_queue_statuses() {
        let store = SqliteStore::open_in_memory().unwrap();
        let legacy = serde_json::json!({
            "schema_version": "1.0.0",
            "swarms": [],
            "members": [],
            "inbox": [{
                "message_id": "m1",
                "swarm_id": "s1",
                "sender_id": "n",
                "kind": "message",
                "content": "hi",
                "received_at": now_rfc3339(),
                "status": "pending",
            }],
            "outbox": [],
            "mutes": [],
            "public_key_cache": [],
            "sessions": [],
            "invite_tokens": [],
        });
        store.import_json(legacy, false).await.unwrap();
        let entry = store.get_inbox("m1").await.unwrap().unwrap();
        assert_eq!(entry.status, InboxStatus::Unread);
    }
}
