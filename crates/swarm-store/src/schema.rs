pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

pub const CREATE_TABLES_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS swarms (
    swarm_id     TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    master       TEXT NOT NULL,
    settings_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS members (
    swarm_id    TEXT NOT NULL,
    agent_id    TEXT NOT NULL,
    endpoint    TEXT NOT NULL,
    public_key  TEXT NOT NULL,
    joined_at   TEXT NOT NULL,
    PRIMARY KEY (swarm_id, agent_id)
);

CREATE TABLE IF NOT EXISTS inbox (
    message_id   TEXT PRIMARY KEY,
    swarm_id     TEXT NOT NULL,
    sender_id    TEXT NOT NULL,
    kind         TEXT NOT NULL,
    content      TEXT NOT NULL,
    received_at  TEXT NOT NULL,
    status       TEXT NOT NULL,
    read_at      TEXT,
    archived_at  TEXT,
    deleted_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_inbox_swarm ON inbox (swarm_id);
CREATE INDEX IF NOT EXISTS idx_inbox_status ON inbox (status, deleted_at);

CREATE TABLE IF NOT EXISTS outbox (
    message_id         TEXT PRIMARY KEY,
    swarm_id           TEXT NOT NULL,
    recipient          TEXT NOT NULL,
    recipient_endpoint TEXT NOT NULL,
    envelope_json      TEXT NOT NULL,
    status             TEXT NOT NULL,
    attempts           INTEGER NOT NULL DEFAULT 0,
    last_error         TEXT,
    created_at         TEXT NOT NULL,
    delivered_at       TEXT
);
CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox (status);

CREATE TABLE IF NOT EXISTS mutes (
    scope       TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    reason      TEXT,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (scope, target_id)
);

CREATE TABLE IF NOT EXISTS public_key_cache (
    agent_id    TEXT PRIMARY KEY,
    public_key  TEXT NOT NULL,
    endpoint    TEXT NOT NULL,
    fetched_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id                 INTEGER PRIMARY KEY CHECK (id = 1),
    session_id         TEXT NOT NULL,
    state              TEXT NOT NULL,
    started_at         TEXT NOT NULL,
    last_activity_at   TEXT NOT NULL,
    context_summary    TEXT
);

CREATE TABLE IF NOT EXISTS invite_tokens (
    token_hash   TEXT PRIMARY KEY,
    swarm_id     TEXT NOT NULL,
    max_uses     INTEGER,
    uses         INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    expires_at   TEXT,
    revoked      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pending_transfers (
    swarm_id     TEXT PRIMARY KEY,
    from_agent   TEXT NOT NULL,
    to_agent     TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
"#;
