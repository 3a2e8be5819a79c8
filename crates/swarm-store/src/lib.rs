//! Single-writer durable state for a swarm messaging node (§4.2).
//!
//! Backed by `rusqlite` in WAL mode, following the reference platform's
//! SQLite-backed conversation store (`providers/webchat/src/conversation/
//! sqlite.rs`): a `Connection` behind a blocking mutex, every call dispatched
//! through `tokio::task::spawn_blocking` so the async receive/send paths
//! never block on disk I/O directly.

mod error;
mod schema;
mod store;

pub use error::StoreError;
pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::{SessionClaim, SqliteStore};
