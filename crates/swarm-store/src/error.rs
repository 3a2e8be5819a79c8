use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("background task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("unsupported export/import schema version: {0}")]
    SchemaVersion(String),
    #[error("swarm not found: {0}")]
    SwarmNotFound(String),
    #[error("member not found: {0}")]
    MemberNotFound(String),
}
