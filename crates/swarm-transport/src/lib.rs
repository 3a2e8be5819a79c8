//! Signed outbound delivery (§4.6): POSTs envelopes to recipient nodes with
//! exponential backoff, and refreshes the public-key cache lazily.
//!
//! Grounded on the reference platform's `ingress-common::rate`/egress HTTP
//! client shape: one shared `reqwest::Client`, per-call deadlines, and a
//! retry loop that treats 429 specially.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use swarm_store::SqliteStore;
use swarm_types::{OutboxStatus, PublicKeyCacheEntry};
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;
const SEND_DEADLINE: Duration = Duration::from_secs(30);
const KEY_FETCH_DEADLINE: Duration = Duration::from_secs(10);
pub const PUBLIC_KEY_CACHE_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("recipient rejected the request terminally: {status} {body}")]
    Terminal { status: u16, body: String },
    #[error("recipient's public key could not be parsed: {0}")]
    KeyFormat(String),
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub struct Transport {
    client: Client,
    agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SwarmInfoResponse {
    pub agent_id: String,
    pub endpoint: String,
    pub public_key: String,
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Transport {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("reqwest client with rustls-tls backend"),
            agent_id: agent_id.into(),
        }
    }

    /// `Send(envelope, recipient_endpoint)` (§4.6): POSTs the already-signed
    /// `envelope_json` to `<recipient_endpoint><path>` with exponential
    /// backoff. `path` is `/swarm/message` or `/swarm/join`.
    pub async fn send(
        &self,
        envelope_json: &str,
        recipient_endpoint: &str,
        path: &str,
    ) -> Result<(), TransportError> {
        let url = format!("{}{}", recipient_endpoint.trim_end_matches('/'), path);
        let mut backoff = INITIAL_BACKOFF;

        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-Agent-ID", &self.agent_id)
                .header("X-Swarm-Protocol", swarm_types::PROTOCOL_VERSION)
                .timeout(SEND_DEADLINE)
                .body(envelope_json.to_string())
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = retry_after(&resp).unwrap_or(backoff);
                        tracing::warn!(attempt, wait_ms = wait.as_millis() as u64, "rate limited, retrying");
                        tokio::time::sleep(wait).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    if status.is_server_error() {
                        tracing::warn!(attempt, status = status.as_u16(), "transient delivery failure");
                        if attempt == MAX_ATTEMPTS {
                            return Err(TransportError::Terminal {
                                status: status.as_u16(),
                                body: resp.text().await.unwrap_or_default(),
                            });
                        }
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    // any other 4xx is terminal
                    return Err(TransportError::Terminal {
                        status: status.as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "network error delivering envelope");
                    if attempt == MAX_ATTEMPTS {
                        return Err(TransportError::Network(e.to_string()));
                    }
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
            }
        }
        unreachable!("loop always returns by the final attempt")
    }

    /// Fetches `GET <endpoint>/swarm/info` for public-key cache refresh
    /// (§4.6): lazily on first contact, or after a signature failure.
    pub async fn fetch_public_key(
        &self,
        endpoint: &str,
    ) -> Result<SwarmInfoResponse, TransportError> {
        let url = format!("{}/swarm/info", endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(KEY_FETCH_DEADLINE)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::Terminal {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json::<SwarmInfoResponse>()
            .await
            .map_err(|e| TransportError::KeyFormat(e.to_string()))
    }

    /// Fetches and stores a fresh public-key cache entry for `agent_id`.
    pub async fn refresh_public_key(
        &self,
        store: &SqliteStore,
        agent_id: &str,
        endpoint: &str,
    ) -> Result<PublicKeyCacheEntry, TransportError> {
        let info = self.fetch_public_key(endpoint).await?;
        let entry = PublicKeyCacheEntry {
            agent_id: agent_id.to_string(),
            public_key: info.public_key,
            endpoint: info.endpoint,
            fetched_at: now_rfc3339(),
        };
        store
            .put_cached_pubkey(entry.clone())
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(entry)
    }

    /// Whether a cached entry is still within the TTL (default 24h, §4.6).
    pub fn is_fresh(entry: &PublicKeyCacheEntry, now: OffsetDateTime, ttl_secs: i64) -> bool {
        match OffsetDateTime::parse(&entry.fetched_at, &Rfc3339) {
            Ok(fetched_at) => (now - fetched_at).whole_seconds() < ttl_secs,
            Err(_) => false,
        }
    }

    /// Drains the store's pending outbox, attempting delivery for each row
    /// and updating its status in place. Used by the node's background
    /// delivery loop; never blocks the Receiver's request path.
    pub async fn drain_outbox(&self, store: &SqliteStore) -> Result<usize, swarm_store::StoreError> {
        let pending = store.list_pending_outbox().await?;
        let mut delivered = 0;
        for entry in pending {
            let result = self.send(&entry.envelope_json, &entry.recipient_endpoint, "/swarm/message").await;
            match result {
                Ok(()) => {
                    store
                        .update_outbox_delivery(&entry.message_id, OutboxStatus::Delivered, entry.attempts + 1, None)
                        .await?;
                    delivered += 1;
                }
                Err(e) => {
                    store
                        .update_outbox_delivery(
                            &entry.message_id,
                            OutboxStatus::Failed,
                            entry.attempts + 1,
                            Some(e.to_string()),
                        )
                        .await?;
                }
            }
        }
        Ok(delivered)
    }
}

fn next_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_BACKOFF)
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    let headers = resp.headers();
    let seconds = headers
        .get("X-RateLimit-Reset")
        .or_else(|| headers.get("Retry-After"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())?;
    Some(Duration::from_secs(seconds))
}
