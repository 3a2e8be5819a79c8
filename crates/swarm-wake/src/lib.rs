//! WakeTrigger evaluation, the `/api/wake` single-flight core, and
//! pluggable Invoker strategies (§4.8–§4.10, §4.12).

pub mod invoker;
pub mod preferences;
pub mod session;

pub use invoker::{Invoker, InvokerError, WakePayload};
pub use preferences::{evaluate, EvaluationInput, NotificationPreferences, WakeCondition, WakeDecision};
pub use session::SessionManager;

use std::time::Duration;

use swarm_store::{SessionClaim, SqliteStore, StoreError};

const WAKE_POST_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts `payload` to the configured wake endpoint (§4.8). Failures are the
/// caller's to log — this function only reports whether the POST itself
/// succeeded; it never propagates into the Receiver's response.
pub async fn dispatch_wake(
    client: &reqwest::Client,
    wake_endpoint_url: &str,
    payload: &WakePayload,
    wake_secret: Option<&str>,
) -> Result<(), reqwest::Error> {
    let mut req = client.post(wake_endpoint_url).json(payload).timeout(WAKE_POST_TIMEOUT);
    if let Some(secret) = wake_secret {
        req = req.header("X-Wake-Secret", secret);
    }
    req.send().await?.error_for_status()?;
    Ok(())
}

/// Outcome of `/api/wake` (§4.9), independent of HTTP status mapping (left
/// to the Receiver app).
#[derive(Debug)]
pub enum WakeOutcome {
    Invoked,
    AlreadyActive,
    InvokerFailed(String),
}

/// The `/api/wake` core: single-flight check-and-set against
/// [`SessionManager`], then dispatch to `invoker` (§4.9). On invoker
/// failure, the session reverts to idle so a later retry can claim it.
pub async fn handle_wake(
    sessions: &SessionManager<'_>,
    invoker: &dyn Invoker,
    payload: WakePayload,
) -> Result<WakeOutcome, StoreError> {
    match sessions.claim().await? {
        SessionClaim::AlreadyActive => Ok(WakeOutcome::AlreadyActive),
        SessionClaim::Claimed(_) => match invoker.invoke(&payload).await {
            Ok(()) => Ok(WakeOutcome::Invoked),
            Err(e) => {
                sessions.complete().await?;
                Ok(WakeOutcome::InvokerFailed(e.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoker::NoopInvoker;
    use swarm_store::SqliteStore;

    fn sample_payload() -> WakePayload {
        WakePayload {
            message_id: "m1".into(),
            swarm_id: "s1".into(),
            sender_id: "n".into(),
            notification_level: "normal".into(),
        }
    }

    #[tokio::test]
    async fn single_flight_wake_dedups_concurrent_arrivals() {
        let store = SqliteStore::open_in_memory().unwrap();
        let sessions = SessionManager::new(&store, 1800);
        let invoker = NoopInvoker;

        let first = handle_wake(&sessions, &invoker, sample_payload()).await.unwrap();
        assert!(matches!(first, WakeOutcome::Invoked));

        let second = handle_wake(&sessions, &invoker, sample_payload()).await.unwrap();
        assert!(matches!(second, WakeOutcome::AlreadyActive));
    }
}
