//! Pluggable agent activation (§4.10): `tmux | subprocess | webhook | sdk |
//! noop`. Method selection is a startup-time configuration choice; a single
//! node runs exactly one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The body POSTed by WakeTrigger and handed to the configured Invoker
/// (§4.8, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakePayload {
    pub message_id: String,
    pub swarm_id: String,
    pub sender_id: String,
    pub notification_level: String,
}

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("failed to spawn subprocess: {0}")]
    Spawn(String),
    #[error("webhook invocation failed: {0}")]
    Webhook(String),
    #[error("tmux target is not configured or unreachable: {0}")]
    Tmux(String),
    #[error("invoker configuration is incomplete: {0}")]
    Config(String),
}

#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError>;
}

/// Injects a notification line into a named tmux target (`session:window.pane`).
pub struct TmuxInvoker {
    pub target: String,
}

#[async_trait]
impl Invoker for TmuxInvoker {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError> {
        if self.target.is_empty() {
            return Err(InvokerError::Config("tmux target is empty".into()));
        }
        let line = format!(
            "# swarm message {} from {} in {}",
            payload.message_id, payload.sender_id, payload.swarm_id
        );
        let status = tokio::process::Command::new("tmux")
            .args(["send-keys", "-t", &self.target, &line, "Enter"])
            .status()
            .await
            .map_err(|e| InvokerError::Tmux(e.to_string()))?;
        if !status.success() {
            return Err(InvokerError::Tmux(format!("tmux exited with {status}")));
        }
        Ok(())
    }
}

/// Spawns a detached command built from a template with placeholders
/// `{message_id}`, `{swarm_id}`, `{sender_id}`, `{notification_level}`.
pub struct SubprocessInvoker {
    pub command_template: String,
}

fn expand_template(template: &str, payload: &WakePayload) -> String {
    template
        .replace("{message_id}", &payload.message_id)
        .replace("{swarm_id}", &payload.swarm_id)
        .replace("{sender_id}", &payload.sender_id)
        .replace("{notification_level}", &payload.notification_level)
}

#[async_trait]
impl Invoker for SubprocessInvoker {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError> {
        let expanded = expand_template(&self.command_template, payload);
        let mut parts = expanded.split_whitespace();
        let program = parts.next().ok_or_else(|| InvokerError::Config("empty command template".into()))?;
        let child = tokio::process::Command::new(program)
            .args(parts)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| InvokerError::Spawn(e.to_string()))?;
        // Detach: the endpoint does not wait for completion (§5).
        drop(child);
        Ok(())
    }
}

/// POSTs `payload` as JSON to a configured URL; any HTTP >= 400 is an error.
pub struct WebhookInvoker {
    pub url: String,
    pub client: reqwest::Client,
}

#[async_trait]
impl Invoker for WebhookInvoker {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| InvokerError::Webhook(e.to_string()))?;
        if resp.status().as_u16() >= 400 {
            return Err(InvokerError::Webhook(format!(
                "webhook responded {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Starts (or resumes) an external agent runtime session with configured
/// working directory, permission mode, max-turns, and model.
pub struct SdkInvoker {
    pub binary: String,
    pub working_dir: String,
    pub permission_mode: String,
    pub max_turns: u32,
    pub model: String,
}

#[async_trait]
impl Invoker for SdkInvoker {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError> {
        let child = tokio::process::Command::new(&self.binary)
            .current_dir(&self.working_dir)
            .arg("--permission-mode")
            .arg(&self.permission_mode)
            .arg("--max-turns")
            .arg(self.max_turns.to_string())
            .arg("--model")
            .arg(&self.model)
            .arg("--message-id")
            .arg(&payload.message_id)
            .arg("--swarm-id")
            .arg(&payload.swarm_id)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| InvokerError::Spawn(e.to_string()))?;
        drop(child);
        Ok(())
    }
}

/// Records the invocation and returns success; used in tests and dry runs.
pub struct NoopInvoker;

#[async_trait]
impl Invoker for NoopInvoker {
    async fn invoke(&self, payload: &WakePayload) -> Result<(), InvokerError> {
        tracing::info!(message_id = %payload.message_id, "noop invoker recorded wake");
        Ok(())
    }
}
