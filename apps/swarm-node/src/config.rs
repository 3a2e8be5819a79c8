//! Node configuration (§6 `[ADDED]`): environment-first, with an optional
//! `--config <path>` JSON file for overrides — the same two-tier shape the
//! reference platform uses for its provider configs.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "swarm-node", about = "A peer-to-peer agent messaging node")]
pub struct Cli {
    /// Optional JSON file whose fields override the environment.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokerMethod {
    Tmux,
    Subprocess,
    Webhook,
    Sdk,
    Noop,
}

impl InvokerMethod {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "tmux" => Ok(InvokerMethod::Tmux),
            "subprocess" => Ok(InvokerMethod::Subprocess),
            "webhook" => Ok(InvokerMethod::Webhook),
            "sdk" => Ok(InvokerMethod::Sdk),
            "noop" => Ok(InvokerMethod::Noop),
            other => anyhow::bail!("unknown SWARM_INVOKER_METHOD: {other}"),
        }
    }
}

/// Overrides loadable from `--config <path>` (§6). Every field optional —
/// anything left `None` keeps whatever the environment already set.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileOverrides {
    pub bind_addr: Option<String>,
    pub endpoint: Option<String>,
    pub identity_dir: Option<String>,
    pub data_dir: Option<String>,
    pub rate_limit_msgs_per_min: Option<u32>,
    pub rate_limit_joins_per_hour: Option<u32>,
    pub wake_endpoint_url: Option<String>,
    pub wake_shared_secret: Option<String>,
    pub api_wake_enabled: Option<bool>,
    pub invoker_method: Option<String>,
    pub tmux_target: Option<String>,
    pub subprocess_command_template: Option<String>,
    pub webhook_url: Option<String>,
    pub sdk_binary: Option<String>,
    pub sdk_working_dir: Option<String>,
    pub sdk_permission_mode: Option<String>,
    pub sdk_max_turns: Option<u32>,
    pub sdk_model: Option<String>,
    pub session_timeout_secs: Option<i64>,
    pub graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// This node's externally reachable base URL, carried as `sender.endpoint`
    /// on outbound envelopes and returned from `/swarm/info` (§4.1, §4.7).
    pub endpoint: String,
    pub identity_dir: PathBuf,
    pub data_dir: PathBuf,

    /// Per-sender messages/min (§4.7, default 60).
    pub rate_limit_msgs_per_min: u32,
    /// Per-IP `/swarm/join` requests/hour (§4.7, default 10).
    pub rate_limit_joins_per_hour: u32,

    pub api_wake_enabled: bool,
    pub wake_endpoint_url: Option<String>,
    pub wake_shared_secret: Option<String>,

    pub invoker_method: InvokerMethod,
    pub tmux_target: Option<String>,
    pub subprocess_command_template: Option<String>,
    pub webhook_url: Option<String>,
    pub sdk_binary: Option<String>,
    pub sdk_working_dir: Option<String>,
    pub sdk_permission_mode: Option<String>,
    pub sdk_max_turns: Option<u32>,
    pub sdk_model: Option<String>,

    /// Default 30 min (§4.12).
    pub session_timeout_secs: i64,
    /// Default 24h (§4.6).
    pub public_key_cache_ttl_secs: i64,
    /// Drain deadline for `axum::serve(...).with_graceful_shutdown(...)`
    /// (§5, default 10s).
    pub graceful_shutdown_secs: u64,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl NodeConfig {
    /// Reads every field from `SWARM_*` environment variables, applies
    /// sensible defaults, then lets `--config <path>` (if given) override
    /// anything still set. A selected invoker method missing its required
    /// fields is a startup-time fatal error, not a lazily-discovered one.
    pub fn from_env(cli: &Cli) -> anyhow::Result<Self> {
        let mut cfg = Self {
            bind_addr: env_string("SWARM_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:7420".to_string())
                .parse()?,
            endpoint: env_string("SWARM_ENDPOINT").unwrap_or_default(),
            identity_dir: env_string("SWARM_IDENTITY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./identity")),
            data_dir: env_string("SWARM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            rate_limit_msgs_per_min: env_parsed("SWARM_RATE_LIMIT_MSGS_PER_MIN").unwrap_or(60),
            rate_limit_joins_per_hour: env_parsed("SWARM_RATE_LIMIT_JOINS_PER_HOUR").unwrap_or(10),
            api_wake_enabled: env_parsed("SWARM_API_WAKE_ENABLED").unwrap_or(false),
            wake_endpoint_url: env_string("SWARM_WAKE_ENDPOINT_URL"),
            wake_shared_secret: env_string("SWARM_WAKE_SHARED_SECRET"),
            invoker_method: env_string("SWARM_INVOKER_METHOD")
                .map(|s| InvokerMethod::parse(&s))
                .transpose()?
                .unwrap_or(InvokerMethod::Noop),
            tmux_target: env_string("SWARM_TMUX_TARGET"),
            subprocess_command_template: env_string("SWARM_SUBPROCESS_COMMAND_TEMPLATE"),
            webhook_url: env_string("SWARM_WEBHOOK_URL"),
            sdk_binary: env_string("SWARM_SDK_BINARY"),
            sdk_working_dir: env_string("SWARM_SDK_WORKING_DIR"),
            sdk_permission_mode: env_string("SWARM_SDK_PERMISSION_MODE"),
            sdk_max_turns: env_parsed("SWARM_SDK_MAX_TURNS"),
            sdk_model: env_string("SWARM_SDK_MODEL"),
            session_timeout_secs: env_parsed("SWARM_SESSION_TIMEOUT_SECS").unwrap_or(1800),
            public_key_cache_ttl_secs: env_parsed("SWARM_PUBLIC_KEY_CACHE_TTL_SECS")
                .unwrap_or(swarm_transport::PUBLIC_KEY_CACHE_TTL_SECS),
            graceful_shutdown_secs: env_parsed("SWARM_GRACEFUL_SHUTDOWN_SECS").unwrap_or(10),
        };

        if let Some(path) = &cli.config {
            let raw = std::fs::read_to_string(path)?;
            let overrides: ConfigFileOverrides = serde_json::from_str(&raw)?;
            cfg.apply_overrides(overrides)?;
        }

        if cfg.endpoint.is_empty() {
            anyhow::bail!("SWARM_ENDPOINT (or \"endpoint\" in --config) must name this node's externally reachable base URL");
        }
        cfg.validate_invoker()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, o: ConfigFileOverrides) -> anyhow::Result<()> {
        if let Some(v) = o.bind_addr {
            self.bind_addr = v.parse()?;
        }
        if let Some(v) = o.endpoint {
            self.endpoint = v;
        }
        if let Some(v) = o.identity_dir {
            self.identity_dir = PathBuf::from(v);
        }
        if let Some(v) = o.data_dir {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = o.rate_limit_msgs_per_min {
            self.rate_limit_msgs_per_min = v;
        }
        if let Some(v) = o.rate_limit_joins_per_hour {
            self.rate_limit_joins_per_hour = v;
        }
        if let Some(v) = o.wake_endpoint_url {
            self.wake_endpoint_url = Some(v);
        }
        if let Some(v) = o.wake_shared_secret {
            self.wake_shared_secret = Some(v);
        }
        if let Some(v) = o.api_wake_enabled {
            self.api_wake_enabled = v;
        }
        if let Some(v) = o.invoker_method {
            self.invoker_method = InvokerMethod::parse(&v)?;
        }
        if let Some(v) = o.tmux_target {
            self.tmux_target = Some(v);
        }
        if let Some(v) = o.subprocess_command_template {
            self.subprocess_command_template = Some(v);
        }
        if let Some(v) = o.webhook_url {
            self.webhook_url = Some(v);
        }
        if let Some(v) = o.sdk_binary {
            self.sdk_binary = Some(v);
        }
        if let Some(v) = o.sdk_working_dir {
            self.sdk_working_dir = Some(v);
        }
        if let Some(v) = o.sdk_permission_mode {
            self.sdk_permission_mode = Some(v);
        }
        if let Some(v) = o.sdk_max_turns {
            self.sdk_max_turns = Some(v);
        }
        if let Some(v) = o.sdk_model {
            self.sdk_model = Some(v);
        }
        if let Some(v) = o.session_timeout_secs {
            self.session_timeout_secs = v;
        }
        if let Some(v) = o.graceful_shutdown_secs {
            self.graceful_shutdown_secs = v;
        }
        Ok(())
    }

    fn validate_invoker(&self) -> anyhow::Result<()> {
        match self.invoker_method {
            InvokerMethod::Tmux if self.tmux_target.is_none() => {
                anyhow::bail!("SWARM_INVOKER_METHOD=tmux requires SWARM_TMUX_TARGET")
            }
            InvokerMethod::Subprocess if self.subprocess_command_template.is_none() => {
                anyhow::bail!(
                    "SWARM_INVOKER_METHOD=subprocess requires SWARM_SUBPROCESS_COMMAND_TEMPLATE"
                )
            }
            InvokerMethod::Webhook if self.webhook_url.is_none() => {
                anyhow::bail!("SWARM_INVOKER_METHOD=webhook requires SWARM_WEBHOOK_URL")
            }
            InvokerMethod::Sdk
                if self.sdk_binary.is_none()
                    || self.sdk_working_dir.is_none()
                    || self.sdk_permission_mode.is_none()
                    || self.sdk_model.is_none() =>
            {
                anyhow::bail!(
                    "SWARM_INVOKER_METHOD=sdk requires SWARM_SDK_BINARY, SWARM_SDK_WORKING_DIR, \
                     SWARM_SDK_PERMISSION_MODE, and SWARM_SDK_MODEL"
                )
            }
            _ => Ok(()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("swarm.db")
    }
}
