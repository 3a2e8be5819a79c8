//! Library surface for the `swarm-node` binary: configuration, identity,
//! HTTP handlers, and the router/background-loop wiring, split out of
//! `main.rs` so integration tests can drive the router with
//! `tower::ServiceExt::oneshot` instead of binding a real socket.

pub mod config;
pub mod error;
pub mod identity;
pub mod rate_limit;
pub mod receiver;

use std::{sync::Arc, sync::RwLock, time::Duration};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use swarm_store::SqliteStore;
use swarm_transport::Transport;
use swarm_wake::{
    invoker::{NoopInvoker, SdkInvoker, SubprocessInvoker, TmuxInvoker, WebhookInvoker},
    session::SessionManager,
    Invoker, NotificationPreferences,
};
use tower_http::trace::TraceLayer;

pub use config::{Cli, InvokerMethod, NodeConfig};
pub use identity::Identity;
pub use rate_limit::RateLimitLayer;
pub use receiver::AppState;

pub fn build_invoker(config: &NodeConfig) -> Arc<dyn Invoker> {
    match config.invoker_method {
        InvokerMethod::Tmux => Arc::new(TmuxInvoker {
            target: config.tmux_target.clone().unwrap_or_default(),
        }),
        InvokerMethod::Subprocess => Arc::new(SubprocessInvoker {
            command_template: config.subprocess_command_template.clone().unwrap_or_default(),
        }),
        InvokerMethod::Webhook => Arc::new(WebhookInvoker {
            url: config.webhook_url.clone().unwrap_or_default(),
            client: reqwest::Client::new(),
        }),
        InvokerMethod::Sdk => Arc::new(SdkInvoker {
            binary: config.sdk_binary.clone().unwrap_or_default(),
            working_dir: config.sdk_working_dir.clone().unwrap_or_default(),
            permission_mode: config.sdk_permission_mode.clone().unwrap_or_default(),
            max_turns: config.sdk_max_turns.unwrap_or(20),
            model: config.sdk_model.clone().unwrap_or_default(),
        }),
        InvokerMethod::Noop => Arc::new(NoopInvoker),
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let message_routes = Router::new()
        .route("/swarm/message", post(receiver::message_handler))
        .layer(RateLimitLayer::per_sender(
            state.config.rate_limit_msgs_per_min,
            60,
        ));

    let join_routes = Router::new()
        .route("/swarm/join", post(receiver::join_handler))
        .layer(RateLimitLayer::per_ip(
            state.config.rate_limit_joins_per_hour,
            3600,
        ));

    let protocol_routes = Router::new()
        .merge(message_routes)
        .merge(join_routes)
        .route_layer(middleware::from_fn(receiver::require_headers));

    let mut router = Router::new()
        .merge(protocol_routes)
        .route("/swarm/health", get(receiver::health_handler))
        .route("/swarm/info", get(receiver::info_handler));

    if state.config.api_wake_enabled {
        router = router.route("/api/wake", post(receiver::wake_handler));
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drains the outbox and sweeps for timed-out sessions (§4.6,
/// §4.12). Runs for the lifetime of the process; errors are logged, never
/// fatal — a single failed drain/sweep must not take the node down.
pub async fn background_loop(store: SqliteStore, transport: Transport, session_timeout_secs: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        if let Err(e) = transport.drain_outbox(&store).await {
            tracing::warn!(error = %e, "outbox drain failed");
        }
        let sessions = SessionManager::new(&store, session_timeout_secs);
        if let Err(e) = sessions.expire_if_timed_out().await {
            tracing::warn!(error = %e, "session expiry sweep failed");
        }
    }
}

pub async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(grace_secs = grace.as_secs(), "shutdown signal received, draining in-flight requests");
}

/// Assembles `AppState` behind an `Arc`, ready for `build_router`.
pub fn build_state(
    store: SqliteStore,
    identity: Identity,
    transport: Transport,
    config: NodeConfig,
) -> Arc<AppState> {
    let invoker = build_invoker(&config);
    Arc::new(AppState {
        store,
        identity,
        transport,
        config,
        invoker,
        wake_client: reqwest::Client::new(),
        prefs: RwLock::new(NotificationPreferences::default()),
    })
}
