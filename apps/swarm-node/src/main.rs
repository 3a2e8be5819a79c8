//! Binary entrypoint: loads configuration and identity, opens the store,
//! builds the axum router, and runs the node until a shutdown signal.

use std::time::Duration;

use clap::Parser;
use swarm_node::{background_loop, build_router, build_state, shutdown_signal, Cli, Identity, NodeConfig};
use swarm_store::SqliteStore;
use swarm_transport::Transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::from_env(&cli)?;
    let identity = Identity::load_or_create(&config.identity_dir, &config.endpoint)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = SqliteStore::open(config.db_path())?;
    let transport = Transport::new(identity.agent_id.clone());

    tracing::info!(
        agent_id = %identity.agent_id,
        endpoint = %identity.endpoint,
        bind_addr = %config.bind_addr,
        "swarm-node starting"
    );

    let background_store = store.clone();
    let background_transport = Transport::new(identity.agent_id.clone());
    let session_timeout_secs = config.session_timeout_secs;
    tokio::spawn(background_loop(background_store, background_transport, session_timeout_secs));

    let bind_addr = config.bind_addr;
    let graceful_shutdown_secs = config.graceful_shutdown_secs;

    let state = build_state(store, identity, transport, config);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(Duration::from_secs(graceful_shutdown_secs)))
        .await?;

    Ok(())
}
