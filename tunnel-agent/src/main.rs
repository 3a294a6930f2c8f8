//! # Tunnel Agent
//!
//! The headless process that runs next to a private origin: it registers
//! a tunnel with a relay, attaches the control channel, and proxies each
//! framed HTTP request to `localhost:{port}`.
//!
//! ## Modules
//!
//! - [`cli`]          — command-line configuration
//! - [`registration`] — management HTTP calls (`create`, `health`, `delete`)
//! - [`runtime`]       — the control-channel connect/reconnect loop
//! - [`origin`]        — forwarding one frame to the local origin

mod cli;
mod origin;
mod registration;
mod runtime;

use clap::Parser;
use tracing::{error, info};

use crate::cli::Config;
use crate::registration::RelayClient;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_agent=info".into()),
        )
        .init();

    if let Err(err) = run(config).await {
        error!(error = %err, "tunnel agent exiting with a fatal error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let relay = RelayClient::new(config.server.clone());

    info!(server = %config.server, "probing relay health");
    relay.probe_health().await?;

    let tunnel = relay
        .create_tunnel(config.port, config.subdomain.clone())
        .await?;
    info!(
        tunnel_id = %tunnel.id,
        ws_url = %tunnel.ws_url,
        local_port = config.port,
        "tunnel created, connecting control channel"
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = runtime::run_until_shutdown(&tunnel, config.port, shutdown).await;

    info!(tunnel_id = %tunnel.id, "shutting down, deleting tunnel");
    relay.delete_tunnel(&tunnel.id).await;

    result
}
