//! # Tunnel Relay Server
//!
//! A reverse HTTP tunneling relay: it owns the tunnel registry, accepts
//! one control channel per tunnel over WebSocket, correlates public HTTP
//! requests with the agent's replies, and exposes the management REST
//! surface the agent and operators use to create/inspect/delete tunnels.
//!
//! ## Architecture
//!
//! ```text
//! Public caller ──HTTP──► Relay Server ──WS──► Agent ──HTTP──► Local origin
//! ```
//!
//! ## Modules
//!
//! - [`cli`]        — runtime configuration (listen address, public URLs, sweep cadence)
//! - [`registry`]    — the Tunnel Registry
//! - [`hub`]         — the Control Channel Hub
//! - [`correlator`]  — the Request Correlator
//! - [`handlers`]    — WebSocket upgrade entry point
//! - [`ingress`]     — the public reverse-proxy surface
//! - [`api`]         — management REST endpoints
//! - [`state`]       — shared application state

mod api;
mod cli;
mod correlator;
mod handlers;
mod hub;
mod ingress;
mod registry;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{any, delete, get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::cli::Config;
use crate::state::AppState;

/// Relay entry point.
///
/// Parses configuration, initializes logging, creates the shared
/// application state, wires the idle-sweep background task, and starts
/// serving the management and public-proxy HTTP surfaces plus the
/// control-channel WebSocket upgrade.
#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_server=info".into()),
        )
        .init();

    let state = AppState::new(config.public_base_url.clone(), config.ws_base_url.clone());

    spawn_idle_sweep(state.clone(), Duration::from_secs(config.sweep_interval_secs));

    let app = Router::new()
        .route("/ws/{tunnel_id}", get(handlers::ws_handler))
        .route("/api/tunnel/create", post(api::create_tunnel))
        .route("/api/tunnels", get(api::list_tunnels))
        .route("/api/tunnel/{id}", get(api::get_tunnel))
        .route("/api/tunnel/{id}", delete(api::delete_tunnel))
        .route("/health", get(api::health))
        .route("/t/{tunnel_id}", any(ingress::proxy_root))
        .route("/t/{tunnel_id}/{*rest}", any(ingress::proxy))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!(addr = %config.bind_addr, "relay server listening");

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind listen address");
    axum::serve(listener, app).await.expect("relay server crashed");
}

/// Runs [`crate::registry::TunnelRegistry::sweep_idle`] on a fixed cadence
/// so unattached tunnels older than the 24h idle threshold don't
/// accumulate forever.
fn spawn_idle_sweep(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = state.registry.sweep_idle();
            if !removed.is_empty() {
                info!(count = removed.len(), ids = ?removed, "swept idle tunnels");
            }
        }
    });
}
