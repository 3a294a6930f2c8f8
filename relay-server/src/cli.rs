//! # Relay Configuration
//!
//! Runtime configuration for `relay-server`: listen address, the
//! public-facing base URLs used to build `publicUrl`/`wsUrl` in tunnel
//! creation responses, and the idle-sweep cadence. The management
//! surface makes the bind address and externally-visible hostnames
//! load-bearing, so they become flags with environment-variable
//! fallbacks via `clap`'s `env` feature (the same crate the agent uses
//! for its own CLI).

use std::net::SocketAddr;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "relay-server", about = "Reverse HTTP tunnel relay")]
pub struct Config {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "RELAY_BIND_ADDR", default_value = "0.0.0.0:7070")]
    pub bind_addr: SocketAddr,

    /// Base URL advertised to callers as the public proxy origin, e.g.
    /// `https://tunnel.example.com`. Used to build `publicUrl`.
    #[arg(long, env = "RELAY_PUBLIC_URL", default_value = "http://127.0.0.1:7070")]
    pub public_base_url: String,

    /// Base WebSocket URL advertised to agents, e.g. `wss://tunnel.example.com`.
    /// Used to build `wsUrl`.
    #[arg(long, env = "RELAY_WS_URL", default_value = "ws://127.0.0.1:7070")]
    pub ws_base_url: String,

    /// How often to sweep disconnected tunnels whose `lastActivity` has
    /// exceeded the 24h idle threshold.
    #[arg(long, env = "RELAY_SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    pub sweep_interval_secs: u64,
}
