//! # Agent Configuration
//!
//! Command-line surface for `tunnel-agent`: the relay to
//! register against, the local port to forward to, and an optional
//! preferred subdomain. Mirrors `relay-server`'s `cli.rs` in using
//! `clap`'s derive API with `env` fallbacks, so flags always win over the
//! environment and the environment always wins over the built-in default.

use clap::Parser;

/// `tunnel-agent` — expose a local port through a reverse HTTP tunnel relay.
#[derive(Debug, Parser)]
#[command(name = "tunnel-agent", about = "Reverse HTTP tunnel agent")]
pub struct Config {
    /// Local port the agent forwards incoming requests to.
    #[arg(short = 'p', long = "port", env = "TUNNEL_PORT")]
    pub port: u16,

    /// Base URL of the relay server, e.g. `http://localhost:7070`.
    #[arg(
        short = 's',
        long = "server",
        env = "TUNNEL_SERVER",
        default_value = "http://localhost:7070"
    )]
    pub server: String,

    /// Preferred tunnel id ("subdomain"). Left unset, the relay generates one.
    #[arg(short = 'd', long = "subdomain")]
    pub subdomain: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags() {
        let config = Config::parse_from(["tunnel-agent", "-p", "3000", "-s", "http://relay", "-d", "mine"]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.server, "http://relay");
        assert_eq!(config.subdomain.as_deref(), Some("mine"));
    }

    #[test]
    fn parses_long_equals_flags() {
        let config = Config::parse_from(["tunnel-agent", "--port=4000", "--server=http://relay:8080"]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.server, "http://relay:8080");
        assert!(config.subdomain.is_none());
    }

    #[test]
    fn server_defaults_when_unset() {
        let config = Config::parse_from(["tunnel-agent", "-p", "3000"]);
        assert_eq!(config.server, "http://localhost:7070");
    }
}
