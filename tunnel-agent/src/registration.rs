//! # Relay Registration
//!
//! The management HTTP calls the agent makes around the control channel's
//! lifetime: a startup liveness probe, the `create` call that
//! mints a tunnel and hands back the control channel's URL, and the
//! best-effort `delete` made on graceful shutdown. Kept as a small
//! `reqwest`-backed client so `runtime.rs` only ever talks in terms of
//! [`TunnelHandle`], never raw JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Management calls default to this; the health probe uses a tighter one.
const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct CreateTunnelRequest {
    #[serde(rename = "localPort")]
    local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    subdomain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTunnelResponse {
    #[allow(dead_code)]
    success: bool,
    tunnel: TunnelFields,
}

#[derive(Debug, Deserialize)]
struct TunnelFields {
    id: String,
    #[serde(rename = "wsUrl")]
    ws_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// What the agent needs to know about its own tunnel once created: the
/// id (used for the shutdown `DELETE` and for log lines) and the control
/// channel URL to dial.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    pub id: String,
    pub ws_url: String,
}

/// Thin wrapper over a `reqwest::Client` pointed at one relay's base URL.
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// `GET /health` with a short deadline. The agent calls this once at
    /// startup to fail fast when the relay is unreachable.
    pub async fn probe_health(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("relay health probe returned {}", response.status());
        }
        Ok(())
    }

    /// `POST /api/tunnel/create`.
    pub async fn create_tunnel(
        &self,
        local_port: u16,
        subdomain: Option<String>,
    ) -> anyhow::Result<TunnelHandle> {
        let url = format!("{}/api/tunnel/create", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(MANAGEMENT_TIMEOUT)
            .json(&CreateTunnelRequest {
                local_port,
                subdomain,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            anyhow::bail!("tunnel create failed ({status}): {message}");
        }

        let parsed: CreateTunnelResponse = response.json().await?;
        info!(tunnel_id = %parsed.tunnel.id, "tunnel created");
        Ok(TunnelHandle {
            id: parsed.tunnel.id,
            ws_url: parsed.tunnel.ws_url,
        })
    }

    /// `DELETE /api/tunnel/{id}`, best-effort.
    pub async fn delete_tunnel(&self, id: &str) {
        let url = format!("{}/api/tunnel/{}", self.base_url, id);
        match self.http.delete(&url).timeout(MANAGEMENT_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                info!(tunnel_id = id, "tunnel deleted on shutdown");
            }
            Ok(response) => {
                warn!(tunnel_id = id, status = %response.status(), "tunnel delete failed on shutdown");
            }
            Err(err) => {
                warn!(tunnel_id = id, error = %err, "tunnel delete request failed on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tunnel_request_omits_absent_subdomain() {
        let request = CreateTunnelRequest {
            local_port: 3000,
            subdomain: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"localPort":3000}"#);
    }

    #[test]
    fn create_tunnel_response_parses_camel_case_fields() {
        let body = r#"{"success":true,"tunnel":{"id":"abc123","publicUrl":"http://x/t/abc123","wsUrl":"ws://x/ws/abc123","localPort":3000,"createdAt":1}}"#;
        let parsed: CreateTunnelResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.tunnel.id, "abc123");
        assert_eq!(parsed.tunnel.ws_url, "ws://x/ws/abc123");
    }
}
