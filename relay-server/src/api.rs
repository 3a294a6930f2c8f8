//! # Management HTTP
//!
//! REST endpoints consumed by the agent and by operators: tunnel
//! create/list/get/delete plus a liveness probe — the full surface an
//! agent needs to bootstrap a tunnel before it ever opens a control
//! channel.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tunnel_protocol::ErrorKind;

use crate::registry::TunnelView;
use crate::state::AppState;

/// Thin wrapper so this crate can implement `IntoResponse` for the
/// foreign `ErrorKind` type (orphan rules forbid doing so directly).
pub struct ApiError(pub ErrorKind);

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        ApiError(kind)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.0.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelRequest {
    pub local_port: Option<u16>,
    pub subdomain: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTunnelResponseTunnel {
    pub id: String,
    pub public_url: String,
    pub ws_url: String,
    pub local_port: u16,
    pub created_at: u64,
}

#[derive(Serialize)]
pub struct CreateTunnelResponse {
    pub success: bool,
    pub tunnel: CreateTunnelResponseTunnel,
}

/// `POST /api/tunnel/create`
pub async fn create_tunnel(
    State(state): State<AppState>,
    Json(req): Json<CreateTunnelRequest>,
) -> Result<Json<CreateTunnelResponse>, ApiError> {
    let local_port = req.local_port.ok_or(ErrorKind::BadRequest)?;
    let tunnel = state.registry.create(local_port, req.subdomain)?;

    let tunnel_view = tunnel.snapshot();
    Ok(Json(CreateTunnelResponse {
        success: true,
        tunnel: CreateTunnelResponseTunnel {
            id: tunnel_view.id.clone(),
            public_url: format!("{}/t/{}", state.public_base_url, tunnel_view.id),
            ws_url: format!("{}/ws/{}", state.ws_base_url, tunnel_view.id),
            local_port: tunnel_view.local_port,
            created_at: tunnel_view.created_at,
        },
    }))
}

#[derive(Serialize)]
pub struct ListTunnelsResponse {
    pub tunnels: Vec<TunnelView>,
}

/// `GET /api/tunnels`
pub async fn list_tunnels(State(state): State<AppState>) -> Json<ListTunnelsResponse> {
    Json(ListTunnelsResponse {
        tunnels: state.registry.list(),
    })
}

/// `GET /api/tunnel/:id`
pub async fn get_tunnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TunnelView>, ApiError> {
    state
        .registry
        .get(&id)
        .map(|tunnel| Json(tunnel.snapshot()))
        .ok_or_else(|| ApiError(ErrorKind::NotFound))
}

#[derive(Serialize)]
pub struct DeleteTunnelResponse {
    pub success: bool,
    pub message: String,
}

/// `DELETE /api/tunnel/:id` — removes the record, closes any attached
/// channel, and cancels every pending request for it with `TunnelGone`.
pub async fn delete_tunnel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteTunnelResponse>, ApiError> {
    state.registry.delete(&id)?;
    state.correlator.cancel_tunnel(&id, ErrorKind::TunnelGone);
    state.hub.close(&id);

    Ok(Json(DeleteTunnelResponse {
        success: true,
        message: format!("tunnel '{}' deleted", id),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: u64,
    pub active_tunnels: usize,
    pub connected_tunnels: usize,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let tunnels = state.registry.list();
    let connected = tunnels.iter().filter(|t| t.connected).count();
    Json(HealthResponse {
        status: "healthy",
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        active_tunnels: tunnels.len(),
        connected_tunnels: connected,
    })
}
