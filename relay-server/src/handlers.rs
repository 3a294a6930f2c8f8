//! # WebSocket Upgrade Handler
//!
//! The single entry point for agent attachment: `GET /ws/{tunnel_id}`.
//! Validates the tunnel exists before upgrading, then hands the split
//! socket to the [`crate::hub::ControlChannelHub`] for the rest of its
//! lifecycle.

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::warn;

use crate::state::AppState;

/// `GET /ws/{tunnel_id}` — upgrades to the control channel for an
/// already-created tunnel. Unknown tunnel ids still get a successful
/// HTTP upgrade — the close code, not the HTTP status, carries the
/// rejection, mirroring how the rest of this protocol's handshake
/// failure modes are reported.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(tunnel_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if state.registry.get(&tunnel_id).is_none() {
            warn!(tunnel_id, "rejecting attach for unknown tunnel");
            crate::hub::ControlChannelHub::reject_policy_violation(socket).await;
            return;
        }
        state
            .hub
            .attach(tunnel_id, socket, state.registry.clone(), state.correlator.clone())
            .await;
    })
}
