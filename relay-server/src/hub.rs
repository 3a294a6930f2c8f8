//! # Control Channel Hub
//!
//! Accepts the one WebSocket attachment per tunnel id, enforces the
//! single-attachment invariant (a new attachment preempts the old one),
//! and routes frames in both directions: split sink/stream, an
//! unbounded outbound queue drained by one dedicated task (the single
//! writer), and an inbound dispatch loop on the task that called
//! `on_upgrade`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tunnel_protocol::{ErrorKind, Frame, HttpRequestFrame, HttpResponseFrame};

use crate::correlator::RequestCorrelator;
use crate::registry::TunnelRegistry;

/// Transport-level keepalive cadence.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `1002`: bad path shape or unknown tunnel id.
const CLOSE_POLICY_VIOLATION: u16 = 1002;
/// `1000`: explicit delete, graceful shutdown, or preemption.
const CLOSE_NORMAL: u16 = 1000;

/// What the outbound drain task for one channel is asked to do. Kept as
/// an enum (rather than sending raw `Message`s) so callers construct
/// frames with [`Frame`], not WebSocket primitives.
enum Outbound {
    Frame(Frame),
    Ping,
    Close(u16, &'static str),
}

struct ChannelHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Registry of currently-attached control channels, one per tunnel id.
#[derive(Clone)]
pub struct ControlChannelHub {
    channels: Arc<dashmap::DashMap<String, ChannelHandle>>,
}

impl ControlChannelHub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(dashmap::DashMap::new()),
        }
    }

    /// Enqueues an `http_request` frame for `tunnel_id`'s channel.
    /// `SendFailed` covers both "no such channel" races (the ingress
    /// layer already checked `connected` before calling the correlator)
    /// and a closed outbound queue.
    pub fn send_http_request(
        &self,
        tunnel_id: &str,
        request: HttpRequestFrame,
    ) -> Result<(), ErrorKind> {
        let channel = self.channels.get(tunnel_id).ok_or(ErrorKind::SendFailed)?;
        channel
            .tx
            .send(Outbound::Frame(Frame::HttpRequest(request)))
            .map_err(|_| ErrorKind::SendFailed)
    }

    /// Closes the channel attached to `tunnel_id`, if any, with close
    /// code `1000`. The connection task's own
    /// cleanup (detach + cancel pending requests) runs once its write
    /// loop observes the close.
    pub fn close(&self, tunnel_id: &str) {
        if let Some(channel) = self.channels.get(tunnel_id) {
            let _ = channel.tx.send(Outbound::Close(CLOSE_NORMAL, "tunnel deleted"));
        }
    }

    /// Test-only seam: registers a channel handle backed by a plain
    /// `mpsc` pair rather than a real WebSocket, so callers (e.g. the
    /// correlator's timeout test) can exercise `send_http_request`
    /// against an "attached" tunnel without driving a real socket.
    #[cfg(test)]
    pub(crate) fn insert_test_channel(&self, tunnel_id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .insert(tunnel_id.to_string(), ChannelHandle { tx });
        rx
    }

    /// Rejects an upgrade for a path that doesn't match `/ws/{tunnel_id}`
    /// or names an unknown tunnel.
    pub async fn reject_policy_violation(socket: WebSocket) {
        let (mut sink, _stream) = socket.split();
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "unknown tunnel or bad path".into(),
            })))
            .await;
    }

    /// Attaches a newly-upgraded WebSocket as the control channel for
    /// `tunnel_id`. If another channel is already attached, it is closed
    /// first (new attachment wins) before this one is registered and
    /// marked connected.
    pub async fn attach(
        &self,
        tunnel_id: String,
        socket: WebSocket,
        registry: TunnelRegistry,
        correlator: RequestCorrelator,
    ) {
        if let Some((_, previous)) = self.channels.remove(&tunnel_id) {
            info!(tunnel_id, "preempting previous control channel");
            let _ = previous
                .tx
                .send(Outbound::Close(CLOSE_NORMAL, "superseded by new attachment"));
        }

        let Some(tunnel) = registry.get(&tunnel_id) else {
            // Tunnel was deleted between the path check and here; close
            // it out rather than accepting a dangling attachment.
            Self::reject_policy_violation(socket).await;
            return;
        };

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        self.channels
            .insert(tunnel_id.clone(), ChannelHandle { tx: tx.clone() });
        tunnel.set_connected(true);

        // ── Outbound Task: the single writer for this channel ──
        let outbound_task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Outbound::Frame(frame) => {
                        let text = match frame.to_json() {
                            Ok(t) => t,
                            Err(e) => {
                                warn!("failed to serialize outbound frame: {}", e);
                                continue;
                            }
                        };
                        if ws_sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Ping => {
                        if ws_sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close(code, reason) => {
                        let _ = ws_sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        });

        // ── Keepalive Task: low-level WebSocket ping every 30s ──
        // Routed through the same outbound queue as everything else so
        // the single-writer discipline holds even for transport pings.
        let tx_ping = tx.clone();
        let keepalive_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                interval.tick().await;
                if tx_ping.send(Outbound::Ping).is_err() {
                    break;
                }
            }
        });

        let _ = tx.send(Frame::Connected {
            tunnel_id: tunnel_id.clone(),
            message: "attached".to_string(),
        }.into());

        // ── Inbound Loop ──
        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => match Frame::from_json(&text) {
                    Ok(frame) => {
                        self.dispatch_inbound(&tunnel_id, &tunnel, &tx, &correlator, frame)
                    }
                    Err(e) => {
                        debug!(tunnel_id, "dropping malformed frame: {}", e);
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        // ── Cleanup on Disconnect ──
        outbound_task.abort();
        keepalive_task.abort();
        // Only clear the registry entry if it's still ours — a
        // concurrent preemption may already have replaced it.
        if let Some(current) = self.channels.get(&tunnel_id) {
            if current.tx.same_channel(&tx) {
                drop(current);
                self.channels.remove(&tunnel_id);
            }
        }
        tunnel.set_connected(false);
        correlator.cancel_tunnel(&tunnel_id, ErrorKind::ChannelDropped);
        info!(tunnel_id, "control channel detached");
    }

    fn dispatch_inbound(
        &self,
        tunnel_id: &str,
        tunnel: &crate::registry::Tunnel,
        tx: &mpsc::UnboundedSender<Outbound>,
        correlator: &RequestCorrelator,
        frame: Frame,
    ) {
        match frame {
            Frame::HttpResponse(response) => {
                correlator.on_response(tunnel_id, response);
            }
            Frame::Ping { timestamp } => {
                tunnel.touch();
                let _ = tx.send(Outbound::Frame(Frame::Pong { timestamp }));
            }
            other => {
                debug!(tunnel_id, ?other, "ignoring frame not expected from agent");
            }
        }
    }
}

impl Default for ControlChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Outbound::Frame(frame)
    }
}
