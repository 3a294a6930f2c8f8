//! # Agent Runtime
//!
//! The control-channel connect loop: dial the relay's control channel,
//! process frames until it closes, and reconnect with a bounded retry
//! budget. Shaped around a split sink/stream, one outbound-drain task
//! holding the single-writer discipline, a heartbeat task, and an
//! inbound dispatch loop that hands each frame its own task.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use tunnel_protocol::Frame;

use crate::origin;
use crate::registration::TunnelHandle;

/// Agent-side heartbeat cadence.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Reconnect attempt cap and fixed interval.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

fn now_unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Drives one attached control channel from connect to close. Returns
/// once the channel ends for any reason (remote close, error, preempted
/// by a newer attachment) — the caller decides whether to reconnect.
async fn run_session(ws_url: &str, local_port: u16, http_client: &reqwest::Client) -> anyhow::Result<()> {
    let (ws_stream, _response) = tokio_tungstenite::connect_async(ws_url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // ── Outbound Task: the single writer for this channel ──
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // ── Heartbeat Task ──
    let tx_ping = tx.clone();
    let heartbeat = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            interval.tick().await;
            let frame = Frame::Ping {
                timestamp: now_unix_millis(),
            };
            let Ok(text) = frame.to_json() else { continue };
            if tx_ping.send(Message::Text(text.into())).is_err() {
                break;
            }
        }
    });

    // ── Inbound Loop: each http_request becomes an independent task ──
    let mut attached = false;
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "control channel read error");
                break;
            }
        };

        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                break;
            }
            continue;
        };

        match Frame::from_json(&text) {
            Ok(Frame::Connected { tunnel_id, message }) => {
                attached = true;
                info!(tunnel_id, message, "attached to relay, ready to serve requests");
            }
            Ok(Frame::HttpRequest(request)) => {
                let tx_reply = tx.clone();
                let client = http_client.clone();
                tokio::spawn(async move {
                    let response = origin::forward(&client, local_port, request).await;
                    let frame = Frame::HttpResponse(response);
                    if let Ok(text) = frame.to_json() {
                        let _ = tx_reply.send(Message::Text(text.into()));
                    }
                });
            }
            Ok(Frame::Pong { .. }) => {
                debug!("received unsolicited pong");
            }
            Ok(Frame::Error { message }) => {
                warn!(message, "relay reported an error frame");
            }
            Ok(other) => {
                debug!(?other, "ignoring frame not expected from relay");
            }
            Err(err) => {
                debug!(error = %err, "dropping malformed frame from relay");
            }
        }
    }

    writer.abort();
    heartbeat.abort();

    if attached {
        Ok(())
    } else {
        anyhow::bail!("control channel closed before a connected frame arrived")
    }
}

/// Runs the bounded reconnection state machine around [`run_session`]
/// until `shutdown` resolves or the reconnect budget is exhausted: 5
/// attempts at a fixed 5s interval, with a successful re-attach resetting
/// the counter.
pub async fn run_until_shutdown(
    tunnel: &TunnelHandle,
    local_port: u16,
    shutdown: impl std::future::Future<Output = ()>,
) -> anyhow::Result<()> {
    let http_client = reqwest::Client::new();
    let mut attempts: u32 = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("shutdown signal received");
                return Ok(());
            }
            result = run_session(&tunnel.ws_url, local_port, &http_client) => {
                match result {
                    Ok(()) => {
                        info!("control channel closed cleanly, reconnecting");
                        attempts = 0;
                    }
                    Err(err) => {
                        warn!(error = %err, "control channel dropped");
                        attempts += 1;
                    }
                }

                if attempts > MAX_RECONNECT_ATTEMPTS {
                    anyhow::bail!(
                        "exhausted {} reconnect attempts against {}",
                        MAX_RECONNECT_ATTEMPTS,
                        tunnel.ws_url
                    );
                }

                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("shutdown signal received during reconnect backoff");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(RECONNECT_INTERVAL) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_session_against_unreachable_relay_errors() {
        let client = reqwest::Client::new();
        let result = run_session("ws://127.0.0.1:1", 3000, &client).await;
        assert!(result.is_err());
    }
}
