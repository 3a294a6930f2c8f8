//! # Request Correlator
//!
//! Mints request ids, parks the public caller behind a one-shot channel,
//! and matches the agent's eventual reply back to it. Grounded on the
//! `PendingRequests` tracker pattern used elsewhere in the tunnel-relay
//! corpus: a concurrent map from a request key to a single-use channel,
//! with `register`/`respond`/`cancel` as the only three mutating
//! operations.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use tunnel_protocol::{ErrorKind, HttpRequestFrame, HttpResponseFrame};

use crate::hub::ControlChannelHub;

/// No pending request outlives this deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingKey = (String, String);
type PendingSender = oneshot::Sender<Result<HttpResponseFrame, ErrorKind>>;

/// Tracks HTTP requests in flight on the control channel and routes
/// `http_response` frames back to whichever caller is still waiting.
#[derive(Clone)]
pub struct RequestCorrelator {
    pending: Arc<DashMap<PendingKey, PendingSender>>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Mints a request id, sends the framed request over the tunnel's
    /// control channel via `hub`, and suspends until a reply arrives, the
    /// deadline elapses, or the tunnel/channel goes away.
    pub async fn dispatch(
        &self,
        hub: &ControlChannelHub,
        tunnel_id: &str,
        mut request: HttpRequestFrame,
    ) -> Result<HttpResponseFrame, ErrorKind> {
        let request_id = uuid::Uuid::new_v4().to_string();
        request.id = request_id.clone();

        let (tx, rx) = oneshot::channel();
        let key = (tunnel_id.to_string(), request_id.clone());
        self.pending.insert(key.clone(), tx);

        if let Err(err) = hub.send_http_request(tunnel_id, request) {
            self.pending.remove(&key);
            return Err(err);
        }

        debug!(tunnel_id, request_id, "dispatched http_request frame");

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender was dropped without resolving (e.g. a bug upstream);
            // treat the same as a dropped channel rather than panicking.
            Ok(Err(_)) => Err(ErrorKind::ChannelDropped),
            Err(_elapsed) => {
                self.pending.remove(&key);
                Err(ErrorKind::Timeout)
            }
        }
    }

    /// Resolves the pending request matching `(tunnel_id, response)`'s id,
    /// if still present. Unknown or duplicate replies are dropped
    /// silently — each pending request resolves at most once.
    pub fn on_response(&self, tunnel_id: &str, response: HttpResponseFrame) {
        let key = (tunnel_id.to_string(), response.request_id.clone());
        match self.pending.remove(&key) {
            Some((_, tx)) => {
                let _ = tx.send(Ok(response));
            }
            None => {
                warn!(
                    tunnel_id,
                    request_id = %response.request_id,
                    "http_response for unknown or already-resolved request"
                );
            }
        }
    }

    /// Resolves every pending request for `tunnel_id` with `reason`.
    /// Called when the tunnel's channel drops or the tunnel is deleted.
    pub fn cancel_tunnel(&self, tunnel_id: &str, reason: ErrorKind) {
        let keys: Vec<PendingKey> = self
            .pending
            .iter()
            .filter(|entry| entry.key().0 == tunnel_id)
            .map(|entry| entry.key().clone())
            .collect();

        for key in keys {
            if let Some((_, tx)) = self.pending.remove(&key) {
                let _ = tx.send(Err(reason));
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Test-only seam: lets other modules' tests observe `cancel_tunnel`
    /// behavior without needing a real attached channel.
    #[cfg(test)]
    pub(crate) fn pending_insert_for_test(&self, key: PendingKey, tx: PendingSender) {
        self.pending.insert(key, tx);
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ControlChannelHub;

    fn sample_request() -> HttpRequestFrame {
        HttpRequestFrame {
            id: String::new(),
            method: "GET".to_string(),
            path: "/hello".to_string(),
            query: Default::default(),
            headers: Default::default(),
            body: None,
        }
    }

    #[tokio::test]
    async fn dispatch_without_attached_channel_fails_send() {
        let hub = ControlChannelHub::new();
        let correlator = RequestCorrelator::new();
        let result = correlator.dispatch(&hub, "nope", sample_request()).await;
        assert_eq!(result.unwrap_err(), ErrorKind::SendFailed);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_resolves_timeout_after_the_deadline() {
        let hub = ControlChannelHub::new();
        let _rx = hub.insert_test_channel("t1");
        let correlator = RequestCorrelator::new();

        let dispatched = {
            let hub = hub.clone();
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.dispatch(&hub, "t1", sample_request()).await })
        };

        // Let `dispatch` register its pending request and park on the
        // deadline before the clock moves.
        tokio::task::yield_now().await;
        assert_eq!(correlator.pending_count(), 1);

        tokio::time::advance(REQUEST_TIMEOUT + Duration::from_millis(1)).await;

        let result = dispatched.await.unwrap();
        assert_eq!(result.unwrap_err(), ErrorKind::Timeout);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_tunnel_resolves_all_pending_with_reason() {
        let correlator = RequestCorrelator::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        correlator
            .pending
            .insert(("t1".to_string(), "r1".to_string()), tx1);
        correlator
            .pending
            .insert(("t1".to_string(), "r2".to_string()), tx2);
        correlator
            .pending
            .insert(("t2".to_string(), "r3".to_string()), oneshot::channel().0);

        correlator.cancel_tunnel("t1", ErrorKind::ChannelDropped);

        assert_eq!(rx1.await.unwrap().unwrap_err(), ErrorKind::ChannelDropped);
        assert_eq!(rx2.await.unwrap().unwrap_err(), ErrorKind::ChannelDropped);
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn on_response_for_unknown_request_is_dropped_silently() {
        let correlator = RequestCorrelator::new();
        let response = HttpResponseFrame {
            request_id: "ghost".to_string(),
            status: 200,
            headers: Default::default(),
            body: String::new(),
        };
        // Should not panic.
        correlator.on_response("t1", response);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_response_only_resolves_once() {
        let correlator = RequestCorrelator::new();
        let (tx, rx) = oneshot::channel();
        correlator
            .pending
            .insert(("t1".to_string(), "r1".to_string()), tx);

        let response = HttpResponseFrame {
            request_id: "r1".to_string(),
            status: 200,
            headers: Default::default(),
            body: "first".to_string(),
        };
        correlator.on_response("t1", response.clone());
        assert_eq!(rx.await.unwrap().unwrap(), response);

        // A second reply with the same id has nothing left to resolve.
        let late = HttpResponseFrame {
            request_id: "r1".to_string(),
            status: 500,
            headers: Default::default(),
            body: "late".to_string(),
        };
        correlator.on_response("t1", late);
        assert_eq!(correlator.pending_count(), 0);
    }
}
