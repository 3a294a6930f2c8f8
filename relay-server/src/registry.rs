//! # Tunnel Registry
//!
//! Owns the set of live tunnels and their metadata. Readers snapshot via
//! [`TunnelRegistry::list`]; all mutations go through `DashMap`'s
//! per-shard locking rather than one coarse mutex around a `HashMap`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tunnel_protocol::ErrorKind;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ID_LEN: usize = 8;
const MAX_GENERATE_ATTEMPTS: usize = 16;

/// Idle tunnels (no attached agent) older than this are swept.
pub const IDLE_THRESHOLD_SECS: u64 = 24 * 60 * 60;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Draws a short, URL-safe, unique-enough tunnel id from a CSPRNG.
fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// A live tunnel record. Cloned out of the registry for snapshots; the
/// counters are atomics so a snapshot clone still observes live updates
/// made through the registry's own `Arc`-shared instance... in practice
/// callers always go back through [`TunnelRegistry`] to mutate, and use
/// [`Tunnel::snapshot`] to get a plain serializable view.
#[derive(Debug)]
pub struct Tunnel {
    pub id: String,
    pub local_port: u16,
    pub created_at: u64,
    last_activity: AtomicU64,
    request_count: AtomicU64,
    connected: AtomicBool,
}

impl Tunnel {
    fn new(id: String, local_port: u16) -> Self {
        let now = now_unix();
        Self {
            id,
            local_port,
            created_at: now,
            last_activity: AtomicU64::new(now),
            request_count: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
        self.touch();
    }

    pub fn touch(&self) {
        self.last_activity.store(now_unix(), Ordering::Release);
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Acquire)
    }

    pub fn increment_request_count(&self) {
        self.request_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> TunnelView {
        TunnelView {
            id: self.id.clone(),
            local_port: self.local_port,
            created_at: self.created_at,
            last_activity: self.last_activity(),
            request_count: self.request_count(),
            connected: self.is_connected(),
        }
    }
}

/// Plain, serializable view of a [`Tunnel`] at a point in time — what the
/// management API and `GET /api/tunnels` return.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelView {
    pub id: String,
    pub local_port: u16,
    pub created_at: u64,
    pub last_activity: u64,
    pub request_count: u64,
    pub connected: bool,
}

/// Owns every live [`Tunnel`], keyed by id.
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    tunnels: Arc<DashMap<String, Arc<Tunnel>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tunnel. `preferred_id` fails with `AlreadyExists` if
    /// already live; otherwise a fresh id is generated, regenerating on
    /// collision up to a small attempt cap.
    pub fn create(
        &self,
        local_port: u16,
        preferred_id: Option<String>,
    ) -> Result<Arc<Tunnel>, ErrorKind> {
        let id = match preferred_id {
            Some(id) => {
                if self.tunnels.contains_key(&id) {
                    return Err(ErrorKind::AlreadyExists);
                }
                id
            }
            None => {
                let mut candidate = generate_id();
                let mut attempts = 1;
                while self.tunnels.contains_key(&candidate) {
                    if attempts >= MAX_GENERATE_ATTEMPTS {
                        return Err(ErrorKind::Internal);
                    }
                    candidate = generate_id();
                    attempts += 1;
                }
                candidate
            }
        };

        let tunnel = Arc::new(Tunnel::new(id.clone(), local_port));
        self.tunnels.insert(id, tunnel.clone());
        Ok(tunnel)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<TunnelView> {
        self.tunnels.iter().map(|entry| entry.snapshot()).collect()
    }

    /// Removes the tunnel record. Callers are responsible for closing any
    /// attached channel and cancelling its pending requests (the Hub and
    /// Correlator, respectively) — the registry only owns metadata.
    pub fn delete(&self, id: &str) -> Result<Arc<Tunnel>, ErrorKind> {
        self.tunnels
            .remove(id)
            .map(|(_, tunnel)| tunnel)
            .ok_or(ErrorKind::NotFound)
    }

    /// Removes every unattached tunnel whose `last_activity` is older
    /// than [`IDLE_THRESHOLD_SECS`]. Returns the removed ids so the caller
    /// can log them.
    pub fn sweep_idle(&self) -> Vec<String> {
        let now = now_unix();
        let stale: Vec<String> = self
            .tunnels
            .iter()
            .filter(|entry| {
                !entry.is_connected() && now.saturating_sub(entry.last_activity()) > IDLE_THRESHOLD_SECS
            })
            .map(|entry| entry.id.clone())
            .collect();

        for id in &stale {
            self.tunnels.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_generates_unique_ids() {
        let registry = TunnelRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let tunnel = registry.create(3000, None).unwrap();
            assert!(seen.insert(tunnel.id.clone()));
        }
    }

    #[test]
    fn create_with_taken_preferred_id_fails() {
        let registry = TunnelRegistry::new();
        registry.create(3000, Some("mine".to_string())).unwrap();
        let result = registry.create(4000, Some("mine".to_string()));
        assert_eq!(result.unwrap_err(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn get_missing_tunnel_is_none() {
        let registry = TunnelRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn delete_removes_and_reports_not_found_on_retry() {
        let registry = TunnelRegistry::new();
        let tunnel = registry.create(3000, Some("t1".to_string())).unwrap();
        assert!(registry.delete(&tunnel.id).is_ok());
        assert_eq!(registry.delete(&tunnel.id).unwrap_err(), ErrorKind::NotFound);
    }

    #[test]
    fn sweep_idle_only_removes_disconnected_stale_tunnels() {
        let registry = TunnelRegistry::new();
        let fresh = registry.create(3000, Some("fresh".to_string())).unwrap();
        let stale = registry.create(3001, Some("stale".to_string())).unwrap();
        let connected = registry.create(3002, Some("connected".to_string())).unwrap();

        fresh.touch();
        stale
            .last_activity
            .store(0, std::sync::atomic::Ordering::Release);
        connected.set_connected(true);
        connected
            .last_activity
            .store(0, std::sync::atomic::Ordering::Release);

        let removed = registry.sweep_idle();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(registry.get("fresh").is_some());
        assert!(registry.get("connected").is_some());
        assert!(registry.get("stale").is_none());
    }

    #[test]
    fn request_count_increments_monotonically() {
        let registry = TunnelRegistry::new();
        let tunnel = registry.create(3000, Some("t1".to_string())).unwrap();
        assert_eq!(tunnel.request_count(), 0);
        tunnel.increment_request_count();
        tunnel.increment_request_count();
        assert_eq!(tunnel.request_count(), 2);
    }
}
