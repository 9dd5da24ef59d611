use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::sleep;

/// Unique identifier for a connection
pub type ConnectionId = u64;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Information about an active client connection
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub established_at: Instant,
    active_requests: AtomicU64,
}

impl ConnectionInfo {
    fn new(id: ConnectionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            established_at: Instant::now(),
            active_requests: AtomicU64::new(0),
        }
    }

    pub fn active_request_count(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.active_request_count() == 0
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

/// Tracks open client connections so shutdown can wait for in-flight
/// requests (including running relays) to finish.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    connections: Arc<DashMap<ConnectionId, Arc<ConnectionInfo>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_connection(&self, remote_addr: SocketAddr) -> Arc<ConnectionInfo> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let info = Arc::new(ConnectionInfo::new(id, remote_addr));
        self.connections.insert(id, info.clone());

        tracing::debug!(
            connection_id = id,
            %remote_addr,
            total_connections = self.connections.len(),
            "Connection registered"
        );
        info
    }

    fn unregister_connection(&self, connection_id: ConnectionId) {
        if let Some((_, info)) = self.connections.remove(&connection_id) {
            tracing::debug!(
                connection_id = info.id,
                remote_addr = %info.remote_addr,
                duration = ?info.age(),
                total_connections = self.connections.len(),
                "Connection unregistered"
            );
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn total_active_requests(&self) -> u64 {
        self.connections
            .iter()
            .map(|entry| entry.value().active_request_count())
            .sum()
    }

    pub fn busy_connections(&self) -> Vec<Arc<ConnectionInfo>> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_idle())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Wait until no request is in flight, or `timeout` elapses.
    /// Returns whether the drain completed.
    pub async fn drain_connections(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut last_log = start;

        tracing::info!(
            active_connections = self.active_connection_count(),
            active_requests = self.total_active_requests(),
            ?timeout,
            "Starting connection drain"
        );

        while start.elapsed() < timeout {
            let active_requests = self.total_active_requests();
            if active_requests == 0 {
                tracing::info!(
                    elapsed = ?start.elapsed(),
                    idle_connections = self.active_connection_count(),
                    "All requests drained"
                );
                return true;
            }

            if last_log.elapsed() >= DRAIN_LOG_INTERVAL {
                last_log = Instant::now();
                let busy = self.busy_connections();
                tracing::info!(
                    active_requests,
                    busy_connections = busy.len(),
                    elapsed = ?start.elapsed(),
                    "Connection drain in progress"
                );
                for conn in busy.iter().take(5) {
                    tracing::debug!(
                        connection_id = conn.id,
                        remote_addr = %conn.remote_addr,
                        age = ?conn.age(),
                        "Busy connection"
                    );
                }
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }

        let remaining = self.total_active_requests();
        if remaining > 0 {
            tracing::warn!(
                remaining_requests = remaining,
                remaining_connections = self.active_connection_count(),
                ?timeout,
                "Connection drain timeout exceeded"
            );
            false
        } else {
            true
        }
    }
}

/// RAII guard for tracking connection lifecycle
pub struct ConnectionGuard {
    connection_info: Arc<ConnectionInfo>,
    tracker: ConnectionTracker,
}

impl ConnectionGuard {
    pub fn new(tracker: ConnectionTracker, remote_addr: SocketAddr) -> Self {
        let connection_info = tracker.register_connection(remote_addr);
        Self {
            connection_info,
            tracker,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_info.id
    }

    /// Mark one request as in flight until the returned guard drops.
    pub fn request_guard(&self) -> RequestGuard {
        RequestGuard::new(self.connection_info.clone())
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.unregister_connection(self.connection_info.id);
    }
}

/// RAII guard for tracking individual request lifecycle within a connection
pub struct RequestGuard {
    connection_info: Arc<ConnectionInfo>,
}

impl RequestGuard {
    fn new(connection_info: Arc<ConnectionInfo>) -> Self {
        connection_info.active_requests.fetch_add(1, Ordering::Relaxed);
        Self { connection_info }
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.connection_info
            .active_requests
            .fetch_sub(1, Ordering::Relaxed);
    }
}
