//! Connection accounting for the detecting listeners.
//!
//! Every accepted socket is registered as *connecting* while its protocol is
//! being detected and moves to *connected* once it is spliced to a backend.
//! Lifetime counters (received / failed / successful) only ever grow.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use scc::HashMap;
use serde::Serialize;
use tokio::time::sleep;

use crate::{config::ProtocolKind, metrics};

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Information about a tracked connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub established_at: Instant,
    /// Set once the connection is proxying
    pub protocol: Option<ProtocolKind>,
}

impl ConnectionInfo {
    pub fn new(id: ConnectionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            established_at: Instant::now(),
            protocol: None,
        }
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }
}

/// Snapshot of the gateway connection counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub received: u64,
    /// Rejected or timed out before proxying
    pub failed: u64,
    /// Reached proxying
    pub successful: u64,
    pub connecting: usize,
    pub connected: usize,
}

/// Tracks connections through detection and proxying
pub struct ConnectionTracker {
    connecting: HashMap<ConnectionId, Arc<ConnectionInfo>>,
    connected: HashMap<ConnectionId, Arc<ConnectionInfo>>,
    next_id: AtomicU64,
    received: AtomicU64,
    failed: AtomicU64,
    successful: AtomicU64,
}

impl ConnectionTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self {
            connecting: HashMap::new(),
            connected: HashMap::new(),
            next_id: AtomicU64::new(1),
            received: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            successful: AtomicU64::new(0),
        }
    }

    /// Register a freshly accepted connection as connecting.
    pub async fn accept(&self, remote_addr: SocketAddr) -> Arc<ConnectionInfo> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(ConnectionInfo::new(id, remote_addr));

        self.received.fetch_add(1, Ordering::Relaxed);
        let _ = self.connecting.insert_async(id, info.clone()).await;

        metrics::increment_connections_received();
        metrics::set_connecting(self.connecting.len());
        tracing::debug!(
            connection = id,
            %remote_addr,
            connecting = self.connecting.len(),
            "Connection accepted"
        );

        info
    }

    /// Move a connection from connecting to connected.
    pub async fn mark_proxying(&self, id: ConnectionId, protocol: ProtocolKind) {
        let Some((_, info)) = self.connecting.remove_async(&id).await else {
            return;
        };
        let info = Arc::new(ConnectionInfo {
            protocol: Some(protocol),
            ..(*info).clone()
        });

        self.successful.fetch_add(1, Ordering::Relaxed);
        let _ = self.connected.insert_async(id, info).await;

        metrics::increment_connections_successful(protocol.as_str());
        metrics::set_connecting(self.connecting.len());
        metrics::set_connected(self.connected.len());
    }

    /// Count a connection that ended before proxying.
    ///
    /// Only the first call for a given connection is counted.
    pub async fn mark_failed(&self, id: ConnectionId, reason: &'static str) {
        if self.connecting.remove_async(&id).await.is_none() {
            return;
        }
        self.failed.fetch_add(1, Ordering::Relaxed);

        metrics::increment_connections_failed(reason);
        metrics::set_connecting(self.connecting.len());
        tracing::debug!(connection = id, reason, "Connection failed");
    }

    /// Forget a connection, whatever its state.
    pub async fn close(&self, id: ConnectionId) {
        if let Some((_, info)) = self.connected.remove_async(&id).await {
            metrics::set_connected(self.connected.len());
            tracing::debug!(connection = id, age = ?info.age(), "Connection closed");
        } else if self.connecting.remove_async(&id).await.is_some() {
            metrics::set_connecting(self.connecting.len());
        }
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            received: self.received.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            connecting: self.connecting.len(),
            connected: self.connected.len(),
        }
    }

    /// Ids of connections still in detection, ascending
    pub async fn connecting_ids(&self) -> Vec<ConnectionId> {
        ids(&self.connecting).await
    }

    /// Ids of connections currently proxying, ascending
    pub async fn connected_ids(&self) -> Vec<ConnectionId> {
        ids(&self.connected).await
    }

    /// Wait until no connection is proxying or the timeout elapses.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut check_interval = Duration::from_millis(50);

        while start.elapsed() < timeout {
            if self.connected.is_empty() {
                tracing::info!("All proxied connections drained");
                return true;
            }
            tracing::debug!(
                "Waiting for connections to drain: {} still proxying, elapsed: {:?}",
                self.connected.len(),
                start.elapsed()
            );
            sleep(check_interval).await;
            check_interval = std::cmp::min(check_interval * 2, Duration::from_secs(1));
        }

        tracing::warn!(
            "Drain timeout exceeded: {} connections still proxying after {:?}",
            self.connected.len(),
            timeout
        );
        false
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

async fn ids(map: &HashMap<ConnectionId, Arc<ConnectionInfo>>) -> Vec<ConnectionId> {
    let mut ids = Vec::new();
    map.retain_async(|id, _| {
        ids.push(*id);
        true
    })
    .await;
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_successful_connection_lifecycle() {
        let tracker = ConnectionTracker::new();
        let conn = tracker.accept(addr()).await;
        assert_eq!(tracker.connecting_ids().await, vec![conn.id]);

        tracker.mark_proxying(conn.id, ProtocolKind::Stomp).await;
        assert!(tracker.connecting_ids().await.is_empty());
        assert_eq!(tracker.connected_ids().await, vec![conn.id]);

        tracker.close(conn.id).await;
        assert_eq!(
            tracker.stats(),
            GatewayStats {
                received: 1,
                failed: 0,
                successful: 1,
                connecting: 0,
                connected: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_failure_counted_once() {
        let tracker = ConnectionTracker::new();
        let conn = tracker.accept(addr()).await;

        tracker.mark_failed(conn.id, "rejected").await;
        tracker.mark_failed(conn.id, "timed_out").await;
        tracker.close(conn.id).await;

        let stats = tracker.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.successful, 0);
        assert_eq!(stats.connecting, 0);
    }

    #[tokio::test]
    async fn test_counters_add_up() {
        let tracker = ConnectionTracker::new();
        let a = tracker.accept(addr()).await;
        let b = tracker.accept(addr()).await;
        let c = tracker.accept(addr()).await;
        assert!(a.id < b.id && b.id < c.id);

        tracker.mark_failed(a.id, "rejected").await;
        tracker.mark_proxying(b.id, ProtocolKind::Http).await;

        let stats = tracker.stats();
        assert_eq!(
            stats.received,
            stats.failed + stats.successful + stats.connecting as u64
        );
        assert_eq!(tracker.connecting_ids().await, vec![c.id]);
    }

    #[tokio::test]
    async fn test_drain() {
        let tracker = ConnectionTracker::new();
        let conn = tracker.accept(addr()).await;
        tracker.mark_proxying(conn.id, ProtocolKind::Mqtt).await;

        assert!(!tracker.wait_for_drain(Duration::from_millis(60)).await);
        tracker.close(conn.id).await;
        assert!(tracker.wait_for_drain(Duration::from_millis(60)).await);
    }
}
