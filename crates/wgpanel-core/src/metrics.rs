//! Status Feed
//!
//! `ServiceStatus` is never stored. Every read combines a controller
//! snapshot, one peer-list snapshot and the latest system sample through
//! [`compute_status`], so the reported totals always match the peers they
//! were computed from.

use crate::controller::{ControllerSnapshot, ServiceController, TunnelHealth};
use crate::peer::{Peer, Timestamp, now_nanos};
use crate::registry::PeerRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default freshness window for counting a peer as active
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Host-level metrics supplied by a probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// Global CPU usage in percent
    pub cpu_load: f32,
    /// Aggregate network throughput in bytes per second
    pub network_speed: u64,
}

/// Source of host metrics
pub trait SystemProbe: Send + Sync {
    fn sample(&self) -> SystemMetrics;
}

/// Fixed metrics, for hosts without a sampler
impl SystemProbe for SystemMetrics {
    fn sample(&self) -> SystemMetrics {
        *self
    }
}

/// Snapshot served to pollers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub is_running: bool,
    /// Peers with activity inside the freshness window
    pub active_peers: u64,
    /// Sum of every peer's data usage
    pub total_data_usage: u64,
    pub cpu_load: f32,
    pub network_speed: u64,
    pub tunnel_health: TunnelHealth,
}

/// Combine independent snapshots into a status
pub fn compute_status(
    controller: ControllerSnapshot,
    peers: &[Peer],
    system: SystemMetrics,
    now: Timestamp,
    window: Duration,
) -> ServiceStatus {
    let window = window.as_nanos().min(u64::MAX as u128) as u64;

    let active_peers = peers.iter().filter(|p| p.is_active(now, window)).count() as u64;
    let total_data_usage = peers
        .iter()
        .fold(0u64, |acc, p| acc.saturating_add(p.data_usage));

    ServiceStatus {
        is_running: controller.state.is_running(),
        active_peers,
        total_data_usage,
        cpu_load: system.cpu_load,
        network_speed: system.network_speed,
        tunnel_health: controller.health,
    }
}

/// Read-only aggregator over the registry and controller
pub struct MetricsFeed {
    registry: Arc<PeerRegistry>,
    controller: Arc<ServiceController>,
    probe: Arc<dyn SystemProbe>,
    window: Duration,
}

impl MetricsFeed {
    pub fn new(
        registry: Arc<PeerRegistry>,
        controller: Arc<ServiceController>,
        probe: Arc<dyn SystemProbe>,
        window: Duration,
    ) -> Self {
        Self {
            registry,
            controller,
            probe,
            window,
        }
    }

    /// Freshness window used for `active_peers`
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Compute the current status
    pub async fn status(&self) -> ServiceStatus {
        let controller = self.controller.snapshot().await;
        let peers = self.registry.list().await;

        compute_status(controller, &peers, self.probe.sample(), now_nanos(), self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ServiceState;
    use crate::daemon::NoopDaemon;
    use crate::keys::PublicKey;
    use crate::peer::NewPeer;

    const SEC: u64 = 1_000_000_000;

    fn peer(id: &str, usage: u64, last_seen: Option<Timestamp>) -> Peer {
        Peer {
            id: id.into(),
            public_key: PublicKey::generate(),
            allowed_ips: "10.0.0.2/32".into(),
            created_at: 0,
            last_seen,
            data_usage: usage,
        }
    }

    fn running() -> ControllerSnapshot {
        ControllerSnapshot {
            state: ServiceState::Running,
            health: TunnelHealth::Connected,
        }
    }

    #[test]
    fn test_active_peers_respect_window() {
        let now = 1_000 * SEC;
        let peers = vec![
            peer("fresh", 0, Some(now - 10 * SEC)),
            peer("edge", 0, Some(now - 60 * SEC)),
            peer("stale", 0, Some(now - 61 * SEC)),
            peer("never", 0, None),
        ];

        let status = compute_status(
            running(),
            &peers,
            SystemMetrics::default(),
            now,
            DEFAULT_ACTIVITY_WINDOW,
        );

        assert_eq!(status.active_peers, 2);
    }

    #[test]
    fn test_total_usage_is_sum() {
        let peers = vec![peer("a", 1_500, None), peer("b", 2_500, None), peer("c", 0, None)];

        let status = compute_status(
            running(),
            &peers,
            SystemMetrics::default(),
            0,
            DEFAULT_ACTIVITY_WINDOW,
        );

        let sum: u64 = peers.iter().map(|p| p.data_usage).sum();
        assert_eq!(status.total_data_usage, sum);
    }

    #[test]
    fn test_status_carries_controller_and_system() {
        let system = SystemMetrics {
            cpu_load: 12.5,
            network_speed: 4_096,
        };
        let stopped = ControllerSnapshot {
            state: ServiceState::Stopped,
            health: TunnelHealth::Disconnected,
        };

        let status = compute_status(stopped, &[], system, 0, DEFAULT_ACTIVITY_WINDOW);

        assert!(!status.is_running);
        assert_eq!(status.tunnel_health, TunnelHealth::Disconnected);
        assert_eq!(status.cpu_load, 12.5);
        assert_eq!(status.network_speed, 4_096);
        assert_eq!(status.active_peers, 0);
    }

    #[test]
    fn test_status_json_field_names() {
        let status = compute_status(
            running(),
            &[],
            SystemMetrics::default(),
            0,
            DEFAULT_ACTIVITY_WINDOW,
        );
        let json = serde_json::to_value(status).unwrap();

        assert_eq!(json["isRunning"], true);
        assert_eq!(json["tunnelHealth"], "connected");
        assert!(json.get("totalDataUsage").is_some());
        assert!(json.get("activePeers").is_some());
    }

    #[tokio::test]
    async fn test_feed_tracks_sources() {
        let registry = Arc::new(PeerRegistry::default());
        let controller = Arc::new(ServiceController::new(
            Arc::new(NoopDaemon),
            Duration::from_secs(1),
        ));
        let feed = MetricsFeed::new(
            registry.clone(),
            controller.clone(),
            Arc::new(SystemMetrics::default()),
            DEFAULT_ACTIVITY_WINDOW,
        );

        let status = feed.status().await;
        assert!(!status.is_running);
        assert_eq!(status.total_data_usage, 0);

        registry
            .add(NewPeer::new("laptop", "", "10.0.0.2/32").with_generated_key())
            .await
            .unwrap();
        registry
            .add(NewPeer::new("phone", "", "10.0.0.3/32").with_generated_key())
            .await
            .unwrap();
        registry.record_activity("laptop", 2_048).await;
        controller.start().await.unwrap();

        let status = feed.status().await;
        assert!(status.is_running);
        assert_eq!(status.active_peers, 1);
        assert_eq!(status.total_data_usage, 2_048);
    }
}
