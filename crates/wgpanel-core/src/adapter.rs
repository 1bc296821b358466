//! Daemon Adapter
//!
//! Activity and health reports from the tunnel daemon arrive on their own
//! schedule. They are queued on a bounded channel and applied by a single
//! adapter task, so a burst of reports never holds up peer or service
//! commands, and a stalled core never blocks the daemon.

use crate::controller::{ServiceController, TunnelHealth};
use crate::registry::PeerRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Report emitted by the tunnel daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DaemonEvent {
    /// Traffic observed for a peer since the previous report
    #[serde(rename_all = "camelCase")]
    Activity { peer_id: String, bytes: u64 },
    /// Link status of the tunnel
    Health { health: TunnelHealth },
}

/// Sending half handed to whatever talks to the daemon
#[derive(Debug, Clone)]
pub struct DaemonReporter {
    tx: mpsc::Sender<DaemonEvent>,
}

impl DaemonReporter {
    /// Queue an event without waiting
    ///
    /// Returns `false` when the event was dropped because the queue is
    /// full or the adapter has stopped.
    pub fn report(&self, event: DaemonEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Daemon event queue full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Daemon adapter stopped, dropping event");
                false
            }
        }
    }

    pub fn activity(&self, peer_id: impl Into<String>, bytes: u64) -> bool {
        self.report(DaemonEvent::Activity {
            peer_id: peer_id.into(),
            bytes,
        })
    }

    pub fn health(&self, health: TunnelHealth) -> bool {
        self.report(DaemonEvent::Health { health })
    }
}

/// Spawn the adapter task
///
/// The task exits once every [`DaemonReporter`] clone has been dropped and
/// the queue is drained.
pub fn spawn_adapter(
    registry: Arc<PeerRegistry>,
    controller: Arc<ServiceController>,
    buffer: usize,
) -> (DaemonReporter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DaemonEvent>(buffer.max(1));

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                DaemonEvent::Activity { peer_id, bytes } => {
                    registry.record_activity(&peer_id, bytes).await;
                }
                DaemonEvent::Health { health } => {
                    controller.report_health(health).await;
                }
            }
        }
        info!("Daemon adapter stopped");
    });

    (DaemonReporter { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ServiceState;
    use crate::daemon::NoopDaemon;
    use crate::peer::NewPeer;
    use std::time::Duration;

    fn controller() -> Arc<ServiceController> {
        Arc::new(ServiceController::new(Arc::new(NoopDaemon), Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_events_are_applied() {
        let registry = Arc::new(PeerRegistry::default());
        let ctl = controller();
        registry
            .add(NewPeer::new("laptop", "", "10.0.0.2/32").with_generated_key())
            .await
            .unwrap();
        ctl.start().await.unwrap();

        let (reporter, handle) = spawn_adapter(registry.clone(), ctl.clone(), 16);
        assert!(reporter.activity("laptop", 512));
        assert!(reporter.activity("laptop", 512));
        assert!(reporter.activity("ghost", 9_999));
        assert!(reporter.health(TunnelHealth::Connected));

        drop(reporter);
        handle.await.unwrap();

        let peer = registry.get("laptop").await.unwrap();
        assert_eq!(peer.data_usage, 1_024);
        assert!(peer.last_seen.is_some());
        assert_eq!(registry.len().await, 1);

        assert_eq!(ctl.state().await, ServiceState::Running);
        assert_eq!(ctl.health().await, TunnelHealth::Connected);
    }

    #[tokio::test]
    async fn test_report_never_blocks_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let reporter = DaemonReporter { tx };

        assert!(reporter.health(TunnelHealth::Connected));
        assert!(!reporter.health(TunnelHealth::Disconnected));
    }

    #[tokio::test]
    async fn test_report_after_adapter_stops() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let reporter = DaemonReporter { tx };

        assert!(!reporter.activity("laptop", 1));
    }

    #[test]
    fn test_event_json_shape() {
        let event: DaemonEvent =
            serde_json::from_str(r#"{"type":"activity","peerId":"laptop","bytes":42}"#).unwrap();
        assert_eq!(
            event,
            DaemonEvent::Activity {
                peer_id: "laptop".into(),
                bytes: 42
            }
        );

        let event: DaemonEvent =
            serde_json::from_str(r#"{"type":"health","health":"connected"}"#).unwrap();
        assert_eq!(
            event,
            DaemonEvent::Health {
                health: TunnelHealth::Connected
            }
        );
    }
}
