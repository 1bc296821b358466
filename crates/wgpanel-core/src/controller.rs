//! Service Controller
//!
//! Drives the tunnel daemon through its run states:
//!
//! ```text
//!            start()                     stop()
//!   Stopped ────────▶ Starting ──▶ Running ───────▶ Stopping ──▶ Stopped
//!      ▲                 │          │   ▲
//!      │   launch failed │ restart()│   │
//!      └─────────────────┘          ▼   │
//!                               Restarting
//! ```
//!
//! Commands are serialized by a single command lock. A command that does
//! not apply to the current state (`stop()` while stopped, a second
//! `start()`) returns the current state instead of an error, so retried
//! or duplicated requests converge on the same outcome.

use crate::daemon::{DaemonError, TunnelDaemon};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Controller run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
}

impl ServiceState {
    /// Is the tunnel considered up?
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

/// Coarse link status of the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelHealth {
    Disconnected,
    Connecting,
    Connected,
    Restarting,
}

impl TunnelHealth {
    /// Derive the health shown to callers from the run state and the
    /// daemon's last report
    pub fn derive(state: ServiceState, reported: TunnelHealth) -> Self {
        match state {
            ServiceState::Running => reported,
            ServiceState::Restarting => TunnelHealth::Restarting,
            ServiceState::Starting => TunnelHealth::Connecting,
            ServiceState::Stopped | ServiceState::Stopping => TunnelHealth::Disconnected,
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: ServiceState,
    pub health: TunnelHealth,
}

/// Controller errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("Service failed to start: {0}")]
    StartFailed(#[source] DaemonError),

    #[error("Service command interrupted")]
    Interrupted,
}

/// Controller state shared with command tasks
struct ControllerCore {
    daemon: Arc<dyn TunnelDaemon>,
    /// Current run state
    state: RwLock<ServiceState>,
    /// Last health reported by the daemon
    reported: RwLock<TunnelHealth>,
    /// Serializes start/stop/restart
    commands: Mutex<()>,
    /// Upper bound on a single daemon launch or shutdown
    daemon_timeout: Duration,
    transitions: broadcast::Sender<ServiceState>,
}

impl ControllerCore {
    fn new(daemon: Arc<dyn TunnelDaemon>, daemon_timeout: Duration) -> Self {
        let (transitions, _) = broadcast::channel(64);

        Self {
            daemon,
            state: RwLock::new(ServiceState::Stopped),
            reported: RwLock::new(TunnelHealth::Disconnected),
            commands: Mutex::new(()),
            daemon_timeout,
            transitions,
        }
    }

    /// Get current state
    async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Get the derived tunnel health
    async fn health(&self) -> TunnelHealth {
        self.snapshot().await.health
    }

    /// Read state and health together
    async fn snapshot(&self) -> ControllerSnapshot {
        let state = *self.state.read().await;
        let reported = *self.reported.read().await;

        ControllerSnapshot {
            state,
            health: TunnelHealth::derive(state, reported),
        }
    }

    /// Subscribe to state transitions
    fn subscribe(&self) -> broadcast::Receiver<ServiceState> {
        self.transitions.subscribe()
    }

    /// Overwrite the last-known health with a daemon report
    async fn report_health(&self, health: TunnelHealth) {
        let mut reported = self.reported.write().await;
        if *reported != health {
            debug!("Tunnel health reported: {:?} -> {:?}", *reported, health);
        }
        *reported = health;
    }

    /// Start the service
    ///
    /// No-op when the service is already running.
    async fn start(&self) -> Result<ServiceState, ControllerError> {
        let _guard = self.commands.lock().await;

        let current = self.state().await;
        if current != ServiceState::Stopped {
            debug!("start() ignored in state {:?}", current);
            return Ok(current);
        }

        self.bring_up(ServiceState::Starting).await
    }

    /// Stop the service
    ///
    /// No-op when the service is not running.
    async fn stop(&self) -> Result<ServiceState, ControllerError> {
        let _guard = self.commands.lock().await;

        let current = self.state().await;
        if current != ServiceState::Running {
            debug!("stop() ignored in state {:?}", current);
            return Ok(current);
        }

        info!("Stopping tunnel service");
        self.transition(ServiceState::Stopping).await;
        self.bring_down().await;
        *self.reported.write().await = TunnelHealth::Disconnected;
        self.transition(ServiceState::Stopped).await;

        Ok(ServiceState::Stopped)
    }

    /// Restart the service
    ///
    /// Behaves like `start()` when the service is not running.
    async fn restart(&self) -> Result<ServiceState, ControllerError> {
        let _guard = self.commands.lock().await;

        let current = self.state().await;
        if current != ServiceState::Running {
            info!("restart() while {:?}, starting instead", current);
            return self.bring_up(ServiceState::Starting).await;
        }

        info!("Restarting tunnel service");
        self.transition(ServiceState::Restarting).await;
        self.bring_down().await;
        self.bring_up(ServiceState::Restarting).await
    }

    /// Launch the daemon, passing through `via` on the way to Running.
    /// Must be called with the command lock held.
    async fn bring_up(&self, via: ServiceState) -> Result<ServiceState, ControllerError> {
        if via == ServiceState::Starting {
            *self.reported.write().await = TunnelHealth::Connecting;
        }
        if self.state().await != via {
            self.transition(via).await;
        }

        let result = match timeout(self.daemon_timeout, self.daemon.launch()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Tunnel launch timed out after {}s, tearing down",
                    self.daemon_timeout.as_secs()
                );
                // the daemon may be half up
                self.bring_down().await;
                Err(DaemonError::Timeout(self.daemon_timeout.as_secs()))
            }
        };

        match result {
            Ok(()) => {
                self.transition(ServiceState::Running).await;
                info!("Tunnel service running");
                Ok(ServiceState::Running)
            }
            Err(e) => {
                error!("Tunnel launch failed: {}", e);
                *self.reported.write().await = TunnelHealth::Disconnected;
                self.transition(ServiceState::Stopped).await;
                Err(ControllerError::StartFailed(e))
            }
        }
    }

    /// Take the daemon down. Failures are logged; the controller still
    /// considers the tunnel down afterwards.
    async fn bring_down(&self) {
        match timeout(self.daemon_timeout, self.daemon.shutdown()).await {
            Ok(Ok(())) => debug!("Tunnel daemon shut down"),
            Ok(Err(e)) => warn!("Tunnel shutdown reported an error: {}", e),
            Err(_) => warn!(
                "Tunnel shutdown timed out after {}s",
                self.daemon_timeout.as_secs()
            ),
        }
    }

    async fn transition(&self, next: ServiceState) {
        let mut state = self.state.write().await;
        debug!("Service state {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);

        let _ = self.transitions.send(next);
    }
}

/// Service controller
///
/// Each command runs to completion on its own task. Dropping the future
/// returned by `start()`, `stop()` or `restart()` (a client hanging up, a
/// request timeout) only stops waiting for the outcome; the daemon call
/// and the state transitions still finish.
#[derive(Clone)]
pub struct ServiceController {
    core: Arc<ControllerCore>,
}

impl ServiceController {
    /// Create a stopped controller
    pub fn new(daemon: Arc<dyn TunnelDaemon>, daemon_timeout: Duration) -> Self {
        Self {
            core: Arc::new(ControllerCore::new(daemon, daemon_timeout)),
        }
    }

    /// Get current state
    pub async fn state(&self) -> ServiceState {
        self.core.state().await
    }

    /// Get the derived tunnel health
    pub async fn health(&self) -> TunnelHealth {
        self.core.health().await
    }

    /// Read state and health together
    pub async fn snapshot(&self) -> ControllerSnapshot {
        self.core.snapshot().await
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceState> {
        self.core.subscribe()
    }

    /// Overwrite the last-known health with a daemon report
    pub async fn report_health(&self, health: TunnelHealth) {
        self.core.report_health(health).await
    }

    /// Start the service
    ///
    /// No-op when the service is already running.
    pub async fn start(&self) -> Result<ServiceState, ControllerError> {
        self.run(Command::Start).await
    }

    /// Stop the service
    ///
    /// No-op when the service is not running.
    pub async fn stop(&self) -> Result<ServiceState, ControllerError> {
        self.run(Command::Stop).await
    }

    /// Restart the service
    ///
    /// Behaves like `start()` when the service is not running.
    pub async fn restart(&self) -> Result<ServiceState, ControllerError> {
        self.run(Command::Restart).await
    }

    async fn run(&self, command: Command) -> Result<ServiceState, ControllerError> {
        let core = self.core.clone();
        let task = tokio::spawn(async move {
            match command {
                Command::Start => core.start().await,
                Command::Stop => core.stop().await,
                Command::Restart => core.restart().await,
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {
                warn!("{:?} command cancelled by runtime shutdown", command);
                Err(ControllerError::Interrupted)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
    Restart,
}
