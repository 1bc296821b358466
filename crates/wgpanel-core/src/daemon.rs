//! Tunnel Daemon Launcher
//!
//! The controller never touches the tunnel directly; it asks a
//! [`TunnelDaemon`] to bring the interface up or down. The default
//! implementation shells out to `wg-quick`.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

/// Something that can bring the tunnel interface up and down
#[async_trait]
pub trait TunnelDaemon: Send + Sync {
    /// Bring the tunnel up. Returns once the daemon has started.
    async fn launch(&self) -> Result<(), DaemonError>;

    /// Take the tunnel down
    async fn shutdown(&self) -> Result<(), DaemonError>;
}

/// Runs external commands to control the tunnel
///
/// ```rust,ignore
/// let daemon = CommandDaemon::wg_quick("wg0");
/// daemon.launch().await?; // wg-quick up wg0
/// ```
#[derive(Debug, Clone)]
pub struct CommandDaemon {
    up: Vec<String>,
    down: Vec<String>,
}

impl CommandDaemon {
    /// Create from explicit argv vectors
    pub fn new(up: Vec<String>, down: Vec<String>) -> Self {
        Self { up, down }
    }

    /// Standard `wg-quick up|down <interface>` pair
    pub fn wg_quick(interface: &str) -> Self {
        Self::new(
            vec!["wg-quick".into(), "up".into(), interface.into()],
            vec!["wg-quick".into(), "down".into(), interface.into()],
        )
    }

    async fn run(argv: &[String]) -> Result<(), DaemonError> {
        let (program, args) = argv.split_first().ok_or(DaemonError::EmptyCommand)?;
        let command_line = argv.join(" ");
        debug!("Running {}", command_line);

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DaemonError::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(DaemonError::Exited {
                command: command_line,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl TunnelDaemon for CommandDaemon {
    async fn launch(&self) -> Result<(), DaemonError> {
        Self::run(&self.up).await
    }

    async fn shutdown(&self) -> Result<(), DaemonError> {
        Self::run(&self.down).await
    }
}

/// Daemon that does nothing (dry-run mode)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDaemon;

#[async_trait]
impl TunnelDaemon for NoopDaemon {
    async fn launch(&self) -> Result<(), DaemonError> {
        info!("Dry run: tunnel launch skipped");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DaemonError> {
        info!("Dry run: tunnel shutdown skipped");
        Ok(())
    }
}

/// Daemon control errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DaemonError {
    #[error("Daemon command is empty")]
    EmptyCommand,

    #[error("Failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Exited {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Daemon did not respond within {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wg_quick_commands() {
        let daemon = CommandDaemon::wg_quick("wg0");
        assert_eq!(daemon.up, ["wg-quick", "up", "wg0"]);
        assert_eq!(daemon.down, ["wg-quick", "down", "wg0"]);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let daemon = CommandDaemon::new(Vec::new(), Vec::new());
        assert_eq!(daemon.launch().await, Err(DaemonError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let daemon = CommandDaemon::new(
            vec!["/nonexistent/wgpanel-test-binary".into()],
            Vec::new(),
        );
        assert!(matches!(daemon.launch().await, Err(DaemonError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_checked() {
        let ok = CommandDaemon::new(vec!["true".into()], vec!["false".into()]);
        assert!(ok.launch().await.is_ok());
        assert!(matches!(ok.shutdown().await, Err(DaemonError::Exited { .. })));
    }

    #[tokio::test]
    async fn test_noop_daemon() {
        assert!(NoopDaemon.launch().await.is_ok());
        assert!(NoopDaemon.shutdown().await.is_ok());
    }
}
