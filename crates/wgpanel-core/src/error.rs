//! Panel-wide error type

use crate::config::ConfigError;
use crate::controller::ControllerError;
use crate::credentials::VaultError;
use crate::registry::RegistryError;
use serde::Serialize;

/// Error categories surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    DuplicateId,
    NotFound,
    InvalidId,
    InvalidPublicKey,
    InvalidAllowedIps,
    DuplicatePublicKey,
    DuplicateAddress,
    ServiceStartFailed,
    UpstreamUnavailable,
    NoCredentials,
    Interrupted,
    Config,
}

impl ErrorKind {
    /// Caller mistake that left state unchanged?
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidId
                | ErrorKind::InvalidPublicKey
                | ErrorKind::InvalidAllowedIps
                | ErrorKind::DuplicatePublicKey
                | ErrorKind::DuplicateAddress
        )
    }
}

/// Any error a panel command can return
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PanelError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PanelError::Registry(e) => match e {
                RegistryError::InvalidId => ErrorKind::InvalidId,
                RegistryError::DuplicateId(_) => ErrorKind::DuplicateId,
                RegistryError::NotFound(_) => ErrorKind::NotFound,
                RegistryError::InvalidPublicKey(_) => ErrorKind::InvalidPublicKey,
                RegistryError::InvalidAllowedIps(_) => ErrorKind::InvalidAllowedIps,
                RegistryError::DuplicatePublicKey(_) => ErrorKind::DuplicatePublicKey,
                RegistryError::DuplicateAddress(_) => ErrorKind::DuplicateAddress,
            },
            PanelError::Controller(ControllerError::StartFailed(_)) => {
                ErrorKind::ServiceStartFailed
            }
            PanelError::Controller(ControllerError::Interrupted) => ErrorKind::Interrupted,
            PanelError::Vault(VaultError::NoCredentials) => ErrorKind::NoCredentials,
            PanelError::Vault(VaultError::UpstreamUnavailable(_)) => ErrorKind::UpstreamUnavailable,
            PanelError::Config(_) => ErrorKind::Config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonError;
    use crate::keys::KeyError;
    use crate::relay::RelayError;

    #[test]
    fn test_kinds() {
        let cases = [
            (PanelError::from(RegistryError::DuplicateId("a".into())), ErrorKind::DuplicateId),
            (PanelError::from(RegistryError::NotFound("a".into())), ErrorKind::NotFound),
            (
                PanelError::from(RegistryError::InvalidPublicKey(KeyError::Empty)),
                ErrorKind::InvalidPublicKey,
            ),
            (
                PanelError::from(ControllerError::StartFailed(DaemonError::Timeout(15))),
                ErrorKind::ServiceStartFailed,
            ),
            (PanelError::from(ControllerError::Interrupted), ErrorKind::Interrupted),
            (PanelError::from(VaultError::NoCredentials), ErrorKind::NoCredentials),
            (
                PanelError::from(VaultError::UpstreamUnavailable(RelayError::Timeout)),
                ErrorKind::UpstreamUnavailable,
            ),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{}", error);
        }
    }

    #[test]
    fn test_validation_kinds() {
        assert!(ErrorKind::DuplicateAddress.is_validation());
        assert!(!ErrorKind::DuplicateId.is_validation());
        assert!(!ErrorKind::NoCredentials.is_validation());
    }

    #[test]
    fn test_message_passes_through() {
        let error = PanelError::from(RegistryError::NotFound("laptop".into()));
        assert_eq!(error.to_string(), "Peer not found: laptop");
    }
}
