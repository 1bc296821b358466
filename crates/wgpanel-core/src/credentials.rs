//! Credential Vault
//!
//! Holds the single set of upstream provider credentials and uses them to
//! discover egress relays. Credentials are forwarded to the provider as
//! is; they are not secrets this system authenticates against.

use crate::relay::{Relay, RelayError, RelayProvider, TargetRegion, rank_relays};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

/// Upstream VPN provider login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtonVpnCredentials {
    pub username: String,
    pub password: String,
}

impl ProtonVpnCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ProtonVpnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtonVpnCredentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// How relay discovery is performed
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub target: TargetRegion,
    /// Upper bound on one provider call
    pub timeout: Duration,
    /// Maximum relays returned
    pub limit: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            target: TargetRegion::raleigh(),
            timeout: Duration::from_secs(10),
            limit: 10,
        }
    }
}

/// Credential vault
pub struct CredentialVault {
    credentials: RwLock<Option<ProtonVpnCredentials>>,
    provider: Arc<dyn RelayProvider>,
    options: DiscoveryOptions,
}

impl CredentialVault {
    pub fn new(provider: Arc<dyn RelayProvider>, options: DiscoveryOptions) -> Self {
        Self {
            credentials: RwLock::new(None),
            provider,
            options,
        }
    }

    /// Create a vault holding previously persisted credentials
    pub fn with_credentials(
        provider: Arc<dyn RelayProvider>,
        options: DiscoveryOptions,
        credentials: Option<ProtonVpnCredentials>,
    ) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            provider,
            options,
        }
    }

    /// Replace the stored credentials
    pub async fn save(&self, credentials: ProtonVpnCredentials) {
        info!("Saved provider credentials for {}", credentials.username);
        *self.credentials.write().await = Some(credentials);
    }

    /// Get the stored credentials
    pub async fn get(&self) -> Option<ProtonVpnCredentials> {
        self.credentials.read().await.clone()
    }

    /// Forget the stored credentials. Returns whether any were stored.
    pub async fn clear(&self) -> bool {
        self.credentials.write().await.take().is_some()
    }

    /// Discover and rank relays using the stored credentials
    ///
    /// Never modifies the stored credentials, whatever the outcome.
    pub async fn fetch_relays(&self) -> Result<Vec<Relay>, VaultError> {
        // clone so the lock is not held across the network call
        let credentials = self.get().await.ok_or(VaultError::NoCredentials)?;

        let listing = timeout(self.options.timeout, self.provider.list_relays(&credentials));
        let relays = match listing.await {
            Ok(Ok(relays)) => relays,
            Ok(Err(e)) => {
                warn!("Relay discovery failed: {}", e);
                return Err(VaultError::UpstreamUnavailable(e));
            }
            Err(_) => {
                warn!(
                    "Relay discovery timed out after {}s",
                    self.options.timeout.as_secs()
                );
                return Err(VaultError::UpstreamUnavailable(RelayError::Timeout));
            }
        };

        let total = relays.len();
        let ranked = rank_relays(relays, &self.options.target, self.options.limit);
        info!(
            "Selected {} of {} relays near {}",
            ranked.len(),
            total,
            self.options.target.name
        );

        Ok(ranked)
    }
}

/// Vault errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("No provider credentials saved")]
    NoCredentials,

    #[error("Relay provider unavailable: {0}")]
    UpstreamUnavailable(#[source] RelayError),
}
