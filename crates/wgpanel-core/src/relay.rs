//! Relay Discovery
//!
//! Fetches the upstream provider's relay list and picks the best egress
//! candidates: WireGuard-capable relays only, ordered by
//!
//! 1. ascending load
//! 2. descending link capacity
//! 3. ascending distance to the target region

use crate::credentials::ProtonVpnCredentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, error};

/// Mean Earth radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

/// An upstream egress relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relay {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
    /// Current load in percent
    pub load: u8,
    /// Link capacity in Gbps
    #[serde(default)]
    pub capacity_gbps: u32,
    #[serde(default)]
    pub wireguard: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// host:port of the relay
    pub endpoint: String,
    /// Relay's WireGuard public key (base64)
    #[serde(default)]
    pub public_key: Option<String>,
}

impl Relay {
    /// Great-circle distance to a target in kilometres
    pub fn distance_km(&self, target: &TargetRegion) -> f64 {
        haversine_km(self.latitude, self.longitude, target.latitude, target.longitude)
    }
}

/// Location relays are ranked against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRegion {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl TargetRegion {
    /// Raleigh, North Carolina
    pub fn raleigh() -> Self {
        Self {
            name: "Raleigh, NC".to_string(),
            latitude: 35.7796,
            longitude: -78.6382,
        }
    }

    /// Are the coordinates on the globe?
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl Default for TargetRegion {
    fn default() -> Self {
        Self::raleigh()
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Filter and order relays, keeping at most `limit`
pub fn rank_relays(relays: Vec<Relay>, target: &TargetRegion, limit: usize) -> Vec<Relay> {
    let mut candidates: Vec<(f64, Relay)> = relays
        .into_iter()
        .filter(|r| r.wireguard)
        .map(|r| (r.distance_km(target), r))
        .collect();

    candidates.sort_by(|(a_dist, a), (b_dist, b)| {
        a.load
            .cmp(&b.load)
            .then_with(|| b.capacity_gbps.cmp(&a.capacity_gbps))
            .then_with(|| a_dist.partial_cmp(b_dist).unwrap_or(Ordering::Equal))
    });

    candidates
        .into_iter()
        .take(limit)
        .map(|(_, relay)| relay)
        .collect()
}

/// Source of the upstream relay list
#[async_trait]
pub trait RelayProvider: Send + Sync {
    async fn list_relays(
        &self,
        credentials: &ProtonVpnCredentials,
    ) -> Result<Vec<Relay>, RelayError>;
}

/// Relay list payload: either a bare array or wrapped in `relays`
#[derive(Deserialize)]
#[serde(untagged)]
enum RelayListing {
    Bare(Vec<Relay>),
    Wrapped { relays: Vec<Relay> },
}

impl From<RelayListing> for Vec<Relay> {
    fn from(listing: RelayListing) -> Self {
        match listing {
            RelayListing::Bare(relays) | RelayListing::Wrapped { relays } => relays,
        }
    }
}

/// Relay provider reached over HTTPS with basic auth
#[derive(Debug, Clone)]
pub struct HttpRelayProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRelayProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RelayProvider for HttpRelayProvider {
    async fn list_relays(
        &self,
        credentials: &ProtonVpnCredentials,
    ) -> Result<Vec<Relay>, RelayError> {
        debug!(url = %self.endpoint, "Requesting relay list");

        let response = self
            .client
            .get(&self.endpoint)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Relay list request timed out");
                    return RelayError::Timeout;
                }
                error!(error = %e, "Network error during relay list request");
                RelayError::Network(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            error!(status = status.as_u16(), "Relay provider rejected credentials");
            return Err(RelayError::Unauthorized);
        }
        if !status.is_success() {
            error!(status = status.as_u16(), "Relay provider error");
            return Err(RelayError::Status(status.as_u16()));
        }

        let listing: RelayListing = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))?;

        let relays: Vec<Relay> = listing.into();
        debug!(count = relays.len(), "Received relay list");
        Ok(relays)
    }
}

/// Relay discovery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Relay provider timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Relay provider rejected the credentials")]
    Unauthorized,

    #[error("Relay provider returned HTTP {0}")]
    Status(u16),

    #[error("Malformed relay list: {0}")]
    Decode(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}
