//! Peer Records
//!
//! The registry's unit of state plus the input type used to create one.

use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
pub type Timestamp = u64;

/// Current wall-clock time in nanoseconds
pub fn now_nanos() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as Timestamp)
        .unwrap_or_default()
}

/// CIDR address scope (e.g. "10.0.0.2/32")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowedIps {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl AllowedIps {
    /// Parse CIDR notation
    pub fn parse(cidr: &str) -> Option<Self> {
        let (ip, prefix) = cidr.trim().split_once('/')?;
        let addr: IpAddr = ip.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return None;
        }

        Some(Self { addr, prefix })
    }
}

impl fmt::Display for AllowedIps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// An authorized tunnel client
///
/// Only `last_seen` and `data_usage` change after creation, and only
/// through daemon activity reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: String,
    pub public_key: PublicKey,
    /// Stored as supplied so exported configs reproduce it verbatim
    pub allowed_ips: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
    #[serde(default)]
    pub data_usage: u64,
}

impl Peer {
    /// Was there activity within `window` nanoseconds of `now`?
    pub fn is_active(&self, now: Timestamp, window: u64) -> bool {
        self.last_seen
            .is_some_and(|seen| now.saturating_sub(seen) <= window)
    }
}

/// Request to register a peer
///
/// `public_key` must already be filled in: callers substitute a generated
/// key for an empty one before handing the request to the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPeer {
    pub id: String,
    #[serde(default)]
    pub public_key: String,
    pub allowed_ips: String,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

impl NewPeer {
    pub fn new(
        id: impl Into<String>,
        public_key: impl Into<String>,
        allowed_ips: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            public_key: public_key.into(),
            allowed_ips: allowed_ips.into(),
            created_at: None,
        }
    }

    /// Fill an empty public key with a generated placeholder
    pub fn with_generated_key(mut self) -> Self {
        if self.public_key.trim().is_empty() {
            self.public_key = crate::keys::generate();
        }
        self
    }
}
