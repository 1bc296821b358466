//! wgpanel core - WireGuard Server Control Plane
//!
//! Authorizes tunnel peers, drives the tunnel daemon through its run
//! states, reports service health and usage, and discovers upstream egress
//! relays.
//!
//! # Architecture
//!
//! ```text
//!   commands ─────┬───────────────┬───────────────────┐
//!                 ▼               ▼                   ▼
//!         ┌──────────────┐ ┌───────────────────┐ ┌─────────────────┐
//!         │ PeerRegistry │ │ ServiceController │ │ CredentialVault │
//!         └──────▲───────┘ └────────▲──────────┘ └────────┬────────┘
//!                │   activity       │ health              │ HTTPS
//!                └──── adapter ◀────┘                     ▼
//!                        ▲                          relay provider
//!                        │ mpsc
//!                  tunnel daemon
//!
//!   MetricsFeed = f(registry snapshot, controller snapshot, system sample)
//! ```
//!
//! # Features
//!
//! - **Peer registry**: unique ids, canonical keys, CIDR address scopes
//! - **Service controller**: serialized start/stop/restart with rollback
//! - **Status feed**: computed on read, never cached
//! - **Relay discovery**: WireGuard relays ranked by load, capacity, distance

mod adapter;
mod config;
mod controller;
mod credentials;
mod daemon;
mod error;
mod export;
mod keys;
mod metrics;
mod peer;
mod registry;
mod relay;

pub use adapter::{DaemonEvent, DaemonReporter, spawn_adapter};
pub use config::{
    ConfigError, DaemonConfig, LogFormat, PanelConfig, RegistryConfig, RelayConfig, ServerConfig,
};
pub use controller::{
    ControllerError, ControllerSnapshot, ServiceController, ServiceState, TunnelHealth,
};
pub use credentials::{CredentialVault, DiscoveryOptions, ProtonVpnCredentials, VaultError};
pub use daemon::{CommandDaemon, DaemonError, NoopDaemon, TunnelDaemon};
pub use error::{ErrorKind, PanelError};
pub use export::{ExportOptions, PRIVATE_KEY_PLACEHOLDER, render_client_config};
pub use keys::{KEY_LENGTH, KeyError, PublicKey};
pub use metrics::{
    DEFAULT_ACTIVITY_WINDOW, MetricsFeed, ServiceStatus, SystemMetrics, SystemProbe, compute_status,
};
pub use peer::{AllowedIps, NewPeer, Peer, Timestamp, now_nanos};
pub use registry::{PeerRegistry, RegistryError, RegistryOptions};
pub use relay::{HttpRelayProvider, Relay, RelayError, RelayProvider, TargetRegion, rank_relays};

/// Key helpers for callers that work with plain strings
pub mod key {
    pub use crate::keys::{generate, validate};
}
