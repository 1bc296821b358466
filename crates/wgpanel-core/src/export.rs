//! Client Config Export
//!
//! Renders the wg-quick configuration a peer's device imports. The private
//! key is never known to the panel, so the block carries a placeholder the
//! user replaces on the device.

use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Values filled into the exported block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Server endpoint (host:port)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// DNS server pushed to the client
    #[serde(default = "default_dns")]
    pub dns: String,
    /// Traffic routed through the tunnel from the client side
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: String,
    /// Persistent keepalive in seconds; 0 leaves the line out
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,
}

fn default_endpoint() -> String {
    "<SERVER_IP>:51820".to_string()
}

fn default_dns() -> String {
    "1.1.1.1".to_string()
}

fn default_allowed_ips() -> String {
    "0.0.0.0/0".to_string()
}

fn default_keepalive() -> u16 {
    25
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            dns: default_dns(),
            allowed_ips: default_allowed_ips(),
            keepalive: default_keepalive(),
        }
    }
}

/// Placeholder written where the client's private key goes
pub const PRIVATE_KEY_PLACEHOLDER: &str = "<CLIENT_PRIVATE_KEY>";

/// Render the client configuration for a peer
///
/// The output has no trailing newline.
pub fn render_client_config(peer: &Peer, options: &ExportOptions) -> String {
    let mut out = String::with_capacity(256);

    // writing into a String cannot fail
    let _ = write!(
        out,
        "[Interface]\n\
         PrivateKey = {}\n\
         Address = {}\n\
         DNS = {}\n\
         \n\
         [Peer]\n\
         PublicKey = {}\n\
         Endpoint = {}\n\
         AllowedIPs = {}",
        PRIVATE_KEY_PLACEHOLDER,
        peer.allowed_ips,
        options.dns,
        peer.public_key,
        options.endpoint,
        options.allowed_ips,
    );

    if options.keepalive > 0 {
        let _ = write!(out, "\nPersistentKeepalive = {}", options.keepalive);
    }

    out
}
