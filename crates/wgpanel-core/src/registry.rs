//! Peer Registry
//!
//! Owns the set of authorized peers. All mutation goes through the
//! command methods below, each of which holds the write lock for its
//! whole check-then-apply sequence, so a rejected command never leaves
//! partial state behind.

use crate::keys::{KeyError, PublicKey};
use crate::peer::{AllowedIps, NewPeer, Peer, Timestamp, now_nanos};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Uniqueness rules beyond the peer id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Reject a peer whose public key is already registered
    pub enforce_unique_keys: bool,
    /// Reject a peer whose address scope is already registered
    pub enforce_unique_addresses: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            enforce_unique_keys: true,
            enforce_unique_addresses: true,
        }
    }
}

/// Peer registry
///
/// Peers are kept in insertion order.
pub struct PeerRegistry {
    peers: RwLock<Vec<Peer>>,
    options: RegistryOptions,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            peers: RwLock::new(Vec::new()),
            options,
        }
    }

    /// Create a registry pre-populated from persisted records
    ///
    /// Later duplicates of an already seen id are dropped.
    pub fn with_peers(options: RegistryOptions, peers: Vec<Peer>) -> Self {
        let mut unique: Vec<Peer> = Vec::with_capacity(peers.len());
        for peer in peers {
            if unique.iter().any(|p| p.id == peer.id) {
                warn!("Dropping duplicate persisted peer {}", peer.id);
                continue;
            }
            unique.push(peer);
        }

        Self {
            peers: RwLock::new(unique),
            options,
        }
    }

    /// Register a new peer
    pub async fn add(&self, request: NewPeer) -> Result<Peer, RegistryError> {
        if request.id.trim().is_empty() || request.id.chars().any(char::is_control) {
            return Err(RegistryError::InvalidId);
        }

        let public_key = PublicKey::parse(&request.public_key)?;
        let scope = AllowedIps::parse(&request.allowed_ips)
            .ok_or_else(|| RegistryError::InvalidAllowedIps(request.allowed_ips.clone()))?;

        let mut peers = self.peers.write().await;

        if peers.iter().any(|p| p.id == request.id) {
            debug!("Rejecting duplicate peer id {}", request.id);
            return Err(RegistryError::DuplicateId(request.id));
        }

        if self.options.enforce_unique_keys && peers.iter().any(|p| p.public_key == public_key) {
            return Err(RegistryError::DuplicatePublicKey(request.id));
        }

        if self.options.enforce_unique_addresses
            && peers
                .iter()
                .any(|p| AllowedIps::parse(&p.allowed_ips) == Some(scope))
        {
            return Err(RegistryError::DuplicateAddress(scope.to_string()));
        }

        let peer = Peer {
            id: request.id,
            public_key,
            allowed_ips: request.allowed_ips,
            created_at: request.created_at.unwrap_or_else(now_nanos),
            last_seen: None,
            data_usage: 0,
        };

        info!("Added peer {} ({})", peer.id, peer.allowed_ips);
        peers.push(peer.clone());

        Ok(peer)
    }

    /// Remove a peer
    pub async fn remove(&self, id: &str) -> Result<Peer, RegistryError> {
        let mut peers = self.peers.write().await;

        let index = peers
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let removed = peers.remove(index);
        info!("Removed peer {}", removed.id);

        Ok(removed)
    }

    /// Look up a single peer
    pub async fn get(&self, id: &str) -> Result<Peer, RegistryError> {
        self.peers
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Snapshot of all peers
    pub async fn list(&self) -> Vec<Peer> {
        self.peers.read().await.clone()
    }

    /// Number of registered peers
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Apply an activity report from the tunnel daemon
    ///
    /// Unknown ids are ignored: a stale report must never create a peer.
    /// Returns whether a peer was updated.
    pub async fn record_activity(&self, id: &str, bytes: u64) -> bool {
        self.record_activity_at(id, bytes, now_nanos()).await
    }

    /// Apply an activity report observed at `at`
    pub async fn record_activity_at(&self, id: &str, bytes: u64, at: Timestamp) -> bool {
        let mut peers = self.peers.write().await;

        match peers.iter_mut().find(|p| p.id == id) {
            Some(peer) => {
                peer.data_usage = peer.data_usage.saturating_add(bytes);
                peer.last_seen = Some(peer.last_seen.map_or(at, |seen| seen.max(at)));
                true
            }
            None => {
                debug!("Ignoring activity for unknown peer {}", id);
                false
            }
        }
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Peer id must be non-empty and free of control characters")]
    InvalidId,

    #[error("Peer already exists: {0}")]
    DuplicateId(String),

    #[error("Peer not found: {0}")]
    NotFound(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] KeyError),

    #[error("Invalid allowed IPs: {0}")]
    InvalidAllowedIps(String),

    #[error("Public key already registered (peer {0})")]
    DuplicatePublicKey(String),

    #[error("Address scope already assigned: {0}")]
    DuplicateAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use std::sync::Arc;

    fn request(id: &str, ip: &str) -> NewPeer {
        NewPeer::new(id, keys::generate(), ip)
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let registry = PeerRegistry::default();
        registry.add(request("laptop", "10.0.0.2/32")).await.unwrap();

        let peers = registry.list().await;
        assert_eq!(peers.iter().filter(|p| p.id == "laptop").count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_leaves_registry_unchanged() {
        let registry = PeerRegistry::default();
        let first = registry.add(request("laptop", "10.0.0.2/32")).await.unwrap();
        let before = registry.list().await;

        let result = registry.add(request("laptop", "10.0.0.9/32")).await;
        assert_eq!(result, Err(RegistryError::DuplicateId("laptop".into())));

        let after = registry.list().await;
        assert_eq!(before, after);
        assert_eq!(after[0], first);
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let registry = PeerRegistry::default();
        registry.add(request("laptop", "10.0.0.2/32")).await.unwrap();
        registry.add(request("phone", "10.0.0.3/32")).await.unwrap();

        registry.remove("laptop").await.unwrap();
        assert_eq!(registry.len().await, 1);

        let again = registry.remove("laptop").await;
        assert_eq!(again, Err(RegistryError::NotFound("laptop".into())));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_activity_is_noop() {
        let registry = PeerRegistry::default();
        registry.add(request("laptop", "10.0.0.2/32")).await.unwrap();
        registry.record_activity("laptop", 100).await;
        let before = registry.list().await;

        assert!(!registry.record_activity("ghost", 5_000).await);

        assert_eq!(registry.list().await, before);
    }

    #[tokio::test]
    async fn test_activity_accumulates() {
        let registry = PeerRegistry::default();
        registry.add(request("laptop", "10.0.0.2/32")).await.unwrap();

        registry.record_activity_at("laptop", 1_000, 50).await;
        registry.record_activity_at("laptop", 24, 40).await;

        let peer = registry.get("laptop").await.unwrap();
        assert_eq!(peer.data_usage, 1_024);
        // an out-of-order report never moves last_seen backwards
        assert_eq!(peer.last_seen, Some(50));
    }

    #[tokio::test]
    async fn test_generated_key_scenario() {
        let registry = PeerRegistry::default();
        let request = NewPeer::new("laptop", "", "10.0.0.2/32").with_generated_key();
        let key = request.public_key.clone();

        registry.add(request).await.unwrap();

        let peers = registry.list().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key.as_str(), key);
        assert_eq!(key.len(), 44);
        assert_eq!(peers[0].data_usage, 0);
        assert!(peers[0].last_seen.is_none());
    }

    #[tokio::test]
    async fn test_registry_never_substitutes_keys() {
        let registry = PeerRegistry::default();
        let result = registry.add(NewPeer::new("laptop", "", "10.0.0.2/32")).await;

        assert_eq!(result, Err(RegistryError::InvalidPublicKey(KeyError::Empty)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_created_at_preserved_when_supplied() {
        let registry = PeerRegistry::default();
        let mut req = request("laptop", "10.0.0.2/32");
        req.created_at = Some(42);

        let peer = registry.add(req).await.unwrap();
        assert_eq!(peer.created_at, 42);

        let fresh = registry.add(request("phone", "10.0.0.3/32")).await.unwrap();
        assert!(fresh.created_at > 0);
    }

    #[tokio::test]
    async fn test_uniqueness_rules() {
        let registry = PeerRegistry::default();
        let key = keys::generate();
        registry
            .add(NewPeer::new("laptop", key.clone(), "10.0.0.2/32"))
            .await
            .unwrap();

        let same_key = registry.add(NewPeer::new("phone", key.clone(), "10.0.0.3/32")).await;
        assert!(matches!(same_key, Err(RegistryError::DuplicatePublicKey(_))));

        let same_scope = registry.add(request("tablet", "10.0.0.2/32")).await;
        assert!(matches!(same_scope, Err(RegistryError::DuplicateAddress(_))));

        let permissive = PeerRegistry::new(RegistryOptions {
            enforce_unique_keys: false,
            enforce_unique_addresses: false,
        });
        permissive.add(NewPeer::new("a", key.clone(), "10.0.0.2/32")).await.unwrap();
        permissive.add(NewPeer::new("b", key, "10.0.0.2/32")).await.unwrap();
        assert_eq!(permissive.len().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let registry = PeerRegistry::default();

        let bad_ip = registry.add(request("laptop", "10.0.0.2")).await;
        assert!(matches!(bad_ip, Err(RegistryError::InvalidAllowedIps(_))));

        let bad_id = registry.add(request("  ", "10.0.0.2/32")).await;
        assert_eq!(bad_id, Err(RegistryError::InvalidId));

        let control_chars = registry.add(request("lap\ttop\u{7f}", "10.0.0.2/32")).await;
        assert_eq!(control_chars, Err(RegistryError::InvalidId));

        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_adds_same_id() {
        let registry = Arc::new(PeerRegistry::default());
        let mut handles = Vec::new();

        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(request("laptop", &format!("10.0.1.{}/32", i))).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_restore_drops_duplicates() {
        let seed = PeerRegistry::default();
        let peer = seed.add(request("laptop", "10.0.0.2/32")).await.unwrap();

        let restored = PeerRegistry::with_peers(
            RegistryOptions::default(),
            vec![peer.clone(), peer],
        );
        assert_eq!(restored.len().await, 1);
    }
}
