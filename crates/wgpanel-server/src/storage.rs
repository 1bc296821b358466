//! State persistence
//!
//! Peers and provider credentials are kept as JSON documents under the
//! state directory. Each write goes to a temporary file that is renamed
//! over the previous document, so a crash mid-write leaves the old state.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};
use wgpanel_core::{CredentialVault, Peer, PeerRegistry, ProtonVpnCredentials};

const PEERS_FILE: &str = "peers.json";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON state directory
pub struct StateStore {
    dir: PathBuf,
    /// Serializes writers so temp files are never shared
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the state directory
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })
    }

    /// Load persisted peers; a missing file means no peers
    pub async fn load_peers(&self) -> Result<Vec<Peer>, StorageError> {
        Ok(self.read_json(PEERS_FILE).await?.unwrap_or_default())
    }

    /// Load persisted credentials, if any
    pub async fn load_credentials(&self) -> Result<Option<ProtonVpnCredentials>, StorageError> {
        self.read_json(CREDENTIALS_FILE).await
    }

    /// Snapshot the registry and vault to disk
    ///
    /// Snapshots are taken under the write lock, so the last write to land
    /// always carries the newest state.
    pub async fn save_all(
        &self,
        registry: &PeerRegistry,
        vault: &CredentialVault,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        self.write_peers(&registry.list().await).await?;
        self.write_credentials(vault.get().await.as_ref()).await
    }

    async fn write_peers(&self, peers: &[Peer]) -> Result<(), StorageError> {
        self.write_json(PEERS_FILE, &peers).await?;
        debug!("Persisted {} peers", peers.len());
        Ok(())
    }

    /// Removes the file when there are no credentials
    async fn write_credentials(
        &self,
        credentials: Option<&ProtonVpnCredentials>,
    ) -> Result<(), StorageError> {
        match credentials {
            Some(credentials) => {
                self.write_json(CREDENTIALS_FILE, credentials).await?;
                restrict_permissions(&self.dir.join(CREDENTIALS_FILE)).await
            }
            None => {
                let path = self.dir.join(CREDENTIALS_FILE);
                match fs::remove_file(&path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(source) => Err(StorageError::Io { path, source }),
                }
            }
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, StorageError> {
        let path = self.dir.join(name);

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        let value = serde_json::from_slice(&content)
            .map_err(|source| StorageError::Json { path: path.clone(), source })?;
        info!("Loaded {}", path.display());

        Ok(Some(value))
    }

    async fn write_json<T: serde::Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));

        let content = serde_json::to_vec_pretty(value)
            .map_err(|source| StorageError::Json { path: path.clone(), source })?;

        fs::write(&tmp, &content)
            .await
            .map_err(|source| StorageError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StorageError> {
    Ok(())
}
