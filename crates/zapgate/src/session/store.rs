//! Durable session snapshot.
//!
//! The snapshot is the full set of registered clients, written as a JSON
//! array of `{clientId, callbackURL?}` on every registry mutation and read
//! once at boot to decide which sessions to reconnect. Writes go through a
//! temp file + rename so a concurrent reader never observes a half-written
//! snapshot.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// One persisted session entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub client_id: String,
    #[serde(
        default,
        rename = "callbackURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write snapshot to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed session store.
///
/// Concurrent `save_all` calls are serialized internally; session restore at
/// boot re-saves the snapshot from several tasks and the set is idempotent
/// per id, so last-write-wins is the intended outcome.
pub struct SessionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session set.
    ///
    /// A missing or unreadable file is an empty set: first boot and snapshot
    /// corruption must never prevent startup.
    pub async fn load(&self) -> Vec<PersistedSession> {
        let contents = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No session snapshot, starting empty");
                return Vec::new();
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read clients from file");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&contents) {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Corrupt session snapshot, starting empty");
                Vec::new()
            }
        }
    }

    /// Overwrite the snapshot with the given full session set.
    pub async fn save_all(&self, sessions: &[PersistedSession]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| StoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let json = serde_json::to_vec_pretty(sessions)?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json).await.map_err(|e| StoreError::Io {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        Ok(())
    }
}
