//! Stale session-directory cleanup.
//!
//! The bridge materializes one browser profile directory per client,
//! `session-<clientId>`, under the sessions directory. Directories whose
//! client is no longer registered are removed on a timer (and once at
//! startup) so disconnected sessions don't accumulate on disk.

use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::session::Registry;

/// Directory-name prefix of per-client bridge sessions.
const SESSION_DIR_PREFIX: &str = "session-";

/// Run one cleanup pass now, then repeat on the given interval.
pub fn spawn_cleanup_task(
    registry: Registry,
    sessions_dir: impl Into<std::path::PathBuf>,
    interval_seconds: u64,
) -> JoinHandle<()> {
    let sessions_dir = sessions_dir.into();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            ticker.tick().await;
            info!("Running session cleanup job");
            clean_up_sessions(&registry, &sessions_dir).await;
        }
    })
}

/// Remove `session-<id>` directories with no registered client.
pub async fn clean_up_sessions(registry: &Registry, sessions_dir: &Path) {
    let mut entries = match fs::read_dir(sessions_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %sessions_dir.display(), error = %e, "Failed to read sessions directory");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(client_id) = name.strip_prefix(SESSION_DIR_PREFIX) else {
            continue;
        };
        if registry.contains(client_id) {
            continue;
        }

        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => info!(client_id, "Removed stale session directory"),
            Err(e) => {
                error!(client_id, error = %e, "Failed to remove stale session directory")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientHandle, Registry};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn registry_with(ids: &[&str]) -> Registry {
        let registry = Registry::new();
        for id in ids {
            let (tx, _rx) = mpsc::channel(1);
            registry.insert(Arc::new(ClientHandle::new(id.to_string(), tx, None)));
        }
        registry
    }

    #[tokio::test]
    async fn removes_directories_without_registered_client() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("session-live")).unwrap();
        std::fs::create_dir(temp_dir.path().join("session-stale")).unwrap();

        let registry = registry_with(&["live"]);
        clean_up_sessions(&registry, temp_dir.path()).await;

        assert!(temp_dir.path().join("session-live").exists());
        assert!(!temp_dir.path().join("session-stale").exists());
    }

    #[tokio::test]
    async fn ignores_unrelated_entries() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("not-a-session")).unwrap();
        std::fs::write(temp_dir.path().join("clients.json"), b"[]").unwrap();

        let registry = registry_with(&[]);
        clean_up_sessions(&registry, temp_dir.path()).await;

        assert!(temp_dir.path().join("not-a-session").exists());
        assert!(temp_dir.path().join("clients.json").exists());
    }

    #[tokio::test]
    async fn missing_sessions_dir_is_not_fatal() {
        let registry = registry_with(&[]);
        clean_up_sessions(&registry, Path::new("/nonexistent/zapgate-sessions")).await;
    }
}
