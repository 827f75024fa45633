//! Controller state persistence
//!
//! The retry queue and the last successful reconcile timestamp are
//! flushed as JSON with a write-then-rename so a crash never leaves a
//! torn state file. Restarts resume queued work from here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::sync::retry::RetryItem;

const STATE_FILE: &str = "sync-state.json";

/// Persisted controller state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub retry_items: Vec<RetryItem>,
    #[serde(default)]
    pub last_reconcile_success: Option<DateTime<Utc>>,
}

/// Single-writer state file under the configured data directory
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        StateStore {
            path: data_dir.as_ref().join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state. A missing file is a fresh start; a corrupt
    /// file is logged and discarded rather than blocking startup.
    pub async fn load(&self) -> SyncState {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e,
                        "State file unreadable; starting from empty state");
                    SyncState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SyncState::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e,
                    "State file unreadable; starting from empty state");
                SyncState::default()
            }
        }
    }

    /// Serialize and atomically replace the state file.
    pub async fn save(&self, state: &SyncState) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
