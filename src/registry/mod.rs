//! Subscription Registry (C8): the authoritative, ordered list of tracked
//! instrument identifiers (token or `EXCHANGE:SYMBOL` form), persisted as a
//! flat JSON array. Mutations apply in memory first and are then flushed to
//! disk; a write failure is logged and surfaced to the caller but never
//! rolls back the in-memory change, per the registry's own error policy.

use crate::core::AppError;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::error;

pub struct SubscriptionRegistry {
    path: PathBuf,
    entries: RwLock<Vec<String>>,
}

impl SubscriptionRegistry {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let entries = read_entries(&path).await?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn list(&self) -> Vec<String> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Stable position of `identifier`, used to order snapshot views.
    pub async fn position(&self, identifier: &str) -> Option<usize> {
        self.entries.read().await.iter().position(|e| e == identifier)
    }

    /// `true` if it was newly added (a no-op duplicate returns `false`).
    pub async fn add(&self, identifier: String) -> Result<bool, AppError> {
        let mut guard = self.entries.write().await;
        if guard.iter().any(|e| e == &identifier) {
            return Ok(false);
        }
        guard.push(identifier);
        self.flush(&guard).await?;
        Ok(true)
    }

    /// `true` if `identifier` was present and removed.
    pub async fn remove(&self, identifier: &str) -> Result<bool, AppError> {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|e| e != identifier);
        let removed = guard.len() != before;
        if removed {
            self.flush(&guard).await?;
        }
        Ok(removed)
    }

    async fn flush(&self, entries: &[String]) -> Result<(), AppError> {
        let path = self.path.clone();
        let snapshot = entries.to_vec();
        let result = tokio::task::spawn_blocking(move || write_entries(&path, &snapshot))
            .await
            .map_err(|e| AppError::Registry(format!("persist task panicked: {e}")))?;
        if let Err(e) = &result {
            error!(error = %e, "subscription registry write failed; in-memory state unchanged on disk");
        }
        result
    }
}

async fn read_entries(path: &std::path::Path) -> Result<Vec<String>, AppError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).map_err(AppError::from),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(AppError::from(e)),
    })
    .await
    .map_err(|e| AppError::Registry(format!("load task panicked: {e}")))?
}

fn write_entries(path: &std::path::Path, entries: &[String]) -> Result<(), AppError> {
    let contents = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, contents).map_err(AppError::from)
}
