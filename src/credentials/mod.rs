//! Persists the broker access token across rotations so a restart doesn't
//! require a fresh login. Default implementation rewrites a single
//! `KEY=value` line of a local `.env`-style file, the same format
//! `dotenvy` reads at startup.

use crate::core::AppError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save_access_token(&self, token: &str) -> Result<(), AppError>;
}

pub struct FileCredentialStore {
    path: PathBuf,
    key: &'static str,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: "ZERODHA_ACCESS_TOKEN",
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save_access_token(&self, token: &str) -> Result<(), AppError> {
        let path = self.path.clone();
        let key = self.key;
        let token = token.to_string();
        tokio::task::spawn_blocking(move || rewrite_env_line(&path, key, &token))
            .await
            .map_err(|e| AppError::Registry(format!("credential save task panicked: {e}")))??;
        Ok(())
    }
}

fn rewrite_env_line(path: &Path, key: &str, value: &str) -> Result<(), AppError> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut found = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if let Some((k, _)) = line.split_once('=') {
                if k.trim() == key {
                    found = true;
                    return format!("{key}={value}");
                }
            }
            line.to_string()
        })
        .collect();

    if !found {
        lines.push(format!("{key}={value}"));
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(path, contents).map_err(AppError::from)
}

/// In-memory double for tests.
pub struct InMemoryCredentialStore {
    pub saved: tokio::sync::Mutex<Vec<String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            saved: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn save_access_token(&self, token: &str) -> Result<(), AppError> {
        self.saved.lock().await.push(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_adds_new_key_when_absent() {
        let dir = std::env::temp_dir().join(format!("cred-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("test1.env");
        std::fs::write(&file, "OTHER_KEY=1\n").unwrap();

        rewrite_env_line(&file, "ZERODHA_ACCESS_TOKEN", "tok-a").unwrap();
        let contents = std::fs::read_to_string(&file).unwrap();
        assert!(contents.contains("OTHER_KEY=1"));
        assert!(contents.contains("ZERODHA_ACCESS_TOKEN=tok-a"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rewrite_replaces_existing_key_in_place() {
        let dir = std::env::temp_dir().join(format!("cred-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("test2.env");
        std::fs::write(&file, "ZERODHA_ACCESS_TOKEN=old\nOTHER=2\n").unwrap();

        rewrite_env_line(&file, "ZERODHA_ACCESS_TOKEN", "new").unwrap();
        let contents = std::fs::read_to_string(&file).unwrap();
        assert!(contents.contains("ZERODHA_ACCESS_TOKEN=new"));
        assert!(!contents.contains("ZERODHA_ACCESS_TOKEN=old"));
        assert!(contents.contains("OTHER=2"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn in_memory_store_records_saved_tokens() {
        let store = InMemoryCredentialStore::new();
        store.save_access_token("abc").await.unwrap();
        assert_eq!(*store.saved.lock().await, vec!["abc".to_string()]);
    }
}
