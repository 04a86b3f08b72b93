//! File-backed secure store.
//!
//! Entries are kept as one JSON object of base64 values. Every write
//! replaces the file through a temporary sibling and a rename, and on Unix
//! the file is readable by its owner only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use odyssey_core::errors::StoreError;
use odyssey_core::store::SecureStore;
use tokio::sync::Mutex;
use tracing::debug;

type Entries = BTreeMap<String, String>;

pub struct FileSecureStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl FileSecureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Entries, StoreError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(StoreError::OperationFailed(e.to_string())),
        };
        if content.is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_slice(&content).map_err(|e| {
            StoreError::DataCorruption(format!("{}: {e}", self.path.display()))
        })
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
        restrict_permissions(&tmp).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
        debug!(path = %self.path.display(), entries = entries.len(), "secure store written");
        Ok(())
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| StoreError::OperationFailed(e.to_string()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[async_trait]
impl SecureStore for FileSecureStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await?;
        entries
            .get(key)
            .map(|value| {
                STANDARD
                    .decode(value)
                    .map_err(|e| StoreError::DataCorruption(format!("entry {key}: {e}")))
            })
            .transpose()
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_string(), STANDARD.encode(value));
        self.write_entries(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileSecureStore::new(dir.path().join("store.json"));
        assert_eq!(store.get("odyssey_wallet").await.unwrap(), None);
        store.delete("odyssey_wallet").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = FileSecureStore::new(&path);
        store.set("a", b"\x00\x01binary").await.unwrap();
        store.set("b", b"second").await.unwrap();
        store.delete("b").await.unwrap();

        let reopened = FileSecureStore::new(&path);
        assert_eq!(reopened.get("a").await.unwrap(), Some(b"\x00\x01binary".to_vec()));
        assert_eq!(reopened.get("b").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = FileSecureStore::new(dir.path().join("store.json"));
        store.set("k", b"v").await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSecureStore::new(&path);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::DataCorruption(_))
        ));
    }

    async fn open_authorizer(path: &Path) -> odyssey_core::Authorizer {
        use odyssey_core::harness::{FakeBackend, FakeLedger};
        use odyssey_core::{AuthzConfig, Authorizer, Collaborators};
        use std::sync::Arc;

        let deps = Collaborators::new(
            Arc::new(FakeBackend::new()),
            Arc::new(FakeLedger::new()),
            Arc::new(FileSecureStore::new(path)),
        );
        Authorizer::open(deps, AuthzConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_authorizer_state_persists_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let authz = open_authorizer(&path).await;
        authz.onboard("WalletPk", "cred-1", None).await.unwrap();
        drop(authz);

        let reopened = open_authorizer(&path).await;
        assert_eq!(reopened.wallet().await.unwrap().public_key, "WalletPk");
    }
}
