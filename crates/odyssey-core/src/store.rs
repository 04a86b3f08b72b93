//! Secure key/value storage abstraction.
//!
//! The platform keystore is an opaque blob store. This module defines the
//! `SecureStore` trait, JSON helpers on top of it, the persisted snapshot of
//! authorization state, and an in-memory implementation for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::session::Session;
use crate::transactions::TransactionLog;
use crate::types::{Agent, AgentCredential};

/// Entry holding the `StoredWallet`. Its absence means not onboarded.
pub const WALLET_STORAGE_KEY: &str = "odyssey_wallet";

/// Entry holding the [`PersistedState`] snapshot.
pub const STATE_STORAGE_KEY: &str = "odyssey_state";

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait SecureStore: Send + Sync {
    /// `Ok(None)` when the key was never written or has been deleted.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub async fn load_json<T: DeserializeOwned>(
    store: &dyn SecureStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::DataCorruption(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn SecureStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    store.set(key, &bytes).await
}

// ============================================================================
// Persisted State
// ============================================================================

/// Everything the authorizer needs to resume after a restart, apart from the
/// wallet entry and session secrets, which live under their own keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub credentials: HashMap<String, AgentCredential>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    /// Session id -> session public key whose secret is in the store.
    #[serde(default)]
    pub session_keys: HashMap<String, String>,
    #[serde(default)]
    pub transactions: TransactionLog,
    /// Signatures already counted against a session's `spent`.
    #[serde(default)]
    pub applied_signatures: Vec<String>,
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Volatile store for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemorySecureStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemorySecureStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_json_is_reported() {
        let store = InMemorySecureStore::new();
        store.set(STATE_STORAGE_KEY, b"{not json").await.unwrap();
        let result: Result<Option<PersistedState>, _> = load_json(&store, STATE_STORAGE_KEY).await;
        assert!(matches!(result, Err(StoreError::DataCorruption(_))));
    }

    #[tokio::test]
    async fn test_state_defaults_missing_fields() {
        let store = InMemorySecureStore::new();
        store.set(STATE_STORAGE_KEY, br#"{"agents":[]}"#).await.unwrap();
        let state: PersistedState = load_json(&store, STATE_STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(state, PersistedState::default());
    }
}
