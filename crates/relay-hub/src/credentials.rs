//! Per-room provider credentials
//!
//! Executors connect with a provider key/URL once; the hub persists them so
//! later HTTP proxy calls can present the correct per-user credentials
//! without re-authenticating each request. Written only by the connect
//! path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use handoff_core::Result;

/// Downstream provider credentials for one room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub provider_key: String,
    pub provider_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ProviderCredentials {
    pub fn new(provider_key: impl Into<String>, provider_url: Option<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            provider_url,
            recorded_at: Utc::now(),
        }
    }
}

/// File-backed credential store with an in-memory cache, keyed by room id
pub struct CredentialStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, ProviderCredentials>>,
}

impl CredentialStore {
    /// Load the store, restoring previously persisted room credentials
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = if path.exists() {
            let content = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<()> {
        let cache = self.cache.read().await;
        let content = serde_json::to_string_pretty(&*cache)?;
        drop(cache);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Persist credentials the first time a room presents them.
    /// Returns true if this call recorded them.
    pub async fn record_if_absent(
        &self,
        room_id: &str,
        credentials: ProviderCredentials,
    ) -> Result<bool> {
        {
            let mut cache = self.cache.write().await;
            if cache.contains_key(room_id) {
                return Ok(false);
            }
            cache.insert(room_id.to_string(), credentials);
        }
        self.persist().await?;
        Ok(true)
    }

    pub async fn get(&self, room_id: &str) -> Option<ProviderCredentials> {
        let cache = self.cache.read().await;
        cache.get(room_id).cloned()
    }
}
