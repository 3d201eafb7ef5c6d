//! Query-client persistence on top of shared storage.
//!
//! Maps `persist_client` / `restore_client` / `remove_client` onto one
//! storage key. When no shared host can exist, or storage is disabled, a
//! no-op persister stands in and nothing is ever connected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::{AsyncStorage, SharedStorage, StorageOptions};
use crate::error::Result;
use crate::platform::SharedHostPlatform;

pub const DEFAULT_CACHE_KEY: &str = "TANSTACK_QUERY_SHARED_WORKER_CACHE";

/// Snapshot of a query client's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedClient {
  /// Milliseconds since the Unix epoch
  pub timestamp: i64,
  #[serde(default)]
  pub buster: String,
  pub client_state: Value,
}

impl PersistedClient {
  pub fn new(client_state: Value) -> Self {
    let timestamp = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as i64)
      .unwrap_or_default();
    Self {
      timestamp,
      buster: String::new(),
      client_state,
    }
  }

  pub fn with_buster(mut self, buster: impl Into<String>) -> Self {
    self.buster = buster.into();
    self
  }
}

#[async_trait]
pub trait Persister: Send + Sync {
  async fn persist_client(&self, client: &PersistedClient) -> Result<()>;

  async fn restore_client(&self) -> Result<Option<PersistedClient>>;

  async fn remove_client(&self) -> Result<()>;

  fn is_noop(&self) -> bool {
    false
  }
}

/// Inert persister: writes vanish, restores find nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersister;

#[async_trait]
impl Persister for NoopPersister {
  async fn persist_client(&self, _client: &PersistedClient) -> Result<()> {
    Ok(())
  }

  async fn restore_client(&self) -> Result<Option<PersistedClient>> {
    Ok(None)
  }

  async fn remove_client(&self) -> Result<()> {
    Ok(())
  }

  fn is_noop(&self) -> bool {
    true
  }
}

pub struct SharedCachePersister {
  storage: Arc<dyn AsyncStorage>,
  key: String,
}

impl SharedCachePersister {
  pub fn new(storage: Arc<dyn AsyncStorage>, key: impl Into<String>) -> Self {
    Self {
      storage,
      key: key.into(),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }
}

#[async_trait]
impl Persister for SharedCachePersister {
  async fn persist_client(&self, client: &PersistedClient) -> Result<()> {
    let value = serde_json::to_value(client)?;
    self.storage.set_item(&self.key, value).await?;
    Ok(())
  }

  async fn restore_client(&self) -> Result<Option<PersistedClient>> {
    let Some(cached) = self.storage.get_item(&self.key).await? else {
      return Ok(None);
    };
    match serde_json::from_value(cached) {
      Ok(client) => Ok(Some(client)),
      Err(e) => {
        tracing::warn!("Ignoring unreadable snapshot under '{}': {}", self.key, e);
        Ok(None)
      }
    }
  }

  async fn remove_client(&self) -> Result<()> {
    self.storage.remove_item(&self.key).await
  }
}

/// Which storage a persister should use
#[derive(Clone, Default)]
pub enum StorageOption {
  /// Connect to the shared host through the platform
  #[default]
  Default,
  Custom(Arc<dyn AsyncStorage>),
  /// Always use the no-op persister
  Disabled,
}

impl std::fmt::Debug for StorageOption {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StorageOption::Default => write!(f, "Default"),
      StorageOption::Custom(_) => write!(f, "Custom(..)"),
      StorageOption::Disabled => write!(f, "Disabled"),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct PersisterOptions {
  pub storage: StorageOption,
  /// Cache slot; empty or unset means `DEFAULT_CACHE_KEY`
  pub key: Option<String>,
  pub storage_options: StorageOptions,
}

impl PersisterOptions {
  pub fn with_key(mut self, key: impl Into<String>) -> Self {
    self.key = Some(key.into());
    self
  }

  pub fn with_storage(mut self, storage: Arc<dyn AsyncStorage>) -> Self {
    self.storage = StorageOption::Custom(storage);
    self
  }

  pub fn with_storage_options(mut self, storage_options: StorageOptions) -> Self {
    self.storage_options = storage_options;
    self
  }

  pub fn disabled(mut self) -> Self {
    self.storage = StorageOption::Disabled;
    self
  }

  pub fn resolved_key(&self) -> String {
    self
      .key
      .clone()
      .filter(|k| !k.is_empty())
      .unwrap_or_else(|| DEFAULT_CACHE_KEY.to_string())
  }
}

/// Build the persister for `options`, falling back to `NoopPersister` when
/// storage is disabled, the platform has no shared host, or connecting fails.
pub async fn create_persister(
  options: PersisterOptions,
  platform: &dyn SharedHostPlatform,
) -> Arc<dyn Persister> {
  let key = options.resolved_key();

  let storage: Arc<dyn AsyncStorage> = match options.storage {
    StorageOption::Disabled => {
      tracing::debug!("Shared cache disabled, using no-op persister");
      return Arc::new(NoopPersister);
    }
    _ if !platform.is_available() => {
      tracing::debug!("Shared cache host unavailable, using no-op persister");
      return Arc::new(NoopPersister);
    }
    StorageOption::Custom(storage) => storage,
    StorageOption::Default => {
      let port = match platform.connect().await {
        Ok(port) => port,
        Err(e) => {
          tracing::warn!("Could not reach shared cache host, using no-op persister: {}", e);
          return Arc::new(NoopPersister);
        }
      };
      match SharedStorage::connect(port, options.storage_options) {
        Ok(storage) => Arc::new(storage) as Arc<dyn AsyncStorage>,
        Err(e) => {
          tracing::warn!("Shared cache handshake failed, using no-op persister: {}", e);
          return Arc::new(NoopPersister);
        }
      }
    }
  };

  tracing::debug!("Persisting query client under '{}'", key);
  Arc::new(SharedCachePersister::new(storage, key))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::platform::UnavailablePlatform;
  use crate::store::InMemoryCacheStore;
  use serde_json::json;

  #[test]
  fn test_resolved_key() {
    assert_eq!(PersisterOptions::default().resolved_key(), DEFAULT_CACHE_KEY);
    assert_eq!(
      PersisterOptions::default().with_key("").resolved_key(),
      DEFAULT_CACHE_KEY
    );
    assert_eq!(
      PersisterOptions::default().with_key("app1").resolved_key(),
      "app1"
    );
  }

  #[test]
  fn test_persisted_client_wire_shape() {
    let client = PersistedClient::new(json!({"queries": []})).with_buster("v2");
    let value = serde_json::to_value(&client).unwrap();
    assert_eq!(value["buster"], "v2");
    assert_eq!(value["clientState"], json!({"queries": []}));
    assert!(value["timestamp"].as_i64().unwrap() > 0);
  }

  #[tokio::test]
  async fn test_noop_persister() {
    let persister = NoopPersister;
    persister
      .persist_client(&PersistedClient::new(json!({})))
      .await
      .unwrap();
    assert_eq!(persister.restore_client().await.unwrap(), None);
    persister.remove_client().await.unwrap();
    assert!(persister.is_noop());
  }

  #[tokio::test]
  async fn test_unreadable_snapshot_restores_as_absent() {
    let store = Arc::new(InMemoryCacheStore::new());
    store.set(DEFAULT_CACHE_KEY, json!("not a snapshot"));
    let persister = SharedCachePersister::new(store, DEFAULT_CACHE_KEY);
    assert_eq!(persister.restore_client().await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_custom_storage_ignored_when_unavailable() {
    let store = Arc::new(InMemoryCacheStore::new());
    let options = PersisterOptions::default().with_storage(store);
    let persister = create_persister(options, &UnavailablePlatform).await;
    assert!(persister.is_noop());
  }
}
