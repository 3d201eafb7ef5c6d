use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::store::InMemoryCacheStore;

/// Key/value storage with deferred results, as consumed by the persister
#[async_trait]
pub trait AsyncStorage: Send + Sync {
  async fn get_item(&self, key: &str) -> Result<Option<Value>>;

  /// Resolves to the value that was set
  async fn set_item(&self, key: &str, value: Value) -> Result<Value>;

  async fn remove_item(&self, key: &str) -> Result<()>;
}

/// Local, unshared storage. Useful as a custom storage override.
#[async_trait]
impl AsyncStorage for InMemoryCacheStore {
  async fn get_item(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.get(key))
  }

  async fn set_item(&self, key: &str, value: Value) -> Result<Value> {
    Ok(self.set(key, value))
  }

  async fn remove_item(&self, key: &str) -> Result<()> {
    self.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_local_store_as_async_storage() {
    let store = InMemoryCacheStore::new();
    tokio_test::block_on(async {
      assert_eq!(store.get_item("k").await.unwrap(), None);
      assert_eq!(store.set_item("k", json!([1])).await.unwrap(), json!([1]));
      assert_eq!(store.get_item("k").await.unwrap(), Some(json!([1])));
      store.remove_item("k").await.unwrap();
      assert_eq!(store.get_item("k").await.unwrap(), None);
    });
  }
}
