//! Cache store implementation

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// A cached snapshot with bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  pub value: Value,
  pub updated_at: Instant,
  /// Size in bytes (approximate)
  pub size: usize,
}

impl CacheEntry {
  pub fn new(key: String, value: Value) -> Self {
    let size = approximate_size(&value) + key.len();
    Self {
      key,
      value,
      updated_at: Instant::now(),
      size,
    }
  }
}

/// Approximate in-memory footprint of a JSON value
pub fn approximate_size(value: &Value) -> usize {
  match value {
    Value::Null => 0,
    Value::Bool(_) => 1,
    Value::Number(_) => 8,
    Value::String(s) => s.len(),
    Value::Array(items) => items.iter().map(approximate_size).sum::<usize>() + 8,
    Value::Object(map) => {
      map
        .iter()
        .map(|(k, v)| k.len() + approximate_size(v))
        .sum::<usize>()
        + 8
    }
  }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
  pub keys: usize,
  pub memory_used: usize,
  pub hits: u64,
  pub misses: u64,
  pub sets: u64,
  pub removes: u64,
}

impl CacheStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

/// In-memory key -> snapshot map shared by every connection of a host.
///
/// Values are cloned in and out; no reference into the map escapes.
#[derive(Default)]
pub struct InMemoryCacheStore {
  data: RwLock<HashMap<String, CacheEntry>>,
  memory_used: AtomicUsize,
  hits: AtomicU64,
  misses: AtomicU64,
  sets: AtomicU64,
  removes: AtomicU64,
}

impl InMemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    let data = self.data.read();
    match data.get(key) {
      Some(entry) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
      }
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Insert or replace `key`, returning the value that was set
  pub fn set(&self, key: &str, value: Value) -> Value {
    let entry = CacheEntry::new(key.to_string(), value.clone());
    let new_size = entry.size;

    let mut data = self.data.write();
    if let Some(old) = data.insert(key.to_string(), entry) {
      self.memory_used.fetch_sub(old.size, Ordering::Relaxed);
    }
    self.memory_used.fetch_add(new_size, Ordering::Relaxed);
    self.sets.fetch_add(1, Ordering::Relaxed);
    value
  }

  pub fn remove(&self, key: &str) {
    let mut data = self.data.write();
    if let Some(entry) = data.remove(key) {
      self.memory_used.fetch_sub(entry.size, Ordering::Relaxed);
    }
    self.removes.fetch_add(1, Ordering::Relaxed);
  }

  pub fn contains(&self, key: &str) -> bool {
    self.data.read().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.data.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.read().is_empty()
  }

  /// All keys, sorted
  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      keys: self.len(),
      memory_used: self.memory_used.load(Ordering::Relaxed),
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      sets: self.sets.load(Ordering::Relaxed),
      removes: self.removes.load(Ordering::Relaxed),
    }
  }
}
