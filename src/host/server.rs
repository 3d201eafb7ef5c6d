//! Cache host: owns the store and serves every connection against it

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{CacheStats, InMemoryCacheStore};
use crate::transport::{expose, CallHandler, Encoding, MessagePort};
use crate::types::{Envelope, Method};

/// Hosts living in this process, one per name
static SHARED_HOSTS: OnceLock<Mutex<HashMap<String, Arc<CacheHost>>>> = OnceLock::new();

/// Relays calls to the store. Values pass through as-is. The only checks are
/// the ones needed to decode a call: the key must be a string and `set` must
/// carry a value. A call failing them is answered with an `Error` envelope.
pub struct StoreDispatcher {
  store: Arc<InMemoryCacheStore>,
}

impl StoreDispatcher {
  pub fn new(store: Arc<InMemoryCacheStore>) -> Self {
    Self { store }
  }
}

fn key_arg(arg: Option<Value>) -> std::result::Result<String, String> {
  match arg {
    Some(Value::String(key)) => Ok(key),
    Some(other) => Err(format!("key must be a string, got {}", other)),
    None => Err("missing key argument".to_string()),
  }
}

#[async_trait]
impl CallHandler for StoreDispatcher {
  async fn handle(
    &self,
    method: Method,
    args: Vec<Value>,
  ) -> std::result::Result<Option<Value>, String> {
    let mut args = args.into_iter();
    let key = key_arg(args.next())?;
    match method {
      Method::Get => Ok(self.store.get(&key)),
      Method::Set => {
        let value = args.next().ok_or("set requires a value argument")?;
        Ok(Some(self.store.set(&key, value)))
      }
      Method::Remove => {
        self.store.remove(&key);
        Ok(None)
      }
    }
  }
}

/// A connected client context
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
  pub id: Uuid,
  pub peer: Option<String>,
  pub connected_at: Instant,
}

type Connections = Arc<RwLock<HashMap<Uuid, ConnectionInfo>>>;

pub struct CacheHost {
  name: String,
  encoding: Encoding,
  store: Arc<InMemoryCacheStore>,
  connections: Connections,
}

impl CacheHost {
  pub fn new(name: impl Into<String>, encoding: Encoding) -> Self {
    Self {
      name: name.into(),
      encoding,
      store: Arc::new(InMemoryCacheStore::new()),
      connections: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  /// The process-wide host registered under `name`, created on first use
  pub fn shared(name: &str) -> Arc<CacheHost> {
    let hosts = SHARED_HOSTS.get_or_init(Default::default);
    hosts
      .lock()
      .entry(name.to_string())
      .or_insert_with(|| {
        tracing::info!("Starting shared cache host '{}'", name);
        Arc::new(CacheHost::new(name, Encoding::default()))
      })
      .clone()
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn encoding(&self) -> Encoding {
    self.encoding
  }

  /// Read-only view for stats and tests; calls go through connections
  pub fn store(&self) -> &InMemoryCacheStore {
    &self.store
  }

  pub fn stats(&self) -> CacheStats {
    self.store.stats()
  }

  pub fn connection_count(&self) -> usize {
    self.connections.read().len()
  }

  pub fn connections(&self) -> Vec<ConnectionInfo> {
    self.connections.read().values().cloned().collect()
  }

  /// Serve a new connection: install the dispatcher, start the port, then
  /// announce `Ready`. Every later `Connect` is answered with another `Ready`.
  pub fn accept(&self, port: MessagePort, peer: Option<String>) -> Uuid {
    let id = port.id();

    let handler: Arc<dyn CallHandler> = Arc::new(StoreDispatcher::new(self.store.clone()));
    expose(handler, port.clone());
    let (_, mut inbound) = port.add_listener();
    port.start();
    if let Err(e) = port.post(Envelope::ready(&self.name)) {
      tracing::debug!("Cache client {} gone before ready: {}", id, e);
    }

    self.connections.write().insert(
      id,
      ConnectionInfo {
        id,
        peer: peer.clone(),
        connected_at: Instant::now(),
      },
    );
    tracing::debug!(
      "Cache client {} connected ({})",
      id,
      peer.as_deref().unwrap_or("in-process")
    );

    let connections = self.connections.clone();
    let host = self.name.clone();
    tokio::spawn(async move {
      while let Some(msg) = inbound.recv().await {
        if matches!(msg, Envelope::Connect) && port.post(Envelope::ready(&host)).is_err() {
          break;
        }
      }
      connections.write().remove(&id);
      tracing::debug!("Cache client {} disconnected", id);
    });

    id
  }

  /// Accept TCP connections until `shutdown` fires
  pub async fn serve(
    &self,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
  ) -> Result<()> {
    tracing::info!(
      "Cache host '{}' listening on {} ({})",
      self.name,
      listener.local_addr()?,
      self.encoding
    );

    loop {
      tokio::select! {
        result = listener.accept() => {
          match result {
            Ok((socket, peer)) => {
              if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
              }
              let port = MessagePort::new(socket, self.encoding);
              self.accept(port, Some(peer.to_string()));
            }
            Err(e) => {
              tracing::error!("Accept error: {}", e);
            }
          }
        }
        _ = shutdown.recv() => {
          tracing::info!("Cache host '{}' shutting down", self.name);
          break;
        }
      }
    }
    Ok(())
  }
}
