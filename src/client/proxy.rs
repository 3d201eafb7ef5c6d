//! Client storage proxy backed by a cache host

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

use super::handshake::{Handshake, HandshakeState};
use super::storage::AsyncStorage;
use crate::error::{Error, Result};
use crate::transport::{MessagePort, RpcClient};
use crate::types::Method;

/// Optional bounds on the two waits of every operation. `None` waits forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageOptions {
  pub ready_timeout: Option<Duration>,
  pub call_timeout: Option<Duration>,
}

/// `AsyncStorage` whose operations run on a cache host.
///
/// Every operation waits for the handshake on its own before posting its
/// call. Calls are posted in the order the operations were invoked; their
/// replies may come back in any order.
pub struct SharedStorage {
  rpc: RpcClient,
  handshake: Handshake,
  // FIFO: held from the readiness wait until the call is posted
  dispatch_gate: Mutex<()>,
  options: StorageOptions,
}

impl SharedStorage {
  /// Attach to a fresh, unstarted port and begin the handshake
  pub fn connect(port: MessagePort, options: StorageOptions) -> Result<Self> {
    let rpc = RpcClient::new(port.clone());
    let handshake = Handshake::begin(&port)?;
    tracing::debug!("Shared storage connecting on port {}", port.id());

    Ok(Self {
      rpc,
      handshake,
      dispatch_gate: Mutex::new(()),
      options,
    })
  }

  pub fn handshake_state(&self) -> HandshakeState {
    self.handshake.state()
  }

  pub fn host_name(&self) -> Option<String> {
    self.handshake.host_name()
  }

  pub async fn wait_ready(&self) -> Result<()> {
    self.handshake.wait_ready(self.options.ready_timeout).await
  }

  pub fn port(&self) -> &MessagePort {
    self.rpc.port()
  }

  async fn invoke(&self, method: Method, args: Vec<Value>) -> Result<Option<Value>> {
    let pending = {
      let _gate = self.dispatch_gate.lock().await;
      self.handshake.wait_ready(self.options.ready_timeout).await?;
      self.rpc.start_call(method, args)?
    };

    match self.options.call_timeout {
      Some(after) => tokio::time::timeout(after, pending)
        .await
        .map_err(|_| Error::Timeout {
          phase: "reply",
          after,
        })?,
      None => pending.await,
    }
  }
}

#[async_trait]
impl AsyncStorage for SharedStorage {
  async fn get_item(&self, key: &str) -> Result<Option<Value>> {
    self.invoke(Method::Get, vec![Value::String(key.to_string())]).await
  }

  async fn set_item(&self, key: &str, value: Value) -> Result<Value> {
    self
      .invoke(
        Method::Set,
        vec![Value::String(key.to_string()), value.clone()],
      )
      .await?;
    Ok(value)
  }

  async fn remove_item(&self, key: &str) -> Result<()> {
    self
      .invoke(Method::Remove, vec![Value::String(key.to_string())])
      .await?;
    Ok(())
  }
}
