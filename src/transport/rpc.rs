//! Remote calls over a `MessagePort`.
//!
//! The client side numbers every call and keeps a pending map keyed by call
//! id, so replies resolve their own caller in whatever order they arrive. The
//! host side (`expose`) runs each `Call` against a `CallHandler` and answers
//! with a `Reply` or `Error` carrying the same id.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::port::{ListenerId, MessagePort};
use crate::error::{Error, Result};
use crate::types::{Envelope, Method};

type ReplySender = oneshot::Sender<Result<Option<Value>>>;

/// `None` once the channel has closed and no more replies can arrive
type PendingMap = Arc<Mutex<Option<HashMap<u64, ReplySender>>>>;

/// Host-side call surface
#[async_trait]
pub trait CallHandler: Send + Sync {
  async fn handle(
    &self,
    method: Method,
    args: Vec<Value>,
  ) -> std::result::Result<Option<Value>, String>;
}

/// Install a dispatcher on `port` that answers calls with `handler`.
///
/// Calls from one port are handled one at a time, in arrival order. The
/// dispatcher ends when the port closes.
pub fn expose(handler: Arc<dyn CallHandler>, port: MessagePort) -> JoinHandle<()> {
  let (listener_id, mut rx) = port.add_listener();

  tokio::spawn(async move {
    while let Some(msg) = rx.recv().await {
      let Envelope::Call { id, method, args } = msg else {
        continue;
      };

      tracing::trace!("Port {} call {} {}", port.id(), id, method);
      let reply = match handler.handle(method, args).await {
        Ok(value) => Envelope::reply(id, value),
        Err(error) => {
          tracing::debug!("Port {} call {} {} failed: {}", port.id(), id, method, error);
          Envelope::error(id, error)
        }
      };

      match port.post(reply) {
        Ok(()) => {}
        Err(Error::ChannelClosed) => break,
        Err(e) => {
          // Reply could not be framed; the caller still gets an answer
          tracing::warn!("Port {} call {} reply not sent: {}", port.id(), id, e);
          if port.post(Envelope::error(id, e.to_string())).is_err() {
            break;
          }
        }
      }
    }
    port.remove_listener(listener_id);
  })
}

/// Client side of the call transport
pub struct RpcClient {
  port: MessagePort,
  pending: PendingMap,
  next_id: AtomicU64,
  listener_id: ListenerId,
}

impl RpcClient {
  /// Attach the reply listener to `port`. Does not start the port.
  pub fn new(port: MessagePort) -> Self {
    let (listener_id, mut rx) = port.add_listener();
    let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));

    let routes = pending.clone();
    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        let (id, result) = match msg {
          Envelope::Reply { id, value } => (id, Ok(value)),
          Envelope::Error { id, error } => (id, Err(Error::Remote(error))),
          _ => continue,
        };

        let waiter = routes.lock().as_mut().and_then(|map| map.remove(&id));
        match waiter {
          Some(tx) => {
            let _ = tx.send(result);
          }
          None => tracing::debug!("Dropping reply for unknown call {}", id),
        }
      }

      // Dropping the senders fails every call still waiting
      routes.lock().take();
    });

    Self {
      port,
      pending,
      next_id: AtomicU64::new(0),
      listener_id,
    }
  }

  pub fn port(&self) -> &MessagePort {
    &self.port
  }

  /// Number of calls posted but not yet answered
  pub fn in_flight(&self) -> usize {
    self.pending.lock().as_ref().map_or(0, HashMap::len)
  }

  /// Post a call now; the returned future resolves with its reply
  pub fn start_call(&self, method: Method, args: Vec<Value>) -> Result<PendingCall> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (tx, rx) = oneshot::channel();

    match self.pending.lock().as_mut() {
      Some(map) => {
        map.insert(id, tx);
      }
      None => return Err(Error::ChannelClosed),
    }

    if let Err(e) = self.port.post(Envelope::call(id, method, args)) {
      if let Some(map) = self.pending.lock().as_mut() {
        map.remove(&id);
      }
      return Err(e);
    }

    Ok(PendingCall {
      id,
      rx,
      pending: Arc::downgrade(&self.pending),
    })
  }

  pub async fn call(&self, method: Method, args: Vec<Value>) -> Result<Option<Value>> {
    self.start_call(method, args)?.await
  }
}

impl Drop for RpcClient {
  fn drop(&mut self) {
    self.port.remove_listener(self.listener_id);
  }
}

/// A posted call waiting for its reply. Dropping it forgets the call.
pub struct PendingCall {
  id: u64,
  rx: oneshot::Receiver<Result<Option<Value>>>,
  pending: Weak<Mutex<Option<HashMap<u64, ReplySender>>>>,
}

impl PendingCall {
  pub fn id(&self) -> u64 {
    self.id
  }
}

impl Future for PendingCall {
  type Output = Result<Option<Value>>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match Pin::new(&mut self.rx).poll(cx) {
      Poll::Ready(Ok(result)) => Poll::Ready(result),
      Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChannelClosed)),
      Poll::Pending => Poll::Pending,
    }
  }
}

impl Drop for PendingCall {
  fn drop(&mut self) {
    if let Some(pending) = self.pending.upgrade() {
      if let Some(map) = pending.lock().as_mut() {
        map.remove(&self.id);
      }
    }
  }
}
