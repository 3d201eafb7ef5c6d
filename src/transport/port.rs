//! One end of a cache channel.
//!
//! A `MessagePort` wraps any duplex byte stream. Posting is available as soon
//! as the port exists and encodes on the caller's side, so an envelope that
//! cannot be sent fails alone. Inbound envelopes only flow after `start()`. Until then
//! they stay in the underlying stream. Each inbound envelope is delivered to
//! every listener attached at that moment and dropped if there is none.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::frame::{self, Encoding};
use crate::error::{Error, Result};
use crate::types::Envelope;

pub type ListenerId = u64;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Default)]
struct Listeners {
  next_id: ListenerId,
  entries: Vec<(ListenerId, mpsc::UnboundedSender<Envelope>)>,
}

impl Listeners {
  fn deliver(&mut self, msg: &Envelope) -> usize {
    self.entries.retain(|(_, tx)| tx.send(msg.clone()).is_ok());
    self.entries.len()
  }
}

struct PortInner {
  id: Uuid,
  encoding: Encoding,
  outgoing: mpsc::UnboundedSender<Vec<u8>>,
  listeners: Arc<Mutex<Listeners>>,
  reader: Mutex<Option<BoxedReader>>,
  closed: Arc<watch::Sender<bool>>,
}

impl Drop for PortInner {
  fn drop(&mut self) {
    self.closed.send_replace(true);
  }
}

/// Cloneable handle to one end of a channel. The channel closes when the
/// peer goes away, on `close()`, or when the last handle is dropped.
#[derive(Clone)]
pub struct MessagePort {
  inner: Arc<PortInner>,
}

/// Non-owning handle, for tasks that must not keep a port open
#[derive(Clone)]
pub struct WeakPort {
  inner: Weak<PortInner>,
}

impl WeakPort {
  pub fn upgrade(&self) -> Option<MessagePort> {
    self.inner.upgrade().map(|inner| MessagePort { inner })
  }
}

impl MessagePort {
  /// Wrap a duplex stream. Outgoing envelopes are encoded with `encoding`.
  pub fn new<S>(stream: S, encoding: Encoding) -> Self
  where
    S: AsyncRead + AsyncWrite + Send + 'static,
  {
    let id = Uuid::new_v4();
    let (read_half, write_half) = tokio::io::split(stream);
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed = Arc::new(closed_tx);

    // Writer runs from the start; only reading waits for start()
    let writer_closed = closed.clone();
    tokio::spawn(async move {
      let mut writer = BufWriter::new(write_half);
      loop {
        tokio::select! {
          msg = outgoing_rx.recv() => {
            let Some(payload) = msg else { break };
            if let Err(e) = frame::write_frame(&mut writer, encoding, &payload).await {
              tracing::debug!("Port {} write failed: {}", id, e);
              writer_closed.send_replace(true);
              break;
            }
          }
          _ = wait_closed(closed_rx.clone()) => break,
        }
      }
    });

    Self {
      inner: Arc::new(PortInner {
        id,
        encoding,
        outgoing,
        listeners: Arc::new(Mutex::new(Listeners::default())),
        reader: Mutex::new(Some(Box::new(read_half))),
        closed,
      }),
    }
  }

  pub fn id(&self) -> Uuid {
    self.inner.id
  }

  pub fn encoding(&self) -> Encoding {
    self.inner.encoding
  }

  pub fn downgrade(&self) -> WeakPort {
    WeakPort {
      inner: Arc::downgrade(&self.inner),
    }
  }

  /// Attach a listener. It receives every envelope read after this call.
  pub fn add_listener(&self) -> (ListenerId, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut listeners = self.inner.listeners.lock();
    listeners.next_id += 1;
    let id = listeners.next_id;
    // A closed port hands out a receiver that is already finished
    if !self.is_closed() {
      listeners.entries.push((id, tx));
    }
    (id, rx)
  }

  pub fn remove_listener(&self, id: ListenerId) {
    self
      .inner
      .listeners
      .lock()
      .entries
      .retain(|(listener_id, _)| *listener_id != id);
  }

  pub fn listener_count(&self) -> usize {
    self.inner.listeners.lock().entries.len()
  }

  /// Begin delivering inbound envelopes. Later calls are no-ops.
  pub fn start(&self) {
    let Some(mut reader) = self.inner.reader.lock().take() else {
      return;
    };

    let id = self.inner.id;
    let listeners = self.inner.listeners.clone();
    let closed = self.inner.closed.clone();
    let closed_rx = closed.subscribe();

    tokio::spawn(async move {
      loop {
        let next = tokio::select! {
          next = frame::read_envelope(&mut reader) => next,
          _ = wait_closed(closed_rx.clone()) => break,
        };
        match next {
          Ok(Some(msg)) => {
            if listeners.lock().deliver(&msg) == 0 {
              tracing::trace!("Port {} dropped {:?}: no listener", id, msg);
            }
          }
          Ok(None) => {
            tracing::debug!("Port {} closed by peer", id);
            break;
          }
          Err(e @ (Error::Json(_) | Error::MessagePackDecode(_))) => {
            // The frame was consumed whole, so the stream is still aligned
            tracing::warn!("Port {} skipped undecodable message: {}", id, e);
          }
          Err(e) => {
            tracing::debug!("Port {} read failed: {}", id, e);
            break;
          }
        }
      }

      closed.send_replace(true);
      listeners.lock().entries.clear();
    });
  }

  pub fn is_started(&self) -> bool {
    self.inner.reader.lock().is_none()
  }

  /// Queue an envelope for the peer. Encoding and size errors are returned
  /// here and affect only this envelope.
  pub fn post(&self, msg: Envelope) -> Result<()> {
    if self.is_closed() {
      return Err(Error::ChannelClosed);
    }
    let payload = frame::encode(&msg, self.inner.encoding)?;
    frame::check_frame_size(&payload)?;
    self
      .inner
      .outgoing
      .send(payload)
      .map_err(|_| Error::ChannelClosed)
  }

  pub fn is_closed(&self) -> bool {
    *self.inner.closed.borrow()
  }

  /// Close the channel and detach every listener
  pub fn close(&self) {
    self.inner.closed.send_replace(true);
    self.inner.listeners.lock().entries.clear();
  }

  /// Resolves once the channel is closed
  pub async fn closed(&self) {
    wait_closed(self.inner.closed.subscribe()).await
  }
}

impl std::fmt::Debug for MessagePort {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MessagePort")
      .field("id", &self.inner.id)
      .field("encoding", &self.inner.encoding)
      .field("started", &self.is_started())
      .field("closed", &self.is_closed())
      .finish()
  }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
  loop {
    if *rx.borrow_and_update() {
      return;
    }
    if rx.changed().await.is_err() {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::MAX_FRAME_SIZE;
  use serde_json::Value;
  use std::time::Duration;

  fn pair() -> (MessagePort, MessagePort) {
    let (a, b) = tokio::io::duplex(4096);
    (
      MessagePort::new(a, Encoding::Json),
      MessagePort::new(b, Encoding::MsgPack),
    )
  }

  #[tokio::test]
  async fn test_nothing_delivered_before_start() {
    let (a, b) = pair();
    let (_, mut rx) = b.add_listener();
    a.post(Envelope::Connect).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());

    b.start();
    assert_eq!(rx.recv().await, Some(Envelope::Connect));
  }

  #[tokio::test]
  async fn test_every_listener_sees_each_message() {
    let (a, b) = pair();
    let (_, mut first) = b.add_listener();
    let (second_id, mut second) = b.add_listener();
    b.start();

    a.post(Envelope::ready("h")).unwrap();
    assert_eq!(first.recv().await, Some(Envelope::ready("h")));
    assert_eq!(second.recv().await, Some(Envelope::ready("h")));

    b.remove_listener(second_id);
    assert_eq!(b.listener_count(), 1);
    a.post(Envelope::Connect).unwrap();
    assert_eq!(first.recv().await, Some(Envelope::Connect));
    assert!(second.recv().await.is_none());
  }

  #[tokio::test]
  async fn test_dropping_peer_closes_port() {
    let (a, b) = pair();
    let (_, mut rx) = b.add_listener();
    b.start();
    drop(a);

    b.closed().await;
    assert!(b.is_closed());
    assert!(rx.recv().await.is_none());
    assert!(matches!(b.post(Envelope::Connect), Err(Error::ChannelClosed)));
  }

  #[tokio::test]
  async fn test_listener_on_closed_port_is_finished() {
    let (a, _b) = pair();
    a.close();
    let (_, mut rx) = a.add_listener();
    assert!(rx.recv().await.is_none());
  }

  #[tokio::test]
  async fn test_start_is_idempotent() {
    let (a, b) = pair();
    assert!(!b.is_started());
    b.start();
    b.start();
    assert!(b.is_started());
    let (_, mut rx) = b.add_listener();
    a.post(Envelope::Connect).unwrap();
    assert_eq!(rx.recv().await, Some(Envelope::Connect));
  }

  #[tokio::test]
  async fn test_oversized_post_leaves_port_open() {
    let (a, b) = pair();
    let (_, mut rx) = b.add_listener();
    b.start();

    let big = Envelope::reply(1, Some(Value::String("x".repeat(MAX_FRAME_SIZE))));
    assert!(matches!(a.post(big), Err(Error::FrameTooLarge { .. })));
    assert!(!a.is_closed());

    a.post(Envelope::Connect).unwrap();
    assert_eq!(rx.recv().await, Some(Envelope::Connect));
  }
}
