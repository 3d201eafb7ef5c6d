//! Readiness handshake.
//!
//! `Unstarted -> WaitingForReady -> Ready`. The `Ready` listener is attached
//! before the port is started so a `Ready` the host posted early is never
//! missed. `Ready` is terminal.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::transport::MessagePort;
use crate::types::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
  Unstarted,
  WaitingForReady,
  Ready,
}

impl std::fmt::Display for HandshakeState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      HandshakeState::Unstarted => write!(f, "unstarted"),
      HandshakeState::WaitingForReady => write!(f, "waiting-for-ready"),
      HandshakeState::Ready => write!(f, "ready"),
    }
  }
}

pub struct Handshake {
  state: watch::Receiver<HandshakeState>,
  host: Arc<Mutex<Option<String>>>,
}

impl Handshake {
  /// Listen for `Ready`, start the port, then announce with `Connect`
  pub fn begin(port: &MessagePort) -> Result<Self> {
    let (state_tx, state_rx) = watch::channel(HandshakeState::Unstarted);

    let (listener_id, mut rx) = port.add_listener();
    port.start();
    state_tx.send_replace(HandshakeState::WaitingForReady);
    port.post(Envelope::Connect)?;

    let host = Arc::new(Mutex::new(None));
    let host_name = host.clone();
    let weak = port.downgrade();
    let port_id = port.id();
    tokio::spawn(async move {
      while let Some(msg) = rx.recv().await {
        if let Envelope::Ready { host } = msg {
          if let Some(port) = weak.upgrade() {
            port.remove_listener(listener_id);
          }
          tracing::debug!("Port {} ready (host {})", port_id, host);
          *host_name.lock() = Some(host);
          state_tx.send_replace(HandshakeState::Ready);
          return;
        }
      }
      tracing::debug!("Port {} closed before ready", port_id);
    });

    Ok(Self {
      state: state_rx,
      host,
    })
  }

  pub fn state(&self) -> HandshakeState {
    *self.state.borrow()
  }

  pub fn is_ready(&self) -> bool {
    self.state() == HandshakeState::Ready
  }

  /// Name the host announced in its `Ready`
  pub fn host_name(&self) -> Option<String> {
    self.host.lock().clone()
  }

  /// Wait until `Ready`. Without a timeout this waits for as long as the
  /// host stays silent; a channel that closes first fails with
  /// `ChannelClosed`.
  pub async fn wait_ready(&self, timeout: Option<Duration>) -> Result<()> {
    let mut rx = self.state.clone();
    let wait = async move {
      loop {
        if *rx.borrow_and_update() == HandshakeState::Ready {
          return Ok(());
        }
        if rx.changed().await.is_err() {
          return if *rx.borrow() == HandshakeState::Ready {
            Ok(())
          } else {
            Err(Error::ChannelClosed)
          };
        }
      }
    };

    match timeout {
      Some(after) => tokio::time::timeout(after, wait)
        .await
        .map_err(|_| Error::Timeout {
          phase: "ready",
          after,
        })?,
      None => wait.await,
    }
  }
}
