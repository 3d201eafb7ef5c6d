//! How a client context reaches the shared cache host

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::host::CacheHost;
use crate::transport::{Encoding, MessageChannel, MessagePort};

/// A way of reaching "the" shared host process.
///
/// `connect` hands back a fresh, unstarted port; starting it is the
/// handshake's job.
#[async_trait]
pub trait SharedHostPlatform: Send + Sync {
  /// Whether a shared host can exist here at all
  fn is_available(&self) -> bool;

  async fn connect(&self) -> Result<MessagePort>;
}

/// Host daemon reached over TCP
#[derive(Debug, Clone)]
pub struct TcpPlatform {
  address: String,
  encoding: Encoding,
}

impl TcpPlatform {
  pub fn new(address: impl Into<String>, encoding: Encoding) -> Self {
    Self {
      address: address.into(),
      encoding,
    }
  }

  pub fn address(&self) -> &str {
    &self.address
  }
}

#[async_trait]
impl SharedHostPlatform for TcpPlatform {
  fn is_available(&self) -> bool {
    !self.address.trim().is_empty()
  }

  async fn connect(&self) -> Result<MessagePort> {
    let stream = TcpStream::connect(&self.address).await?;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to cache host at {}", self.address);
    Ok(MessagePort::new(stream, self.encoding))
  }
}

/// Host living in this process, shared by every caller using the same name
#[derive(Debug, Clone)]
pub struct InProcessPlatform {
  name: String,
  encoding: Encoding,
}

impl InProcessPlatform {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      encoding: Encoding::default(),
    }
  }

  pub fn with_encoding(mut self, encoding: Encoding) -> Self {
    self.encoding = encoding;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

#[async_trait]
impl SharedHostPlatform for InProcessPlatform {
  fn is_available(&self) -> bool {
    true
  }

  async fn connect(&self) -> Result<MessagePort> {
    let (client, host_side) = MessageChannel::new(self.encoding).into_ports();
    CacheHost::shared(&self.name).accept(host_side, None);
    Ok(client)
  }
}

/// No shared host here (headless contexts, tests of the fallback path)
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailablePlatform;

#[async_trait]
impl SharedHostPlatform for UnavailablePlatform {
  fn is_available(&self) -> bool {
    false
  }

  async fn connect(&self) -> Result<MessagePort> {
    Err(Error::Config("no shared cache host available".into()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_availability() {
    assert!(TcpPlatform::new("127.0.0.1:7420", Encoding::Json).is_available());
    assert!(!TcpPlatform::new("  ", Encoding::Json).is_available());
    assert!(InProcessPlatform::new("x").is_available());
    assert!(!UnavailablePlatform.is_available());
  }

  #[tokio::test]
  async fn test_in_process_connect_registers_connection() {
    let platform = InProcessPlatform::new("platform-connect-test");
    let port = platform.connect().await.unwrap();
    assert!(!port.is_started());
    assert_eq!(CacheHost::shared("platform-connect-test").connection_count(), 1);
  }

  #[tokio::test]
  async fn test_unavailable_connect_fails() {
    assert!(matches!(
      UnavailablePlatform.connect().await,
      Err(Error::Config(_))
    ));
  }
}
