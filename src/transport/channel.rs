//! In-memory channel pairs

use super::frame::Encoding;
use super::port::MessagePort;

/// Bytes buffered in each direction before a writer has to wait for the reader
const CHANNEL_BUFFER: usize = 256 * 1024;

/// Two entangled ports: whatever is posted on one arrives at the other
#[derive(Debug)]
pub struct MessageChannel {
  pub port1: MessagePort,
  pub port2: MessagePort,
}

impl MessageChannel {
  pub fn new(encoding: Encoding) -> Self {
    let (a, b) = tokio::io::duplex(CHANNEL_BUFFER);
    Self {
      port1: MessagePort::new(a, encoding),
      port2: MessagePort::new(b, encoding),
    }
  }

  pub fn into_ports(self) -> (MessagePort, MessagePort) {
    (self.port1, self.port2)
  }
}

impl Default for MessageChannel {
  fn default() -> Self {
    Self::new(Encoding::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Envelope;

  #[tokio::test]
  async fn test_ports_are_entangled() {
    let (left, right) = MessageChannel::new(Encoding::MsgPack).into_ports();
    let (_, mut from_left) = right.add_listener();
    let (_, mut from_right) = left.add_listener();
    left.start();
    right.start();

    left.post(Envelope::Connect).unwrap();
    right.post(Envelope::ready("host")).unwrap();

    assert_eq!(from_left.recv().await, Some(Envelope::Connect));
    assert_eq!(from_right.recv().await, Some(Envelope::ready("host")));
    assert_ne!(left.id(), right.id());
  }
}
