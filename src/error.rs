//! Error types for the shared cache.

use std::time::Duration;
use thiserror::Error;

/// Main error type for crosscache.
///
/// Absent keys are not errors: they surface as `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("MessagePack encode error: {0}")]
  MessagePackEncode(#[from] rmp_serde::encode::Error),

  #[error("MessagePack decode error: {0}")]
  MessagePackDecode(#[from] rmp_serde::decode::Error),

  #[error("Frame too large: {size} > {max}")]
  FrameTooLarge { size: usize, max: usize },

  #[error("Invalid encoding byte: {0:#04x}")]
  InvalidEncoding(u8),

  #[error("Channel closed")]
  ChannelClosed,

  #[error("Timed out after {after:?} waiting for {phase}")]
  Timeout { phase: &'static str, after: Duration },

  #[error("Remote error: {0}")]
  Remote(String),

  #[error("Config error: {0}")]
  Config(String),
}

impl Error {
  /// Whether this error means the connection to the host is gone.
  pub fn is_disconnect(&self) -> bool {
    matches!(self, Error::ChannelClosed)
      || matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
  }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_display() {
    let err = Error::Timeout {
      phase: "ready",
      after: Duration::from_millis(250),
    };
    assert_eq!(err.to_string(), "Timed out after 250ms waiting for ready");
    assert_eq!(
      Error::InvalidEncoding(0x7f).to_string(),
      "Invalid encoding byte: 0x7f"
    );
  }

  #[test]
  fn test_is_disconnect() {
    assert!(Error::ChannelClosed.is_disconnect());
    let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
    assert!(Error::Io(eof).is_disconnect());
    assert!(!Error::Remote("boom".into()).is_disconnect());
  }
}
