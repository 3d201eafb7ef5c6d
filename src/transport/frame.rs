//! Frame codec for cache channels.
//!
//! ## Frame layout
//! - Length: 4 bytes BE, counts the encoding byte plus the payload (max 64MB)
//! - Encoding: 1 byte (0x01=MessagePack, 0x02=JSON)
//! - Payload: one encoded `Envelope`
//!
//! A reader decodes each frame with the encoding byte it carries, so the two
//! ends of a channel may use different encodings.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::types::Envelope;

/// Snapshots can be large; frames above this are rejected
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// Payload encodings
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
  #[serde(alias = "messagepack")]
  MsgPack = 0x01,
  #[default]
  Json = 0x02,
}

impl TryFrom<u8> for Encoding {
  type Error = Error;
  fn try_from(v: u8) -> Result<Self> {
    match v {
      0x01 => Ok(Self::MsgPack),
      0x02 => Ok(Self::Json),
      other => Err(Error::InvalidEncoding(other)),
    }
  }
}

impl std::fmt::Display for Encoding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Encoding::MsgPack => write!(f, "msgpack"),
      Encoding::Json => write!(f, "json"),
    }
  }
}

impl std::str::FromStr for Encoding {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "json" => Ok(Encoding::Json),
      "msgpack" | "messagepack" | "mp" => Ok(Encoding::MsgPack),
      _ => Err(format!("Unknown encoding: {}", s)),
    }
  }
}

/// Serialize an envelope with the given encoding
pub fn encode(msg: &Envelope, encoding: Encoding) -> Result<Vec<u8>> {
  match encoding {
    // Named fields keep the internally tagged representation intact
    Encoding::MsgPack => Ok(rmp_serde::to_vec_named(msg)?),
    Encoding::Json => Ok(serde_json::to_vec(msg)?),
  }
}

/// Deserialize an envelope with the given encoding
pub fn decode(data: &[u8], encoding: Encoding) -> Result<Envelope> {
  match encoding {
    Encoding::MsgPack => Ok(rmp_serde::from_slice(data)?),
    Encoding::Json => Ok(serde_json::from_slice(data)?),
  }
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(Encoding, Vec<u8>)>>
where
  R: AsyncRead + Unpin,
{
  let length = match reader.read_u32().await {
    Ok(n) => n as usize,
    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  if length > MAX_FRAME_SIZE {
    return Err(Error::FrameTooLarge {
      size: length,
      max: MAX_FRAME_SIZE,
    });
  }
  if length == 0 {
    return Err(Error::InvalidEncoding(0));
  }

  let encoding = Encoding::try_from(reader.read_u8().await?)?;

  let mut payload = vec![0u8; length - 1];
  reader.read_exact(&mut payload).await?;

  Ok(Some((encoding, payload)))
}

/// Frame length for `payload` (encoding byte included), or `FrameTooLarge`
pub fn check_frame_size(payload: &[u8]) -> Result<usize> {
  let length = payload.len() + 1;
  if length > MAX_FRAME_SIZE {
    return Err(Error::FrameTooLarge {
      size: length,
      max: MAX_FRAME_SIZE,
    });
  }
  Ok(length)
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, encoding: Encoding, payload: &[u8]) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  let length = check_frame_size(payload)?;

  writer.write_u32(length as u32).await?;
  writer.write_u8(encoding as u8).await?;
  writer.write_all(payload).await?;
  writer.flush().await?;

  Ok(())
}

/// Encode and write an envelope
pub async fn write_envelope<W>(writer: &mut W, msg: &Envelope, encoding: Encoding) -> Result<()>
where
  W: AsyncWrite + Unpin,
{
  let payload = encode(msg, encoding)?;
  write_frame(writer, encoding, &payload).await
}

/// Read and decode an envelope
pub async fn read_envelope<R>(reader: &mut R) -> Result<Option<Envelope>>
where
  R: AsyncRead + Unpin,
{
  match read_frame(reader).await? {
    Some((encoding, payload)) => Ok(Some(decode(&payload, encoding)?)),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Method;
  use serde_json::json;

  #[test]
  fn test_encoding_conversion() {
    assert_eq!(Encoding::try_from(0x01).unwrap(), Encoding::MsgPack);
    assert_eq!(Encoding::try_from(0x02).unwrap(), Encoding::Json);
    assert!(matches!(
      Encoding::try_from(0x99),
      Err(Error::InvalidEncoding(0x99))
    ));
    assert_eq!("messagepack".parse::<Encoding>().unwrap(), Encoding::MsgPack);
  }

  #[tokio::test]
  async fn test_frames_carry_their_own_encoding() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    let call = Envelope::call(3, Method::Set, vec![json!("app1"), json!({"n": 1})]);

    write_envelope(&mut a, &call, Encoding::MsgPack).await.unwrap();
    write_envelope(&mut a, &Envelope::Connect, Encoding::Json).await.unwrap();

    assert_eq!(read_envelope(&mut b).await.unwrap(), Some(call));
    assert_eq!(read_envelope(&mut b).await.unwrap(), Some(Envelope::Connect));
  }

  #[tokio::test]
  async fn test_clean_close_reads_none() {
    let (a, mut b) = tokio::io::duplex(64);
    drop(a);
    assert!(read_frame(&mut b).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_rejects_oversized_frame() {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
    assert!(matches!(
      read_frame(&mut b).await,
      Err(Error::FrameTooLarge { .. })
    ));
  }

  #[tokio::test]
  async fn test_rejects_unknown_encoding_byte() {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.write_u32(2).await.unwrap();
    a.write_u8(0x42).await.unwrap();
    a.write_u8(0).await.unwrap();
    assert!(matches!(
      read_frame(&mut b).await,
      Err(Error::InvalidEncoding(0x42))
    ));
  }
}
