use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote operation exposed by the cache host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
  Get,
  Set,
  Remove,
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Method::Get => write!(f, "get"),
      Method::Set => write!(f, "set"),
      Method::Remove => write!(f, "remove"),
    }
  }
}

impl std::str::FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "get" | "getitem" => Ok(Method::Get),
      "set" | "setitem" => Ok(Method::Set),
      "remove" | "removeitem" | "delete" => Ok(Method::Remove),
      _ => Err(format!("Unknown method: {}", s)),
    }
  }
}

/// Every message carried on a cache channel.
///
/// Handshake messages (`Connect`, `Ready`) are their own variants so the call
/// dispatcher never has to guess what a message is from its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
  /// Client -> host: the client is listening and wants a `Ready`
  Connect,
  /// Host -> client: the host's dispatcher is installed
  Ready { host: String },
  /// Client -> host: invoke `method` with `args`
  Call {
    id: u64,
    method: Method,
    #[serde(default)]
    args: Vec<Value>,
  },
  /// Host -> client: result of call `id` (`None` when absent)
  Reply {
    id: u64,
    #[serde(default)]
    value: Option<Value>,
  },
  /// Host -> client: call `id` could not be executed
  Error { id: u64, error: String },
}

impl Envelope {
  pub fn ready(host: impl Into<String>) -> Self {
    Self::Ready { host: host.into() }
  }

  pub fn call(id: u64, method: Method, args: Vec<Value>) -> Self {
    Self::Call { id, method, args }
  }

  pub fn reply(id: u64, value: Option<Value>) -> Self {
    Self::Reply { id, value }
  }

  pub fn error(id: u64, error: impl Into<String>) -> Self {
    Self::Error {
      id,
      error: error.into(),
    }
  }

  /// Call id for call/reply traffic, `None` for handshake messages
  pub fn call_id(&self) -> Option<u64> {
    match self {
      Self::Call { id, .. } | Self::Reply { id, .. } | Self::Error { id, .. } => Some(*id),
      Self::Connect | Self::Ready { .. } => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_method_parse() {
    assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
    assert_eq!("setItem".parse::<Method>().unwrap(), Method::Set);
    assert_eq!("delete".parse::<Method>().unwrap(), Method::Remove);
    assert!("flush".parse::<Method>().is_err());
  }

  #[test]
  fn test_call_id() {
    assert_eq!(Envelope::call(7, Method::Get, vec![json!("k")]).call_id(), Some(7));
    assert_eq!(Envelope::reply(8, None).call_id(), Some(8));
    assert_eq!(Envelope::error(9, "bad").call_id(), Some(9));
    assert_eq!(Envelope::Connect.call_id(), None);
    assert_eq!(Envelope::ready("h").call_id(), None);
  }
}
