use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::StorageOptions;
use crate::error::{Error, Result};
use crate::persister::PersisterOptions;
use crate::platform::TcpPlatform;
use crate::transport::Encoding;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  // ${VAR_NAME} first, it is the more specific form
  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!(
        "{}{}{}",
        &result[..start],
        value,
        &result[start + end + 1..]
      );
    } else {
      break;
    }
  }

  // $VAR_NAME (word boundary: alphanumeric + underscore)
  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let var_name = &rest[..var_len];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += result[i..].chars().next().map_or(1, char::len_utf8);
  }

  result
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub host: HostSection,
  #[serde(default)]
  pub client: ClientSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

/// Where the shared host lives and how it speaks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
  /// Stable name every client resolves to the same host
  #[serde(default = "default_name")]
  pub name: String,
  #[serde(default = "default_bind")]
  pub bind: String,
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default)]
  pub encoding: Encoding,
  /// Seconds between stats log lines (0 = off)
  #[serde(default)]
  pub stats_interval: u64,
}

fn default_name() -> String {
  "crosscache".into()
}

fn default_bind() -> String {
  "127.0.0.1".into()
}

fn default_port() -> u16 {
  7420
}

impl Default for HostSection {
  fn default() -> Self {
    Self {
      name: default_name(),
      bind: default_bind(),
      port: default_port(),
      encoding: Encoding::default(),
      stats_interval: 0,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
  /// Host address; defaults to the host section's bind:port
  #[serde(default)]
  pub address: Option<String>,
  /// Cache slot for this application
  #[serde(default)]
  pub key: Option<String>,
  /// false = use the no-op persister
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub encoding: Encoding,
  /// 0 = wait for the host's Ready indefinitely
  #[serde(default)]
  pub ready_timeout_ms: u64,
  /// 0 = wait for each reply indefinitely
  #[serde(default)]
  pub call_timeout_ms: u64,
}

fn default_enabled() -> bool {
  true
}

impl Default for ClientSection {
  fn default() -> Self {
    Self {
      address: None,
      key: None,
      enabled: default_enabled(),
      encoding: Encoding::default(),
      ready_timeout_ms: 0,
      call_timeout_ms: 0,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

fn millis(ms: u64) -> Option<Duration> {
  (ms > 0).then(|| Duration::from_millis(ms))
}

impl CacheConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self> {
    let expanded = expand_env_vars(content);
    let config: Self =
      serde_yaml::from_str(&expanded).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn find_and_load() -> Result<Option<Self>> {
    for p in ["crosscache.yaml", "crosscache.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn validate(&self) -> Result<()> {
    if self.host.name.trim().is_empty() {
      return Err(Error::Config("host.name must not be empty".into()));
    }
    if matches!(&self.client.key, Some(key) if key.is_empty()) {
      return Err(Error::Config("client.key must not be empty".into()));
    }
    Ok(())
  }

  /// Address the host binds to
  pub fn address(&self) -> String {
    format!("{}:{}", self.host.bind, self.host.port)
  }

  /// Address clients connect to
  pub fn client_address(&self) -> String {
    self.client.address.clone().unwrap_or_else(|| self.address())
  }

  pub fn storage_options(&self) -> StorageOptions {
    StorageOptions {
      ready_timeout: millis(self.client.ready_timeout_ms),
      call_timeout: millis(self.client.call_timeout_ms),
    }
  }

  pub fn persister_options(&self) -> PersisterOptions {
    let options = PersisterOptions::default().with_storage_options(self.storage_options());
    let options = match &self.client.key {
      Some(key) => options.with_key(key.clone()),
      None => options,
    };
    if self.client.enabled {
      options
    } else {
      options.disabled()
    }
  }

  pub fn tcp_platform(&self) -> TcpPlatform {
    TcpPlatform::new(self.client_address(), self.client.encoding)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::persister::StorageOption;

  #[test]
  fn test_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.host.name, "crosscache");
    assert_eq!(config.address(), "127.0.0.1:7420");
    assert_eq!(config.client_address(), "127.0.0.1:7420");
    assert_eq!(config.host.encoding, Encoding::Json);
    assert!(config.client.enabled);
    assert_eq!(config.storage_options(), StorageOptions::default());
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_from_yaml_sections() {
    let config = CacheConfig::from_yaml(
      r#"
host:
  name: tabs
  port: 9100
  encoding: msgpack
client:
  key: app1
  ready_timeout_ms: 1500
"#,
    )
    .unwrap();
    assert_eq!(config.host.name, "tabs");
    assert_eq!(config.address(), "127.0.0.1:9100");
    assert_eq!(config.host.encoding, Encoding::MsgPack);
    assert_eq!(config.client.key.as_deref(), Some("app1"));
    assert_eq!(
      config.storage_options().ready_timeout,
      Some(Duration::from_millis(1500))
    );
    assert_eq!(config.storage_options().call_timeout, None);
  }

  #[test]
  fn test_env_expansion() {
    std::env::set_var("CROSSCACHE_TEST_PORT", "9911");
    std::env::set_var("CROSSCACHE_TEST_NAME", "from-env");
    let config = CacheConfig::from_yaml(
      "host:\n  name: $CROSSCACHE_TEST_NAME\n  port: ${CROSSCACHE_TEST_PORT}\n",
    )
    .unwrap();
    assert_eq!(config.host.name, "from-env");
    assert_eq!(config.host.port, 9911);
  }

  #[test]
  fn test_non_ascii_text() {
    std::env::set_var("CROSSCACHE_TEST_SUFFIX", "ü");
    let config = CacheConfig::from_yaml(
      "# caché de requêtes\nhost:\n  name: café-$CROSSCACHE_TEST_SUFFIX\n",
    )
    .unwrap();
    assert_eq!(config.host.name, "café-ü");
  }

  #[test]
  fn test_rejects_empty_name() {
    let err = CacheConfig::from_yaml("host:\n  name: ''\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
  }

  #[test]
  fn test_disabled_client_yields_disabled_storage() {
    let mut config = CacheConfig::default();
    config.client.enabled = false;
    config.client.key = Some("app2".into());
    let options = config.persister_options();
    assert!(matches!(options.storage, StorageOption::Disabled));
    assert_eq!(options.key.as_deref(), Some("app2"));
  }

  #[test]
  fn test_client_address_override() {
    let mut config = CacheConfig::default();
    config.client.address = Some("10.0.0.5:7000".into());
    assert_eq!(config.client_address(), "10.0.0.5:7000");
    assert_eq!(config.tcp_platform().address(), "10.0.0.5:7000");
  }
}
