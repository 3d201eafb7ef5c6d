//! Configuration loading from files

use crosscache::config::CacheConfig;
use crosscache::persister::{StorageOption, DEFAULT_CACHE_KEY};
use crosscache::transport::Encoding;
use crosscache::Error;
use std::io::Write;
use std::time::Duration;

fn write_config(content: &str) -> tempfile::NamedTempFile {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  file.write_all(content.as_bytes()).unwrap();
  file
}

#[test]
fn test_load_full_file() {
  let file = write_config(
    r#"
host:
  name: shared-tabs
  bind: 0.0.0.0
  port: 7500
  encoding: msgpack
  stats_interval: 30
client:
  address: cache.local:7500
  key: dashboard
  encoding: messagepack
  ready_timeout_ms: 2000
  call_timeout_ms: 500
logging:
  level: debug
"#,
  );

  let config = CacheConfig::from_file(file.path()).unwrap();
  assert_eq!(config.host.name, "shared-tabs");
  assert_eq!(config.address(), "0.0.0.0:7500");
  assert_eq!(config.host.encoding, Encoding::MsgPack);
  assert_eq!(config.host.stats_interval, 30);
  assert_eq!(config.client_address(), "cache.local:7500");
  assert_eq!(config.client.encoding, Encoding::MsgPack);
  assert_eq!(config.logging.level, "debug");

  let options = config.storage_options();
  assert_eq!(options.ready_timeout, Some(Duration::from_millis(2000)));
  assert_eq!(options.call_timeout, Some(Duration::from_millis(500)));

  let persister = config.persister_options();
  assert_eq!(persister.resolved_key(), "dashboard");
  assert!(matches!(persister.storage, StorageOption::Default));
  assert_eq!(persister.storage_options, options);
}

#[test]
fn test_empty_file_uses_defaults() {
  let file = write_config("{}\n");
  let config = CacheConfig::from_file(file.path()).unwrap();
  assert_eq!(config.address(), "127.0.0.1:7420");
  assert_eq!(config.persister_options().resolved_key(), DEFAULT_CACHE_KEY);
}

#[test]
fn test_missing_file_is_io_error() {
  let err = CacheConfig::from_file("/nonexistent/crosscache.yaml").unwrap_err();
  assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_malformed_yaml_is_config_error() {
  let file = write_config("host: [unterminated\n");
  let err = CacheConfig::from_file(file.path()).unwrap_err();
  assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_unknown_encoding_rejected() {
  let err = CacheConfig::from_yaml("host:\n  encoding: cbor\n").unwrap_err();
  assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_empty_client_key_rejected() {
  let err = CacheConfig::from_yaml("client:\n  key: ''\n").unwrap_err();
  assert!(err.to_string().contains("client.key"));
}
