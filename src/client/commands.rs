use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{AsyncStorage, SharedStorage};
use crate::config::CacheConfig;
use crate::error::Error;
use crate::platform::SharedHostPlatform;
use crate::transport::Encoding;

#[derive(Parser)]
#[command(name = "crosscache", about = "crosscache client", version)]
pub struct ClientArgs {
  /// Host address (host:port); defaults to the config file's client address
  #[arg(short, long, env = "CROSSCACHE_ADDR")]
  pub addr: Option<String>,
  #[arg(short, long)]
  pub config: Option<String>,
  #[arg(long)]
  pub encoding: Option<Encoding>,
  /// Give up on the handshake and on each reply after this many milliseconds
  #[arg(long)]
  pub timeout_ms: Option<u64>,
  #[arg(long, default_value = "pretty")]
  pub format: OutputFormat,
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
  Json,
  #[default]
  Pretty,
}

#[derive(Subcommand)]
pub enum Commands {
  /// Read the value stored under a key
  Get { key: String },
  /// Store a JSON value under a key (text that is not JSON is stored as a string)
  Set { key: String, value: String },
  /// Remove a key
  Remove { key: String },
  /// Check that the host answers the handshake
  Status,
}

/// JSON if it parses, otherwise the raw text as a string
pub fn parse_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load_config(args: &ClientArgs) -> Result<CacheConfig, anyhow::Error> {
  let mut config = if let Some(path) = &args.config {
    CacheConfig::from_file(path)?
  } else {
    CacheConfig::find_and_load()?.unwrap_or_default()
  };

  if let Some(addr) = &args.addr {
    config.client.address = Some(addr.clone());
  }
  if let Some(encoding) = args.encoding {
    config.client.encoding = encoding;
  }
  if let Some(ms) = args.timeout_ms {
    config.client.ready_timeout_ms = ms;
    config.client.call_timeout_ms = ms;
  }
  Ok(config)
}

fn print_value(value: Option<&Value>, format: OutputFormat) -> Result<(), anyhow::Error> {
  match (value, format) {
    (Some(v), OutputFormat::Json) => println!("{}", serde_json::to_string(v)?),
    (Some(v), OutputFormat::Pretty) => println!("{}", serde_json::to_string_pretty(v)?),
    (None, OutputFormat::Json) => println!("null"),
    (None, OutputFormat::Pretty) => println!("{}", "(nil)".dimmed()),
  }
  Ok(())
}

pub async fn run(args: ClientArgs) -> Result<(), anyhow::Error> {
  let config = load_config(&args)?;
  let address = config.client_address();
  execute(args, config).await.map_err(|e| match e.downcast_ref::<Error>() {
    Some(err) if err.is_disconnect() => {
      anyhow::anyhow!("Cache host at {} closed the connection", address)
    }
    _ => e,
  })
}

async fn execute(args: ClientArgs, config: CacheConfig) -> Result<(), anyhow::Error> {
  let platform = config.tcp_platform();
  let started = Instant::now();

  let port = platform
    .connect()
    .await
    .map_err(|e| anyhow::anyhow!("Cannot reach cache host at {}: {}", platform.address(), e))?;
  let storage = SharedStorage::connect(port, config.storage_options())?;

  match args.command {
    Commands::Get { key } => {
      let value = storage.get_item(&key).await?;
      print_value(value.as_ref(), args.format)?;
    }
    Commands::Set { key, value } => {
      let value = storage.set_item(&key, parse_value(&value)).await?;
      match args.format {
        OutputFormat::Json => print_value(Some(&value), args.format)?,
        OutputFormat::Pretty => println!("{}", "OK".green()),
      }
    }
    Commands::Remove { key } => {
      storage.remove_item(&key).await?;
      match args.format {
        OutputFormat::Json => println!("null"),
        OutputFormat::Pretty => println!("{}", "OK".green()),
      }
    }
    Commands::Status => {
      storage.wait_ready().await?;
      let elapsed: Duration = started.elapsed();
      let host = storage.host_name().unwrap_or_default();
      match args.format {
        OutputFormat::Json => println!(
          "{}",
          serde_json::json!({
            "host": host,
            "address": platform.address(),
            "state": storage.handshake_state().to_string(),
            "latency_ms": elapsed.as_millis() as u64,
          })
        ),
        OutputFormat::Pretty => {
          println!("{} {}", "Host:".bold(), host.cyan());
          println!("{} {}", "Address:".bold(), platform.address());
          println!("{} {}", "State:".bold(), storage.handshake_state().to_string().green());
          println!("{} {}ms", "Handshake:".bold(), elapsed.as_millis());
        }
      }
    }
  }
  Ok(())
}
