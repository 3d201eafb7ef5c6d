use clap::Parser;
use crosscache::config::CacheConfig;
use crosscache::host::Daemon;
use crosscache::transport::Encoding;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "crosscached", about = "crosscache host daemon", version)]
struct Args {
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long)]
  host: Option<String>,
  #[arg(short, long)]
  port: Option<u16>,
  /// Name clients see in the Ready handshake
  #[arg(long, env = "CROSSCACHE_NAME")]
  name: Option<String>,
  #[arg(long)]
  encoding: Option<Encoding>,
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    CacheConfig::from_file(path)?
  } else {
    CacheConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(host) = args.host {
    config.host.bind = host;
  }
  if let Some(port) = args.port {
    config.host.port = port;
  }
  if let Some(name) = args.name {
    config.host.name = name;
  }
  if let Some(encoding) = args.encoding {
    config.host.encoding = encoding;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }
  config.validate()?;

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let daemon = Arc::new(Daemon::new(config));
  let daemon_clone = daemon.clone();

  // Handle shutdown signals (SIGINT, SIGTERM)
  tokio::spawn(async move {
    shutdown_signal().await;
    daemon_clone.shutdown();

    // Let in-flight replies drain
    tokio::time::sleep(Duration::from_secs(1)).await;
    tracing::info!("Shutdown complete");
    std::process::exit(0);
  });

  daemon.run().await
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("Failed to install Ctrl+C handler: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!("Failed to install SIGTERM handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
