use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::CacheHost;
use crate::config::CacheConfig;

pub struct Daemon {
  config: CacheConfig,
  host: Arc<CacheHost>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: CacheConfig) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    let host = Arc::new(CacheHost::new(&config.host.name, config.host.encoding));
    Self {
      config,
      host,
      shutdown_tx,
    }
  }

  pub fn host(&self) -> &Arc<CacheHost> {
    &self.host
  }

  /// Stop accepting connections and end the stats task
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let addr = self.config.address();
    let listener = TcpListener::bind(&addr).await?;
    self.run_with_listener(listener).await
  }

  /// Serve on an already-bound listener (port 0 in tests)
  pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), anyhow::Error> {
    if self.config.host.stats_interval > 0 {
      let host = self.host.clone();
      let interval = Duration::from_secs(self.config.host.stats_interval);
      let mut shutdown = self.shutdown_tx.subscribe();
      tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
          tokio::select! {
            _ = ticker.tick() => {
              let stats = host.stats();
              tracing::info!(
                "Cache '{}': {} keys, {} bytes, {} clients, hit rate {:.1}%",
                host.name(),
                stats.keys,
                stats.memory_used,
                host.connection_count(),
                stats.hit_rate() * 100.0
              );
            }
            _ = shutdown.recv() => break,
          }
        }
      });
    }

    self
      .host
      .serve(listener, self.shutdown_tx.subscribe())
      .await?;
    Ok(())
  }
}
