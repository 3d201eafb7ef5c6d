use clap::Parser;
use crosscache::client::{run, ClientArgs};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = ClientArgs::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  run(args).await
}
