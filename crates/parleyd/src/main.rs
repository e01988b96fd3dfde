//! parleyd — Parley publish/subscribe chat broker daemon.
//!
//! Usage: `parleyd [port]`. The positional port overrides the config file;
//! everything else comes from `BrokerConfig` resolution.

use anyhow::{Context, Result};
use parley_core::config::BrokerConfig;
use parleyd::Broker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = BrokerConfig::load().context("failed to load configuration")?;
    if let Some(arg) = std::env::args().nth(1) {
        config.port = arg
            .parse()
            .with_context(|| format!("invalid port argument: {arg}"))?;
    }

    tracing::info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        "parleyd starting"
    );

    let broker = Broker::bind(&config).await?;
    broker.run().await
}
