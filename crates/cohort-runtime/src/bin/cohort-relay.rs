//! Cohort reference relay
//!
//! Usage: `cohort-relay [config.json]`
//!
//! `COHORT_BIND` overrides the bind address; `RUST_LOG` the log filter.

use anyhow::{Context, Result};
use cohort_runtime::{init_tracing, RelayConfig};
use cohort_transport::UdpRelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => RelayConfig::default(),
    }
    .with_env()
    .context("applying environment overrides")?;

    init_tracing(config.log_format).context("initialising logging")?;

    let server = UdpRelayServer::bind(config.udp())
        .await
        .with_context(|| format!("binding {}", config.bind))?;

    server
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(target: "relay", %err, "signal handler failed");
            }
        })
        .await?;

    tracing::info!(target: "relay", "relay stopped");
    Ok(())
}
