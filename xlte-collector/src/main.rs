//! xlte-collector — polls an LTE/5G base station over WebSocket JSON-RPC
//! and writes an xlog JSON-Lines trace, driving a DRB sampler pipeline
//! and optional live replay into a `MeasurementLog`. Grounded on
//! `main.rs`'s `tracing_subscriber::fmt().with_env_filter(...)` init
//! pattern and `tokio::spawn` task wiring.

mod config;
mod conn;
mod driver;
mod error;
mod logspec;
mod reader;
mod scheduler;
mod synth;
mod xlog;

use tokio_util::sync::CancellationToken;
use tracing::info;

use config::CollectorConfig;
use scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xlte_collector=info".into()),
        )
        .init();

    info!("xlte-collector v{} starting", env!("CARGO_PKG_VERSION"));

    let config = CollectorConfig::default();
    info!("target base station: {}", config.ws_uri);
    info!("xlog output: {}", config.output_path);

    let token = CancellationToken::new();
    let shutdown_token = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal, detaching");
        shutdown_token.cancel();
    });

    let scheduler = Scheduler::new(config, token)?;
    scheduler.run().await?;

    info!("xlte-collector shut down");
    Ok(())
}
