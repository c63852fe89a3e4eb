use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use transfer_sentinel::config::Config;
use transfer_sentinel::notify::dispatcher::Dispatcher;
use transfer_sentinel::orchestrator::spawn_sessions;
use transfer_sentinel::prices::coingecko::{run_price_refresher, PriceFetcher};
use transfer_sentinel::prices::table::PriceTable;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=debug for more detail)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("Transfer Sentinel starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        chains = config.chains.len(),
        "Configuration loaded from {}",
        config_path
    );

    let dispatcher = Arc::new(Dispatcher::from_config(&config.sinks)?);
    let prices = PriceTable::new();
    let shutdown = CancellationToken::new();

    // Background price refresher
    let refresher = if config.prices.enabled && !config.prices.ids.is_empty() {
        let fetcher = PriceFetcher::new(config.prices.clone())?;
        Some(tokio::spawn(run_price_refresher(
            fetcher,
            prices.clone(),
            shutdown.clone(),
        )))
    } else {
        tracing::info!("Price refresh disabled, valuing with configured prices");
        None
    };

    // Spawn one session per usable chain
    let sessions = spawn_sessions(&config, &prices, &dispatcher, &shutdown);
    if sessions.is_empty() {
        shutdown.cancel();
        return Err(eyre::eyre!("No chain has a usable configuration"));
    }

    let streaming = sessions.iter().filter(|s| s.mode == "stream").count();
    tracing::info!(
        sinks = dispatcher.sink_count(),
        min_usd_value = config.min_usd_value,
        stream_chains = streaming,
        poll_chains = sessions.len() - streaming,
        skipped_chains = config.chains.len() - sessions.len(),
        "All chain sessions started. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping all sessions...");
    shutdown.cancel();

    for session in sessions {
        if let Err(e) = session.handle.await {
            tracing::error!(chain = %session.chain, error = %e, "Chain session panicked");
        }
    }
    if let Some(refresher) = refresher {
        if let Err(e) = refresher.await {
            tracing::error!(error = %e, "Price refresher panicked");
        }
    }

    tracing::info!("Transfer Sentinel stopped gracefully");
    Ok(())
}
