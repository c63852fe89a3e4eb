use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::PriceRefreshConfig;

use super::table::PriceTable;

/// `{coin_id: {currency: price}}` as returned by the simple-price endpoint.
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// Fetches fiat prices for the configured symbols from a CoinGecko-style
/// simple-price API.
pub struct PriceFetcher {
    client: reqwest::Client,
    config: PriceRefreshConfig,
}

impl PriceFetcher {
    pub fn new(config: PriceRefreshConfig) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| eyre::eyre!("Failed to build price API client: {}", e))?;
        Ok(Self { client, config })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config.refresh_interval_secs)
    }

    /// Fetch the latest prices keyed by token symbol.
    ///
    /// The whole response must parse before anything is returned, so callers
    /// either get a complete batch or an error.
    pub async fn fetch(&self) -> eyre::Result<HashMap<String, f64>> {
        if self.config.ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = self
            .config
            .ids
            .values()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", self.config.vs_currency.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let body: SimplePriceResponse = response
            .json()
            .await
            .map_err(|e| eyre::eyre!("Malformed price response: {}", e))?;

        let mut prices = HashMap::new();
        for (symbol, coin_id) in &self.config.ids {
            let price = body
                .get(coin_id)
                .and_then(|quotes| quotes.get(&self.config.vs_currency));
            if let Some(price) = price {
                prices.insert(symbol.clone(), *price);
            }
        }
        Ok(prices)
    }

    /// Fetch and publish into the table. On any failure the table is left
    /// exactly as it was.
    pub async fn refresh(&self, table: &PriceTable) -> eyre::Result<usize> {
        let prices = self.fetch().await?;
        Ok(table.apply(&prices))
    }
}

/// Refresh prices immediately, then on every interval until shutdown.
pub async fn run_price_refresher(
    fetcher: PriceFetcher,
    table: PriceTable,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(fetcher.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        symbols = fetcher.config.ids.len(),
        interval_secs = fetcher.config.refresh_interval_secs,
        "Price refresher started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown received, stopping price refresher");
                break;
            }
        }

        match fetcher.refresh(&table).await {
            Ok(updated) => tracing::info!(updated, "Prices refreshed"),
            Err(e) => tracing::warn!(error = %e, "Price refresh failed, using cached prices"),
        }
    }
}
