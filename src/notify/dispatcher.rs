use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;

use crate::config::SinksConfig;
use crate::indexer::types::{ChainEndpoint, ValuedTransfer};

/// Body POSTed to every sink for a qualifying transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkPayload {
    pub recipient: String,
    pub sender: String,
    pub contract: String,
    pub chain_id: u64,
    pub stream_endpoint: String,
    pub rpc_endpoint: String,
}

impl SinkPayload {
    pub fn new(chain: &ChainEndpoint, valued: &ValuedTransfer) -> Self {
        let transfer = &valued.transfer;
        Self {
            recipient: transfer.recipient.clone(),
            sender: transfer.sender.clone(),
            contract: transfer.contract.clone(),
            chain_id: chain.chain_id,
            stream_endpoint: chain.stream_url.clone().unwrap_or_default(),
            rpc_endpoint: chain.rpc_url.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SinkTarget {
    pub name: String,
    pub url: String,
}

/// Result of one delivery attempt. Timeouts, transport errors and non-2xx
/// responses all count as a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub sink: String,
    pub outcome: DeliveryOutcome,
}

/// Fans a qualifying transfer out to every configured sink.
///
/// Best effort and at most once: each sink gets exactly one attempt per
/// transfer, and no sink's failure affects the others.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    sinks: Vec<SinkTarget>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, sinks: Vec<SinkTarget>, timeout: Duration) -> Self {
        Self {
            client,
            sinks,
            timeout,
        }
    }

    pub fn from_config(config: &SinksConfig) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| eyre::eyre!("Failed to build sink HTTP client: {}", e))?;
        let sinks = config
            .targets
            .iter()
            .map(|t| SinkTarget {
                name: t.name.clone(),
                url: t.url.clone(),
            })
            .collect();
        Ok(Self::new(client, sinks, Duration::from_millis(config.timeout_ms)))
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver to all sinks concurrently and report each outcome in sink order.
    pub async fn dispatch(
        &self,
        chain: &ChainEndpoint,
        valued: &ValuedTransfer,
    ) -> Vec<DeliveryReport> {
        let payload = SinkPayload::new(chain, valued);

        tracing::info!(
            chain = %chain.name,
            symbol = %valued.symbol,
            usd_value = %format!("{:.2}", valued.usd_value),
            tx = valued.transfer.tx_hash.as_deref().unwrap_or("N/A"),
            payload = %serde_json::to_string(&payload).unwrap_or_default(),
            "Qualifying transfer"
        );

        let attempts = self.sinks.iter().map(|sink| self.deliver(sink, &payload));
        let outcomes = join_all(attempts).await;

        self.sinks
            .iter()
            .zip(outcomes)
            .map(|(sink, outcome)| {
                match &outcome {
                    DeliveryOutcome::Delivered { status } => tracing::info!(
                        chain = %chain.name,
                        sink = %sink.name,
                        status,
                        "Sink delivery succeeded"
                    ),
                    DeliveryOutcome::Failed { error } => tracing::warn!(
                        chain = %chain.name,
                        sink = %sink.name,
                        error = %error,
                        "Sink delivery failed"
                    ),
                }
                DeliveryReport {
                    sink: sink.name.clone(),
                    outcome,
                }
            })
            .collect()
    }

    async fn deliver(&self, sink: &SinkTarget, payload: &SinkPayload) -> DeliveryOutcome {
        let result = self
            .client
            .post(&sink.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(response) => DeliveryOutcome::Delivered {
                status: response.status().as_u16(),
            },
            Err(e) => DeliveryOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}
