use alloy::providers::ProviderBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{ChainConfig, Config, PollConfig, StreamConfig};
use crate::indexer::poller::{self, AlloyLogSource, LogSource, PollCursor, PollOutcome};
use crate::indexer::stream::{self, LogSubscription, StreamError};
use crate::indexer::types::RawLog;
use crate::notify::dispatcher::Dispatcher;
use crate::pipeline::TransferPipeline;
use crate::prices::table::PriceTable;
use crate::tokens::registry::{build_chain_endpoint, build_token_map, watched_addresses};

/// Logs received but not yet dispatched. A full queue stalls the reader.
const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Process-wide knobs every chain session shares.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub min_usd_value: f64,
    pub stream: StreamConfig,
    pub poll: PollConfig,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            min_usd_value: config.min_usd_value,
            stream: config.stream.clone(),
            poll: config.poll.clone(),
        }
    }
}

/// How a session receives logs. Chosen once when the session is built.
pub enum Transport {
    Stream { url: String },
    Poll { source: Arc<dyn LogSource> },
}

impl Transport {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Stream { .. } => "stream",
            Self::Poll { .. } => "poll",
        }
    }
}

/// Monitors one chain for the life of the process.
pub struct ChainSession {
    pipeline: TransferPipeline,
    addresses: Vec<String>,
    transport: Transport,
    settings: SessionSettings,
}

impl ChainSession {
    /// Build a session for one configured chain. Streaming is used whenever a
    /// websocket endpoint is configured, HTTP polling otherwise.
    pub fn new(
        config: &ChainConfig,
        settings: &SessionSettings,
        prices: PriceTable,
        dispatcher: Arc<Dispatcher>,
    ) -> eyre::Result<Self> {
        let endpoint = build_chain_endpoint(config)?;
        let tokens = build_token_map(config)?;
        let addresses = watched_addresses(&tokens);

        let transport = match (&endpoint.stream_url, &endpoint.rpc_url) {
            (Some(url), _) => Transport::Stream { url: url.clone() },
            (None, Some(url)) => {
                let rpc_url = url.parse().map_err(|e| {
                    eyre::eyre!("Invalid RPC URL for chain '{}': {}", config.name, e)
                })?;
                let provider = ProviderBuilder::new().connect_http(rpc_url);
                let source = AlloyLogSource::new(provider, &addresses)?;
                Transport::Poll {
                    source: Arc::new(source),
                }
            }
            (None, None) => {
                return Err(eyre::eyre!("Chain '{}' has no usable endpoint", config.name));
            }
        };

        let pipeline = TransferPipeline::new(
            Arc::new(endpoint),
            Arc::new(tokens),
            prices,
            dispatcher,
            settings.min_usd_value,
        );

        Ok(Self {
            pipeline,
            addresses,
            transport,
            settings: settings.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.pipeline.chain.name
    }

    pub fn mode(&self) -> &'static str {
        self.transport.mode()
    }

    /// Run until `shutdown` is cancelled. Transport failures are retried
    /// forever with a fixed delay per failure class.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            chain = %self.name(),
            chain_id = self.pipeline.chain.chain_id,
            mode = self.mode(),
            tokens = self.addresses.len(),
            "Starting chain session"
        );

        match &self.transport {
            Transport::Stream { url } => self.run_stream(url, &shutdown).await,
            Transport::Poll { source } => self.run_poll(source.as_ref(), &shutdown).await,
        }

        tracing::info!(chain = %self.name(), "Chain session stopped");
    }

    async fn run_stream(&self, url: &str, shutdown: &CancellationToken) {
        let (queue, logs) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        let worker = tokio::spawn(dispatch_queued(self.pipeline.clone(), logs, shutdown.clone()));

        loop {
            tracing::info!(chain = %self.name(), url = %url, "Connecting");

            let error = tokio::select! {
                error = self.stream_until_error(url, &queue) => error,
                _ = shutdown.cancelled() => break,
            };

            let delay = error.retry_delay(&self.settings.stream);
            tracing::warn!(
                chain = %self.name(),
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                "Disconnected"
            );

            if !sleep_or_cancel(delay, shutdown).await {
                break;
            }
        }

        drop(queue);
        if let Err(e) = worker.await {
            tracing::error!(chain = %self.name(), error = %e, "Dispatch worker panicked");
        }
    }

    /// One connection lifetime: connect, subscribe, then hand notifications
    /// to the dispatch worker until the connection fails.
    async fn stream_until_error(&self, url: &str, queue: &mpsc::Sender<RawLog>) -> StreamError {
        let config = &self.settings.stream;

        let ws = match stream::connect(url, config.connect_timeout()).await {
            Ok(ws) => ws,
            Err(e) => return e,
        };
        tracing::info!(chain = %self.name(), "Connected, subscribing to Transfer logs");

        let mut subscription = match LogSubscription::subscribe(ws, &self.addresses, config).await {
            Ok(subscription) => subscription,
            Err(e) => return e,
        };
        tracing::info!(
            chain = %self.name(),
            subscription = %subscription.id,
            contracts = self.addresses.len(),
            "Subscribed"
        );

        loop {
            match subscription.next_log().await {
                Ok(log) => {
                    if queue.send(log).await.is_err() {
                        return StreamError::Closed("dispatch queue closed".to_string());
                    }
                }
                Err(e) => return e,
            }
        }
    }

    async fn run_poll(&self, source: &dyn LogSource, shutdown: &CancellationToken) {
        let poll_interval = self.pipeline.chain.poll_interval;
        let config = &self.settings.poll;
        let error_delay = config.error_delay().max(poll_interval);
        let mut cursor = PollCursor::default();

        tracing::info!(
            chain = %self.name(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "HTTP polling active"
        );

        loop {
            let outcome = tokio::select! {
                outcome = poller::poll_once(source, &mut cursor, &self.pipeline, config) => outcome,
                _ = shutdown.cancelled() => break,
            };

            match &outcome {
                PollOutcome::Seeded(head) => {
                    tracing::info!(chain = %self.name(), block = head, "Poll cursor seeded")
                }
                PollOutcome::UpToDate => {}
                PollOutcome::Processed {
                    range,
                    logs,
                    dispatched,
                } => tracing::debug!(
                    chain = %self.name(),
                    from = range.from,
                    to = range.to,
                    logs,
                    dispatched,
                    "Polled block range"
                ),
                PollOutcome::HeightFailed(error) => tracing::warn!(
                    chain = %self.name(),
                    error = %error,
                    "Failed to get block number"
                ),
                PollOutcome::LogsFailed { range, error } => tracing::warn!(
                    chain = %self.name(),
                    from = range.from,
                    to = range.to,
                    error = %error,
                    "Failed to get logs, range will be retried"
                ),
            }

            let delay = if outcome.is_failure() {
                error_delay
            } else {
                poll_interval
            };
            if !sleep_or_cancel(delay, shutdown).await {
                break;
            }
        }
    }
}

/// Runs queued logs through the pipeline in arrival order, off the
/// websocket read loop.
async fn dispatch_queued(
    pipeline: TransferPipeline,
    mut logs: mpsc::Receiver<RawLog>,
    shutdown: CancellationToken,
) {
    loop {
        let log = tokio::select! {
            log = logs.recv() => match log {
                Some(log) => log,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        tokio::select! {
            _ = pipeline.process(&log) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Returns false if shutdown won the race.
async fn sleep_or_cancel(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.cancelled() => false,
    }
}
