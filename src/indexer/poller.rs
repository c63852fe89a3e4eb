use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use async_trait::async_trait;
use std::str::FromStr;

use crate::config::PollConfig;
use crate::pipeline::TransferPipeline;

use super::decoder::TRANSFER_SIGNATURE;
use super::types::RawLog;

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

/// The two JSON-RPC calls the poll transport needs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Current chain height.
    async fn block_number(&self) -> eyre::Result<u64>;

    /// Transfer logs from the watched contracts within `range`.
    async fn transfer_logs(&self, range: BlockRange) -> eyre::Result<Vec<RawLog>>;
}

/// [`LogSource`] over an alloy HTTP provider.
pub struct AlloyLogSource<P> {
    provider: P,
    addresses: Vec<Address>,
}

impl<P: Provider> AlloyLogSource<P> {
    pub fn new(provider: P, addresses: &[String]) -> eyre::Result<Self> {
        let addresses = addresses
            .iter()
            .map(|a| {
                Address::from_str(a).map_err(|e| eyre::eyre!("Invalid address '{}': {}", a, e))
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        Ok(Self {
            provider,
            addresses,
        })
    }
}

#[async_trait]
impl<P: Provider> LogSource for AlloyLogSource<P> {
    async fn block_number(&self) -> eyre::Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn transfer_logs(&self, range: BlockRange) -> eyre::Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(self.addresses.clone())
            .event_signature(TRANSFER_SIGNATURE)
            .from_block(range.from)
            .to_block(range.to);

        let logs = self.provider.get_logs(&filter).await?;
        Ok(logs.iter().map(RawLog::from).collect())
    }
}

/// Last fully processed block of a polling session.
///
/// Unset until seeded with the head seen on the first poll; afterwards it only
/// moves forward, and only to the end of a range whose logs were fetched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollCursor {
    last: Option<u64>,
}

/// What the next poll iteration should do for a given head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    Seed(u64),
    UpToDate,
    Query(BlockRange),
}

impl PollCursor {
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn step(&self, head: u64) -> CursorStep {
        match self.last {
            None => CursorStep::Seed(head),
            Some(last) if head <= last => CursorStep::UpToDate,
            Some(last) => CursorStep::Query(BlockRange {
                from: last + 1,
                to: head,
            }),
        }
    }

    pub fn seed(&mut self, head: u64) {
        if self.last.is_none() {
            self.last = Some(head);
        }
    }

    /// Close a successfully fetched range.
    pub fn advance(&mut self, range: BlockRange) {
        match self.last {
            Some(last) if range.from == last + 1 && range.to >= last => self.last = Some(range.to),
            _ => tracing::warn!(
                cursor = ?self.last,
                from = range.from,
                to = range.to,
                "Ignoring non-contiguous cursor advance"
            ),
        }
    }
}

/// Result of a single poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Seeded(u64),
    UpToDate,
    Processed { range: BlockRange, logs: usize, dispatched: usize },
    HeightFailed(String),
    LogsFailed { range: BlockRange, error: String },
}

impl PollOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::HeightFailed(_) | Self::LogsFailed { .. })
    }
}

/// One pass of the poll state machine: query the head, then either seed the
/// cursor, do nothing, or fetch and process the next contiguous range.
///
/// Each RPC call is bounded by its timeout from `config`; a call that runs
/// out of time fails the iteration like any other RPC error.
pub async fn poll_once<S: LogSource + ?Sized>(
    source: &S,
    cursor: &mut PollCursor,
    pipeline: &TransferPipeline,
    config: &PollConfig,
) -> PollOutcome {
    let head = match tokio::time::timeout(config.height_timeout(), source.block_number()).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => return PollOutcome::HeightFailed(e.to_string()),
        Err(_) => {
            return PollOutcome::HeightFailed(format!(
                "timed out after {:?}",
                config.height_timeout()
            ))
        }
    };

    match cursor.step(head) {
        CursorStep::Seed(head) => {
            cursor.seed(head);
            PollOutcome::Seeded(head)
        }
        CursorStep::UpToDate => PollOutcome::UpToDate,
        CursorStep::Query(range) => {
            let fetched =
                tokio::time::timeout(config.logs_timeout(), source.transfer_logs(range)).await;
            match fetched {
                Ok(Ok(logs)) => {
                    let dispatched = pipeline.process_batch(&logs).await;
                    cursor.advance(range);
                    PollOutcome::Processed {
                        range,
                        logs: logs.len(),
                        dispatched,
                    }
                }
                Ok(Err(e)) => PollOutcome::LogsFailed {
                    range,
                    error: e.to_string(),
                },
                Err(_) => PollOutcome::LogsFailed {
                    range,
                    error: format!("timed out after {:?}", config.logs_timeout()),
                },
            }
        }
    }
}
