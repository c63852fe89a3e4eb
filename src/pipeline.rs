use std::sync::Arc;

use crate::indexer::decoder;
use crate::indexer::types::{ChainEndpoint, RawLog, TokenMap, ValuedTransfer};
use crate::indexer::valuation;
use crate::notify::dispatcher::{DeliveryReport, Dispatcher};
use crate::prices::table::PriceTable;

/// What happened to one raw log.
#[derive(Debug)]
pub enum LogOutcome {
    Undecodable,
    UnknownToken,
    BelowThreshold(ValuedTransfer),
    Dispatched(ValuedTransfer, Vec<DeliveryReport>),
}

/// Runs every raw log of one chain through:
/// 1. Decoding
/// 2. Valuation against the shared price table
/// 3. The minimum-value filter
/// 4. Dispatch to all sinks
#[derive(Clone)]
pub struct TransferPipeline {
    pub chain: Arc<ChainEndpoint>,
    pub tokens: Arc<TokenMap>,
    prices: PriceTable,
    dispatcher: Arc<Dispatcher>,
    min_usd_value: f64,
}

impl TransferPipeline {
    pub fn new(
        chain: Arc<ChainEndpoint>,
        tokens: Arc<TokenMap>,
        prices: PriceTable,
        dispatcher: Arc<Dispatcher>,
        min_usd_value: f64,
    ) -> Self {
        Self {
            chain,
            tokens,
            prices,
            dispatcher,
            min_usd_value,
        }
    }

    pub async fn process(&self, log: &RawLog) -> LogOutcome {
        let Some(transfer) = decoder::decode_transfer_log(log) else {
            tracing::debug!(chain = %self.chain.name, "Skipping undecodable log");
            return LogOutcome::Undecodable;
        };

        let Some(valued) = valuation::value_transfer(&self.tokens, &self.prices, transfer) else {
            tracing::trace!(chain = %self.chain.name, "Log from unwatched contract");
            return LogOutcome::UnknownToken;
        };

        if !valuation::meets_threshold(valued.usd_value, self.min_usd_value) {
            return LogOutcome::BelowThreshold(valued);
        }

        let reports = self.dispatcher.dispatch(&self.chain, &valued).await;
        LogOutcome::Dispatched(valued, reports)
    }

    /// Process a batch in order. Returns how many transfers were dispatched.
    pub async fn process_batch(&self, logs: &[RawLog]) -> usize {
        let mut dispatched = 0;
        for log in logs {
            if let LogOutcome::Dispatched(..) = self.process(log).await {
                dispatched += 1;
            }
        }
        dispatched
    }
}
