use alloy::primitives::U256;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// A log record as it arrives off the wire, before any validation.
///
/// Every field defaults so that a structurally odd notification still
/// deserializes and is rejected by the decoder instead of the transport.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub block_number: Option<String>,
}

impl From<&alloy::rpc::types::Log> for RawLog {
    fn from(log: &alloy::rpc::types::Log) -> Self {
        let inner = &log.inner;
        Self {
            address: format!("0x{}", hex::encode(inner.address.as_slice())),
            topics: inner
                .data
                .topics()
                .iter()
                .map(|topic| format!("0x{}", hex::encode(topic.as_slice())))
                .collect(),
            data: format!("0x{}", hex::encode(&inner.data.data[..])),
            transaction_hash: log
                .transaction_hash
                .map(|h| format!("0x{}", hex::encode(h.as_slice()))),
            block_number: log.block_number.map(|n| format!("{:#x}", n)),
        }
    }
}

/// A decoded ERC-20 Transfer. Addresses are lower-case and `0x`-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub sender: String,
    pub recipient: String,
    pub contract: String,
    pub amount: U256,
    pub tx_hash: Option<String>,
    pub block_number: Option<String>,
}

/// A transfer priced in fiat against the token's current unit price.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuedTransfer {
    pub transfer: Transfer,
    pub symbol: String,
    pub usd_value: f64,
}

/// Metadata for a watched token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    /// Lower-cased contract address.
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
    pub seed_price: f64,
}

/// Lower-cased contract address -> token metadata for one chain.
pub type TokenMap = HashMap<String, TokenInfo>;

/// Identity and endpoints of one monitored chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    pub name: String,
    pub chain_id: u64,
    pub stream_url: Option<String>,
    pub rpc_url: Option<String>,
    pub poll_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_log_from_notification_json() {
        let raw: RawLog = serde_json::from_str(
            r#"{
                "address": "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
                "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                "data": "0x01",
                "blockNumber": "0x10",
                "transactionHash": "0xabc",
                "logIndex": "0x0",
                "removed": false
            }"#,
        )
        .unwrap();

        assert_eq!(raw.topics.len(), 1);
        assert_eq!(raw.data, "0x01");
        assert_eq!(raw.block_number.as_deref(), Some("0x10"));
        assert_eq!(raw.transaction_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_raw_log_tolerates_missing_fields() {
        let raw: RawLog = serde_json::from_str("{}").unwrap();
        assert_eq!(raw, RawLog::default());
    }
}
