use alloy::primitives::{B256, U256};
use alloy::sol_types::SolEvent;

use super::types::{RawLog, Transfer};

mod erc20 {
    use alloy::sol;

    // Generate the Transfer event ABI using alloy's sol! macro.
    // This gives us Transfer::SIGNATURE_HASH for subscription and log filters.
    sol! {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_SIGNATURE: B256 = erc20::Transfer::SIGNATURE_HASH;

/// Hex form of the Transfer event signature, as sent in topic filters.
pub fn transfer_topic() -> String {
    format!("0x{}", hex::encode(TRANSFER_SIGNATURE.as_slice()))
}

/// Attempt to decode a raw log as an ERC-20 Transfer event.
///
/// Returns `None` if:
/// - The log has fewer than 3 topics (signature + from + to)
/// - Either address topic is not hex
/// - The data field is not a hex-encoded uint256
///
/// Malformed input never panics.
pub fn decode_transfer_log(log: &RawLog) -> Option<Transfer> {
    if log.topics.len() < 3 {
        return None;
    }

    let sender = topic_address(&log.topics[1])?;
    let recipient = topic_address(&log.topics[2])?;
    let amount = parse_amount(&log.data)?;

    Some(Transfer {
        sender,
        recipient,
        contract: log.address.trim().to_ascii_lowercase(),
        amount,
        tx_hash: log.transaction_hash.clone(),
        block_number: log.block_number.clone(),
    })
}

fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// The low 20 bytes of an indexed address topic, whatever its padding.
fn topic_address(topic: &str) -> Option<String> {
    let digits = strip_hex_prefix(topic);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let low = if digits.len() > 40 {
        &digits[digits.len() - 40..]
    } else {
        digits
    };

    Some(format!("0x{:0>40}", low.to_ascii_lowercase()))
}

/// `0x` and the empty string both mean zero.
fn parse_amount(data: &str) -> Option<U256> {
    let digits = strip_hex_prefix(data);
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(significant, 16).ok()
}
