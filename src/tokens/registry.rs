use alloy::primitives::Address;
use std::str::FromStr;

use crate::config::ChainConfig;
use crate::indexer::types::{ChainEndpoint, TokenInfo, TokenMap};

/// Build the immutable identity and endpoint set for a chain.
///
/// A chain with neither a streaming nor a polling endpoint cannot be monitored.
pub fn build_chain_endpoint(config: &ChainConfig) -> eyre::Result<ChainEndpoint> {
    let stream_url = non_empty(&config.rpc_ws);
    let rpc_url = non_empty(&config.rpc_http);

    if stream_url.is_none() && rpc_url.is_none() {
        return Err(eyre::eyre!(
            "Chain '{}' has neither rpc_ws nor rpc_http configured",
            config.name
        ));
    }
    if stream_url.is_none() && config.poll_interval_ms == 0 {
        return Err(eyre::eyre!(
            "Chain '{}' polls over HTTP and needs a non-zero poll_interval_ms",
            config.name
        ));
    }

    Ok(ChainEndpoint {
        name: config.name.clone(),
        chain_id: config.chain_id,
        stream_url,
        rpc_url,
        poll_interval: config.poll_interval(),
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build the in-memory lookup of watched tokens for a chain, keyed by
/// lower-cased contract address.
pub fn build_token_map(config: &ChainConfig) -> eyre::Result<TokenMap> {
    if config.tokens.is_empty() {
        return Err(eyre::eyre!(
            "Chain '{}' must have at least one token configured",
            config.name
        ));
    }

    let mut map = TokenMap::new();
    for token in &config.tokens {
        if !token.address.starts_with("0x") || token.address.len() != 42 {
            return Err(eyre::eyre!(
                "Invalid token address '{}' for {} on chain '{}'",
                token.address,
                token.symbol,
                config.name
            ));
        }
        Address::from_str(&token.address).map_err(|e| {
            eyre::eyre!(
                "Invalid token address '{}' for {} on chain '{}': {}",
                token.address,
                token.symbol,
                config.name,
                e
            )
        })?;
        if token.decimals > 18 {
            return Err(eyre::eyre!(
                "Token {} on chain '{}' has {} decimals, at most 18 are supported",
                token.symbol,
                config.name,
                token.decimals
            ));
        }
        if !token.price_usd.is_finite() || token.price_usd < 0.0 {
            return Err(eyre::eyre!(
                "Token {} on chain '{}' has an invalid seed price {}",
                token.symbol,
                config.name,
                token.price_usd
            ));
        }

        let address = token.address.to_ascii_lowercase();
        if map.contains_key(&address) {
            return Err(eyre::eyre!(
                "Duplicate token address '{}' on chain '{}'",
                address,
                config.name
            ));
        }

        tracing::debug!(
            chain = %config.name,
            symbol = %token.symbol,
            address = %address,
            "Registered watched token"
        );

        map.insert(
            address.clone(),
            TokenInfo {
                address,
                symbol: token.symbol.clone(),
                decimals: token.decimals,
                seed_price: token.price_usd,
            },
        );
    }

    Ok(map)
}

/// Watched addresses in a stable order, for subscription and log filters.
pub fn watched_addresses(tokens: &TokenMap) -> Vec<String> {
    let mut addresses: Vec<String> = tokens.keys().cloned().collect();
    addresses.sort();
    addresses
}
