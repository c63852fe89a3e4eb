use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use bigdecimal::ToPrimitive;
use std::str::FromStr;

use crate::prices::table::PriceTable;

use super::types::{TokenMap, Transfer, ValuedTransfer};

/// Fiat value of `amount` raw units of a token with `decimals` places.
///
/// The raw amount is scaled exactly in decimal arithmetic before the price
/// is applied, so only the final conversion to `f64` rounds.
pub fn fiat_value(amount: U256, decimals: u8, unit_price: f64) -> f64 {
    let Ok(price) = BigDecimal::from_str(&unit_price.to_string()) else {
        return 0.0;
    };
    let Ok(units) = BigDecimal::from_str(&format!("{}e-{}", amount, decimals)) else {
        return 0.0;
    };
    (units * price).to_f64().unwrap_or(0.0)
}

/// Look up the token for a lower-cased contract address and value the amount
/// at the current price. Returns `(usd_value, symbol)`, or `None` for a
/// contract outside the chain's token mapping.
pub fn value_amount(
    tokens: &TokenMap,
    prices: &PriceTable,
    contract: &str,
    amount: U256,
) -> Option<(f64, String)> {
    let token = tokens.get(contract)?;
    let price = prices.get(&token.symbol).unwrap_or(token.seed_price);
    Some((fiat_value(amount, token.decimals, price), token.symbol.clone()))
}

pub fn value_transfer(
    tokens: &TokenMap,
    prices: &PriceTable,
    transfer: Transfer,
) -> Option<ValuedTransfer> {
    let (usd_value, symbol) = value_amount(tokens, prices, &transfer.contract, transfer.amount)?;
    Some(ValuedTransfer {
        transfer,
        symbol,
        usd_value,
    })
}

/// Transfers valued at exactly the minimum qualify.
pub fn meets_threshold(usd_value: f64, min_usd_value: f64) -> bool {
    usd_value >= min_usd_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::types::TokenInfo;

    const USDC: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const WETH: &str = "0x4200000000000000000000000000000000000006";

    fn tokens() -> TokenMap {
        TokenMap::from([
            (
                USDC.to_string(),
                TokenInfo {
                    address: USDC.to_string(),
                    symbol: "USDC".to_string(),
                    decimals: 6,
                    seed_price: 1.0,
                },
            ),
            (
                WETH.to_string(),
                TokenInfo {
                    address: WETH.to_string(),
                    symbol: "WETH".to_string(),
                    decimals: 18,
                    seed_price: 2500.0,
                },
            ),
        ])
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= b.abs() * 1e-12 + 1e-12
    }

    #[test]
    fn test_scales_by_decimals() {
        assert_eq!(fiat_value(U256::from(1_000_000u64), 6, 1.0), 1.0);
        assert!(approx(fiat_value(U256::from(1000u64), 6, 1.0), 0.001));
        assert_eq!(fiat_value(U256::from(600_000_000u64), 6, 1.0), 600.0);
        assert_eq!(fiat_value(U256::from(7u64), 0, 2.5), 17.5);
    }

    #[test]
    fn test_eighteen_decimals_large_amount() {
        // 12,345.678901234567890123 WETH at 2500
        let amount = U256::from_str_radix("12345678901234567890123", 10).unwrap();
        let value = fiat_value(amount, 18, 2500.0);
        assert!(approx(value, 30_864_197.253_086_42), "value = {value}");
    }

    #[test]
    fn test_tiny_prices_keep_precision() {
        // 1e12 SHIB-like units at 0.00001
        let amount = U256::from(10u64).pow(U256::from(30u64));
        let value = fiat_value(amount, 18, 0.00001);
        assert!(approx(value, 10_000_000.0), "value = {value}");
    }

    #[test]
    fn test_monotonic_in_amount_and_price() {
        let amounts = [0u64, 1, 999, 1_000_000, 123_456_789_000];
        for pair in amounts.windows(2) {
            let (low, high) = (U256::from(pair[0]), U256::from(pair[1]));
            assert!(fiat_value(low, 6, 1.5) < fiat_value(high, 6, 1.5));
        }

        let prices = [0.0001, 0.5, 1.0, 2500.0, 95000.0];
        for pair in prices.windows(2) {
            let amount = U256::from(5_000_000u64);
            assert!(fiat_value(amount, 8, pair[0]) < fiat_value(amount, 8, pair[1]));
        }
    }

    #[test]
    fn test_unknown_token() {
        let prices = PriceTable::new();
        let missing = "0x0000000000000000000000000000000000000001";
        assert!(value_amount(&tokens(), &prices, missing, U256::from(1u64)).is_none());
    }

    #[test]
    fn test_uses_seed_price_until_refreshed() {
        let prices = PriceTable::new();
        let one_weth = U256::from(10u64).pow(U256::from(18u64));

        let (value, symbol) = value_amount(&tokens(), &prices, WETH, one_weth).unwrap();
        assert_eq!(symbol, "WETH");
        assert_eq!(value, 2500.0);

        prices.update("WETH", 3000.0);
        let (value, _) = value_amount(&tokens(), &prices, WETH, one_weth).unwrap();
        assert_eq!(value, 3000.0);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(meets_threshold(500.0, 500.0));
        assert!(!meets_threshold(499.99, 500.0));
        assert!(meets_threshold(500.01, 500.0));

        let at_min = fiat_value(U256::from(500_000_000u64), 6, 1.0);
        let cent_below = fiat_value(U256::from(499_990_000u64), 6, 1.0);
        assert!(meets_threshold(at_min, 500.0));
        assert!(!meets_threshold(cent_below, 500.0));
    }
}
