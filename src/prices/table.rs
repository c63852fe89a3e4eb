use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide symbol -> fiat price lookup.
///
/// Cloning is cheap and every clone sees the same entries. Each key is
/// replaced atomically, so a reader observes either the old or the new price,
/// never a torn value. Readers and the refresher never wait on each other
/// beyond a single shard.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: Arc<DashMap<String, f64>>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current price for a symbol, if one has been published.
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.get(symbol).map(|entry| *entry.value())
    }

    /// Publish a single price. Non-finite or negative prices are rejected so
    /// the previous value stays in place.
    pub fn update(&self, symbol: &str, price: f64) -> bool {
        if !price.is_finite() || price < 0.0 {
            tracing::warn!(symbol, price, "Rejected invalid price update");
            return false;
        }
        self.prices.insert(symbol.to_string(), price);
        true
    }

    /// Publish a fully-fetched batch. Symbols absent from the batch keep
    /// their prior value. Returns the number of prices written.
    pub fn apply(&self, updates: &HashMap<String, f64>) -> usize {
        let mut written = 0;
        for (symbol, price) in updates {
            if self.update(symbol, *price) {
                written += 1;
            }
        }
        written
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
