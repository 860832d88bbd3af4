use std::sync::Arc;

use color_eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::market::MarketData;

// The api rejects unbounded symbol lists, so scans are chunked.
const MAX_SYMBOLS_PER_REQUEST: usize = 50;

/// One fiat quote for a native currency symbol on a chain. Transient,
/// recomputed on every scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub symbol: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub price: f64,
    #[serde(rename = "change24h", default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
}

/// Resolves fiat quotes for a set of currency symbols on a chain.
#[derive(Clone)]
pub struct RatesLoader {
    market: Arc<dyn MarketData>,
}

impl RatesLoader {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }

    pub async fn load(&self, symbols: &[String], chain_id: u64) -> eyre::Result<Vec<RateEntry>> {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut rates = Vec::with_capacity(symbols.len());
        for chunk in symbols.chunks(MAX_SYMBOLS_PER_REQUEST) {
            rates.extend(self.market.rates(chunk, chain_id).await?);
        }
        Ok(rates)
    }
}

/// Uppercase, deduplicate and drop empty symbols, preserving first-seen
/// order.
pub(crate) fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_ascii_uppercase();
        if !symbol.is_empty() && !seen.contains(&symbol) {
            seen.push(symbol);
        }
    }
    seen
}
