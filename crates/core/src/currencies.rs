use std::sync::Arc;

use color_eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::{market::MarketData, rates::normalize_symbols};

/// Descriptive metadata for a native currency, keyed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyData {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Resolves static descriptive data for native currencies.
#[derive(Clone)]
pub struct CurrencyDataLoader {
    market: Arc<dyn MarketData>,
}

impl CurrencyDataLoader {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }

    pub async fn load(&self, symbols: &[String]) -> eyre::Result<Vec<CurrencyData>> {
        let symbols = normalize_symbols(symbols);
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        self.market.currency_data(&symbols).await
    }
}
