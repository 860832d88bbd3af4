use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, warn};

use crate::{chain::chain_label, market::MarketData};

/// A known token contract on some chain. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenDefinition {
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    #[serde(rename = "logoURI", default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
}

/// Per-chain token lists. Written once by the load task kicked off at
/// connection time, read-only afterwards.
#[derive(Clone)]
pub struct TokenRegistry {
    market: Arc<dyn MarketData>,
    lists: Arc<RwLock<HashMap<u64, Vec<TokenDefinition>>>>,
}

impl TokenRegistry {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self {
            market,
            lists: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Kick off best-effort loading of the token list for every chain.
    /// A chain whose list cannot be fetched is logged and skipped; the
    /// registry itself never fails.
    pub fn start(&self, chains: Vec<u64>) -> JoinHandle<()> {
        let market = self.market.clone();
        let lists = self.lists.clone();

        tokio::spawn(async move {
            for chain_id in chains {
                match market.token_list(chain_id).await {
                    Ok(tokens) => {
                        debug!(
                            chain = %chain_label(chain_id),
                            count = tokens.len(),
                            "loaded token list"
                        );
                        lists.write().await.insert(chain_id, tokens);
                    }
                    Err(e) => {
                        warn!(chain = %chain_label(chain_id), %e, "could not load token list");
                    }
                }
            }
        })
    }

    /// Current known tokens for a chain; empty while unloaded or for
    /// chains the registry does not track.
    pub async fn tokens(&self, chain_id: u64) -> Vec<TokenDefinition> {
        self.lists
            .read()
            .await
            .get(&chain_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use color_eyre::eyre::{self, eyre};

    use super::*;
    use crate::{
        currencies::CurrencyData, inventory::Inventory, market::MarketData, rates::RateEntry,
    };

    struct StubMarket;

    #[async_trait]
    impl MarketData for StubMarket {
        async fn rates(&self, _: &[String], _: u64) -> eyre::Result<Vec<RateEntry>> {
            Err(eyre!("unused"))
        }

        async fn currency_data(&self, _: &[String]) -> eyre::Result<Vec<CurrencyData>> {
            Err(eyre!("unused"))
        }

        async fn inventory(&self, _: &str) -> eyre::Result<Inventory> {
            Err(eyre!("unused"))
        }

        async fn token_list(&self, chain_id: u64) -> eyre::Result<Vec<TokenDefinition>> {
            match chain_id {
                1 => Ok(vec![TokenDefinition {
                    chain_id: 1,
                    address: "0x6b175474e89094c44da98b954eedeac495271d0f".to_string(),
                    symbol: "DAI".to_string(),
                    name: "Dai Stablecoin".to_string(),
                    decimals: 18,
                    logo_uri: None,
                }]),
                _ => Err(eyre!("no token list for chain {chain_id}")),
            }
        }
    }

    #[tokio::test]
    async fn loads_lists_best_effort_per_chain() {
        let registry = TokenRegistry::new(Arc::new(StubMarket));

        registry.start(vec![1, 7777]).await.unwrap();

        let mainnet = registry.tokens(1).await;
        assert_eq!(mainnet.len(), 1);
        assert_eq!(mainnet[0].symbol, "DAI");

        // the failed chain is skipped, not fatal
        assert!(registry.tokens(7777).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_chain_is_empty_without_blocking() {
        let registry = TokenRegistry::new(Arc::new(StubMarket));
        assert!(registry.tokens(42).await.is_empty());
    }
}
