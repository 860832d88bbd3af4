use std::{collections::BTreeMap, sync::Arc};

use color_eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::market::MarketData;

/// NFT holdings of one address, keyed by collection.
pub type Inventory = BTreeMap<String, InventoryCollection>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryCollection {
    pub meta: CollectionMeta,
    pub items: Vec<InventoryItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Resolves collectible holdings for a single address.
#[derive(Clone)]
pub struct InventoryLoader {
    market: Arc<dyn MarketData>,
}

impl InventoryLoader {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }

    pub async fn load(&self, address: &str) -> eyre::Result<Inventory> {
        let mut inventory = self.market.inventory(address).await?;
        for collection in inventory.values_mut() {
            collection.items.sort_by(|a, b| a.token_id.cmp(&b.token_id));
        }
        Ok(inventory)
    }
}
