use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    balances::{ChainBalance, TokenBalance},
    currencies::CurrencyData,
    inventory::Inventory,
    rates::RateEntry,
};

/// Inbound command envelope from the supervising process: a command name
/// and positional arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Everything the worker forwards to the supervising process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "ready")]
    Ready,

    #[serde(rename = "tokenBalances")]
    TokenBalances {
        address: String,
        balances: Vec<TokenBalance>,
    },

    #[serde(rename = "chainBalance")]
    ChainBalance {
        address: String,
        symbol: String,
        #[serde(rename = "chainId")]
        chain_id: u64,
        #[serde(flatten)]
        balance: ChainBalance,
    },

    #[serde(rename = "rates")]
    Rates { rates: Vec<RateEntry> },

    #[serde(rename = "nativeCurrencyData")]
    NativeCurrencyData {
        #[serde(rename = "currencyData")]
        currency_data: Vec<CurrencyData>,
    },

    #[serde(rename = "inventory")]
    Inventory { address: String, inventory: Inventory },
}
