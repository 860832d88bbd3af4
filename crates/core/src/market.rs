use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::{self, WrapErr as _, eyre};
use serde::de::DeserializeOwned;

use crate::{
    currencies::CurrencyData, inventory::Inventory, rates::RateEntry, tokens::TokenDefinition,
};

/// The market-data endpoints backing the non-balance loaders: fiat quotes,
/// native currency metadata, NFT inventory and per-chain token lists.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn rates(&self, symbols: &[String], chain_id: u64) -> eyre::Result<Vec<RateEntry>>;

    async fn currency_data(&self, symbols: &[String]) -> eyre::Result<Vec<CurrencyData>>;

    async fn inventory(&self, address: &str) -> eyre::Result<Inventory>;

    async fn token_list(&self, chain_id: u64) -> eyre::Result<Vec<TokenDefinition>>;
}

/// HTTP client for the market-data API.
///
/// Wraps `reqwest::Client` with the API's base URL and provides one typed
/// method per endpoint.
#[derive(Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    base_url: String,
}

impl MarketClient {
    pub fn new(base_url: impl Into<String>) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .wrap_err("failed to build market data http client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> eyre::Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .wrap_err_with(|| format!("market data request to {path} failed"))?;

        if !response.status().is_success() {
            return Err(eyre!(
                "market data api returned http {} for {path}",
                response.status()
            ));
        }

        response
            .json()
            .await
            .wrap_err_with(|| format!("invalid market data response from {path}"))
    }
}

#[async_trait]
impl MarketData for MarketClient {
    async fn rates(&self, symbols: &[String], chain_id: u64) -> eyre::Result<Vec<RateEntry>> {
        self.get_json(
            "/v1/rates",
            &[
                ("symbols", symbols.join(",")),
                ("chainId", chain_id.to_string()),
            ],
        )
        .await
    }

    async fn currency_data(&self, symbols: &[String]) -> eyre::Result<Vec<CurrencyData>> {
        self.get_json("/v1/currencies", &[("symbols", symbols.join(","))])
            .await
    }

    async fn inventory(&self, address: &str) -> eyre::Result<Inventory> {
        self.get_json(&format!("/v1/inventory/{address}"), &[]).await
    }

    async fn token_list(&self, chain_id: u64) -> eyre::Result<Vec<TokenDefinition>> {
        self.get_json(&format!("/v1/tokens/{chain_id}"), &[]).await
    }
}
