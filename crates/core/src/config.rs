use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chain-data provider connection settings
    pub provider: ProviderConfig,

    /// Market data api settings
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// WebSocket endpoint of the chain-data provider
    pub ws_url: String,

    /// Connection name reported to the provider
    #[serde(default = "default_connection_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the market data api
    pub base_url: String,
}

fn default_connection_name() -> String {
    "scand".to_string()
}

impl Config {
    /// Load configuration from `scand.yaml` and `SCAND_`-prefixed
    /// environment variables (nested keys separated by `__`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file("scand.yaml"))
            .merge(Env::prefixed("SCAND_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_with_defaults() {
        let config: Config = Figment::new()
            .merge(Yaml::string(
                r#"
                provider:
                  ws_url: ws://127.0.0.1:1248
                market:
                  base_url: https://data.example.test
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.provider.ws_url, "ws://127.0.0.1:1248");
        assert_eq!(config.provider.name, "scand");
        assert_eq!(config.market.base_url, "https://data.example.test");
    }
}
