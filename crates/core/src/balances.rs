use std::{collections::BTreeMap, sync::Arc};

use alloy::{
    primitives::{Address, U256, hex},
    sol,
    sol_types::SolCall as _,
};
use color_eyre::eyre::{self, WrapErr as _, eyre};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::{
    chain::{chain_label, multicall_address},
    provider::{ChainRpc, parse_quantity},
    tokens::TokenDefinition,
};

/// Decimals of the gas-paying asset on the chains we scan.
pub const NATIVE_DECIMALS: u8 = 18;

sol! {
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }

    contract IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}

/// Native balance snapshot. Address, symbol and chain id are attached at
/// the message layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBalance {
    pub balance: U256,
    #[serde(rename = "displayBalance")]
    pub display_balance: String,
    pub decimals: u8,
}

/// One token's balance snapshot, produced fresh on every scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    #[serde(flatten)]
    pub token: TokenDefinition,
    pub balance: U256,
    #[serde(rename = "displayBalance")]
    pub display_balance: String,
}

/// Fetches native and token balances through a live provider connection.
/// Constructed once per connection, after the handshake completes.
pub struct BalanceLoader {
    rpc: Arc<dyn ChainRpc>,
}

impl BalanceLoader {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }

    /// Native balance of an address on the connection's current chain.
    pub async fn native_currency_balance(&self, address: &str) -> eyre::Result<ChainBalance> {
        let result = self
            .rpc
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        let balance = parse_quantity(&result)?;

        Ok(ChainBalance {
            balance,
            display_balance: format_units(balance, NATIVE_DECIMALS),
            decimals: NATIVE_DECIMALS,
        })
    }

    /// Balances for the requested tokens, grouped by chain. Chains with a
    /// multicall deployment are queried in one batched call; everything
    /// else is walked contract by contract. A failing chain is logged and
    /// excluded without touching the other chains' results.
    pub async fn token_balances(
        &self,
        address: &str,
        tokens: &[TokenDefinition],
    ) -> Vec<TokenBalance> {
        let mut by_chain: BTreeMap<u64, Vec<TokenDefinition>> = BTreeMap::new();
        for token in tokens {
            by_chain.entry(token.chain_id).or_default().push(token.clone());
        }

        let mut balances = Vec::with_capacity(tokens.len());
        for (chain_id, tokens) in by_chain {
            match multicall_address(chain_id) {
                Some(multicall) => {
                    match self.batched(chain_id, multicall, address, &tokens).await {
                        Ok(mut found) => balances.append(&mut found),
                        Err(e) => {
                            error!(chain = %chain_label(chain_id), %e, "token balance batch failed");
                        }
                    }
                }
                None => balances.append(&mut self.sequential(chain_id, address, &tokens).await),
            }
        }
        balances
    }

    async fn batched(
        &self,
        chain_id: u64,
        multicall: Address,
        address: &str,
        tokens: &[TokenDefinition],
    ) -> eyre::Result<Vec<TokenBalance>> {
        let account: Address = address.parse().wrap_err("invalid account address")?;

        let calls = tokens
            .iter()
            .map(|token| {
                let target: Address = token
                    .address
                    .parse()
                    .wrap_err_with(|| format!("invalid contract address for {}", token.symbol))?;
                Ok(IMulticall3::Call3 {
                    target,
                    allowFailure: true,
                    callData: IERC20::balanceOfCall { account }.abi_encode().into(),
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        let data = IMulticall3::aggregate3Call { calls }.abi_encode();
        let raw = self.eth_call(chain_id, multicall, data).await?;
        let returns = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
            .map_err(|e| eyre!("could not decode multicall return data: {e}"))?;

        let mut found = Vec::with_capacity(tokens.len());
        for (token, leg) in tokens.iter().zip(returns) {
            if !leg.success {
                debug!(token = %token.symbol, chain_id, "balance call reverted in batch");
                continue;
            }
            match IERC20::balanceOfCall::abi_decode_returns(&leg.returnData) {
                Ok(balance) => found.push(token_balance(token, balance)),
                Err(e) => {
                    debug!(token = %token.symbol, chain_id, %e, "undecodable balance in batch");
                }
            }
        }
        Ok(found)
    }

    async fn sequential(
        &self,
        chain_id: u64,
        address: &str,
        tokens: &[TokenDefinition],
    ) -> Vec<TokenBalance> {
        let account: Address = match address.parse() {
            Ok(account) => account,
            Err(e) => {
                error!(%address, %e, "invalid account address");
                return Vec::new();
            }
        };

        let mut found = Vec::with_capacity(tokens.len());
        for token in tokens {
            let target: Address = match token.address.parse() {
                Ok(target) => target,
                Err(e) => {
                    warn!(token = %token.symbol, %e, "invalid token contract address");
                    continue;
                }
            };

            let data = IERC20::balanceOfCall { account }.abi_encode();
            let balance = match self.eth_call(chain_id, target, data).await {
                Ok(raw) => IERC20::balanceOfCall::abi_decode_returns(&raw)
                    .map_err(|e| eyre!("could not decode balance return data: {e}")),
                Err(e) => Err(e),
            };

            match balance {
                Ok(balance) => found.push(token_balance(token, balance)),
                Err(e) => {
                    warn!(token = %token.symbol, chain = %chain_label(chain_id), %e, "token balance call failed");
                }
            }
        }
        found
    }

    async fn eth_call(&self, chain_id: u64, to: Address, data: Vec<u8>) -> eyre::Result<Vec<u8>> {
        let params = json!([
            { "to": to.to_string(), "data": hex::encode_prefixed(&data) },
            "latest",
        ]);
        let result = self
            .rpc
            .request_on_chain(chain_id, "eth_call", params)
            .await?;
        let raw = result
            .as_str()
            .ok_or_else(|| eyre!("eth_call returned a non-string result"))?;
        hex::decode(raw).wrap_err("eth_call returned invalid hex data")
    }
}

fn token_balance(token: &TokenDefinition, balance: U256) -> TokenBalance {
    TokenBalance {
        display_balance: format_units(balance, token.decimals),
        token: token.clone(),
        balance,
    }
}

/// Render a raw amount in whole units, trimming trailing zeros.
pub fn format_units(amount: U256, decimals: u8) -> String {
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let fraction = amount % divisor;

    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{fraction:0>width$}", width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy::sol_types::SolValue as _;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::watch;

    use super::*;

    type Handler = Box<dyn Fn(Option<u64>, &str, &Value) -> eyre::Result<Value> + Send + Sync>;

    struct StubRpc {
        handler: Handler,
        calls: Mutex<Vec<(Option<u64>, String)>>,
    }

    impl StubRpc {
        fn new(handler: Handler) -> Arc<Self> {
            Arc::new(Self {
                handler,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(Option<u64>, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainRpc for StubRpc {
        async fn request(&self, method: &str, params: Value) -> eyre::Result<Value> {
            self.calls.lock().unwrap().push((None, method.to_string()));
            (self.handler)(None, method, &params)
        }

        async fn request_on_chain(
            &self,
            chain_id: u64,
            method: &str,
            params: Value,
        ) -> eyre::Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((Some(chain_id), method.to_string()));
            (self.handler)(Some(chain_id), method, &params)
        }

        fn chain_id(&self) -> u64 {
            1
        }

        async fn chains(&self) -> Vec<u64> {
            vec![1]
        }

        fn connected(&self) -> watch::Receiver<bool> {
            watch::channel(true).1
        }
    }

    fn token(chain_id: u64, address: &str, symbol: &str, decimals: u8) -> TokenDefinition {
        TokenDefinition {
            chain_id,
            address: address.to_string(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals,
            logo_uri: None,
        }
    }

    fn multicall_reply(balances: &[Option<U256>]) -> Value {
        let returns: Vec<IMulticall3::Result> = balances
            .iter()
            .map(|balance| match balance {
                Some(balance) => IMulticall3::Result {
                    success: true,
                    returnData: balance.abi_encode().into(),
                },
                None => IMulticall3::Result {
                    success: false,
                    returnData: alloy::primitives::Bytes::new(),
                },
            })
            .collect();
        Value::String(hex::encode_prefixed(returns.abi_encode()))
    }

    fn balance_reply(balance: U256) -> Value {
        Value::String(hex::encode_prefixed(balance.abi_encode()))
    }

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";
    const TOKEN_A: &str = "0x0000000000000000000000000000000000000001";
    const TOKEN_B: &str = "0x0000000000000000000000000000000000000002";

    #[tokio::test]
    async fn multicall_chains_are_queried_in_one_batch() {
        let rpc = StubRpc::new(Box::new(|chain, method, _| {
            assert_eq!(chain, Some(1));
            assert_eq!(method, "eth_call");
            Ok(multicall_reply(&[
                Some(U256::from(5u64)),
                Some(U256::from(7u64)),
            ]))
        }));
        let loader = BalanceLoader::new(rpc.clone());

        let tokens = vec![token(1, TOKEN_A, "AAA", 0), token(1, TOKEN_B, "BBB", 0)];
        let balances = loader.token_balances(ACCOUNT, &tokens).await;

        assert_eq!(rpc.calls().len(), 1);
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].balance, U256::from(5u64));
        assert_eq!(balances[1].balance, U256::from(7u64));
    }

    #[tokio::test]
    async fn one_chains_failure_does_not_abort_the_others() {
        let rpc = StubRpc::new(Box::new(|chain, _, _| match chain {
            Some(1) => Ok(multicall_reply(&[Some(U256::from(9u64))])),
            _ => Err(eyre!("no backend for chain")),
        }));
        let loader = BalanceLoader::new(rpc.clone());

        let tokens = vec![token(1, TOKEN_A, "AAA", 0), token(10, TOKEN_B, "BBB", 0)];
        let balances = loader.token_balances(ACCOUNT, &tokens).await;

        assert_eq!(rpc.calls().len(), 2);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].token.symbol, "AAA");
    }

    #[tokio::test]
    async fn chains_without_multicall_fall_back_to_per_token_calls() {
        let rpc = StubRpc::new(Box::new(|chain, _, params| {
            assert_eq!(chain, Some(7777));
            let to = params[0]["to"].as_str().unwrap().to_ascii_lowercase();
            if to == TOKEN_A {
                Ok(balance_reply(U256::from(3u64)))
            } else {
                Err(eyre!("execution reverted"))
            }
        }));
        let loader = BalanceLoader::new(rpc.clone());

        let tokens = vec![
            token(7777, TOKEN_A, "AAA", 0),
            token(7777, TOKEN_B, "BBB", 0),
        ];
        let balances = loader.token_balances(ACCOUNT, &tokens).await;

        // one request per contract, the failing one logged and skipped
        assert_eq!(rpc.calls().len(), 2);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].token.symbol, "AAA");
    }

    #[tokio::test]
    async fn reverted_batch_legs_are_dropped() {
        let rpc = StubRpc::new(Box::new(|_, _, _| {
            Ok(multicall_reply(&[Some(U256::from(2u64)), None]))
        }));
        let loader = BalanceLoader::new(rpc);

        let tokens = vec![token(1, TOKEN_A, "AAA", 0), token(1, TOKEN_B, "BBB", 0)];
        let balances = loader.token_balances(ACCOUNT, &tokens).await;

        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].token.symbol, "AAA");
    }

    #[tokio::test]
    async fn native_balance_parses_the_provider_quantity() {
        let rpc = StubRpc::new(Box::new(|_, method, _| {
            assert_eq!(method, "eth_getBalance");
            Ok(Value::String("0xde0b6b3a7640000".to_string()))
        }));
        let loader = BalanceLoader::new(rpc);

        let balance = loader.native_currency_balance(ACCOUNT).await.unwrap();

        assert_eq!(balance.balance, U256::from(10u64).pow(U256::from(18)));
        assert_eq!(balance.display_balance, "1");
        assert_eq!(balance.decimals, NATIVE_DECIMALS);
    }

    #[tokio::test]
    async fn native_balance_failures_propagate() {
        let rpc = StubRpc::new(Box::new(|_, _, _| Err(eyre!("provider unreachable"))));
        let loader = BalanceLoader::new(rpc);

        assert!(loader.native_currency_balance(ACCOUNT).await.is_err());
    }

    #[test]
    fn display_balances_trim_trailing_zeros() {
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
        assert_eq!(format_units(U256::from(1u64), 2), "0.01");
    }
}
