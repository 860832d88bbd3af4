use std::sync::Arc;

use color_eyre::eyre::{self, eyre};
use scan_core::{
    balances::BalanceLoader,
    chain::supports_multicall,
    currencies::CurrencyDataLoader,
    inventory::InventoryLoader,
    market::MarketData,
    message::{OutboundMessage, WorkerCommand},
    provider::ChainRpc,
    rates::RatesLoader,
    tokens::{TokenDefinition, TokenRegistry},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    StopReason,
    heartbeat::{HEARTBEAT_WINDOW, Heartbeat},
};

/// The worker's single entry point: receives commands from the
/// supervising process, drives the loaders and forwards their results.
pub(crate) struct Worker {
    shutdown_token: CancellationToken,
    provider: Arc<dyn ChainRpc>,
    registry: TokenRegistry,
    rates: RatesLoader,
    currencies: CurrencyDataLoader,
    inventory: InventoryLoader,
    // constructed once the provider connection is established
    balances: Option<Arc<BalanceLoader>>,
    heartbeat: Heartbeat,
    commands: mpsc::Receiver<WorkerCommand>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Worker {
    pub(crate) fn new(
        shutdown_token: CancellationToken,
        provider: Arc<dyn ChainRpc>,
        market: Arc<dyn MarketData>,
        commands: mpsc::Receiver<WorkerCommand>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            shutdown_token,
            provider,
            registry: TokenRegistry::new(market.clone()),
            rates: RatesLoader::new(market.clone()),
            currencies: CurrencyDataLoader::new(market.clone()),
            inventory: InventoryLoader::new(market),
            balances: None,
            heartbeat: Heartbeat::new(),
            commands,
            outbound,
        }
    }

    #[instrument(name = "scan_worker", skip_all)]
    pub(crate) async fn run(mut self) -> eyre::Result<StopReason> {
        let mut connected = self.provider.connected();
        // the connection may already be up by the time the worker starts
        if *connected.borrow_and_update() {
            self.on_connected();
        }

        loop {
            select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("scan worker received shutdown signal");
                    break Ok(StopReason::Shutdown);
                }

                () = self.heartbeat.expired() => {
                    warn!(
                        "no heartbeat received in {}, worker exiting",
                        humantime::format_duration(HEARTBEAT_WINDOW)
                    );
                    break Ok(StopReason::HeartbeatExpired);
                }

                res = connected.changed() => {
                    if res.is_err() {
                        break Err(eyre!("provider connection terminated unexpectedly"));
                    }
                    // runs once per established connection, again after reconnects
                    if *connected.borrow_and_update() {
                        self.on_connected();
                    }
                }

                maybe_command = self.commands.recv() => {
                    let Some(command) = maybe_command else {
                        info!("command channel closed, worker exiting");
                        break Ok(StopReason::Shutdown);
                    };
                    self.dispatch(command);
                }
            }
        }
    }

    /// One-time initialization per connection: build the balance loader,
    /// start the token registry and signal readiness to the parent.
    fn on_connected(&mut self) {
        info!(chain_id = self.provider.chain_id(), "provider connected");
        self.balances = Some(Arc::new(BalanceLoader::new(self.provider.clone())));

        let provider = self.provider.clone();
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let chains = provider.chains().await;
            let _ = registry.start(chains);
            forward(&outbound, OutboundMessage::Ready).await;
        });
    }

    /// Maps a command name to its handler. Handlers are spawned so their
    /// completions interleave; only the heartbeat is handled inline.
    fn dispatch(&mut self, command: WorkerCommand) {
        let args_repr = Value::Array(command.args.clone());
        debug!(
            command = %command.command,
            args = %args_repr,
            "received command"
        );
        let WorkerCommand { command, args } = command;

        match command.as_str() {
            "heartbeat" => self.heartbeat.reset(),
            "updateRates" => self.rates_scan(arg(&args, 0), arg(&args, 1)),
            "updateNativeCurrencyData" => self.native_currency_scan(arg(&args, 0)),
            "updateChainBalance" => self.chain_balance_scan(arg(&args, 0), arg(&args, 1)),
            "fetchTokenBalances" => self.fetch_token_balances(arg(&args, 0), arg(&args, 1)),
            "tokenBalanceScan" => self.token_balance_scan(arg(&args, 0)),
            "updateInventory" => self.inventory_scan(arg(&args, 0)),
            // a lookup miss is an integration bug and must fail loud
            other => panic!("unknown worker command: {other}"),
        }
    }

    fn rates_scan(&self, symbols: Vec<String>, chain_id: u64) {
        let rates = self.rates.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            match rates.load(&symbols, chain_id).await {
                Ok(rates) => forward(&outbound, OutboundMessage::Rates { rates }).await,
                Err(e) => error!(%e, "rates scan error"),
            }
        });
    }

    fn native_currency_scan(&self, symbols: Vec<String>) {
        let currencies = self.currencies.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            match currencies.load(&symbols).await {
                Ok(currency_data) => {
                    forward(&outbound, OutboundMessage::NativeCurrencyData { currency_data }).await;
                }
                Err(e) => error!(%e, "native currency scan error"),
            }
        });
    }

    fn chain_balance_scan(&self, address: String, symbol: String) {
        let Some(balances) = self.balances.clone() else {
            error!("balance loader not initialized, dropping chain balance scan");
            return;
        };
        let provider = self.provider.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            match balances.native_currency_balance(&address).await {
                Ok(balance) => {
                    let message = OutboundMessage::ChainBalance {
                        address,
                        symbol,
                        chain_id: provider.chain_id(),
                        balance,
                    };
                    forward(&outbound, message).await;
                }
                Err(e) => error!(%e, "error scanning chain balance"),
            }
        });
    }

    fn fetch_token_balances(&self, address: String, tokens: Vec<TokenDefinition>) {
        let Some(balances) = self.balances.clone() else {
            error!("balance loader not initialized, dropping token balance fetch");
            return;
        };
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let found = balances.token_balances(&address, &tokens).await;
            forward(
                &outbound,
                OutboundMessage::TokenBalances {
                    address,
                    balances: found,
                },
            )
            .await;
        });
    }

    fn token_balance_scan(&self, address: String) {
        let Some(balances) = self.balances.clone() else {
            error!("balance loader not initialized, dropping token balance scan");
            return;
        };
        let provider = self.provider.clone();
        let registry = self.registry.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            // chains that cannot be scanned in bulk are skipped rather
            // than walked contract by contract
            let chains: Vec<u64> = provider
                .chains()
                .await
                .into_iter()
                .filter(|chain_id| supports_multicall(*chain_id))
                .collect();

            let mut tokens = Vec::new();
            for chain_id in chains {
                tokens.extend(registry.tokens(chain_id).await);
            }

            let found = balances.token_balances(&address, &tokens).await;
            forward(
                &outbound,
                OutboundMessage::TokenBalances {
                    address,
                    balances: found,
                },
            )
            .await;
        });
    }

    /// One task per address, no join: each resolution settles and reports
    /// on its own, so results arrive in completion order.
    fn inventory_scan(&self, addresses: Vec<String>) {
        for address in addresses {
            let inventory = self.inventory.clone();
            let outbound = self.outbound.clone();
            tokio::spawn(async move {
                match inventory.load(&address).await {
                    Ok(found) => {
                        let message = OutboundMessage::Inventory {
                            address,
                            inventory: found,
                        };
                        forward(&outbound, message).await;
                    }
                    Err(e) => error!(%address, %e, "inventory scan error"),
                }
            });
        }
    }
}

async fn forward(outbound: &mpsc::Sender<OutboundMessage>, message: OutboundMessage) {
    if outbound.send(message).await.is_err() {
        error!("cannot send to parent process, dropping message");
    }
}

/// Positional argument decoding. Missing or malformed arguments are
/// integration bugs and fail loud, like an unknown command.
fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> T {
    let value = args
        .get(index)
        .unwrap_or_else(|| panic!("missing worker command argument {index}"));
    serde_json::from_value(value.clone())
        .unwrap_or_else(|e| panic!("malformed worker command argument {index}: {e}"))
}
