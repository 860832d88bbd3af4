use std::collections::HashMap;

use alloy::primitives::U256;
use async_trait::async_trait;
use color_eyre::eyre::{self, WrapErr as _, eyre};
use futures::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
    select,
    sync::{mpsc, oneshot, watch},
    time::{Duration, sleep},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_BUFFER: usize = 64;

/// The request surface of the provider connection. The balance loader and
/// the dispatcher talk to the provider exclusively through this trait.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// JSON-RPC call on the connection's current chain.
    async fn request(&self, method: &str, params: Value) -> eyre::Result<Value>;

    /// JSON-RPC call routed to a specific chain.
    async fn request_on_chain(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> eyre::Result<Value>;

    /// Most recently observed chain id.
    fn chain_id(&self) -> u64;

    /// Chains the provider currently exposes; empty when the probe fails.
    async fn chains(&self) -> Vec<u64>;

    /// Flips to `true` once the connection handshake completes.
    fn connected(&self) -> watch::Receiver<bool>;
}

pub struct Builder {
    pub url: String,
    pub name: String,
    pub shutdown_token: CancellationToken,
}

impl Builder {
    /// Spawns the connection worker and returns a cloneable handle to it.
    pub fn spawn(self) -> (Handle, tokio::task::JoinHandle<eyre::Result<()>>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (chain_tx, chain_rx) = watch::channel(0);

        let worker = Worker {
            url: self.url,
            name: self.name,
            shutdown_token: self.shutdown_token,
            request_rx,
            connected_tx,
            chain_tx,
        };
        let task = tokio::spawn(worker.run());

        (
            Handle {
                request_tx,
                connected_rx,
                chain_rx,
            },
            task,
        )
    }
}

struct PendingRequest {
    method: String,
    params: Value,
    chain_id: Option<u64>,
    reply: oneshot::Sender<eyre::Result<Value>>,
}

/// Cloneable handle to a running provider connection.
#[derive(Clone)]
pub struct Handle {
    request_tx: mpsc::Sender<PendingRequest>,
    connected_rx: watch::Receiver<bool>,
    chain_rx: watch::Receiver<u64>,
}

impl Handle {
    async fn send_request(
        &self,
        chain_id: Option<u64>,
        method: &str,
        params: Value,
    ) -> eyre::Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx
            .send(PendingRequest {
                method: method.to_string(),
                params,
                chain_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| eyre!("provider connection closed"))?;

        reply_rx
            .await
            .map_err(|_| eyre!("provider connection dropped the request"))?
    }
}

#[async_trait]
impl ChainRpc for Handle {
    async fn request(&self, method: &str, params: Value) -> eyre::Result<Value> {
        self.send_request(None, method, params).await
    }

    async fn request_on_chain(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> eyre::Result<Value> {
        self.send_request(Some(chain_id), method, params).await
    }

    fn chain_id(&self) -> u64 {
        *self.chain_rx.borrow()
    }

    async fn chains(&self) -> Vec<u64> {
        match self.send_request(None, "wallet_getChains", json!([])).await {
            Ok(Value::Array(values)) => values
                .iter()
                .filter_map(|value| {
                    parse_chain_id(value)
                        .inspect_err(|e| warn!(%e, "skipping unparseable chain id"))
                        .ok()
                })
                .collect(),
            Ok(other) => {
                error!("wallet_getChains returned an unexpected shape: {other}");
                Vec::new()
            }
            Err(e) => {
                error!(%e, "could not load chains");
                Vec::new()
            }
        }
    }

    fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }
}

struct Worker {
    url: String,
    name: String,
    shutdown_token: CancellationToken,
    request_rx: mpsc::Receiver<PendingRequest>,
    connected_tx: watch::Sender<bool>,
    chain_tx: watch::Sender<u64>,
}

impl Worker {
    #[instrument(name = "provider_connection", skip(self), fields(provider.name = %self.name))]
    async fn run(self) -> eyre::Result<()> {
        let Self {
            url,
            name,
            shutdown_token,
            mut request_rx,
            connected_tx,
            chain_tx,
        } = self;

        loop {
            select! {
                () = shutdown_token.cancelled() => {
                    info!("provider connection received shutdown signal");
                    break Ok(());
                }

                res = serve(&url, &name, &mut request_rx, &connected_tx, &chain_tx) => match res {
                    // the request channel closed, the daemon is going away
                    Ok(()) => break Ok(()),
                    Err(e) => {
                        connected_tx.send_replace(false);
                        error!(%e, delay = ?RECONNECT_DELAY, "provider connection lost, reconnecting");
                        select! {
                            () = shutdown_token.cancelled() => break Ok(()),
                            () = sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }
}

/// One connection lifetime: dial, probe the chain id, then route requests
/// and notifications until the transport drops.
async fn serve(
    url: &str,
    name: &str,
    request_rx: &mut mpsc::Receiver<PendingRequest>,
    connected_tx: &watch::Sender<bool>,
    chain_tx: &watch::Sender<u64>,
) -> eyre::Result<()> {
    let url = format!("{url}?identity={name}");
    let (socket, _) = connect_async(url.as_str())
        .await
        .wrap_err("failed to connect to provider")?;
    let (mut write, mut read) = socket.split();

    let mut next_id: u64 = 1;
    let mut pending: HashMap<u64, oneshot::Sender<eyre::Result<Value>>> = HashMap::new();

    // the initial chain probe doubles as the handshake
    let probe_id = next_id;
    next_id += 1;
    let frame = encode_request(probe_id, "eth_chainId", json!([]), None);
    write
        .send(Message::Text(frame.to_string().into()))
        .await
        .wrap_err("failed to send chain probe")?;
    let mut probe = Some(probe_id);

    loop {
        select! {
            maybe_request = request_rx.recv() => {
                let Some(request) = maybe_request else { return Ok(()); };

                let id = next_id;
                next_id += 1;
                let frame = encode_request(id, &request.method, request.params, request.chain_id);
                match write.send(Message::Text(frame.to_string().into())).await {
                    Ok(()) => {
                        pending.insert(id, request.reply);
                    }
                    Err(e) => {
                        let _ = request.reply.send(Err(eyre!("provider transport error: {e}")));
                        fail_pending(&mut pending);
                        return Err(e).wrap_err("provider write failed");
                    }
                }
            }

            maybe_frame = read.next() => {
                let Some(frame) = maybe_frame else {
                    fail_pending(&mut pending);
                    return Err(eyre!("provider closed the connection"));
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        fail_pending(&mut pending);
                        return Err(e).wrap_err("provider read failed");
                    }
                };

                match frame {
                    Message::Text(text) => {
                        route_frame(chain_tx, connected_tx, &mut pending, &mut probe, &text);
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => {
                        fail_pending(&mut pending);
                        return Err(eyre!("provider closed the connection"));
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Vec<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Routes one text frame: responses complete their pending request, the
/// probe response establishes the connection, notifications update the
/// chain watch.
fn route_frame(
    chain_tx: &watch::Sender<u64>,
    connected_tx: &watch::Sender<bool>,
    pending: &mut HashMap<u64, oneshot::Sender<eyre::Result<Value>>>,
    probe: &mut Option<u64>,
    text: &str,
) {
    let incoming: Incoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!(%e, "skipping unparseable provider frame");
            return;
        }
    };

    if let Some(id) = incoming.id {
        let outcome = match (incoming.result, incoming.error) {
            (_, Some(err)) => Err(eyre!(
                "provider rejected request: {} (code {})",
                err.message,
                err.code
            )),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        };

        if *probe == Some(id) {
            *probe = None;
            match outcome.and_then(|value| parse_chain_id(&value)) {
                Ok(chain_id) => {
                    chain_tx.send_replace(chain_id);
                    connected_tx.send_replace(true);
                    info!(chain_id, "provider connection established");
                }
                Err(e) => warn!(%e, "chain probe failed"),
            }
        } else if let Some(reply) = pending.remove(&id) {
            let _ = reply.send(outcome);
        } else {
            debug!(id, "response for unknown request id");
        }
        return;
    }

    match incoming.method.as_deref() {
        Some("chainChanged") => match incoming.params.first().map(parse_chain_id) {
            Some(Ok(chain_id)) => {
                info!(chain_id, "provider switched chains");
                chain_tx.send_replace(chain_id);
            }
            _ => warn!("chainChanged notification without a usable chain id"),
        },
        Some(other) => debug!(method = other, "ignoring provider notification"),
        None => debug!("ignoring provider frame without id or method"),
    }
}

fn fail_pending(pending: &mut HashMap<u64, oneshot::Sender<eyre::Result<Value>>>) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(eyre!("provider connection lost")));
    }
}

fn encode_request(id: u64, method: &str, params: Value, chain_id: Option<u64>) -> Value {
    let mut frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(chain_id) = chain_id {
        frame["chainId"] = Value::String(format!("{chain_id:#x}"));
    }
    frame
}

/// Parse a hex quantity result (`"0x..."`) into a [`U256`].
pub fn parse_quantity(value: &Value) -> eyre::Result<U256> {
    let raw = value
        .as_str()
        .ok_or_else(|| eyre!("expected a hex quantity, got {value}"))?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .wrap_err_with(|| format!("invalid hex quantity {raw}"))
}

/// Parse a chain id given as a JSON number, decimal string or hex string.
pub fn parse_chain_id(value: &Value) -> eyre::Result<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| eyre!("chain id out of range: {number}")),
        Value::String(raw) => {
            if let Some(hex) = raw.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).wrap_err_with(|| format!("invalid chain id {raw}"))
            } else {
                raw.parse()
                    .wrap_err_with(|| format!("invalid chain id {raw}"))
            }
        }
        other => Err(eyre!("unexpected chain id {other}")),
    }
}
