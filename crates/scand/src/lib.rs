use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use color_eyre::eyre::{self, Context as _};
use scan_core::{config::Config, market::MarketClient, provider};
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

mod heartbeat;
mod io;
pub mod telemetry;
mod worker;

/// Why the worker stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Clean stop: shutdown was requested or the command channel closed.
    Shutdown,
    /// The supervising process went silent past the liveness window.
    HeartbeatExpired,
}

/// The [`Scand`] service returned by [`Scand::spawn`].
pub struct Scand {
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<eyre::Result<StopReason>>>,
}

impl Scand {
    /// Spawns the scan worker: the provider connection, the stdio
    /// command/result plumbing and the dispatcher.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be initialized.
    pub fn spawn(cfg: Config) -> eyre::Result<Self> {
        let shutdown_token = CancellationToken::new();

        let (provider_handle, _provider_task) = provider::Builder {
            url: cfg.provider.ws_url,
            name: cfg.provider.name,
            shutdown_token: shutdown_token.child_token(),
        }
        .spawn();

        let market = Arc::new(
            MarketClient::new(cfg.market.base_url)
                .wrap_err("failed to initialize market data client")?,
        );

        let (command_tx, command_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let _ = io::spawn_reader(command_tx);
        let _ = io::spawn_writer(outbound_rx);

        let inner = worker::Worker::new(
            shutdown_token.child_token(),
            Arc::new(provider_handle),
            market,
            command_rx,
            outbound_tx,
        );
        let task = tokio::spawn(inner.run());

        Ok(Self {
            shutdown_token,
            task: Some(task),
        })
    }

    /// Shuts down the worker, in turn stopping the provider connection.
    ///
    /// # Errors
    /// Returns an error if an error occured during shutdown.
    ///
    /// # Panics
    /// Panics if called twice
    pub async fn shutdown(mut self) -> eyre::Result<StopReason> {
        self.shutdown_token.cancel();
        flatten_join_result(
            self.task
                .take()
                .expect("shutdown must only be called once")
                .await,
        )
    }
}

impl Future for Scand {
    type Output = eyre::Result<StopReason>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .task
            .as_mut()
            .expect("scand must not be polled after completion");
        task.poll_unpin(cx).map(flatten_join_result)
    }
}

fn flatten_join_result<T>(res: Result<eyre::Result<T>, JoinError>) -> eyre::Result<T> {
    match res {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(e).wrap_err("task returned with error"),
        Err(e) => Err(e).wrap_err("task panicked"),
    }
}
