use std::process::ExitCode;

use color_eyre::eyre;
use scan_core::config::Config;
use scand::{
    Scand, StopReason,
    telemetry::{self, init_subscriber},
};
use tokio::{
    select,
    signal::unix::{SignalKind, signal},
};
use tracing::{error, info, instrument, warn};

// 128 + SIGHUP, the exit status a hangup-terminated process reports
const HANGUP_EXIT_CODE: u8 = 129;

#[tokio::main]
async fn main() -> ExitCode {
    // set up config
    let cfg: Config = match Config::load() {
        Err(err) => {
            eprintln!("failed to read config:\n{err:?}");
            return ExitCode::FAILURE;
        }
        Ok(cfg) => cfg,
    };

    // set up tracing
    let tracing_subscriber = telemetry::get_subscriber();
    init_subscriber(tracing_subscriber);

    // spawn service
    let mut scand = match Scand::spawn(cfg) {
        Ok(scand) => scand,
        Err(e) => {
            error!(%e, "failed initializing scan worker");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm = signal(SignalKind::terminate())
        .expect("setting sigterm listener on unix should always work");

    select! {
        _ = sigterm.recv() => shutdown(scand).await,
        res = &mut scand => exit_code(res),
    }
}

#[instrument(skip_all)]
async fn shutdown(service: Scand) -> ExitCode {
    info!("received SIGTERM, shutting down");
    match service.shutdown().await {
        Ok(reason) => {
            info!(?reason, "shutdown successful");
            ExitCode::SUCCESS
        }
        Err(e) => {
            warn!(%e, "shutting down");
            ExitCode::FAILURE
        }
    }
}

fn exit_code(res: eyre::Result<StopReason>) -> ExitCode {
    match res {
        // the liveness contract: a silent parent means we hang up on ourselves
        Ok(StopReason::HeartbeatExpired) => ExitCode::from(HANGUP_EXIT_CODE),
        Ok(StopReason::Shutdown) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "scan worker exited unexpectedly");
            ExitCode::FAILURE
        }
    }
}
