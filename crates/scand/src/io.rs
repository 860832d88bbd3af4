use scan_core::message::{OutboundMessage, WorkerCommand};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, error};

/// Feed stdin lines to the dispatcher, one JSON command envelope per line.
pub(crate) fn spawn_reader(commands: mpsc::Sender<WorkerCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // a line that is not a command envelope is an integration bug
                    let command: WorkerCommand = serde_json::from_str(&line)
                        .unwrap_or_else(|e| panic!("malformed worker command {line:?}: {e}"));
                    if commands.send(command).await.is_err() {
                        debug!("dispatcher gone, stopping command reader");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("command input closed");
                    break;
                }
                Err(e) => {
                    error!(%e, "failed reading command input");
                    break;
                }
            }
        }
    })
}

/// Serialize outbound messages to stdout, one JSON document per line. A
/// write failure is logged and the message dropped; delivery is never
/// buffered or retried.
pub(crate) fn spawn_writer(mut outbound: mpsc::Receiver<OutboundMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    error!(%e, "unserializable outbound message");
                    continue;
                }
            };
            line.push('\n');

            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!(%e, "cannot send to parent process");
                continue;
            }
            let _ = stdout.flush().await;
        }
    })
}
