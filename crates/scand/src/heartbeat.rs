use std::{pin::Pin, time::Duration};

use tokio::time::{Instant, Sleep, sleep};

pub(crate) const HEARTBEAT_WINDOW: Duration = Duration::from_secs(60);

/// Liveness countdown, armed at startup and rewound by every heartbeat
/// command. Expiry is terminal for the worker: a silent supervisor is
/// presumed dead.
pub(crate) struct Heartbeat {
    deadline: Pin<Box<Sleep>>,
}

impl Heartbeat {
    pub(crate) fn new() -> Self {
        Self {
            deadline: Box::pin(sleep(HEARTBEAT_WINDOW)),
        }
    }

    /// Restart the countdown from now, cancelling the previous one.
    pub(crate) fn reset(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + HEARTBEAT_WINDOW);
    }

    /// Resolves when the countdown runs out.
    pub(crate) async fn expired(&mut self) {
        self.deadline.as_mut().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_window() {
        let mut heartbeat = Heartbeat::new();
        let started = Instant::now();

        heartbeat.expired().await;

        assert!(started.elapsed() >= HEARTBEAT_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rewinds_the_countdown() {
        let mut heartbeat = Heartbeat::new();

        tokio::time::sleep(Duration::from_secs(59)).await;
        heartbeat.reset();

        let reset_at = Instant::now();
        heartbeat.expired().await;

        // the original 60s mark passes without firing
        assert!(reset_at.elapsed() >= HEARTBEAT_WINDOW);
    }
}
