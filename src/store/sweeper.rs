//! Background task that periodically drops expired entries.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running sweeper.
///
/// The task runs until [`Sweeper::shutdown`] is awaited (or the handle is
/// dropped, which cancels it as well).
pub struct Sweeper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Spawns a task that calls `sweep` every `interval`, independent of traffic.
///
/// `sweep` returns how many entries it removed; the count is only logged.
pub fn spawn_sweeper<F, Fut>(interval: Duration, sweep: F) -> Sweeper
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = usize> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sweep().await;
                    debug!(removed, "State sweep complete");
                }
            }
        }
    });

    info!(interval_secs = interval.as_secs(), "State sweeper started");

    Sweeper {
        cancel,
        handle: Some(handle),
    }
}

impl Sweeper {
    /// Stops the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "State sweeper task ended abnormally");
            }
        }
        info!("State sweeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
