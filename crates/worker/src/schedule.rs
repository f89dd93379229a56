//! Fixed-interval task loop shared by the background jobs.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Calls `tick` every `interval` until `shutdown` flips to `true` or its
/// sender is dropped. The first tick fires immediately.
pub async fn run_periodically<F, Fut>(
    task: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(task, interval_secs = interval.as_secs(), "background task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => tick().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!(task, "background task stopped");
}
