//! Background reaper for silent channels

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::table::ChannelTable;

/// Handle to a running reaper task
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for its current sweep to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Channel reaper task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(table: Arc<ChannelTable>) -> ReaperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let interval = table.config().reap_interval.max(Duration::from_millis(1));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Channel reaper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = table.reap_expired(Instant::now());
                    if !reaped.is_empty() {
                        tracing::debug!(reaped = ?reaped, remaining = table.len(), "Reaper sweep");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Channel reaper stopped");
    });

    ReaperHandle { shutdown_tx, task }
}
