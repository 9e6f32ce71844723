//! Snapshot watching by polling.

use std::time::Duration;

use tapper_core::{Snapshot, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::TapperClient;

/// A polling snapshot watcher started by [`TapperClient::watch_snapshot`].
///
/// Polls are diffed against the last delivered snapshot; only changes wake
/// [`SnapshotWatch::changed`]. Transient failures are logged and retried on the
/// next tick; any other failure ends the watch.
pub struct SnapshotWatch {
    receiver: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl SnapshotWatch {
    pub(crate) fn spawn(
        client: TapperClient,
        user_id: UserId,
        initial: Snapshot,
        interval: Duration,
    ) -> Self {
        let (sender, receiver) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately and the initial value is already known
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }

                match client.snapshot(&user_id).await {
                    Ok(snapshot) => {
                        sender.send_if_modified(|current| {
                            if *current == snapshot {
                                false
                            } else {
                                *current = snapshot;
                                true
                            }
                        });
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(user_id = %user_id, error = %e, "Snapshot poll failed, retrying");
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, error = %e, "Snapshot watch stopped");
                        break;
                    }
                }
            }
        });

        Self { receiver, task }
    }

    /// The most recent snapshot, marking it as seen.
    pub fn latest(&mut self) -> Snapshot {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for the next change and return the newest snapshot.
    ///
    /// Returns `None` once polling has stopped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop polling.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for SnapshotWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
