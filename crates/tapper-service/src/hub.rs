//! Snapshot fan-out to subscribers.
//!
//! Each subscribed user has one `watch` channel holding the latest snapshot.
//! Publishing replaces the value, so a slow subscriber sees only the newest
//! state (coalescing) and never an unbounded backlog.
//!
//! Readers that build a snapshot and publish it hold the user's gate from
//! [`SnapshotHub::lock_user`] across both steps, so channel values only move
//! forward.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;

use tapper_core::{Snapshot, UserId};

/// Latest-value channels keyed by user.
#[derive(Default)]
pub struct SnapshotHub {
    channels: RwLock<HashMap<UserId, watch::Sender<Snapshot>>>,
    gates: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl SnapshotHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize snapshot reads and publishes for one user.
    ///
    /// Hold the guard from before reading the store until the snapshot has
    /// been handed to [`Self::publish`] or [`Self::subscribe`].
    pub async fn lock_user(&self, user_id: &UserId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().await;
            Arc::clone(gates.entry(user_id.clone()).or_default())
        };
        gate.lock_owned().await
    }

    /// Register a subscriber for the snapshot's user.
    ///
    /// `current` seeds a new channel. A channel that already has subscribers
    /// keeps its value; publishes own it from then on.
    pub async fn subscribe(&self, current: Snapshot) -> SnapshotSubscription {
        let mut channels = self.channels.write().await;
        let user_id = current.user_id.clone();

        let receiver = match channels.get(&user_id) {
            Some(sender) if sender.receiver_count() > 0 => sender.subscribe(),
            Some(sender) => {
                let receiver = sender.subscribe();
                replace_if_changed(sender, current);
                receiver
            }
            None => {
                let (sender, receiver) = watch::channel(current);
                channels.insert(user_id.clone(), sender);
                receiver
            }
        };

        tracing::debug!(user_id = %user_id, "Snapshot subscriber registered");
        SnapshotSubscription { user_id, receiver }
    }

    /// Publish a snapshot. Subscribers are woken only when it differs from the
    /// last published value. Returns whether anyone was notified.
    pub async fn publish(&self, snapshot: Snapshot) -> bool {
        let channels = self.channels.read().await;
        channels
            .get(&snapshot.user_id)
            .is_some_and(|sender| sender.receiver_count() > 0 && replace_if_changed(sender, snapshot))
    }

    /// Whether the user currently has at least one subscriber.
    pub async fn is_subscribed(&self, user_id: &UserId) -> bool {
        self.channels
            .read()
            .await
            .get(user_id)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }

    /// Users with live subscribers. Channels whose subscribers are all gone
    /// are dropped, along with gates nobody holds.
    pub async fn subscribed_users(&self) -> Vec<UserId> {
        let mut channels = self.channels.write().await;
        channels.retain(|user_id, sender| {
            let live = sender.receiver_count() > 0;
            if !live {
                tracing::debug!(user_id = %user_id, "Dropping idle snapshot channel");
            }
            live
        });
        self.gates
            .lock()
            .await
            .retain(|user_id, gate| channels.contains_key(user_id) || Arc::strong_count(gate) > 1);
        channels.keys().cloned().collect()
    }
}

fn replace_if_changed(sender: &watch::Sender<Snapshot>, snapshot: Snapshot) -> bool {
    sender.send_if_modified(|current| {
        if *current == snapshot {
            false
        } else {
            *current = snapshot;
            true
        }
    })
}

/// A live subscription to one user's snapshots.
///
/// Stays active until [`SnapshotSubscription::unsubscribe`] is called or the
/// value is dropped.
pub struct SnapshotSubscription {
    user_id: UserId,
    receiver: watch::Receiver<Snapshot>,
}

impl SnapshotSubscription {
    /// The subscribed user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The most recent snapshot, marking it as seen.
    pub fn latest(&mut self) -> Snapshot {
        self.receiver.borrow_and_update().clone()
    }

    /// Wait for the next change and return the newest snapshot.
    ///
    /// Intermediate values published while the caller was busy are skipped.
    /// Returns `None` once the hub has dropped the channel.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop receiving updates.
    pub fn unsubscribe(self) {
        tracing::debug!(user_id = %self.user_id, "Snapshot subscriber removed");
    }
}

/// Handle of a callback subscription started with
/// [`crate::engine::PointsEngine::subscribe_with`].
///
/// Dropping the handle detaches the callback task; call
/// [`SubscriptionHandle::unsubscribe`] to stop it.
#[must_use = "the callback keeps running until unsubscribe is called"]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Run `on_change` for every change seen by `subscription`.
    pub fn spawn<F>(mut subscription: SnapshotSubscription, mut on_change: F) -> Self
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.changed().await {
                on_change(snapshot);
            }
        });
        Self { task }
    }

    /// Stop the callback. No invocation starts after this returns.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}
