//! Live snapshot stream over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;

use tapper_core::Snapshot;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::hub::SnapshotSubscription;
use crate::state::AppState;

/// Per-message send timeout. A client that cannot keep up is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Upgrade to a WebSocket streaming the caller's snapshots as JSON text
/// frames. The current snapshot is sent first, then one frame per change.
pub async fn snapshot_stream(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Subscribe before upgrading so an unknown user gets a 404, not a socket
    let subscription = state.engine.subscribe(&auth.user_id).await?;

    Ok(ws.on_upgrade(move |socket| run_stream(socket, subscription)))
}

async fn run_stream(socket: WebSocket, mut subscription: SnapshotSubscription) {
    let user_id = subscription.user_id().clone();
    tracing::debug!(user_id = %user_id, "Snapshot stream connected");

    let (mut sender, mut receiver) = socket.split();

    let initial = subscription.latest();
    if send_snapshot(&mut sender, &initial).await.is_err() {
        subscription.unsubscribe();
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = %e, "Snapshot stream read failed");
                    break;
                }
            },
            changed = subscription.changed() => {
                let Some(snapshot) = changed else { break };
                if send_snapshot(&mut sender, &snapshot).await.is_err() {
                    break;
                }
            }
        }
    }

    subscription.unsubscribe();
    tracing::debug!(user_id = %user_id, "Snapshot stream closed");
}

async fn send_snapshot<S>(sender: &mut S, snapshot: &Snapshot) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(snapshot) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode snapshot");
            return Err(());
        }
    };

    match timeout(SEND_TIMEOUT, sender.send(Message::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(()),
        Err(_) => {
            tracing::warn!(user_id = %snapshot.user_id, "Snapshot stream send timed out");
            Err(())
        }
    }
}
