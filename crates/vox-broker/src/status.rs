//! Read-only fan-out of aggregate broker state.
//!
//! Every pool mutation and finished request publishes a fresh snapshot;
//! any number of listeners subscribe over `/client/ws/status` and get the
//! current snapshot immediately, then every change. Listeners have no
//! control authority.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::state::BrokerState;

/// One point-in-time view of the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub num_workers_available: usize,
    pub num_requests_processed: u64,
}

pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusSnapshot>,
    requests_processed: AtomicU64,
    workers_available: AtomicUsize,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            requests_processed: AtomicU64::new(0),
            workers_available: AtomicUsize::new(0),
        }
    }

    /// Record the current idle-worker count and push a snapshot to all
    /// listeners. No listeners is fine.
    pub fn publish(&self, workers_available: usize) {
        self.workers_available
            .store(workers_available, Ordering::Relaxed);
        let _ = self.tx.send(self.snapshot());
    }

    pub fn increment_processed(&self) -> u64 {
        self.requests_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            num_workers_available: self.workers_available.load(Ordering::Relaxed),
            num_requests_processed: self.requests_processed.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

/// Serve one status listener until it disconnects.
pub async fn run_status_listener(socket: WebSocket, state: Arc<BrokerState>) {
    tracing::info!("New status listener");
    let mut updates = state.status.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Current snapshot first, then changes as they happen.
    if send_snapshot(&mut ws_tx, state.status.snapshot()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    if send_snapshot(&mut ws_tx, snapshot).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped = skipped, "Status listener lagged");
                    // Catch up with the freshest snapshot.
                    if send_snapshot(&mut ws_tx, state.status.snapshot()).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = ws_rx.next() => match msg {
                // Listeners are read-only; anything they send is ignored.
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            _ = state.shutdown.cancelled() => break,
        }
    }

    tracing::info!("Status listener left");
}

async fn send_snapshot(
    ws_tx: &mut (impl Sink<WsMessage, Error = axum::Error> + Unpin),
    snapshot: StatusSnapshot,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(&snapshot).map_err(axum::Error::new)?;
    ws_tx.send(WsMessage::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let snapshot = StatusSnapshot {
            num_workers_available: 2,
            num_requests_processed: 17,
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["num_workers_available"], 2);
        assert_eq!(json["num_requests_processed"], 17);
    }

    #[test]
    fn publish_reaches_all_subscribers() {
        let status = StatusBroadcaster::new(8);
        let mut a = status.subscribe();
        let mut b = status.subscribe();

        status.publish(3);

        assert_eq!(a.try_recv().unwrap().num_workers_available, 3);
        assert_eq!(b.try_recv().unwrap().num_workers_available, 3);
    }

    #[test]
    fn processed_counter_accumulates() {
        let status = StatusBroadcaster::new(8);
        assert_eq!(status.increment_processed(), 1);
        assert_eq!(status.increment_processed(), 2);
        status.publish(0);
        assert_eq!(status.snapshot().num_requests_processed, 2);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let status = StatusBroadcaster::new(8);
        status.publish(5);
        assert_eq!(status.snapshot().num_workers_available, 5);
    }
}
