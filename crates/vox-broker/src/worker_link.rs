//! Broker-side handling of one worker connection.
//!
//! A worker that dials `/worker/ws/speech` is registered into the idle pool
//! and stays registered until its transport drops. The reader task routes
//! every upstream event to whichever session is currently bound; the writer
//! task drains the frame queue sessions push into.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use vox_core::ids::WorkerId;
use vox_core::messages::{ResultEvent, CANCEL_SENTINEL, EOS_SENTINEL};

use crate::pool::{WorkerFrame, WorkerHandle};
use crate::state::BrokerState;

/// Serve one worker connection until it drops, then unregister it.
pub async fn run_worker_connection(socket: WebSocket, state: Arc<BrokerState>) {
    let id = WorkerId::new();
    let (frames_tx, frames_rx) = mpsc::channel::<WorkerFrame>(state.config.max_send_queue);
    let handle = WorkerHandle::new(id.clone(), frames_tx);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_worker(ws_tx, frames_rx, id.clone()));

    state.register_worker(handle.clone());

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ResultEvent>(&text) {
                Ok(event) => match handle.binding() {
                    Some(binding) => {
                        if binding.events.send(event).await.is_err() {
                            tracing::debug!(
                                worker_id = %id,
                                request_id = %binding.request_id,
                                "Bound session gone, dropping event"
                            );
                        }
                    }
                    None => {
                        tracing::warn!(worker_id = %id, "Event from unassigned worker, dropping");
                    }
                },
                Err(e) => {
                    tracing::warn!(worker_id = %id, error = %e, "Unparseable worker event");
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(worker_id = %id, error = %e, "Worker transport error");
                break;
            }
        }
    }

    state.unregister_worker(&id);
    writer.abort();
}

/// Forward queued frames onto the worker socket.
async fn write_worker(
    mut ws_tx: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut frames_rx: mpsc::Receiver<WorkerFrame>,
    id: WorkerId,
) {
    while let Some(frame) = frames_rx.recv().await {
        let msg = match frame {
            WorkerFrame::Init(init) => match serde_json::to_string(&init) {
                Ok(json) => WsMessage::Text(json.into()),
                Err(e) => {
                    tracing::error!(worker_id = %id, error = %e, "Could not serialize init");
                    continue;
                }
            },
            WorkerFrame::Audio(data) => WsMessage::Binary(data),
            WorkerFrame::Eos => WsMessage::Text(EOS_SENTINEL.into()),
            WorkerFrame::Cancel => WsMessage::Text(CANCEL_SENTINEL.into()),
            WorkerFrame::Adaptation(push) => match serde_json::to_string(&push) {
                Ok(json) => WsMessage::Text(json.into()),
                Err(e) => {
                    tracing::error!(worker_id = %id, error = %e, "Could not serialize adaptation");
                    continue;
                }
            },
            WorkerFrame::Close => break,
        };
        if ws_tx.send(msg).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}
