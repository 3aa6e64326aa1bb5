//! Chunked-transfer HTTP recognition.
//!
//! One-shot alternative to the streaming WebSocket interface: the request
//! body is forwarded to a worker chunk by chunk as it arrives, and the
//! response carries the concatenated final hypotheses once the decoder
//! drains. Useful for clients that cannot hold a WebSocket open.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use vox_core::caps::content_type_to_caps;
use vox_core::ids::RequestId;
use vox_core::messages::{InitRequest, ResultEvent};
use vox_core::status::Status;

use crate::pool::{SessionBinding, WorkerFrame, WorkerHandle};
use crate::state::BrokerState;

pub async fn recognize_handler(
    State(state): State<Arc<BrokerState>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let id = RequestId::new();
    let user = header_str(&headers, "device-id");
    let content_id = header_str(&headers, "content-id");
    let caps = header_str(&headers, "content-type").map(|ct| content_type_to_caps(&ct));
    tracing::info!(
        request_id = %id,
        user = user.as_deref().unwrap_or("none"),
        content = content_id.as_deref().unwrap_or("none"),
        "Chunked recognize request"
    );

    let Some(worker) = state.acquire_worker() else {
        tracing::warn!(request_id = %id, "No worker available for HTTP request");
        return (StatusCode::SERVICE_UNAVAILABLE, "No workers available").into_response();
    };

    let (events_tx, mut events_rx) = mpsc::channel::<ResultEvent>(64);
    worker.bind(SessionBinding {
        request_id: id.clone(),
        events: events_tx,
    });

    let init = InitRequest {
        id: id.clone(),
        caps,
        context: content_id,
        user,
        is_call: false,
    };
    if !worker.send(WorkerFrame::Init(init)).await {
        worker.mark_disconnected();
        state.release_worker(worker);
        return error_response(&state, &id, Status::Aborted, "worker connection lost");
    }

    // Relay the body as it arrives, then signal end of audio.
    let mut stream = body.into_data_stream();
    let mut body_ok = true;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                tracing::debug!(request_id = %id, len = data.len(), "Forwarding body chunk");
                if !worker.send(WorkerFrame::Audio(data)).await {
                    worker.mark_disconnected();
                    state.release_worker(worker);
                    return error_response(&state, &id, Status::Aborted, "worker connection lost");
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %id, error = %e, "Client body error");
                body_ok = false;
                break;
            }
        }
    }

    if !body_ok {
        cancel_and_release(&state, worker, &mut events_rx).await;
        return error_response(&state, &id, Status::Aborted, "request body aborted");
    }

    if !worker.send(WorkerFrame::Eos).await {
        worker.mark_disconnected();
        state.release_worker(worker);
        return error_response(&state, &id, Status::Aborted, "worker connection lost");
    }

    // Collect final hypotheses until the worker acknowledges end-of-stream.
    let mut final_hyp = String::new();
    loop {
        match timeout(state.config.silence_timeout, events_rx.recv()).await {
            Ok(Some(event)) => match event.status {
                Status::Eos => break,
                Status::Success => {
                    if let Some(result) = event.result.filter(|r| r.is_final) {
                        for hyp in result.hypotheses.iter().take(1) {
                            if !final_hyp.is_empty() {
                                final_hyp.push(' ');
                            }
                            final_hyp.push_str(&hyp.transcript);
                        }
                    }
                }
                status => {
                    let message = event.message.unwrap_or_default();
                    state.release_worker(worker);
                    return error_response(&state, &id, status, &message);
                }
            },
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(request_id = %id, "Decoder silent, cancelling HTTP request");
                cancel_and_release(&state, worker, &mut events_rx).await;
                return error_response(&state, &id, Status::NoSpeech, "");
            }
        }
    }

    state.release_worker(worker);
    state.request_processed();
    tracing::info!(request_id = %id, hyp = %final_hyp, "Chunked recognize complete");
    Json(json!({
        "status": Status::Success.code(),
        "id": id,
        "hypotheses": [{"utterance": final_hyp}],
    }))
    .into_response()
}

/// Bounded cancel for the HTTP path; mirrors the WebSocket session's
/// protocol, then releases exactly once.
async fn cancel_and_release(
    state: &Arc<BrokerState>,
    worker: WorkerHandle,
    events_rx: &mut mpsc::Receiver<ResultEvent>,
) {
    let sent = worker.send(WorkerFrame::Cancel).await;
    if !sent {
        worker.mark_disconnected();
    }
    let mut resolved = !sent;
    if !resolved {
        for _ in 0..state.config.cancel_poll_count {
            match timeout(state.config.cancel_poll_interval, events_rx.recv()).await {
                Ok(Some(event)) if event.status == Status::Eos || event.status.is_error() => {
                    resolved = true;
                    break;
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    resolved = true;
                    break;
                }
                Err(_) => {}
            }
        }
    }
    if !resolved {
        tracing::warn!(worker_id = %worker.id(), "CANCEL_TIMEOUT on HTTP path, force-releasing");
        worker.mark_disconnected();
        worker.send(WorkerFrame::Close).await;
    }
    state.release_worker(worker);
}

fn error_response(
    state: &Arc<BrokerState>,
    id: &RequestId,
    status: Status,
    message: &str,
) -> Response {
    state.request_processed();
    Json(json!({
        "status": status.code(),
        "id": id,
        "message": message,
    }))
    .into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
