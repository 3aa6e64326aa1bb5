//! One client audio session: pairing, relay, guard timers, teardown.
//!
//! Each session runs as a single task that owns the client socket's read
//! half, the session state machine, and (while one is bound) the worker
//! handle. A writer task drains outbound JSON to the client so result
//! forwarding never blocks the read loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use vox_core::caps::content_type_to_caps;
use vox_core::errors::SessionError;
use vox_core::ids::RequestId;
use vox_core::messages::{AdaptationPush, Frame, InitRequest, ResultEvent};
use vox_core::status::Status;

use crate::fsm::{SessionEvent, SessionState};
use crate::pool::{SessionBinding, WorkerFrame, WorkerHandle};
use crate::state::BrokerState;

/// Connection parameters the client supplies as query arguments.
#[derive(Clone, Debug, Default)]
pub struct ClientParams {
    pub content_type: Option<String>,
    pub user_id: Option<String>,
    pub content_id: Option<String>,
    pub in_call: bool,
}

/// Why the session loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Exit {
    /// Client transport closed (or errored) before the session finished.
    ClientGone,
    /// The session reached `Finished` with the client still attached.
    Done,
    /// Broker is shutting down.
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    ClientClosed,
    Finished,
}

/// Drive one client session to completion.
pub async fn run_client_session(socket: WebSocket, params: ClientParams, state: Arc<BrokerState>) {
    let request_id = RequestId::new();
    tracing::info!(
        request_id = %request_id,
        content_type = params.content_type.as_deref().unwrap_or("<none>"),
        user = params.user_id.as_deref().unwrap_or("<none>"),
        in_call = params.in_call,
        "Client session open"
    );

    let (ws_tx, ws_rx) = socket.split();
    let (client_tx, client_rx) = mpsc::channel::<String>(state.config.max_send_queue);
    let writer = tokio::spawn(write_client(ws_tx, client_rx));

    let (events_tx, mut events_rx) = mpsc::channel::<ResultEvent>(64);

    let mut session = Session {
        id: request_id.clone(),
        state: SessionState::Connected,
        worker: None,
        caps: params.content_type.as_deref().map(content_type_to_caps),
        user: params.user_id.clone(),
        context: params.content_id.clone(),
        in_call: params.in_call,
        num_segments: 0,
        last_activity: Instant::now(),
        broker: Arc::clone(&state),
        client_tx,
        events_tx,
    };

    // The connection parameters are the init message: pair with a worker
    // right away, or tell the client there is no capacity and stop.
    let exit = if session.begin_utterance().await {
        run_loop(&mut session, ws_rx, &mut events_rx, &state).await
    } else {
        Exit::Done
    };

    session.teardown(exit, &mut events_rx).await;
    // Dropping the session closes the outbound queue, which ends the writer.
    drop(session);
    let _ = writer.await;
}

enum Step {
    Client(Option<Result<WsMessage, axum::Error>>),
    Worker(Option<ResultEvent>),
    Tick,
    Shutdown,
}

async fn run_loop(
    session: &mut Session,
    mut ws_rx: SplitStream<WebSocket>,
    events_rx: &mut mpsc::Receiver<ResultEvent>,
    state: &Arc<BrokerState>,
) -> Exit {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await; // consume the immediate first tick

    loop {
        let step = tokio::select! {
            msg = ws_rx.next() => Step::Client(msg),
            event = events_rx.recv() => Step::Worker(event),
            _ = tick.tick() => Step::Tick,
            _ = state.shutdown.cancelled() => Step::Shutdown,
        };

        let flow = match step {
            Step::Client(Some(Ok(msg))) => {
                session.last_activity = Instant::now();
                session.on_client_message(msg).await
            }
            Step::Client(Some(Err(e))) => {
                tracing::debug!(request_id = %session.id, error = %e, "Client transport error");
                Flow::ClientClosed
            }
            Step::Client(None) => Flow::ClientClosed,
            Step::Worker(Some(event)) => session.on_worker_event(event).await,
            Step::Worker(None) => Flow::Continue,
            Step::Tick => session.on_tick().await,
            Step::Shutdown => return Exit::Shutdown,
        };

        match flow {
            Flow::Continue => {}
            Flow::ClientClosed => return Exit::ClientGone,
            Flow::Finished => return Exit::Done,
        }
    }
}

async fn write_client(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

struct Session {
    id: RequestId,
    state: SessionState,
    worker: Option<WorkerHandle>,
    caps: Option<String>,
    user: Option<String>,
    context: Option<String>,
    in_call: bool,
    num_segments: u32,
    last_activity: Instant,
    broker: Arc<BrokerState>,
    client_tx: mpsc::Sender<String>,
    events_tx: mpsc::Sender<ResultEvent>,
}

impl Session {
    /// Acquire a worker and forward the init for a new utterance. Returns
    /// false when the session is finished instead (no capacity, or the
    /// chosen worker died under us).
    async fn begin_utterance(&mut self) -> bool {
        let Some(handle) = self.broker.acquire_worker() else {
            tracing::warn!(request_id = %self.id, "No worker available for client request");
            self.send_client(SessionError::NoWorkerAvailable.to_event()).await;
            self.state = self.state.apply(SessionEvent::NoWorker);
            return false;
        };

        tracing::info!(request_id = %self.id, worker_id = %handle.id(), "Using worker");
        handle.bind(SessionBinding {
            request_id: self.id.clone(),
            events: self.events_tx.clone(),
        });

        let init = InitRequest {
            id: self.id.clone(),
            caps: self.caps.clone(),
            context: self.context.clone(),
            user: self.user.clone(),
            is_call: self.in_call,
        };
        if !handle.send(WorkerFrame::Init(init)).await {
            // The worker's transport dropped between registration and use.
            handle.mark_disconnected();
            self.broker.release_worker(handle);
            self.send_client(SessionError::WorkerLost.to_event()).await;
            self.state = self.state.apply(SessionEvent::Failed);
            return false;
        }

        self.worker = Some(handle);
        self.state = self.state.apply(SessionEvent::WorkerBound);
        true
    }

    async fn on_client_message(&mut self, msg: WsMessage) -> Flow {
        match msg {
            WsMessage::Binary(data) => self.on_frame(Frame::from_binary(data)).await,
            WsMessage::Text(text) => self.on_frame(Frame::from_text(text.to_string())).await,
            WsMessage::Close(_) => Flow::ClientClosed,
            WsMessage::Ping(_) | WsMessage::Pong(_) => Flow::Continue,
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Flow {
        match frame {
            Frame::Audio(data) => {
                if self.state.accepts_audio() {
                    return self.forward_audio(data).await;
                }
                // An in-call session parked between utterances re-pairs on
                // the next audio frame, reusing the caps negotiated at
                // connect time.
                if self.state == SessionState::Connected && self.in_call && self.worker.is_none() {
                    if !self.begin_utterance().await {
                        return Flow::Finished;
                    }
                    return self.forward_audio(data).await;
                }
                tracing::debug!(
                    request_id = %self.id,
                    state = ?self.state,
                    "Ignoring audio frame in this state"
                );
                Flow::Continue
            }
            Frame::Eos => {
                if self.state.accepts_audio() {
                    self.forward_eos().await
                } else {
                    tracing::debug!(
                        request_id = %self.id,
                        state = ?self.state,
                        "Ignoring EOS in this state"
                    );
                    Flow::Continue
                }
            }
            Frame::Cancel => {
                // Not part of the client protocol.
                tracing::debug!(request_id = %self.id, "Ignoring CANCEL from client");
                Flow::Continue
            }
            Frame::Text(text) => self.on_client_json(text).await,
        }
    }

    async fn forward_audio(&mut self, data: bytes::Bytes) -> Flow {
        let Some(worker) = self.worker.as_ref() else {
            return Flow::Continue;
        };
        tracing::trace!(request_id = %self.id, len = data.len(), "Forwarding audio frame");
        if !worker.send(WorkerFrame::Audio(data)).await {
            return self.worker_lost().await;
        }
        self.state = self.state.apply(SessionEvent::FirstAudio);
        Flow::Continue
    }

    async fn forward_eos(&mut self) -> Flow {
        let Some(worker) = self.worker.as_ref() else {
            return Flow::Continue;
        };
        if !worker.send(WorkerFrame::Eos).await {
            return self.worker_lost().await;
        }
        self.state = self.state.apply(SessionEvent::EosForwarded);
        Flow::Continue
    }

    async fn on_client_json(&mut self, text: String) -> Flow {
        match serde_json::from_str::<AdaptationPush>(&text) {
            Ok(push) => {
                if let Some(worker) = self.worker.as_ref() {
                    tracing::info!(request_id = %self.id, "Forwarding adaptation state to worker");
                    if !worker.send(WorkerFrame::Adaptation(push)).await {
                        return self.worker_lost().await;
                    }
                } else {
                    tracing::debug!(request_id = %self.id, "No worker bound, dropping adaptation state");
                }
                Flow::Continue
            }
            Err(_) => {
                tracing::warn!(request_id = %self.id, "Unhandled JSON message from client");
                Flow::Continue
            }
        }
    }

    async fn on_worker_event(&mut self, event: ResultEvent) -> Flow {
        match event.status {
            Status::Eos => self.utterance_complete(),
            Status::Success => {
                if event.is_final_result() {
                    self.num_segments += 1;
                }
                self.send_client(event).await;
                Flow::Continue
            }
            _ => {
                // Decoder error (or synthesized worker-lost event): this is
                // the session's one terminal event.
                tracing::warn!(
                    request_id = %self.id,
                    status = event.status.code(),
                    message = event.message.as_deref().unwrap_or(""),
                    "Forwarding error event to client"
                );
                self.send_client(event).await;
                self.state = self.state.apply(SessionEvent::Failed);
                Flow::Finished
            }
        }
    }

    /// The worker acknowledged end-of-stream: the utterance is over and the
    /// worker goes straight back to the pool.
    fn utterance_complete(&mut self) -> Flow {
        if let Some(handle) = self.worker.take() {
            self.broker.release_worker(handle);
        }
        if self.in_call {
            tracing::info!(
                request_id = %self.id,
                segments = self.num_segments,
                "Utterance complete, holding call open"
            );
            self.state = self.state.apply(SessionEvent::UtteranceDoneInCall);
            self.last_activity = Instant::now();
            Flow::Continue
        } else {
            self.state = self.state.apply(SessionEvent::UtteranceDone);
            Flow::Finished
        }
    }

    async fn on_tick(&mut self) -> Flow {
        let idle = self.last_activity.elapsed();

        if self.state.accepts_audio() && idle > self.broker.config.silence_timeout {
            // Graceful auto-stop, not an error: pretend the client said EOS.
            tracing::info!(
                request_id = %self.id,
                idle_secs = idle.as_secs(),
                "Silence timeout, synthesizing EOS"
            );
            self.last_activity = Instant::now();
            return self.forward_eos().await;
        }

        if self.state == SessionState::Connected
            && self.in_call
            && self.worker.is_none()
            && idle > self.broker.config.call_timeout
        {
            tracing::info!(request_id = %self.id, "Call timeout, closing session");
            self.state = self.state.apply(SessionEvent::Failed);
            return Flow::Finished;
        }

        Flow::Continue
    }

    async fn worker_lost(&mut self) -> Flow {
        tracing::warn!(request_id = %self.id, "Worker transport gone mid-session");
        if let Some(handle) = self.worker.take() {
            handle.mark_disconnected();
            self.broker.release_worker(handle);
        }
        self.send_client(SessionError::WorkerLost.to_event()).await;
        self.state = self.state.apply(SessionEvent::Failed);
        Flow::Finished
    }

    /// Wind the session down on whatever path it exited through, releasing
    /// the worker exactly once.
    async fn teardown(&mut self, exit: Exit, events_rx: &mut mpsc::Receiver<ResultEvent>) {
        if matches!(exit, Exit::ClientGone | Exit::Shutdown) && self.state.holds_worker() {
            self.state = self.state.apply(SessionEvent::CancelRequested);
            self.cancel_utterance(events_rx).await;
        }

        // Catch-all release: every exit path funnels through here.
        if let Some(handle) = self.worker.take() {
            self.broker.release_worker(handle);
        }
        self.broker.request_processed();
        tracing::info!(
            request_id = %self.id,
            segments = self.num_segments,
            exit = ?exit,
            "Client session closed"
        );
    }

    /// Bounded cancel protocol: ask the worker to abort, then wait for its
    /// acknowledgement up to `cancel_poll_count × cancel_poll_interval`
    /// before force-releasing anyway.
    async fn cancel_utterance(&mut self, events_rx: &mut mpsc::Receiver<ResultEvent>) {
        let Some(worker) = self.worker.as_ref() else {
            self.state = self.state.apply(SessionEvent::CancelResolved);
            return;
        };
        tracing::info!(request_id = %self.id, worker_id = %worker.id(), "Cancelling utterance");

        let sent = worker.send(WorkerFrame::Cancel).await;
        if !sent {
            worker.mark_disconnected();
        }
        let mut resolved = !sent;
        if !resolved {
            let config = &self.broker.config;
            for attempt in 1..=config.cancel_poll_count {
                match timeout(config.cancel_poll_interval, events_rx.recv()).await {
                    Ok(Some(event)) if event.status == Status::Eos => {
                        resolved = true;
                        break;
                    }
                    Ok(Some(event)) if event.status.is_error() => {
                        // Worker lost or decoder error also ends the wait.
                        resolved = true;
                        break;
                    }
                    Ok(Some(_)) => {
                        // Late partial results; the client is gone.
                    }
                    Ok(None) => {
                        resolved = true;
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(
                            request_id = %self.id,
                            attempt = attempt,
                            "Waiting for cancel acknowledgement"
                        );
                    }
                }
            }
        }

        if !resolved {
            // CANCEL_TIMEOUT: the worker never acknowledged. Force the
            // release and drop its transport so the wedged decoder cannot
            // be handed to another session.
            tracing::warn!(
                request_id = %self.id,
                attempts = self.broker.config.cancel_poll_count,
                "CANCEL_TIMEOUT: worker never acknowledged cancel, force-releasing"
            );
            if let Some(worker) = self.worker.as_ref() {
                worker.mark_disconnected();
                worker.send(WorkerFrame::Close).await;
            }
        }
        self.state = self.state.apply(SessionEvent::CancelResolved);
    }

    async fn send_client(&self, event: ResultEvent) {
        let event = event.with_id(self.id.clone());
        match serde_json::to_string(&event) {
            Ok(json) => {
                if self.client_tx.send(json).await.is_err() {
                    tracing::debug!(request_id = %self.id, "Client writer gone, dropping event");
                }
            }
            Err(e) => {
                tracing::error!(request_id = %self.id, error = %e, "Could not serialize event");
            }
        }
    }
}
