//! Outbound connection to the broker.
//!
//! The worker is a client of the broker: it dials the broker's worker
//! endpoint, serves one utterance at a time through its decoder pipeline,
//! and on any disconnect retries after a fixed backoff, forever. Every
//! successful connect registers the worker afresh on the broker side.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vox_core::messages::Frame;

use crate::adapter::DecoderAdapter;
use crate::config::WorkerConfig;
use crate::pipeline::{DecoderPipeline, PipelineEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect-serve-reconnect loop. Never returns; each iteration gets a fresh
/// pipeline instance from the factory.
pub async fn run<P, F>(config: WorkerConfig, make_pipeline: F)
where
    P: DecoderPipeline,
    F: Fn() -> (P, mpsc::Receiver<PipelineEvent>),
{
    loop {
        let (pipeline, events) = make_pipeline();
        let adapter = DecoderAdapter::new(pipeline, config.clone());

        match connect_async(config.broker_uri.as_str()).await {
            Ok((ws, _response)) => {
                tracing::info!(uri = %config.broker_uri, "Connected to broker");
                run_connection(ws, adapter, events, &config).await;
                tracing::warn!(
                    backoff_secs = config.connect_backoff.as_secs(),
                    "Broker connection closed, reconnecting"
                );
            }
            Err(e) => {
                tracing::warn!(
                    uri = %config.broker_uri,
                    error = %e,
                    backoff_secs = config.connect_backoff.as_secs(),
                    "Could not connect to broker"
                );
            }
        }

        tokio::time::sleep(config.connect_backoff).await;
    }
}

/// Serve one broker connection until it drops.
async fn run_connection<P: DecoderPipeline>(
    ws: WsStream,
    mut adapter: DecoderAdapter<P>,
    mut events: mpsc::Receiver<PipelineEvent>,
    config: &WorkerConfig,
) {
    let (mut sink, mut stream) = ws.split();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.tick().await; // consume the immediate first tick

    'serve: loop {
        let out = tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    adapter.on_frame(Frame::from_text(text.as_str().to_string())).await
                }
                Some(Ok(Message::Binary(data))) => {
                    adapter.on_frame(Frame::from_binary(data)).await
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Vec::new(),
                Some(Ok(Message::Close(_))) | None => break 'serve,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Broker transport error");
                    break 'serve;
                }
            },
            event = events.recv() => match event {
                Some(event) => adapter.on_pipeline_event(event).await,
                None => {
                    tracing::error!("Pipeline event channel closed");
                    break 'serve;
                }
            },
            _ = tick.tick() => adapter.on_tick().await,
        };

        for event in out {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Could not serialize result event");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break 'serve;
            }
        }
    }

    // The broker is gone; if an utterance was in flight, stop the decoder
    // before this pipeline instance is dropped, waiting a bounded time for
    // it to actually wind down.
    if adapter.is_active() {
        adapter.begin_cancel().await;
        for _ in 0..config.cancel_poll_count {
            match tokio::time::timeout(config.cancel_poll_interval, events.recv()).await {
                Ok(Some(PipelineEvent::EndOfStream)) | Ok(None) => break,
                Ok(Some(_)) => continue,
                Err(_) => continue,
            }
        }
        adapter.reset_utterance().await;
    }
}
