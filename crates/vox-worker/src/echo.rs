//! Loopback pipeline for wiring checks.
//!
//! Stands in for a real decoding engine when bringing a deployment up: it
//! acknowledges the full lifecycle and reports how much audio it swallowed,
//! so the broker/worker path can be exercised end to end without Kaldi.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use vox_core::messages::InitRequest;

use crate::pipeline::{DecoderPipeline, PipelineError, PipelineEvent};

pub struct EchoPipeline {
    events: mpsc::Sender<PipelineEvent>,
    bytes_received: AtomicUsize,
    chunks_received: AtomicUsize,
}

impl EchoPipeline {
    pub fn new() -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                events: tx,
                bytes_received: AtomicUsize::new(0),
                chunks_received: AtomicUsize::new(0),
            },
            rx,
        )
    }
}

#[async_trait]
impl DecoderPipeline for EchoPipeline {
    fn name(&self) -> &str {
        "echo"
    }

    async fn init(&self, request: &InitRequest) -> Result<(), PipelineError> {
        tracing::debug!(request_id = %request.id, "Echo pipeline initialized");
        Ok(())
    }

    async fn push_audio(&self, chunk: Bytes) -> Result<(), PipelineError> {
        self.bytes_received.fetch_add(chunk.len(), Ordering::Relaxed);
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn end_of_audio(&self) -> Result<(), PipelineError> {
        let bytes = self.bytes_received.load(Ordering::Relaxed);
        let chunks = self.chunks_received.load(Ordering::Relaxed);
        let _ = self
            .events
            .send(PipelineEvent::Final {
                transcript: format!("echo: {chunks} chunks, {bytes} bytes"),
                adaptation: None,
            })
            .await;
        let _ = self.events.send(PipelineEvent::EndOfStream).await;
        Ok(())
    }

    async fn set_adaptation_state(&self, _blob: Vec<u8>) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn cancel(&self) -> Result<(), PipelineError> {
        let _ = self.events.send(PipelineEvent::EndOfStream).await;
        Ok(())
    }

    async fn reset(&self) -> Result<(), PipelineError> {
        self.bytes_received.store(0, Ordering::Relaxed);
        self.chunks_received.store(0, Ordering::Relaxed);
        Ok(())
    }
}
