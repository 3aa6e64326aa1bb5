//! Scripted decoder pipeline for tests.
//!
//! Records every lifecycle call and emits pre-programmed events, so broker
//! and adapter tests can assert call ordering and inject result streams
//! without a real decoding engine.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use vox_core::messages::InitRequest;

use crate::pipeline::{DecoderPipeline, PipelineError, PipelineEvent};

/// One recorded lifecycle call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    Init(String),
    Audio(Vec<u8>),
    EndOfAudio,
    SetAdaptation(Vec<u8>),
    Cancel,
    Reset,
}

/// Handle for inspecting a [`MockPipeline`] and injecting events from a
/// test, independent of where the pipeline itself was moved.
#[derive(Clone)]
pub struct MockHandle {
    calls: Arc<Mutex<Vec<MockCall>>>,
    events: mpsc::Sender<PipelineEvent>,
}

impl MockHandle {
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub async fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event).await;
    }
}

/// Deterministic test double for [`DecoderPipeline`].
pub struct MockPipeline {
    calls: Arc<Mutex<Vec<MockCall>>>,
    events: mpsc::Sender<PipelineEvent>,
    /// Transcript emitted as a final result when `end_of_audio` arrives.
    final_transcript: Option<String>,
    /// Whether `end_of_audio`/`cancel` are acknowledged with `EndOfStream`.
    ack_eos: bool,
    ack_cancel: bool,
    /// If set, `init` fails with this message.
    init_error: Option<String>,
}

impl MockPipeline {
    pub fn new() -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                events: tx,
                final_transcript: None,
                ack_eos: true,
                ack_cancel: true,
                init_error: None,
            },
            rx,
        )
    }

    /// A pipeline whose `init` always fails.
    pub fn failing_init(message: &str) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (mut pipeline, rx) = Self::new();
        pipeline.init_error = Some(message.to_string());
        (pipeline, rx)
    }

    /// Emit a final result with this transcript before acknowledging EOS.
    pub fn with_final(mut self, transcript: &str) -> Self {
        self.final_transcript = Some(transcript.to_string());
        self
    }

    /// Simulate a wedged decoder: `cancel` is recorded but never
    /// acknowledged with `EndOfStream`.
    pub fn no_cancel_ack(mut self) -> Self {
        self.ack_cancel = false;
        self
    }

    /// Simulate a decoder that never finishes flushing after EOS.
    pub fn no_eos_ack(mut self) -> Self {
        self.ack_eos = false;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            calls: Arc::clone(&self.calls),
            events: self.events.clone(),
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    async fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event).await;
    }
}

#[async_trait]
impl DecoderPipeline for MockPipeline {
    fn name(&self) -> &str {
        "mock"
    }

    async fn init(&self, request: &InitRequest) -> Result<(), PipelineError> {
        self.record(MockCall::Init(request.id.as_str().to_string()));
        match &self.init_error {
            Some(message) => Err(PipelineError::Init(message.clone())),
            None => Ok(()),
        }
    }

    async fn push_audio(&self, chunk: Bytes) -> Result<(), PipelineError> {
        self.record(MockCall::Audio(chunk.to_vec()));
        Ok(())
    }

    async fn end_of_audio(&self) -> Result<(), PipelineError> {
        self.record(MockCall::EndOfAudio);
        if let Some(transcript) = &self.final_transcript {
            self.emit(PipelineEvent::Final {
                transcript: transcript.clone(),
                adaptation: None,
            })
            .await;
        }
        if self.ack_eos {
            self.emit(PipelineEvent::EndOfStream).await;
        }
        Ok(())
    }

    async fn set_adaptation_state(&self, blob: Vec<u8>) -> Result<(), PipelineError> {
        self.record(MockCall::SetAdaptation(blob));
        Ok(())
    }

    async fn cancel(&self) -> Result<(), PipelineError> {
        self.record(MockCall::Cancel);
        if self.ack_cancel {
            self.emit(PipelineEvent::EndOfStream).await;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), PipelineError> {
        self.record(MockCall::Reset);
        Ok(())
    }
}
