use async_trait::async_trait;
use bytes::Bytes;
use vox_core::messages::InitRequest;

/// Failures reported by a decoder pipeline call.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("decoder initialization failed: {0}")]
    Init(String),
    #[error("decoder rejected audio: {0}")]
    Audio(String),
    #[error("decoder unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous events emitted by a decoder pipeline while an utterance is
/// being decoded. Delivered over the mpsc channel handed out at pipeline
/// construction time.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A partial hypothesis; superseded by later events.
    Interim { transcript: String },
    /// A finalized segment, optionally carrying updated adaptation state.
    Final {
        transcript: String,
        adaptation: Option<Vec<u8>>,
    },
    /// The pipeline drained all audio after `end_of_audio`/`cancel`.
    EndOfStream,
    /// Decode failure; the utterance is over.
    Error { message: String },
}

/// Lifecycle contract for one decoding engine instance.
///
/// The engine itself (GStreamer/Kaldi or anything else) lives outside this
/// repository; the worker only drives this narrow interface. One instance
/// serves one broker connection and is `reset` between utterances rather
/// than rebuilt.
#[async_trait]
pub trait DecoderPipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare for a new utterance. `request.caps` describes the incoming
    /// audio; `request.context`/`request.user` are opaque hints.
    async fn init(&self, request: &InitRequest) -> Result<(), PipelineError>;

    /// Feed one opaque audio chunk.
    async fn push_audio(&self, chunk: Bytes) -> Result<(), PipelineError>;

    /// No more audio for this utterance; the pipeline flushes and finishes
    /// with `Final` + `EndOfStream` events.
    async fn end_of_audio(&self) -> Result<(), PipelineError>;

    /// Seed the decoder with a previously captured adaptation blob.
    async fn set_adaptation_state(&self, blob: Vec<u8>) -> Result<(), PipelineError>;

    /// Abort the current utterance. The pipeline acknowledges with
    /// `EndOfStream` once it has actually stopped.
    async fn cancel(&self) -> Result<(), PipelineError>;

    /// Return to the pre-init state, keeping the engine alive for the next
    /// utterance.
    async fn reset(&self) -> Result<(), PipelineError>;
}
