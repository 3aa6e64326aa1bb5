use tokio::time::Instant;

use vox_core::ids::RequestId;
use vox_core::messages::{AdaptationPush, Frame, InitRequest, ResultEvent};
use vox_core::status::Status;

use crate::config::WorkerConfig;
use crate::pipeline::{DecoderPipeline, PipelineEvent};

/// Per-utterance decoding state. `Connected` doubles as the idle state
/// between utterances: after an acknowledged end-of-stream the adapter
/// resets its pipeline and waits for the next init.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Connected,
    Initialized,
    Processing,
    EosReceived,
    Cancelling,
}

/// Translates broker wire frames into decoder-pipeline calls and pipeline
/// events into wire result events, tracking the forwarding-segment counter
/// and the silence watchdog along the way.
///
/// The adapter is transport-agnostic: the connection loop feeds it frames,
/// pipeline events and 1 Hz ticks, and sends whatever events it returns.
pub struct DecoderAdapter<P> {
    pipeline: P,
    config: WorkerConfig,
    state: WorkerState,
    request_id: Option<RequestId>,
    num_segments: u32,
    last_decoder_activity: Instant,
    cancel_attempts: u32,
    /// The current cancel was triggered by the silence watchdog; report
    /// no-speech once the pipeline has actually stopped.
    silence_tripped: bool,
}

impl<P: DecoderPipeline> DecoderAdapter<P> {
    pub fn new(pipeline: P, config: WorkerConfig) -> Self {
        Self {
            pipeline,
            config,
            state: WorkerState::Connected,
            request_id: None,
            num_segments: 0,
            last_decoder_activity: Instant::now(),
            cancel_attempts: 0,
            silence_tripped: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether an utterance is in flight (including one being cancelled).
    pub fn is_active(&self) -> bool {
        self.state != WorkerState::Connected
    }

    fn request_id_str(&self) -> &str {
        self.request_id.as_ref().map(|id| id.as_str()).unwrap_or("<none>")
    }

    /// Handle one frame from the broker.
    pub async fn on_frame(&mut self, frame: Frame) -> Vec<ResultEvent> {
        match frame {
            Frame::Text(text) => self.on_text(text).await,
            Frame::Audio(chunk) => match self.state {
                WorkerState::Initialized | WorkerState::Processing => {
                    match self.pipeline.push_audio(chunk).await {
                        Ok(()) => {
                            self.state = WorkerState::Processing;
                            Vec::new()
                        }
                        Err(e) => self.fail(e.to_string()).await,
                    }
                }
                _ => {
                    tracing::debug!(
                        request_id = self.request_id_str(),
                        state = ?self.state,
                        "Ignoring audio frame in this state"
                    );
                    Vec::new()
                }
            },
            Frame::Eos => match self.state {
                WorkerState::Initialized | WorkerState::Processing => {
                    match self.pipeline.end_of_audio().await {
                        Ok(()) => {
                            self.state = WorkerState::EosReceived;
                            Vec::new()
                        }
                        Err(e) => self.fail(e.to_string()).await,
                    }
                }
                _ => {
                    tracing::debug!(
                        request_id = self.request_id_str(),
                        state = ?self.state,
                        "Ignoring EOS in this state"
                    );
                    Vec::new()
                }
            },
            Frame::Cancel => match self.state {
                WorkerState::Initialized | WorkerState::Processing | WorkerState::EosReceived => {
                    self.begin_cancel().await;
                    Vec::new()
                }
                _ => Vec::new(),
            },
        }
    }

    async fn on_text(&mut self, text: String) -> Vec<ResultEvent> {
        if self.state == WorkerState::Connected {
            let request: InitRequest = match serde_json::from_str(&text) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unparseable init message");
                    return Vec::new();
                }
            };
            tracing::info!(
                request_id = %request.id,
                caps = request.caps.as_deref().unwrap_or("<default>"),
                is_call = request.is_call,
                "Initializing request"
            );
            match self.pipeline.init(&request).await {
                Ok(()) => {
                    self.request_id = Some(request.id);
                    self.num_segments = 0;
                    self.state = WorkerState::Initialized;
                    self.last_decoder_activity = Instant::now();
                    Vec::new()
                }
                Err(e) => self.fail(e.to_string()).await,
            }
        } else if matches!(self.state, WorkerState::Initialized | WorkerState::Processing) {
            match serde_json::from_str::<AdaptationPush>(&text) {
                Ok(push) => match push.adaptation_state.decode() {
                    Ok(blob) => {
                        tracing::info!(
                            request_id = self.request_id_str(),
                            bytes = blob.len(),
                            "Applying client-provided adaptation state"
                        );
                        if let Err(e) = self.pipeline.set_adaptation_state(blob).await {
                            tracing::warn!(
                                request_id = self.request_id_str(),
                                error = %e,
                                "Decoder rejected adaptation state"
                            );
                        }
                        Vec::new()
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = self.request_id_str(),
                            error = %e,
                            "Cannot decode adaptation state"
                        );
                        Vec::new()
                    }
                },
                Err(_) => {
                    tracing::warn!(
                        request_id = self.request_id_str(),
                        "Unhandled JSON message"
                    );
                    Vec::new()
                }
            }
        } else {
            tracing::debug!(
                request_id = self.request_id_str(),
                state = ?self.state,
                "Ignoring text message in this state"
            );
            Vec::new()
        }
    }

    /// Handle one event from the decoder pipeline.
    pub async fn on_pipeline_event(&mut self, event: PipelineEvent) -> Vec<ResultEvent> {
        self.last_decoder_activity = Instant::now();

        if self.state == WorkerState::Connected {
            // Stale event from a previous utterance; the pipeline was reset.
            tracing::debug!("Dropping pipeline event with no request in flight");
            return Vec::new();
        }

        match event {
            PipelineEvent::Interim { transcript } => {
                vec![ResultEvent::result(transcript, self.num_segments, false)]
            }
            PipelineEvent::Final {
                transcript,
                adaptation,
            } => {
                let mut out = vec![ResultEvent::result(transcript, self.num_segments, true)];
                self.num_segments += 1;
                if let (Some(blob), Some(id)) = (adaptation, self.request_id.clone()) {
                    out.push(ResultEvent::adaptation(
                        vox_core::adaptation::AdaptationState::encode(id, &blob),
                    ));
                }
                out
            }
            PipelineEvent::EndOfStream => {
                tracing::info!(
                    request_id = self.request_id_str(),
                    segments = self.num_segments,
                    "Utterance complete"
                );
                let silence_tripped = self.silence_tripped;
                self.reset_utterance().await;
                // The pipeline is stopped and reset before anything is
                // reported upstream, so the broker can safely re-pool this
                // worker the moment it sees these events.
                let mut out = Vec::new();
                if silence_tripped {
                    out.push(ResultEvent::status_only(Status::NoSpeech));
                }
                out.push(ResultEvent::eos());
                out
            }
            PipelineEvent::Error { message } => self.fail(message).await,
        }
    }

    /// Drive the silence watchdog and the bounded cancel wait. Call at 1 Hz.
    pub async fn on_tick(&mut self) -> Vec<ResultEvent> {
        match self.state {
            WorkerState::Initialized | WorkerState::Processing => {
                if self.last_decoder_activity.elapsed() > self.config.silence_timeout {
                    tracing::warn!(
                        request_id = self.request_id_str(),
                        timeout_secs = self.config.silence_timeout.as_secs(),
                        "Decoder silent past the timeout, cancelling"
                    );
                    self.begin_cancel().await;
                    self.silence_tripped = true;
                    Vec::new()
                } else {
                    Vec::new()
                }
            }
            WorkerState::Cancelling => {
                self.cancel_attempts += 1;
                if self.cancel_attempts > self.config.cancel_poll_count {
                    tracing::warn!(
                        request_id = self.request_id_str(),
                        attempts = self.cancel_attempts,
                        "Decoder never acknowledged cancel, resetting anyway"
                    );
                    let silence_tripped = self.silence_tripped;
                    self.reset_utterance().await;
                    let mut out = Vec::new();
                    if silence_tripped {
                        out.push(ResultEvent::status_only(Status::NoSpeech));
                    }
                    out.push(ResultEvent::eos());
                    out
                } else {
                    tracing::debug!(
                        request_id = self.request_id_str(),
                        "Waiting for decoder end-of-stream"
                    );
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Ask the pipeline to abort the current utterance.
    pub async fn begin_cancel(&mut self) {
        if self.state == WorkerState::Cancelling || self.state == WorkerState::Connected {
            return;
        }
        if let Err(e) = self.pipeline.cancel().await {
            tracing::warn!(
                request_id = self.request_id_str(),
                error = %e,
                "Pipeline cancel failed"
            );
        }
        self.state = WorkerState::Cancelling;
        self.cancel_attempts = 0;
    }

    /// Reset the pipeline and return to the idle state.
    pub async fn reset_utterance(&mut self) {
        if let Err(e) = self.pipeline.reset().await {
            tracing::warn!(
                request_id = self.request_id_str(),
                error = %e,
                "Pipeline reset failed"
            );
        }
        self.state = WorkerState::Connected;
        self.request_id = None;
        self.num_segments = 0;
        self.cancel_attempts = 0;
        self.silence_tripped = false;
    }

    /// Decoder failure: report upstream, reset, keep the connection.
    async fn fail(&mut self, message: String) -> Vec<ResultEvent> {
        tracing::warn!(
            request_id = self.request_id_str(),
            error = %message,
            "Decoder error"
        );
        self.reset_utterance().await;
        vec![ResultEvent::error(Status::NotAllowed, message)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockPipeline};
    use bytes::Bytes;
    use std::time::Duration;

    fn init_json(id: &str) -> Frame {
        Frame::Text(format!(r#"{{"id":"{id}","caps":"audio/x-raw, rate=16000"}}"#))
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            silence_timeout: Duration::from_secs(10),
            cancel_poll_count: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn utterance_calls_arrive_in_order() {
        let (pipeline, _events) = MockPipeline::new();
        let handle = pipeline.handle();
        let mut adapter = DecoderAdapter::new(pipeline, config());

        adapter.on_frame(init_json("req_1")).await;
        adapter.on_frame(Frame::Audio(Bytes::from_static(b"aaaa"))).await;
        adapter.on_frame(Frame::Audio(Bytes::from_static(b"bbbb"))).await;
        adapter.on_frame(Frame::Audio(Bytes::from_static(b"cccc"))).await;
        adapter.on_frame(Frame::Eos).await;

        assert_eq!(
            handle.calls(),
            vec![
                MockCall::Init("req_1".into()),
                MockCall::Audio(b"aaaa".to_vec()),
                MockCall::Audio(b"bbbb".to_vec()),
                MockCall::Audio(b"cccc".to_vec()),
                MockCall::EndOfAudio,
            ]
        );
        assert_eq!(adapter.state(), WorkerState::EosReceived);
    }

    #[tokio::test]
    async fn results_are_stamped_with_segment_counter() {
        let (pipeline, _events) = MockPipeline::new();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;

        let interim = adapter
            .on_pipeline_event(PipelineEvent::Interim {
                transcript: "hel".into(),
            })
            .await;
        assert_eq!(interim[0].segment, Some(0));
        assert!(!interim[0].is_final_result());

        let fin = adapter
            .on_pipeline_event(PipelineEvent::Final {
                transcript: "hello".into(),
                adaptation: None,
            })
            .await;
        assert_eq!(fin[0].segment, Some(0));
        assert!(fin[0].is_final_result());

        // Next segment picks up the incremented counter.
        let next = adapter
            .on_pipeline_event(PipelineEvent::Interim {
                transcript: "wor".into(),
            })
            .await;
        assert_eq!(next[0].segment, Some(1));
    }

    #[tokio::test]
    async fn final_with_adaptation_emits_two_events() {
        let (pipeline, _events) = MockPipeline::new();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;

        let out = adapter
            .on_pipeline_event(PipelineEvent::Final {
                transcript: "done".into(),
                adaptation: Some(b"blob".to_vec()),
            })
            .await;
        assert_eq!(out.len(), 2);
        let state = out[1].adaptation_state.as_ref().unwrap();
        assert_eq!(state.decode().unwrap(), b"blob");
    }

    #[tokio::test]
    async fn end_of_stream_acks_and_resets() {
        let (pipeline, _events) = MockPipeline::new();
        let handle = pipeline.handle();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;
        adapter.on_frame(Frame::Eos).await;

        let out = adapter.on_pipeline_event(PipelineEvent::EndOfStream).await;
        assert_eq!(out[0].status, Status::Eos);
        assert_eq!(adapter.state(), WorkerState::Connected);
        assert!(handle.calls().contains(&MockCall::Reset));

        // Ready for the next utterance with a fresh segment counter.
        adapter.on_frame(init_json("req_2")).await;
        assert_eq!(adapter.state(), WorkerState::Initialized);
    }

    #[tokio::test]
    async fn redundant_eos_is_ignored() {
        let (pipeline, _events) = MockPipeline::new();
        let handle = pipeline.handle();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;
        adapter.on_frame(Frame::Eos).await;
        adapter.on_frame(Frame::Eos).await;
        adapter.on_frame(Frame::Audio(Bytes::from_static(b"late"))).await;

        let eos_calls = handle
            .calls()
            .iter()
            .filter(|c| **c == MockCall::EndOfAudio)
            .count();
        assert_eq!(eos_calls, 1);
        assert!(!handle.calls().contains(&MockCall::Audio(b"late".to_vec())));
    }

    #[tokio::test]
    async fn decoder_error_reports_and_resets() {
        let (pipeline, _events) = MockPipeline::new();
        let handle = pipeline.handle();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;

        let out = adapter
            .on_pipeline_event(PipelineEvent::Error {
                message: "model blew up".into(),
            })
            .await;
        assert_eq!(out[0].status, Status::NotAllowed);
        assert_eq!(out[0].message.as_deref(), Some("model blew up"));
        assert_eq!(adapter.state(), WorkerState::Connected);
        assert!(handle.calls().contains(&MockCall::Reset));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_watchdog_cancels() {
        let (pipeline, _events) = MockPipeline::new();
        let handle = pipeline.handle();
        let mut adapter = DecoderAdapter::new(pipeline, config());
        adapter.on_frame(init_json("req_1")).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let out = adapter.on_tick().await;
        assert!(out.is_empty(), "nothing reported until the decoder stops");
        assert_eq!(adapter.state(), WorkerState::Cancelling);
        assert!(handle.calls().contains(&MockCall::Cancel));

        // Once the pipeline winds down, the no-speech notification and the
        // end-of-stream ack go out together.
        let out = adapter.on_pipeline_event(PipelineEvent::EndOfStream).await;
        assert_eq!(out[0].status, Status::NoSpeech);
        assert_eq!(out[1].status, Status::Eos);
        assert_eq!(adapter.state(), WorkerState::Connected);
    }

    #[tokio::test]
    async fn cancel_wait_gives_up_after_bounded_attempts() {
        let (pipeline, _events) = MockPipeline::new();
        let mut adapter = DecoderAdapter::new(pipeline.no_cancel_ack(), config());
        adapter.on_frame(init_json("req_1")).await;
        adapter.on_frame(Frame::Cancel).await;
        assert_eq!(adapter.state(), WorkerState::Cancelling);

        // cancel_poll_count = 3: three quiet ticks, the fourth gives up.
        for _ in 0..3 {
            assert!(adapter.on_tick().await.is_empty());
        }
        let out = adapter.on_tick().await;
        assert_eq!(out[0].status, Status::Eos);
        assert_eq!(adapter.state(), WorkerState::Connected);
    }

    #[tokio::test]
    async fn init_failure_is_reported() {
        let (pipeline, _events) = MockPipeline::failing_init("no such model");
        let mut adapter = DecoderAdapter::new(pipeline, config());
        let out = adapter.on_frame(init_json("req_1")).await;
        assert_eq!(out[0].status, Status::NotAllowed);
        assert_eq!(adapter.state(), WorkerState::Connected);
    }
}
