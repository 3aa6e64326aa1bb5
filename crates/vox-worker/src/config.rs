use std::time::Duration;

/// Worker process configuration.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Broker endpoint the worker registers with.
    pub broker_uri: String,
    /// Fixed delay between reconnection attempts.
    pub connect_backoff: Duration,
    /// Cancel the utterance when the decoder has been silent this long.
    pub silence_timeout: Duration,
    /// Spacing of the bounded wait for the decoder's cancel acknowledgement.
    pub cancel_poll_interval: Duration,
    /// Attempts before giving up on an unresponsive decoder.
    pub cancel_poll_count: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_uri: "ws://localhost:8888/worker/ws/speech".into(),
            connect_backoff: Duration::from_secs(5),
            silence_timeout: Duration::from_secs(10),
            cancel_poll_interval: Duration::from_secs(1),
            cancel_poll_count: 30,
        }
    }
}
