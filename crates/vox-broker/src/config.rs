use std::time::Duration;

/// Broker configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub port: u16,
    /// Capacity of each per-connection outbound frame queue.
    pub max_send_queue: usize,
    /// Synthesize EOS when a session has been silent this long.
    pub silence_timeout: Duration,
    /// How long an in-call session may sit idle between utterances.
    pub call_timeout: Duration,
    /// Spacing of the bounded wait for a worker's cancel acknowledgement.
    pub cancel_poll_interval: Duration,
    /// Attempts before giving up on an unresponsive worker.
    pub cancel_poll_count: u32,
    /// Status broadcast channel capacity.
    pub status_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: 8888,
            max_send_queue: 256,
            silence_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(60),
            cancel_poll_interval: Duration::from_secs(1),
            cancel_poll_count: 30,
            status_capacity: 64,
        }
    }
}
