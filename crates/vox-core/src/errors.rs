use crate::messages::ResultEvent;
use crate::status::Status;

/// Session-level failures that surface to the client as a terminal event.
///
/// Programming-invariant violations (double release, double assignment) are
/// deliberately NOT represented here — those are bugs and the pool asserts
/// on them instead of reporting them as operational conditions.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    /// Pool exhausted at init time; the session never reaches `Initialized`.
    #[error("no decoder available, try again later")]
    NoWorkerAvailable,

    /// The worker transport dropped while a session was assigned to it.
    #[error("worker connection lost")]
    WorkerLost,

    /// The decoder reported a failure; forwarded verbatim.
    #[error("decoder error: {message}")]
    Decoder { status: Status, message: String },
}

impl SessionError {
    /// Wire status code for the terminal event.
    pub fn status(&self) -> Status {
        match self {
            SessionError::NoWorkerAvailable => Status::NotAvailable,
            SessionError::WorkerLost => Status::Aborted,
            SessionError::Decoder { status, .. } => *status,
        }
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NoWorkerAvailable => "no_worker_available",
            SessionError::WorkerLost => "worker_lost",
            SessionError::Decoder { .. } => "decoder_error",
        }
    }

    /// The terminal event sent to the client.
    pub fn to_event(&self) -> ResultEvent {
        ResultEvent::error(self.status(), self.to_string())
    }
}
