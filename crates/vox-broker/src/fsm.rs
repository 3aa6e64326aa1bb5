//! Explicit state machine for one client session.
//!
//! The WebSocket layer only delivers typed events; every lifecycle decision
//! funnels through [`SessionState::apply`], which keeps the reachable-state
//! space auditable independent of the I/O code around it.

/// Lifecycle of a client session.
///
/// A session holds a worker exactly while in `Initialized`, `Processing`,
/// `EosReceived` or `Cancelling`. `Connected` is worker-less: before the
/// first acquisition, and again between utterances of an in-call session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Initialized,
    Processing,
    EosReceived,
    Cancelling,
    Finished,
}

/// Transition triggers, emitted by the session driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// `acquire` succeeded and the init was forwarded.
    WorkerBound,
    /// `acquire` came back empty; the client was told.
    NoWorker,
    /// First audio frame of the utterance was forwarded.
    FirstAudio,
    /// EOS (client-sent or synthesized) was forwarded to the worker.
    EosForwarded,
    /// The worker acknowledged utterance completion; session is done.
    UtteranceDone,
    /// The worker acknowledged utterance completion; in-call session goes
    /// back to waiting for the next utterance.
    UtteranceDoneInCall,
    /// Client vanished or a guard timer forced cancellation.
    CancelRequested,
    /// Worker acknowledged the cancel, or we gave up waiting.
    CancelResolved,
    /// Terminal failure (worker lost, decoder error, call timeout).
    Failed,
}

impl SessionState {
    /// Audio frames are forwarded only in these states.
    pub fn accepts_audio(self) -> bool {
        matches!(self, SessionState::Initialized | SessionState::Processing)
    }

    /// Whether the session currently holds a worker (§3 invariant: this is
    /// exactly the set of states with `assigned_worker != none`).
    pub fn holds_worker(self) -> bool {
        matches!(
            self,
            SessionState::Initialized
                | SessionState::Processing
                | SessionState::EosReceived
                | SessionState::Cancelling
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Finished
    }

    /// Advance the machine. Invalid transitions indicate a driver bug; they
    /// are loud in debug builds and leave the state untouched in release
    /// builds.
    pub fn apply(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Connected, WorkerBound) => Initialized,
            (Connected, NoWorker) => Finished,
            (Connected, Failed) => Finished,
            (Initialized, FirstAudio) => Processing,
            (Processing, FirstAudio) => Processing,
            (Initialized | Processing, EosForwarded) => EosReceived,
            (Initialized | Processing | EosReceived, UtteranceDone) => Finished,
            (Initialized | Processing | EosReceived, UtteranceDoneInCall) => Connected,
            (Initialized | Processing | EosReceived, CancelRequested) => Cancelling,
            (Cancelling, CancelResolved) => Finished,
            (Initialized | Processing | EosReceived | Cancelling, Failed) => Finished,
            (state, event) => {
                debug_assert!(false, "invalid session transition: {state:?} + {event:?}");
                tracing::error!(state = ?state, event = ?event, "Invalid session transition");
                state
            }
        };
        next
    }
}
