use thiserror::Error;

/// Command and delivery failures surfaced by the dispatch core.
///
/// Everything here is recoverable: a rejected command leaves queue state
/// untouched, and a delivery failure is recorded on the event stream while
/// the queue advances past it.
#[derive(Debug, Error)]
pub enum DispatchError {
    // Rejected at submission, before any queue mutation
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is not connected")]
    SessionNotReady(String),

    // Command arrived with nothing to act on
    #[error("no dispatch queue is active for session {0}")]
    NoActiveQueue(String),

    #[error("no dispatch queue is loaded for session {0}")]
    NoQueueLoaded(String),

    // One attempt failed; the queue advances anyway
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl DispatchError {
    /// True for errors rejected synchronously with no queue mutation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, DispatchError::Delivery(_))
    }

    /// True when the command referenced a session or queue that is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownSession(_)
                | DispatchError::NoActiveQueue(_)
                | DispatchError::NoQueueLoaded(_)
        )
    }

    /// Stable machine-readable kind, for logs and wire error codes.
    pub fn error_kind(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "validation",
            DispatchError::UnknownSession(_) => "unknown_session",
            DispatchError::SessionNotReady(_) => "session_not_ready",
            DispatchError::NoActiveQueue(_) => "no_active_queue",
            DispatchError::NoQueueLoaded(_) => "no_queue_loaded",
            DispatchError::Delivery(_) => "delivery",
        }
    }
}
