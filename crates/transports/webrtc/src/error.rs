//! Error types for the statecast session engine

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating, tracking or broadcasting to sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty or malformed channel identifier
    #[error("Invalid channel id: {0:?}")]
    InvalidChannelId(String),

    /// A session with this id is already open
    #[error("Session already open: {0}")]
    DuplicateSession(String),

    /// The session was never created or has already been removed
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// SDP type does not match the handshake step
    #[error("Invalid description type: expected {expected}, got {actual}")]
    InvalidDescriptionType {
        /// Description type the session was waiting for
        expected: String,
        /// Description type that was supplied
        actual: String,
    },

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        /// Session the transition was attempted on
        session_id: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Delivering a message to one peer failed
    #[error("Transport send failure on session {session_id}: {reason}")]
    TransportSendFailure {
        /// Session whose transport rejected the message
        session_id: String,
        /// Underlying failure
        reason: String,
    },

    /// Session limit reached
    #[error("Session limit reached ({0})")]
    SessionLimitExceeded(usize),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl Error {
    /// Check if this error is an expected race against session removal
    ///
    /// These are absorbed on the asynchronous callback paths.
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            Error::UnknownSession(_) | Error::InvalidTransition { .. }
        )
    }

    /// Check if this error came from the peer transport
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::TransportSendFailure { .. }
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::DataChannelError(_)
                | Error::WebRtcError(_)
        )
    }

    pub(crate) fn send_failure(session_id: &str, reason: impl ToString) -> Self {
        Error::TransportSendFailure {
            session_id: session_id.to_string(),
            reason: reason.to_string(),
        }
    }
}
