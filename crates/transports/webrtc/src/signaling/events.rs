//! Signaling events emitted by the coordinator
//!
//! Subscribers (such as the server's WebSocket relay) receive these over a
//! `tokio::sync::broadcast` channel.

use super::protocol::IceCandidate;
use crate::session::SessionId;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Data channel closed
    ChannelClosed,
    /// ICE disconnected
    Disconnected,
    /// Connection failed
    Failed,
    /// Replaced by a newer session
    Evicted,
    /// Negotiation failed before the channel opened
    NegotiationFailed,
}

impl CloseReason {
    /// Short name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ChannelClosed => "channel_closed",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Failed => "failed",
            CloseReason::Evicted => "evicted",
            CloseReason::NegotiationFailed => "negotiation_failed",
        }
    }
}

/// Event emitted by the signaling coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The server gathered a local ICE candidate for a session
    LocalCandidate {
        /// Session the candidate belongs to
        session_id: SessionId,
        /// The candidate
        candidate: IceCandidate,
    },

    /// A session's data channel opened
    SessionOpened {
        /// Opened session
        session_id: SessionId,
    },

    /// A session was removed
    SessionClosed {
        /// Removed session
        session_id: SessionId,
        /// Why it ended
        reason: CloseReason,
    },
}

impl SignalingEvent {
    /// Create a local candidate event
    pub fn local_candidate(session_id: SessionId, candidate: IceCandidate) -> Self {
        Self::LocalCandidate {
            session_id,
            candidate,
        }
    }

    /// Create a session opened event
    pub fn session_opened(session_id: SessionId) -> Self {
        Self::SessionOpened { session_id }
    }

    /// Create a session closed event
    pub fn session_closed(session_id: SessionId, reason: CloseReason) -> Self {
        Self::SessionClosed { session_id, reason }
    }

    /// Session the event is about
    pub fn session_id(&self) -> &str {
        match self {
            Self::LocalCandidate { session_id, .. }
            | Self::SessionOpened { session_id }
            | Self::SessionClosed { session_id, .. } => session_id,
        }
    }

    /// Get the event name for logging/debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalCandidate { .. } => "local_candidate",
            Self::SessionOpened { .. } => "session_opened",
            Self::SessionClosed { .. } => "session_closed",
        }
    }
}
