//! Peer transport abstraction
//!
//! The session engine only needs a handful of primitives from a peer
//! connection: SDP exchange, ICE candidate intake, sending bytes and
//! closing. Everything the connection reports back arrives as a
//! [`TransportEvent`] on a per-session channel, so the lifecycle can be
//! driven without a real network stack.

mod rtc;

pub use rtc::{RtcConnector, RtcPeer};

use crate::session::Role;
use crate::signaling::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving half of a session's transport event channel
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Sending half of a session's transport event channel
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Connection-level state changes the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// ICE lost connectivity
    Disconnected,
    /// ICE or DTLS failed
    Failed,
}

/// Event reported by a peer transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The data channel is usable
    Opened,
    /// The data channel closed
    Closed,
    /// A message arrived on the data channel
    MessageReceived(Bytes),
    /// A local ICE candidate was gathered
    CandidateGathered(IceCandidate),
    /// The connection state changed
    ConnectionStateChanged(ConnectionState),
}

impl TransportEvent {
    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportEvent::Closed | TransportEvent::ConnectionStateChanged(_)
        )
    }
}

/// Handle to one negotiated peer connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a payload on the session's data channel
    async fn send(&self, payload: Bytes) -> Result<()>;

    /// Create a local offer, apply it and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer and return the SDP of the applied local answer
    async fn accept_offer(&self, sdp: String) -> Result<String>;

    /// Apply a remote answer to a previously created offer
    async fn apply_answer(&self, sdp: String) -> Result<()>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Factory for peer transports
///
/// Returns the transport handle together with the channel its events
/// will be delivered on.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Create the transport for a new session
    async fn connect(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)>;
}
