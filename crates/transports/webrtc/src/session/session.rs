//! Session record and its state machines

use crate::transport::PeerTransport;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Session identifier
pub type SessionId = String;

/// Generate a fresh session id for clients that did not supply one
pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Registry-level lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLifecycle {
    /// Registered, no transport yet
    Created,
    /// Transport attached, SDP/ICE in flight
    Negotiating,
    /// Data channel usable
    Open,
    /// Removed from the registry
    Closed,
}

impl fmt::Display for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionLifecycle::Created => "created",
            SessionLifecycle::Negotiating => "negotiating",
            SessionLifecycle::Open => "open",
            SessionLifecycle::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which side produces the first SDP message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The server creates the offer and the data channel
    ServerOffers,
    /// The client sends the offer; the server answers
    ClientOffers,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ServerOffers => f.write_str("server_offers"),
            Role::ClientOffers => f.write_str("client_offers"),
        }
    }
}

/// Handshake state of a session
///
/// ```text
/// Idle -> AwaitingRemoteDescription -> AwaitingLocalDescriptionApplied -> Negotiated -> Open -> Closed
///   \-> AwaitingLocalDescriptionApplied -> AwaitingRemoteDescription -/
/// ```
///
/// `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// Nothing exchanged yet
    Idle,
    /// Waiting for the peer's offer or answer
    AwaitingRemoteDescription,
    /// Local offer or answer being created and applied
    AwaitingLocalDescriptionApplied,
    /// Both descriptions applied
    Negotiated,
    /// Data channel open
    Open,
    /// Session ended normally
    Closed,
    /// Negotiation or transport failure
    Failed,
}

impl NegotiationState {
    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }

    /// Check if `self -> to` is a legal transition
    pub fn can_transition(&self, to: NegotiationState) -> bool {
        use NegotiationState::*;

        if self.is_terminal() {
            return false;
        }

        match (*self, to) {
            (_, Failed) | (_, Closed) => true,
            (Idle, AwaitingRemoteDescription) | (Idle, AwaitingLocalDescriptionApplied) => true,
            (AwaitingRemoteDescription, AwaitingLocalDescriptionApplied) => true,
            (AwaitingLocalDescriptionApplied, AwaitingRemoteDescription) => true,
            (AwaitingRemoteDescription, Negotiated) | (AwaitingLocalDescriptionApplied, Negotiated) => {
                true
            }
            // The channel may report open before the answer call returns
            (AwaitingRemoteDescription, Open) | (Negotiated, Open) => true,
            _ => false,
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A live session
///
/// Cloning copies the record and shares the transport handle.
#[derive(Clone)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) generation: u64,
    pub(crate) role: Role,
    pub(crate) lifecycle: SessionLifecycle,
    pub(crate) negotiation: NegotiationState,
    pub(crate) transport: Option<Arc<dyn PeerTransport>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, generation: u64, role: Role) -> Self {
        Self {
            id,
            generation,
            role,
            lifecycle: SessionLifecycle::Created,
            negotiation: NegotiationState::Idle,
            transport: None,
        }
    }

    /// Get the session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Registration counter, distinct for every session ever created
    ///
    /// Tells a reused id apart from the session that held it before.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Which side sends the offer
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> SessionLifecycle {
        self.lifecycle
    }

    /// Current handshake state
    pub fn negotiation(&self) -> NegotiationState {
        self.negotiation
    }

    /// Attached transport handle
    pub fn transport(&self) -> Option<&Arc<dyn PeerTransport>> {
        self.transport.as_ref()
    }

    /// Check if the data channel is open
    pub fn is_open(&self) -> bool {
        self.lifecycle == SessionLifecycle::Open
    }

    /// Move the handshake to `to`, returning the previous state
    pub(crate) fn advance(&mut self, to: NegotiationState) -> Result<NegotiationState> {
        let from = self.negotiation;
        if from == to {
            return Ok(from);
        }
        if !from.can_transition(to) {
            return Err(Error::InvalidTransition {
                session_id: self.id.clone(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!("Session {} negotiation: {} -> {}", self.id, from, to);
        self.negotiation = to;
        Ok(from)
    }

    /// Mark a session taken out of the registry as closed
    ///
    /// Returns whether it was open, i.e. present in the world snapshot.
    pub(crate) fn retire(&mut self) -> bool {
        let was_open = self.is_open();
        self.lifecycle = SessionLifecycle::Closed;
        if !self.negotiation.is_terminal() {
            self.negotiation = NegotiationState::Closed;
        }
        was_open
    }

    /// Summary for status reporting
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            role: self.role,
            lifecycle: self.lifecycle,
            negotiation: self.negotiation,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("lifecycle", &self.lifecycle)
            .field("negotiation", &self.negotiation)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

/// Serializable summary of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Which side sends the offer
    pub role: Role,
    /// Lifecycle state
    pub lifecycle: SessionLifecycle,
    /// Handshake state
    pub negotiation: NegotiationState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn test_server_offers_path() {
        let mut session = Session::new("A".to_string(), 0, Role::ServerOffers);
        session
            .advance(NegotiationState::AwaitingLocalDescriptionApplied)
            .unwrap();
        session
            .advance(NegotiationState::AwaitingRemoteDescription)
            .unwrap();
        session.advance(NegotiationState::Negotiated).unwrap();
        session.advance(NegotiationState::Open).unwrap();
        session.advance(NegotiationState::Closed).unwrap();
        assert!(session.negotiation().is_terminal());
    }

    #[test]
    fn test_client_offers_path() {
        let mut session = Session::new("B".to_string(), 1, Role::ClientOffers);
        session
            .advance(NegotiationState::AwaitingRemoteDescription)
            .unwrap();
        session
            .advance(NegotiationState::AwaitingLocalDescriptionApplied)
            .unwrap();
        session.advance(NegotiationState::Negotiated).unwrap();
        assert_eq!(session.negotiation(), NegotiationState::Negotiated);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut session = Session::new("C".to_string(), 2, Role::ServerOffers);
        let err = session.advance(NegotiationState::Open).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        session.advance(NegotiationState::Failed).unwrap();
        assert!(session
            .advance(NegotiationState::AwaitingRemoteDescription)
            .is_err());
        assert!(session.advance(NegotiationState::Closed).is_err());
    }

    #[test]
    fn test_info_serialization() {
        let session = Session::new("D".to_string(), 3, Role::ClientOffers);
        let json = serde_json::to_value(session.info()).unwrap();
        assert_eq!(json["id"], "D");
        assert_eq!(json["role"], "client_offers");
        assert_eq!(json["lifecycle"], "created");
        assert_eq!(json["negotiation"], "idle");
    }
}
