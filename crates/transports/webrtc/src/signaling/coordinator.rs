//! Handshake driver
//!
//! The coordinator registers sessions, runs the offer/answer exchange in
//! either direction, relays ICE candidates and turns transport events into
//! registry transitions and broadcasts. Each session's events are consumed
//! by a dedicated task, so callbacks from the transport never touch the
//! registry directly.

use super::events::{CloseReason, SignalingEvent};
use super::protocol::{IceCandidate, OfferRequest, SdpType, SessionDescription};
use crate::broadcast::BroadcastEngine;
use crate::config::{Cardinality, WebRtcTransportConfig};
use crate::session::{
    generate_session_id, Evicted, NegotiationState, Role, SessionId, SessionRegistry,
};
use crate::transport::{
    ConnectionState, PeerTransport, RtcConnector, TransportConnector, TransportEvent,
    TransportEvents,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Capacity of the signaling event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Drives session negotiation and wires transport events into the registry
#[derive(Clone)]
pub struct SignalingCoordinator {
    /// Live sessions and their state
    registry: Arc<SessionRegistry>,

    /// State fan-out
    engine: BroadcastEngine,

    /// Creates the transport for each session
    connector: Arc<dyn TransportConnector>,

    /// One global session or many
    cardinality: Cardinality,

    /// Candidate and lifecycle notifications for signaling clients
    events: broadcast::Sender<SignalingEvent>,
}

impl SignalingCoordinator {
    /// Create a coordinator over an arbitrary transport connector
    pub fn new(config: &WebRtcTransportConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            "Signaling coordinator ready (cardinality: {:?}, data channel: {})",
            config.cardinality, config.data_channel_label
        );

        Self {
            engine: BroadcastEngine::new(Arc::clone(&registry)),
            registry,
            connector,
            cardinality: config.cardinality,
            events,
        }
    }

    /// Create a coordinator backed by WebRTC peer connections
    pub fn with_webrtc(config: &WebRtcTransportConfig) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(RtcConnector::new(config.clone())?);
        Ok(Self::new(config, connector))
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Subscribe to signaling events
    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }

    /// Pick the session a signaling request addresses
    ///
    /// In single mode a request without a channel id addresses the most
    /// recent session.
    pub fn resolve(&self, channel_id: Option<&str>) -> Result<SessionId> {
        match channel_id {
            Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
            _ => match self.cardinality {
                Cardinality::Single => self
                    .registry
                    .latest()
                    .map(|s| s.id)
                    .ok_or_else(|| Error::UnknownSession(String::new())),
                Cardinality::Many => Err(Error::InvalidChannelId(
                    channel_id.unwrap_or_default().to_string(),
                )),
            },
        }
    }

    /// Start a session from an offer request
    ///
    /// Without an SDP body the server offers and the returned description is
    /// its offer. With one, the body is the client's offer and the returned
    /// description is the server's answer. Either way the description carries
    /// the channel id, generated when the client sent none.
    pub async fn negotiate(&self, request: OfferRequest) -> Result<SessionDescription> {
        let session_id = match request.channel_id.as_deref() {
            Some(id) => id.to_string(),
            None => generate_session_id(),
        };

        match request.client_description() {
            None => self
                .begin_session(&session_id, Role::ServerOffers)
                .await?
                .ok_or_else(|| Error::InternalError("Server offer was not created".to_string())),
            Some(offer) => {
                let (generation, _) = self.start(&session_id, Role::ClientOffers).await?;
                let result = match self.apply(&session_id, Some(generation), offer).await {
                    Ok(Some(answer)) => return Ok(answer),
                    Ok(None) => Err(Error::InternalError("Answer was not created".to_string())),
                    Err(e) => Err(e),
                };

                // Only this request's session is torn down; a newer session
                // registered under the same id is left alone
                self.end_session(&session_id, generation, CloseReason::NegotiationFailed)
                    .await;
                result
            }
        }
    }

    /// Register a session and start its handshake
    ///
    /// # Arguments
    ///
    /// * `session_id` - Channel id for the new session
    /// * `role` - Which side sends the offer
    ///
    /// # Returns
    ///
    /// The server's offer for [`Role::ServerOffers`], `None` for
    /// [`Role::ClientOffers`] (the session then awaits the client's offer).
    pub async fn begin_session(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<Option<SessionDescription>> {
        self.start(session_id, role)
            .await
            .map(|(_, description)| description)
    }

    /// Register a session, returning its generation and the server's offer
    async fn start(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<(u64, Option<SessionDescription>)> {
        if session_id.trim().is_empty() {
            return Err(Error::InvalidChannelId(session_id.to_string()));
        }

        let created = self.registry.create(session_id, role)?;
        let generation = created.session.generation();

        let mut evicted: Vec<Evicted> = created.evicted.into_iter().collect();
        if self.cardinality == Cardinality::Single {
            evicted.extend(self.registry.retain_only(session_id));
        }
        self.close_evicted(evicted).await;

        let (transport, events) = match self.connector.connect(session_id, role).await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Failed to create transport for session {}: {}", session_id, e);
                self.registry.remove_generation(session_id, generation);
                return Err(e);
            }
        };

        if let Err(e) = self.registry.attach_transport_generation(
            session_id,
            generation,
            Arc::clone(&transport),
        ) {
            // Evicted or replaced while the transport was being built
            close_transport(session_id, &transport).await;
            return Err(e);
        }
        self.spawn_event_pump(session_id.to_string(), generation, events);

        match role {
            Role::ServerOffers => {
                self.advance(
                    session_id,
                    generation,
                    NegotiationState::AwaitingLocalDescriptionApplied,
                )?;
                let sdp = match transport.create_offer().await {
                    Ok(sdp) => sdp,
                    Err(e) => {
                        self.fail(session_id, generation, &e).await;
                        return Err(e);
                    }
                };
                self.advance(
                    session_id,
                    generation,
                    NegotiationState::AwaitingRemoteDescription,
                )?;

                info!("Created offer for session {}", session_id);
                Ok((
                    generation,
                    Some(SessionDescription::offer(sdp).with_channel_id(session_id)),
                ))
            }
            Role::ClientOffers => {
                self.advance(
                    session_id,
                    generation,
                    NegotiationState::AwaitingRemoteDescription,
                )?;
                debug!("Session {} awaiting client offer", session_id);
                Ok((generation, None))
            }
        }
    }

    /// Apply the peer's offer or answer
    ///
    /// # Returns
    ///
    /// The server's answer when the description was an offer, `None` when
    /// it was an answer.
    ///
    /// # Errors
    ///
    /// * `UnknownSession` if the session is not registered
    /// * `InvalidDescriptionType` if the type is not the one the session's
    ///   role expects; the session is left untouched
    /// * `InvalidTransition` if the session is not waiting for a description
    /// * transport errors, after which the session is failed and removed
    pub async fn apply_remote_description(
        &self,
        session_id: &str,
        description: SessionDescription,
    ) -> Result<Option<SessionDescription>> {
        self.apply(session_id, None, description).await
    }

    /// Apply a description, optionally only to the given generation
    ///
    /// A session replaced since `expected_generation` is reported as
    /// `UnknownSession`.
    async fn apply(
        &self,
        session_id: &str,
        expected_generation: Option<u64>,
        description: SessionDescription,
    ) -> Result<Option<SessionDescription>> {
        let (generation, role, transport) =
            self.registry.with_session_mut(session_id, |session| {
                if expected_generation.is_some_and(|g| g != session.generation()) {
                    return Err(Error::UnknownSession(session_id.to_string()));
                }

                let expected = match session.role() {
                    Role::ClientOffers => SdpType::Offer,
                    Role::ServerOffers => SdpType::Answer,
                };
                if description.sdp_type != expected {
                    return Err(Error::InvalidDescriptionType {
                        expected: expected.to_string(),
                        actual: description.sdp_type.to_string(),
                    });
                }

                if session.negotiation() != NegotiationState::AwaitingRemoteDescription {
                    return Err(Error::InvalidTransition {
                        session_id: session.id().to_string(),
                        from: session.negotiation().to_string(),
                        to: NegotiationState::Negotiated.to_string(),
                    });
                }

                let transport = session.transport().cloned().ok_or_else(|| {
                    Error::InternalError(format!("Session {} has no transport", session.id()))
                })?;

                // Claim the step before releasing the lock so a duplicate
                // description is rejected instead of reaching the transport
                session.advance(match session.role() {
                    Role::ClientOffers => NegotiationState::AwaitingLocalDescriptionApplied,
                    Role::ServerOffers => NegotiationState::Negotiated,
                })?;

                Ok((session.generation(), session.role(), transport))
            })?;

        match role {
            Role::ServerOffers => {
                if let Err(e) = transport.apply_answer(description.sdp).await {
                    self.fail(session_id, generation, &e).await;
                    return Err(e);
                }
                info!("Applied answer for session {}", session_id);
                Ok(None)
            }
            Role::ClientOffers => {
                let sdp = match transport.accept_offer(description.sdp).await {
                    Ok(sdp) => sdp,
                    Err(e) => {
                        self.fail(session_id, generation, &e).await;
                        return Err(e);
                    }
                };
                self.advance(session_id, generation, NegotiationState::Negotiated)?;

                info!("Created answer for session {}", session_id);
                Ok(Some(
                    SessionDescription::answer(sdp).with_channel_id(session_id),
                ))
            }
        }
    }

    /// Hand a remote ICE candidate to the session's transport
    ///
    /// Candidates for removed sessions fail with `UnknownSession` and never
    /// recreate the session.
    pub async fn add_remote_candidate(
        &self,
        session_id: &str,
        candidate: IceCandidate,
    ) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

        let transport = session.transport().cloned().ok_or_else(|| Error::InvalidTransition {
            session_id: session_id.to_string(),
            from: session.lifecycle().to_string(),
            to: "candidate".to_string(),
        })?;

        trace!("Remote candidate for session {}: {}", session_id, candidate.candidate);
        transport.add_ice_candidate(candidate).await
    }

    /// Remove every session and close its transport
    pub async fn close_all(&self) {
        let ids: Vec<SessionId> = self.registry.sessions().into_iter().map(|s| s.id).collect();
        for id in ids {
            if let Some(session) = self.registry.remove(&id) {
                if let Some(transport) = session.transport() {
                    close_transport(&id, transport).await;
                }
                self.emit(SignalingEvent::session_closed(id, CloseReason::ChannelClosed));
            }
        }
    }

    fn advance(&self, session_id: &str, generation: u64, to: NegotiationState) -> Result<()> {
        self.registry.with_session_mut(session_id, |session| {
            if session.generation() != generation {
                return Err(Error::UnknownSession(session_id.to_string()));
            }
            session.advance(to).map(|_| ())
        })
    }

    /// Mark a negotiation failure and tear the session down
    async fn fail(&self, session_id: &str, generation: u64, error: &Error) {
        warn!("Negotiation failed for session {}: {}", session_id, error);
        if let Err(e) = self.advance(session_id, generation, NegotiationState::Failed) {
            debug!("Could not mark session {} failed: {}", session_id, e);
        }
        self.end_session(session_id, generation, CloseReason::NegotiationFailed)
            .await;
    }

    async fn close_evicted(&self, evicted: Vec<Evicted>) {
        if evicted.is_empty() {
            return;
        }

        let mut any_open = false;
        for Evicted { session, was_open } in evicted {
            any_open |= was_open;
            if let Some(transport) = session.transport() {
                close_transport(session.id(), transport).await;
            }
            self.emit(SignalingEvent::session_closed(
                session.id().to_string(),
                CloseReason::Evicted,
            ));
        }

        if any_open {
            self.engine.broadcast().await;
        }
    }

    /// Remove a session of the given generation, close it and broadcast
    async fn end_session(&self, session_id: &str, generation: u64, reason: CloseReason) {
        let Some(session) = self.registry.remove_generation(session_id, generation) else {
            trace!("Session {} already removed", session_id);
            return;
        };

        info!("Session {} ended: {}", session_id, reason.as_str());
        if let Some(transport) = session.transport() {
            close_transport(session_id, transport).await;
        }
        self.emit(SignalingEvent::session_closed(
            session_id.to_string(),
            reason,
        ));
        self.engine.broadcast().await;
    }

    fn spawn_event_pump(&self, session_id: SessionId, generation: u64, mut events: TransportEvents) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let mut reason = CloseReason::ChannelClosed;
            while let Some(event) = events.recv().await {
                if event.is_terminal() {
                    reason = close_reason(&event);
                    break;
                }
                coordinator
                    .handle_transport_event(&session_id, generation, event)
                    .await;
            }

            coordinator.end_session(&session_id, generation, reason).await;
            debug!("Event pump for session {} finished", session_id);
        });
    }

    /// Apply one non-terminal transport event
    async fn handle_transport_event(
        &self,
        session_id: &str,
        generation: u64,
        event: TransportEvent,
    ) {
        match event {
            TransportEvent::Opened => {
                match self.registry.mark_open_generation(session_id, generation) {
                    Ok(_) => {
                        self.emit(SignalingEvent::session_opened(session_id.to_string()));
                        // Let the new session see the world right away
                        self.engine.broadcast().await;
                    }
                    // Removed or replaced before the channel opened
                    Err(e) if e.is_race() => debug!("Ignoring channel open: {}", e),
                    Err(e) => warn!("Ignoring channel open: {}", e),
                }
            }
            TransportEvent::MessageReceived(payload) => {
                self.engine.on_message(session_id, &payload).await;
            }
            TransportEvent::CandidateGathered(candidate) => {
                self.emit(SignalingEvent::local_candidate(
                    session_id.to_string(),
                    candidate,
                ));
            }
            TransportEvent::Closed | TransportEvent::ConnectionStateChanged(_) => {}
        }
    }

    fn emit(&self, event: SignalingEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            trace!("No subscribers for {} event", name);
        }
    }
}

fn close_reason(event: &TransportEvent) -> CloseReason {
    match event {
        TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected) => {
            CloseReason::Disconnected
        }
        TransportEvent::ConnectionStateChanged(ConnectionState::Failed) => CloseReason::Failed,
        _ => CloseReason::ChannelClosed,
    }
}

async fn close_transport(session_id: &str, transport: &Arc<dyn PeerTransport>) {
    if let Err(e) = transport.close().await {
        debug!("Error closing transport for session {}: {}", session_id, e);
    }
}
