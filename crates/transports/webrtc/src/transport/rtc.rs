//! WebRTC peer transport built on webrtc-rs

use super::{
    ConnectionState, PeerTransport, TransportConnector, TransportEvent, TransportEventSender,
    TransportEvents,
};
use crate::config::WebRtcTransportConfig;
use crate::session::{Role, SessionId};
use crate::signaling::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, instrument, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid.unwrap_or_default(),
            sdp_mline_index: init.sdp_mline_index.unwrap_or_default(),
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.sdp_mid).filter(|mid| !mid.is_empty()),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        }
    }
}

/// Creates one [`RtcPeer`] per session
pub struct RtcConnector {
    config: WebRtcTransportConfig,
}

impl RtcConnector {
    /// Create a connector
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: WebRtcTransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl TransportConnector for RtcConnector {
    async fn connect(
        &self,
        session_id: &str,
        role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (peer, events) = RtcPeer::new(session_id.to_string(), role, &self.config).await?;
        Ok((Arc::new(peer), events))
    }
}

/// One WebRTC peer connection carrying a single state data channel
pub struct RtcPeer {
    /// Session this peer belongs to
    session_id: SessionId,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// State channel, once created (server offers) or received (client offers)
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
}

impl RtcPeer {
    /// Create a peer connection for a session
    ///
    /// For [`Role::ServerOffers`] the data channel is created here, before the
    /// offer, so it is part of the SDP. For [`Role::ClientOffers`] the channel
    /// announced by the client's offer is adopted when it arrives.
    ///
    /// # Returns
    ///
    /// The peer and the receiver its transport events are delivered on.
    #[instrument(skip(config), fields(session_id = %session_id))]
    pub async fn new(
        session_id: SessionId,
        role: Role,
        config: &WebRtcTransportConfig,
    ) -> Result<(Self, TransportEvents)> {
        info!("Creating peer connection for session {} ({})", session_id, role);

        // Create MediaEngine with default codecs
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        // Create InterceptorRegistry with default interceptors
        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let (tx, rx) = mpsc::unbounded_channel();
        let data_channel = Arc::new(RwLock::new(None));

        let peer = Self {
            session_id,
            peer_connection,
            data_channel,
        };
        peer.setup_connection_handlers(tx.clone());

        match role {
            Role::ServerOffers => {
                let init = RTCDataChannelInit {
                    ordered: Some(config.data_channel_mode.ordered()),
                    max_retransmits: config.data_channel_mode.max_retransmits(),
                    ..Default::default()
                };

                let channel = peer
                    .peer_connection
                    .create_data_channel(&config.data_channel_label, Some(init))
                    .await
                    .map_err(|e| {
                        Error::DataChannelError(format!("Failed to create data channel: {}", e))
                    })?;

                wire_data_channel(&peer.session_id, &channel, tx);
                *peer.data_channel.write().await = Some(channel);
            }
            Role::ClientOffers => {
                let session_id = peer.session_id.clone();
                let data_channel = Arc::clone(&peer.data_channel);

                peer.peer_connection
                    .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                        let session_id = session_id.clone();
                        let data_channel = Arc::clone(&data_channel);
                        let tx = tx.clone();

                        Box::pin(async move {
                            info!(
                                "Data channel received: label={}, id={:?} for session {}",
                                channel.label(),
                                channel.id(),
                                session_id
                            );
                            wire_data_channel(&session_id, &channel, tx);
                            *data_channel.write().await = Some(channel);
                        })
                    }));
            }
        }

        Ok((peer, rx))
    }

    /// Session this peer belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn setup_connection_handlers(&self, tx: TransportEventSender) {
        let session_id = self.session_id.clone();
        let candidate_tx = tx.clone();

        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let session_id = session_id.clone();
                let tx = candidate_tx.clone();

                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete for session {}", session_id);
                        return;
                    };

                    match candidate.to_json() {
                        Ok(init) => {
                            trace!("Local ICE candidate for {}: {}", session_id, init.candidate);
                            let _ = tx.send(TransportEvent::CandidateGathered(init.into()));
                        }
                        Err(e) => {
                            warn!("Failed to convert ICE candidate to JSON: {}", e);
                        }
                    }
                })
            }));

        let session_id = self.session_id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let session_id = session_id.clone();
                let tx = tx.clone();

                Box::pin(async move {
                    debug!("Session {} connection state: {}", session_id, s);
                    let event = match s {
                        RTCPeerConnectionState::Disconnected => Some(
                            TransportEvent::ConnectionStateChanged(ConnectionState::Disconnected),
                        ),
                        RTCPeerConnectionState::Failed => Some(
                            TransportEvent::ConnectionStateChanged(ConnectionState::Failed),
                        ),
                        RTCPeerConnectionState::Closed => Some(TransportEvent::Closed),
                        _ => None,
                    };
                    if let Some(event) = event {
                        let _ = tx.send(event);
                    }
                })
            }));
    }

    async fn open_channel(&self) -> Result<Arc<RTCDataChannel>> {
        let channel = self
            .data_channel
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::send_failure(&self.session_id, "no data channel"))?;

        let state = channel.ready_state();
        if state != RTCDataChannelState::Open {
            return Err(Error::send_failure(
                &self.session_id,
                format!("data channel is not open (state: {})", state),
            ));
        }

        Ok(channel)
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn send(&self, payload: Bytes) -> Result<()> {
        let channel = self.open_channel().await?;

        // JSON goes out as text frames; anything else as binary
        let result = match std::str::from_utf8(&payload) {
            Ok(text) => channel.send_text(text.to_string()).await,
            Err(_) => channel.send(&payload).await,
        };

        result
            .map(|_| ())
            .map_err(|e| Error::send_failure(&self.session_id, e))
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for session {}", self.session_id);
        Ok(local_desc.sdp)
    }

    async fn accept_offer(&self, sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting answer".to_string())
            })?;

        debug!("Created SDP answer for session {}", self.session_id);
        Ok(local_desc.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for session {}", self.session_id);

        if let Some(channel) = self.data_channel.write().await.take() {
            if let Err(e) = channel.close().await {
                debug!("Data channel close for {}: {}", self.session_id, e);
            }
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

fn ice_servers(config: &WebRtcTransportConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

fn wire_data_channel(session_id: &str, channel: &Arc<RTCDataChannel>, tx: TransportEventSender) {
    let label = channel.label().to_string();

    let open_tx = tx.clone();
    let open_label = label.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            debug!("Data channel '{}' opened", open_label);
            let _ = open_tx.send(TransportEvent::Opened);
        })
    }));

    let close_tx = tx.clone();
    let close_label = label.clone();
    channel.on_close(Box::new(move || {
        let tx = close_tx.clone();
        let label = close_label.clone();
        Box::pin(async move {
            debug!("Data channel '{}' closed", label);
            let _ = tx.send(TransportEvent::Closed);
        })
    }));

    channel.on_message(Box::new(move |msg| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::MessageReceived(msg.data));
        })
    }));

    let session_id = session_id.to_string();
    channel.on_error(Box::new(move |err| {
        let label = label.clone();
        let session_id = session_id.clone();
        Box::pin(async move {
            error!("Data channel '{}' error on session {}: {}", label, session_id, err);
        })
    }));
}
