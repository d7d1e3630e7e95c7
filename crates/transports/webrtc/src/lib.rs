//! WebRTC session lifecycle and state broadcast engine
//!
//! Clients negotiate a data channel with the server, send their own small
//! state record over it, and receive the merged state of every connected
//! client in return.
//!
//! # Features
//!
//! - **Both handshake directions**: server-offers or client-offers, per session
//! - **Session registry**: one session per channel id, tracked from creation
//!   to removal, with the state store kept in step
//! - **Broadcast engine**: full world snapshot fanned out on every update,
//!   with per-session send failures isolated
//! - **Single or many sessions**: optional single-session mode where a new
//!   session replaces the previous one
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Signaling requests (offer / answer / candidate)       │
//! │  ↓                                                     │
//! │  SignalingCoordinator                                  │
//! │  ├─ TransportConnector → PeerTransport (webrtc-rs)     │
//! │  │   └─ TransportEvent channel → per-session task      │
//! │  ├─ SessionRegistry (lifecycle, transport handles)     │
//! │  │   └─ PeerStateStore (last state per open session)   │
//! │  └─ BroadcastEngine (snapshot → every open session)    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use statecast_webrtc::{Cardinality, WebRtcTransportConfig};
//!
//! let config = WebRtcTransportConfig {
//!     stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
//!     cardinality: Cardinality::Many,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use statecast_webrtc::{OfferRequest, SignalingCoordinator, WebRtcTransportConfig};
//!
//! # async fn example() -> statecast_webrtc::Result<()> {
//! let coordinator = SignalingCoordinator::with_webrtc(&WebRtcTransportConfig::default())?;
//!
//! // Server-offers session on channel "lobby"
//! let offer = coordinator
//!     .negotiate(OfferRequest {
//!         channel_id: Some("lobby".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//! assert_eq!(offer.channel_id.as_deref(), Some("lobby"));
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod broadcast;
pub mod config;
pub mod error;
pub mod session;
pub mod signaling;
pub mod state;
pub mod transport;

pub use broadcast::{BroadcastEngine, BroadcastReport};
pub use config::{Cardinality, DataChannelMode, TurnServerConfig, WebRtcTransportConfig};
pub use error::{Error, Result};
pub use session::{
    NegotiationState, Role, Session, SessionId, SessionInfo, SessionLifecycle, SessionRegistry,
};
pub use signaling::{
    CandidateRequest, CloseReason, IceCandidate, OfferRequest, RelayedCandidate, SdpType,
    SessionDescription, SignalingCoordinator, SignalingEvent,
};
pub use state::{PeerStateStore, PlayerState, WorldSnapshot};
pub use transport::{
    ConnectionState, PeerTransport, RtcConnector, TransportConnector, TransportEvent,
    TransportEventSender, TransportEvents,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
