//! Signaling: SDP and ICE message types, the handshake coordinator and the
//! events it publishes

pub mod coordinator;
pub mod events;
pub mod protocol;

pub use coordinator::SignalingCoordinator;
pub use events::{CloseReason, SignalingEvent};
pub use protocol::{
    CandidateRequest, IceCandidate, OfferRequest, RelayedCandidate, SdpType, SessionDescription,
};
