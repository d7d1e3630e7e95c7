//! Session tracking
//!
//! One [`Session`] exists per live channel id. The [`SessionRegistry`] owns
//! them together with the [`PeerStateStore`](crate::state::PeerStateStore),
//! so a session and its state entry are always added and dropped together.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::{Created, Evicted, OpenView, SessionRegistry};
pub use session::{
    generate_session_id, NegotiationState, Role, Session, SessionId, SessionInfo,
    SessionLifecycle,
};
