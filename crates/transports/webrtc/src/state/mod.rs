//! Per-session state records and the process-wide state store
//!
//! The store maps a session id to the last state record that session sent.
//! Entries are only written through the [`SessionRegistry`](crate::session::SessionRegistry),
//! which keeps them in step with the set of open sessions.

mod store;

pub use store::{InboundState, PeerStateStore, PlayerState, WorldSnapshot};
