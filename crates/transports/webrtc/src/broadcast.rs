//! State fan-out
//!
//! Every accepted update replaces the sender's entry in the store and
//! pushes the full world snapshot to every open session. Snapshots carry
//! every entry, so concurrent updates need no ordering: the last write of
//! each session wins and the next broadcast repairs anything stale.

use crate::session::{SessionId, SessionRegistry};
use crate::state::{InboundState, PlayerState};
use crate::Error;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Result of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the snapshot was delivered to
    pub delivered: usize,
    /// Sessions whose transport rejected the snapshot
    pub failed: Vec<SessionId>,
}

impl BroadcastReport {
    /// Number of sessions the broadcast was attempted on
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// Fans the merged world state out to every open session
#[derive(Clone)]
pub struct BroadcastEngine {
    registry: Arc<SessionRegistry>,
}

impl BroadcastEngine {
    /// Create an engine over a registry
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Handle a raw data channel message
    ///
    /// Undecodable payloads are logged and dropped.
    pub async fn on_message(&self, session_id: &str, payload: &[u8]) -> Option<BroadcastReport> {
        match InboundState::decode(payload) {
            Ok(state) => self.on_state_update(session_id, state).await,
            Err(e) => {
                warn!(
                    "Dropping message from session {} ({} bytes): {}",
                    session_id,
                    payload.len(),
                    e
                );
                None
            }
        }
    }

    /// Record a session's new state and broadcast
    ///
    /// Updates from sessions that are not open (never opened, or already
    /// removed) are logged and absorbed; nothing is broadcast for them.
    pub async fn on_state_update(
        &self,
        session_id: &str,
        state: PlayerState,
    ) -> Option<BroadcastReport> {
        if let Err(e) = self.registry.store_state(session_id, state) {
            debug!("Ignoring state update: {}", e);
            return None;
        }

        trace!("Session {} state: {:?}", session_id, state);
        Some(self.broadcast().await)
    }

    /// Send the current world snapshot to every open session
    ///
    /// The snapshot is serialized once. A failed send is logged and
    /// reported, and never stops delivery to the other sessions.
    pub async fn broadcast(&self) -> BroadcastReport {
        let view = self.registry.open_view();

        let payload = match view.snapshot.to_json() {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                error!("Failed to serialize world snapshot: {}", e);
                return BroadcastReport::default();
            }
        };

        let results = view
            .for_each(|session_id, transport| {
                let payload = payload.clone();
                async move {
                    let result = transport.send(payload).await;
                    (session_id, result)
                }
            })
            .await;

        let mut report = BroadcastReport::default();
        for (session_id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let e = match e {
                        e @ Error::TransportSendFailure { .. } => e,
                        other => Error::send_failure(&session_id, other),
                    };
                    warn!("{}", e);
                    report.failed.push(session_id);
                }
            }
        }

        debug!(
            "Broadcast {} bytes to {}/{} sessions",
            payload.len(),
            report.delivered,
            report.attempted()
        );
        report
    }
}
