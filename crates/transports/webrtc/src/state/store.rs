use crate::session::SessionId;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Last known state of one peer
///
/// Replaced wholesale on every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    /// `(x, y)` position, encoded as a two element array
    pub position: (i32, i32),

    /// Orientation
    #[serde(rename = "theta", default)]
    pub orientation: i32,

    /// Animation id
    #[serde(rename = "animation", default)]
    pub animation_id: i32,
}

impl PlayerState {
    /// Create a state record
    pub fn new(x: i32, y: i32, orientation: i32, animation_id: i32) -> Self {
        Self {
            position: (x, y),
            orientation,
            animation_id,
        }
    }
}

/// A state message as it arrives on the data channel
///
/// Older clients send only their coordinates as a bare `[x, y]` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundState {
    /// `{ "position": [x, y], "theta": t, "animation": a }`
    Full(PlayerState),
    /// `[x, y]`
    Coordinates([i32; 2]),
}

impl InboundState {
    /// Decode a raw data channel payload
    pub fn decode(payload: &[u8]) -> Result<PlayerState> {
        let inbound: InboundState = serde_json::from_slice(payload).map_err(|e| {
            Error::SerializationError(format!("Failed to decode state message: {}", e))
        })?;
        Ok(inbound.into())
    }
}

impl From<InboundState> for PlayerState {
    fn from(inbound: InboundState) -> Self {
        match inbound {
            InboundState::Full(state) => state,
            InboundState::Coordinates([x, y]) => PlayerState::new(x, y, 0, 0),
        }
    }
}

/// Point-in-time copy of every stored state, keyed by session id
///
/// Serializes as a flat JSON object. Keys are ordered so identical stores
/// produce identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldSnapshot(BTreeMap<SessionId, PlayerState>);

impl WorldSnapshot {
    /// Number of sessions in the snapshot
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the snapshot has no entries
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// State recorded for a session
    pub fn get(&self, session_id: &str) -> Option<&PlayerState> {
        self.0.get(session_id)
    }

    /// Iterate over session ids in order
    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.0.keys()
    }

    /// Serialize to the outbound wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Concurrency-safe map from session id to its last state record
#[derive(Debug, Default)]
pub struct PeerStateStore {
    states: RwLock<HashMap<SessionId, PlayerState>>,
}

impl PeerStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Last state recorded for a session
    pub fn get(&self, session_id: &str) -> Option<PlayerState> {
        self.states.read().get(session_id).copied()
    }

    /// Check if a session has an entry
    pub fn contains(&self, session_id: &str) -> bool {
        self.states.read().contains_key(session_id)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Copy the full store contents
    pub fn snapshot(&self) -> WorldSnapshot {
        let states = self.states.read();
        WorldSnapshot(
            states
                .iter()
                .map(|(id, state)| (id.clone(), *state))
                .collect(),
        )
    }

    pub(crate) fn insert(&self, session_id: &str, state: PlayerState) {
        trace!("Storing state for session {}: {:?}", session_id, state);
        self.states.write().insert(session_id.to_string(), state);
    }

    pub(crate) fn remove(&self, session_id: &str) -> Option<PlayerState> {
        self.states.write().remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_state() {
        let state =
            InboundState::decode(br#"{"position":[3,-4],"theta":90,"animation":2}"#).unwrap();
        assert_eq!(state, PlayerState::new(3, -4, 90, 2));
    }

    #[test]
    fn test_decode_coordinates() {
        let state = InboundState::decode(b"[7,8]").unwrap();
        assert_eq!(state, PlayerState::new(7, 8, 0, 0));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(InboundState::decode(b"hello").is_err());
        assert!(InboundState::decode(b"[1]").is_err());
        assert!(InboundState::decode(br#"{"theta":1}"#).is_err());
    }

    #[test]
    fn test_store_replaces_wholesale() {
        let store = PeerStateStore::new();
        store.insert("A", PlayerState::new(1, 1, 45, 3));
        store.insert("A", PlayerState::new(2, 2, 0, 0));

        assert_eq!(store.get("A"), Some(PlayerState::new(2, 2, 0, 0)));
        assert_eq!(store.len(), 1);

        assert!(store.remove("A").is_some());
        assert!(store.remove("A").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_wire_format() {
        let store = PeerStateStore::new();
        store.insert("B", PlayerState::new(5, 6, 0, 0));
        store.insert("A", PlayerState::new(1, 2, 90, 1));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.to_json().unwrap(),
            r#"{"A":{"position":[1,2],"theta":90,"animation":1},"B":{"position":[5,6],"theta":0,"animation":0}}"#
        );
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = PeerStateStore::new();
        store.insert("A", PlayerState::default());
        let snapshot = store.snapshot();
        store.remove("A");

        assert_eq!(snapshot.get("A"), Some(&PlayerState::default()));
        assert!(store.snapshot().is_empty());
        assert_eq!(store.snapshot().to_json().unwrap(), "{}");
    }
}
