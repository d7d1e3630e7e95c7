//! WebSocket relay of server ICE candidates
//!
//! A client connecting with `?channelId=..` receives that session's
//! candidates as bare `{candidate, sdpMid, sdpMLineIndex}` records. Without a
//! channel id every candidate is relayed, tagged with its `channelId`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use statecast_webrtc::{RelayedCandidate, SessionId, SignalingEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::routes::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    #[serde(rename = "channelId")]
    channel_id: Option<SessionId>,
}

/// GET /ws - Stream server candidates
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RelayQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Subscribe before the upgrade so candidates gathered meanwhile are kept
    let events = state.coordinator.subscribe();
    let filter = query.channel_id.filter(|id| !id.trim().is_empty());
    ws.on_upgrade(move |socket| relay_candidates(socket, events, filter))
}

async fn relay_candidates(
    socket: WebSocket,
    mut events: broadcast::Receiver<SignalingEvent>,
    filter: Option<SessionId>,
) {
    info!("Candidate relay connected (channel: {:?})", filter);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(text) = candidate_message(&event, filter.as_deref()) else {
                        continue;
                    };
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        debug!("Candidate relay send failed: {}", e);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Candidate relay lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("Candidate relay receive failed: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Candidate relay disconnected (channel: {:?})", filter);
}

/// Render a signaling event for a relay client
///
/// Returns `None` for events the client does not receive.
fn candidate_message(event: &SignalingEvent, filter: Option<&str>) -> Option<String> {
    let SignalingEvent::LocalCandidate {
        session_id,
        candidate,
    } = event
    else {
        return None;
    };

    let encoded = match filter {
        Some(id) if id == session_id => serde_json::to_string(candidate),
        Some(_) => return None,
        None => serde_json::to_string(&RelayedCandidate {
            channel_id: session_id.clone(),
            candidate: candidate.clone(),
        }),
    };

    match encoded {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode candidate for {}: {}", session_id, e);
            None
        }
    }
}
