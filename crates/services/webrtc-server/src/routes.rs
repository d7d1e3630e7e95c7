//! HTTP signaling routes
//!
//! `POST /offer`, `POST /answer` and `POST /ice` drive the handshake,
//! `GET /ws` relays the server's ICE candidates, and `GET /` serves the
//! frontend page.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use statecast_webrtc::{
    CandidateRequest, Error, OfferRequest, SessionDescription, SessionInfo, SignalingCoordinator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::relay;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub(crate) coordinator: SignalingCoordinator,
    index: Arc<IndexPage>,
}

impl AppState {
    pub fn new(coordinator: SignalingCoordinator, index: IndexPage) -> Self {
        Self {
            coordinator,
            index: Arc::new(index),
        }
    }
}

/// Frontend page with `{host}` and `{ws}` placeholders
#[derive(Debug, Clone)]
pub struct IndexPage {
    path: PathBuf,
    host: String,
    ws: String,
}

impl IndexPage {
    pub fn new(path: PathBuf, host: String, ws: String) -> Self {
        Self { path, host, ws }
    }

    /// Read the page and fill in the placeholders
    ///
    /// The file is read on every request so edits show up without a restart.
    pub async fn render(&self) -> std::io::Result<String> {
        let html = tokio::fs::read_to_string(&self.path).await?;
        Ok(html.replace("{host}", &self.host).replace("{ws}", &self.ws))
    }
}

/// Error response body for structured error responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type (e.g., "unknown_session", "invalid_transition", "internal")
    error_type: String,
    /// Human-readable error message
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error_type: &str, message: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error_type: error_type.to_string(),
            message,
        }),
    )
}

/// Map session engine errors to HTTP status codes and structured responses
fn map_error(e: Error) -> ApiError {
    let (status, error_type) = match &e {
        Error::InvalidChannelId(_) => (StatusCode::BAD_REQUEST, "invalid_channel_id"),
        Error::InvalidDescriptionType { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_description_type")
        }
        Error::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization"),
        Error::UnknownSession(_) => (StatusCode::NOT_FOUND, "unknown_session"),
        Error::DuplicateSession(_) => (StatusCode::CONFLICT, "duplicate_session"),
        Error::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        Error::SessionLimitExceeded(_) => (StatusCode::SERVICE_UNAVAILABLE, "session_limit"),
        e if e.is_transport_error() => (StatusCode::INTERNAL_SERVER_ERROR, "transport"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    if status.is_server_error() {
        warn!("Signaling request failed: {}", e);
    } else {
        debug!("Signaling request rejected: {}", e);
    }

    error_response(status, error_type, e.to_string())
}

/// Build the router with tracing and permissive CORS
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/sessions", get(sessions_handler))
        .route("/offer", post(offer_handler))
        .route("/answer", post(answer_handler))
        .route("/ice", post(ice_handler))
        .route("/ws", get(relay::ws_handler))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

/// GET / - Frontend page
async fn index_handler(State(state): State<AppState>) -> Response {
    match state.index.render().await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Failed to read {}: {}", state.index.path.display(), e);
            error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", state.index.path.display()),
            )
            .into_response()
        }
    }
}

/// GET /health - Liveness and session counts
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.coordinator.registry();
    Json(serde_json::json!({
        "status": "healthy",
        "version": statecast_webrtc::version(),
        "sessions": registry.len(),
        "open": registry.open_count(),
    }))
}

/// GET /sessions - Live sessions and their states
async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.coordinator.registry().sessions())
}

/// POST /offer - Start a session
///
/// `{channelId}` makes the server offer; `{type: "offer", sdp}` is a client
/// offer answered by the server.
async fn offer_handler(
    State(state): State<AppState>,
    Json(request): Json<OfferRequest>,
) -> std::result::Result<Json<SessionDescription>, ApiError> {
    let description = state.coordinator.negotiate(request).await.map_err(map_error)?;
    Ok(Json(description))
}

/// POST /answer - Apply the client's remote description
async fn answer_handler(
    State(state): State<AppState>,
    Json(description): Json<SessionDescription>,
) -> std::result::Result<Response, ApiError> {
    let coordinator = &state.coordinator;
    let session_id = coordinator
        .resolve(description.channel_id.as_deref())
        .map_err(map_error)?;

    match coordinator
        .apply_remote_description(&session_id, description)
        .await
        .map_err(map_error)?
    {
        Some(answer) => Ok(Json(answer).into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}

/// POST /ice - Relay a client ICE candidate
async fn ice_handler(
    State(state): State<AppState>,
    Json(request): Json<CandidateRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    let coordinator = &state.coordinator;
    let session_id = coordinator
        .resolve(request.channel_id.as_deref())
        .map_err(map_error)?;

    coordinator
        .add_remote_candidate(&session_id, request.candidate)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use statecast_webrtc::{
        Cardinality, IceCandidate, PeerTransport, Result, Role, TransportConnector,
        TransportEventSender, TransportEvents, WebRtcTransportConfig,
    };
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct StubTransport;

    #[async_trait]
    impl PeerTransport for StubTransport {
        async fn send(&self, _payload: Bytes) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<String> {
            Ok("v=0\r\no=server-offer\r\n".to_string())
        }
        async fn accept_offer(&self, sdp: String) -> Result<String> {
            if !sdp.starts_with("v=0") {
                return Err(Error::SdpError("malformed offer".to_string()));
            }
            Ok("v=0\r\no=server-answer\r\n".to_string())
        }
        async fn apply_answer(&self, _sdp: String) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Hands out stub transports and keeps their event senders alive
    #[derive(Default)]
    struct StubConnector {
        senders: Mutex<Vec<(String, TransportEventSender)>>,
    }

    #[async_trait]
    impl TransportConnector for StubConnector {
        async fn connect(
            &self,
            session_id: &str,
            _role: Role,
        ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.senders
                .lock()
                .unwrap()
                .push((session_id.to_string(), tx));
            Ok((Arc::new(StubTransport), rx))
        }
    }

    fn test_state(
        cardinality: Cardinality,
        index: PathBuf,
    ) -> (AppState, Arc<StubConnector>) {
        let config = WebRtcTransportConfig {
            cardinality,
            ..Default::default()
        };
        let connector = Arc::new(StubConnector::default());
        let coordinator = SignalingCoordinator::new(&config, connector.clone());
        let state = AppState::new(
            coordinator,
            IndexPage::new(index, "example.org:3001".to_string(), "wss://example.org/ws".to_string()),
        );
        (state, connector)
    }

    fn test_router(cardinality: Cardinality) -> (Router, AppState) {
        let (state, _connector) = test_state(cardinality, PathBuf::from("missing-index.html"));
        (router(state.clone()), state)
    }

    async fn post_json(router: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    async fn get_request(router: &Router, uri: &str) -> (StatusCode, Bytes) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn json(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_server_offer() {
        let (router, state) = test_router(Cardinality::Many);

        let (status, body) = post_json(&router, "/offer", serde_json::json!({"channelId": "A"})).await;
        assert_eq!(status, StatusCode::OK);

        let body = json(&body);
        assert_eq!(body["type"], "offer");
        assert_eq!(body["channelId"], "A");
        assert!(body["sdp"].as_str().unwrap().starts_with("v=0"));
        assert!(state.coordinator.registry().contains("A"));
    }

    #[tokio::test]
    async fn test_client_offer_gets_answer_with_generated_id() {
        let (router, state) = test_router(Cardinality::Many);

        let (status, body) = post_json(
            &router,
            "/offer",
            serde_json::json!({"type": "offer", "sdp": "v=0\r\n"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let body = json(&body);
        assert_eq!(body["type"], "answer");
        let id = body["channelId"].as_str().unwrap();
        assert!(!id.is_empty());
        assert!(state.coordinator.registry().contains(id));
    }

    #[tokio::test]
    async fn test_malformed_client_offer_is_cleaned_up() {
        let (router, state) = test_router(Cardinality::Many);

        let (status, body) = post_json(
            &router,
            "/offer",
            serde_json::json!({"channelId": "A", "type": "offer", "sdp": "garbage"}),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body)["error_type"], "transport");
        assert!(!state.coordinator.registry().contains("A"));
    }

    #[tokio::test]
    async fn test_answer_flow() {
        let (router, _state) = test_router(Cardinality::Many);
        post_json(&router, "/offer", serde_json::json!({"channelId": "A"})).await;

        let answer = serde_json::json!({"type": "answer", "sdp": "v=0\r\n", "channelId": "A"});
        let (status, _) = post_json(&router, "/answer", answer.clone()).await;
        assert_eq!(status, StatusCode::OK);

        // The handshake already moved past the answer
        let (status, body) = post_json(&router, "/answer", answer).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["error_type"], "invalid_transition");
    }

    #[tokio::test]
    async fn test_answer_with_wrong_type() {
        let (router, _state) = test_router(Cardinality::Many);
        post_json(&router, "/offer", serde_json::json!({"channelId": "A"})).await;

        let (status, body) = post_json(
            &router,
            "/answer",
            serde_json::json!({"type": "offer", "sdp": "v=0\r\n", "channelId": "A"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error_type"], "invalid_description_type");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (router, _state) = test_router(Cardinality::Many);

        let (status, body) = post_json(
            &router,
            "/answer",
            serde_json::json!({"type": "answer", "sdp": "v=0\r\n", "channelId": "ghost"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error_type"], "unknown_session");

        let (status, _) = post_json(
            &router,
            "/ice",
            serde_json::json!({"channelId": "ghost", "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_candidate_requires_channel_id_in_many_mode() {
        let (router, _state) = test_router(Cardinality::Many);

        let (status, body) = post_json(
            &router,
            "/ice",
            serde_json::json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error_type"], "invalid_channel_id");
    }

    #[tokio::test]
    async fn test_single_mode_addresses_latest_session() {
        let (router, _state) = test_router(Cardinality::Single);
        post_json(&router, "/offer", serde_json::json!({"channelId": "A"})).await;

        let (status, _) = post_json(
            &router,
            "/ice",
            serde_json::json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host", "sdpMid": null}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = post_json(
            &router,
            "/answer",
            serde_json::json!({"type": "answer", "sdp": "v=0\r\n"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_on_signaling_route_is_rejected() {
        let (router, _state) = test_router(Cardinality::Many);

        let (status, _) = get_request(&router, "/offer").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_health_and_sessions() {
        let (router, _state) = test_router(Cardinality::Many);
        post_json(&router, "/offer", serde_json::json!({"channelId": "A"})).await;

        let (status, body) = get_request(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["open"], 0);

        let (status, body) = get_request(&router, "/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body[0]["id"], "A");
        assert_eq!(body[0]["role"], "server_offers");
        assert_eq!(body[0]["lifecycle"], "negotiating");
    }

    #[tokio::test]
    async fn test_index_page() {
        let path = std::env::temp_dir().join(format!("statecast-index-{}.html", std::process::id()));
        std::fs::write(&path, "<a href=\"http://{host}/\">{host}</a><script>new WebSocket(\"{ws}\")</script>")
            .unwrap();

        let (state, _connector) = test_state(Cardinality::Many, path.clone());
        let router = router(state);
        let (status, body) = get_request(&router, "/").await;
        std::fs::remove_file(&path).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            "<a href=\"http://example.org:3001/\">example.org:3001</a><script>new WebSocket(\"wss://example.org/ws\")</script>"
        );
    }

    #[tokio::test]
    async fn test_missing_index_page() {
        let (router, _state) = test_router(Cardinality::Many);

        let (status, body) = get_request(&router, "/").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error_type"], "not_found");
    }
}
