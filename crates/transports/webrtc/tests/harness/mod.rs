//! Test harness for the session engine
//!
//! Scripted transports stand in for webrtc-rs so the lifecycle, the
//! handshake and the broadcast path can be driven deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use statecast_webrtc::{
    Cardinality, Error, IceCandidate, PeerTransport, Result, Role, SessionId, SessionRegistry,
    SignalingCoordinator, SignalingEvent, TransportConnector, TransportEvent,
    TransportEventSender, TransportEvents, WebRtcTransportConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Upper bound for waiting on asynchronous event handling
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Initialize tracing for tests (safe to call repeatedly)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,statecast_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Transport that records what it is sent
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Bytes>>,
    candidates: Mutex<Vec<IceCandidate>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    /// Transport whose every send succeeds
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose every send fails
    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_sends.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Make subsequent sends fail or succeed
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    /// Number of payloads delivered
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Last delivered payload, parsed as JSON
    pub fn last_snapshot(&self) -> Option<serde_json::Value> {
        self.sent
            .lock()
            .last()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Remote candidates handed to this transport
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    /// Check if the transport was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn send(&self, payload: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::DataChannelError("injected send failure".to_string()));
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        Ok("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=offer\r\n".to_string())
    }

    async fn accept_offer(&self, sdp: String) -> Result<String> {
        if !sdp.starts_with("v=0") {
            return Err(Error::SdpError("Failed to parse offer".to_string()));
        }
        Ok("v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\ns=answer\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        if !sdp.starts_with("v=0") {
            return Err(Error::SdpError("Failed to parse answer".to_string()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that hands out [`MockTransport`]s and keeps their event senders
#[derive(Default)]
pub struct MockConnector {
    peers: Mutex<HashMap<SessionId, (Arc<MockTransport>, TransportEventSender)>>,
}

impl MockConnector {
    /// Most recent transport created for a session
    pub fn transport(&self, session_id: &str) -> Arc<MockTransport> {
        let peers = self.peers.lock();
        let (transport, _) = peers
            .get(session_id)
            .unwrap_or_else(|| panic!("no transport for {}", session_id));
        Arc::clone(transport)
    }

    /// Deliver a transport event to a session
    pub fn emit(&self, session_id: &str, event: TransportEvent) {
        let peers = self.peers.lock();
        let (_, tx) = peers
            .get(session_id)
            .unwrap_or_else(|| panic!("no transport for {}", session_id));
        let _ = tx.send(event);
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        session_id: &str,
        _role: Role,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport::healthy();
        self.peers
            .lock()
            .insert(session_id.to_string(), (Arc::clone(&transport), tx));
        Ok((transport, rx))
    }
}

/// Coordinator over mock transports
pub struct TestHarness {
    pub coordinator: SignalingCoordinator,
    pub connector: Arc<MockConnector>,
    pub events: broadcast::Receiver<SignalingEvent>,
}

impl TestHarness {
    /// Create a harness with the given cardinality
    pub fn new(cardinality: Cardinality) -> Self {
        init_test_tracing();
        let config = WebRtcTransportConfig {
            cardinality,
            ..Default::default()
        };
        let connector = Arc::new(MockConnector::default());
        let coordinator = SignalingCoordinator::new(&config, connector.clone());
        let events = coordinator.subscribe();

        Self {
            coordinator,
            connector,
            events,
        }
    }

    /// Registry behind the coordinator
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.coordinator.registry()
    }

    /// Negotiate a server-offers session and report its channel open
    pub async fn open_session(&mut self, session_id: &str) -> Arc<MockTransport> {
        self.coordinator
            .begin_session(session_id, Role::ServerOffers)
            .await
            .expect("begin_session")
            .expect("server offer");
        self.coordinator
            .apply_remote_description(
                session_id,
                statecast_webrtc::SessionDescription::answer("v=0\r\n"),
            )
            .await
            .expect("apply answer");

        self.connector.emit(session_id, TransportEvent::Opened);
        self.wait_for_event(|e| {
            matches!(e, SignalingEvent::SessionOpened { session_id: id } if id == session_id)
        })
        .await;

        self.connector.transport(session_id)
    }

    /// Wait for a signaling event matching `predicate`
    pub async fn wait_for_event<F>(&mut self, predicate: F) -> SignalingEvent
    where
        F: Fn(&SignalingEvent) -> bool,
    {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        panic!("signaling event channel closed")
                    }
                }
            }
        })
        .await
        .expect("timed out waiting for signaling event")
    }
}

/// Poll `condition` until it holds or the timeout passes
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Register a session directly and mark it open with the given transport
pub fn open_in_registry(registry: &SessionRegistry, session_id: &str, transport: Arc<MockTransport>) {
    registry
        .create(session_id, Role::ClientOffers)
        .expect("create");
    registry
        .attach_transport(session_id, transport)
        .expect("attach");
    registry.mark_open(session_id).expect("open");
}
