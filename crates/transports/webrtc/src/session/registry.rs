//! Registry of live sessions
//!
//! Mutations take the registry write lock and, when they touch state
//! entries, the store lock inside it. Lock order is always registry then
//! store. No lock is held across an `.await`: callers copy transport
//! handles out and send after the guard is dropped.

use super::session::{NegotiationState, Role, Session, SessionId, SessionInfo, SessionLifecycle};
use crate::state::{PeerStateStore, PlayerState, WorldSnapshot};
use crate::transport::PeerTransport;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`SessionRegistry::create`]
#[derive(Debug)]
pub struct Created {
    /// The newly registered session
    pub session: Session,
    /// A stale, never-opened session that held the same id
    ///
    /// The caller is responsible for closing its transport.
    pub evicted: Option<Evicted>,
}

/// A session taken out of the registry to make room for another
#[derive(Debug)]
pub struct Evicted {
    /// The removed session, already marked closed
    pub session: Session,
    /// Whether it was open, and so present in the world snapshot
    pub was_open: bool,
}

/// Consistent view of the open sessions for one broadcast
pub struct OpenView {
    /// Store contents
    pub snapshot: WorldSnapshot,
    /// Transport handle of every open session
    pub transports: Vec<(SessionId, Arc<dyn PeerTransport>)>,
}

impl OpenView {
    /// Run `f` for every handle in the view, concurrently
    pub async fn for_each<F, Fut>(self, f: F) -> Vec<Fut::Output>
    where
        F: Fn(SessionId, Arc<dyn PeerTransport>) -> Fut,
        Fut: Future,
    {
        futures::future::join_all(self.transports.into_iter().map(|(id, t)| f(id, t))).await
    }
}

/// Owns every live session and the state store
pub struct SessionRegistry {
    /// Live sessions by id
    sessions: RwLock<HashMap<SessionId, Session>>,

    /// Last known state of each open session
    store: Arc<PeerStateStore>,

    /// Source of session generations
    next_generation: AtomicU64,

    /// Maximum number of concurrent sessions (0 = unlimited)
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry with an empty store
    ///
    /// # Arguments
    ///
    /// * `max_sessions` - Maximum number of concurrent sessions (0 = unlimited)
    pub fn new(max_sessions: usize) -> Self {
        info!("Creating session registry (max_sessions: {})", max_sessions);

        Self {
            sessions: RwLock::new(HashMap::new()),
            store: Arc::new(PeerStateStore::new()),
            next_generation: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// The state store this registry keeps in step with its open sessions
    pub fn store(&self) -> &Arc<PeerStateStore> {
        &self.store
    }

    /// Register a new session in `Created`
    ///
    /// # Arguments
    ///
    /// * `session_id` - Unique identifier for the session
    /// * `role` - Which side sends the offer
    ///
    /// # Errors
    ///
    /// * `DuplicateSession` if an open session already holds `session_id`
    /// * `SessionLimitExceeded` if the registry is full
    pub fn create(&self, session_id: &str, role: Role) -> Result<Created> {
        let mut sessions = self.sessions.write();

        let stale = match sessions.get(session_id) {
            Some(existing) if existing.is_open() => {
                return Err(Error::DuplicateSession(session_id.to_string()));
            }
            Some(_) => true,
            None => false,
        };

        let live = sessions.len() - usize::from(stale);
        if self.max_sessions > 0 && live >= self.max_sessions {
            return Err(Error::SessionLimitExceeded(self.max_sessions));
        }

        let evicted = sessions.remove(session_id).map(|mut session| {
            warn!(
                "Evicting stale session {} ({}) for new registration",
                session_id, session.lifecycle
            );
            let was_open = session.retire();
            Evicted { session, was_open }
        });

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(session_id.to_string(), generation, role);
        sessions.insert(session_id.to_string(), session.clone());

        info!(
            "Created session {} (role: {}, generation: {})",
            session_id, role, generation
        );

        Ok(Created { session, evicted })
    }

    /// Bind a transport handle to a session: `Created -> Negotiating`
    pub fn attach_transport(&self, session_id: &str, handle: Arc<dyn PeerTransport>) -> Result<()> {
        self.attach_locked(session_id, None, handle)
    }

    /// Like [`attach_transport`](Self::attach_transport), but only for the
    /// given generation
    pub fn attach_transport_generation(
        &self,
        session_id: &str,
        generation: u64,
        handle: Arc<dyn PeerTransport>,
    ) -> Result<()> {
        self.attach_locked(session_id, Some(generation), handle)
    }

    fn attach_locked(
        &self,
        session_id: &str,
        generation: Option<u64>,
        handle: Arc<dyn PeerTransport>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .filter(|s| generation.map_or(true, |g| s.generation == g))
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

        if session.lifecycle != SessionLifecycle::Created {
            return Err(Error::InvalidTransition {
                session_id: session_id.to_string(),
                from: session.lifecycle.to_string(),
                to: SessionLifecycle::Negotiating.to_string(),
            });
        }

        session.transport = Some(handle);
        session.lifecycle = SessionLifecycle::Negotiating;
        debug!("Attached transport to session {}", session_id);

        Ok(())
    }

    /// Mark a session's channel usable: `Negotiating -> Open`
    ///
    /// The session gets a default state entry in the store in the same
    /// critical section.
    pub fn mark_open(&self, session_id: &str) -> Result<Session> {
        self.open_locked(session_id, None)
    }

    /// Like [`mark_open`](Self::mark_open), but only for the given generation
    ///
    /// Used by transport callbacks, which may outlive the session they were
    /// created for.
    pub fn mark_open_generation(&self, session_id: &str, generation: u64) -> Result<Session> {
        self.open_locked(session_id, Some(generation))
    }

    fn open_locked(&self, session_id: &str, generation: Option<u64>) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .filter(|s| generation.map_or(true, |g| s.generation == g))
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;

        if session.lifecycle != SessionLifecycle::Negotiating {
            return Err(Error::InvalidTransition {
                session_id: session_id.to_string(),
                from: session.lifecycle.to_string(),
                to: SessionLifecycle::Open.to_string(),
            });
        }

        session.lifecycle = SessionLifecycle::Open;
        if !session.negotiation.is_terminal() {
            session.negotiation = NegotiationState::Open;
        }
        self.store.insert(session_id, PlayerState::default());

        info!("Session {} is open", session_id);
        Ok(session.clone())
    }

    /// Remove a session and its state entry
    ///
    /// Idempotent: returns `None` if the session is already gone.
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.remove_locked(session_id, None)
    }

    /// Remove a session only if it is still the given generation
    pub fn remove_generation(&self, session_id: &str, generation: u64) -> Option<Session> {
        self.remove_locked(session_id, Some(generation))
    }

    fn remove_locked(&self, session_id: &str, generation: Option<u64>) -> Option<Session> {
        let mut sessions = self.sessions.write();

        if let Some(expected) = generation {
            match sessions.get(session_id) {
                Some(s) if s.generation == expected => {}
                _ => return None,
            }
        }

        let mut session = sessions.remove(session_id)?;
        self.store.remove(session_id);
        session.retire();

        info!("Removed session {}", session_id);
        Some(session)
    }

    /// Remove every session except `keep`
    ///
    /// Returns the removed sessions so their transports can be closed.
    pub fn retain_only(&self, keep: &str) -> Vec<Evicted> {
        let mut sessions = self.sessions.write();
        let doomed: Vec<SessionId> = sessions
            .keys()
            .filter(|id| id.as_str() != keep)
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|id| {
                let mut session = sessions.remove(&id)?;
                self.store.remove(&id);
                let was_open = session.retire();
                info!("Evicted session {}", id);
                Some(Evicted { session, was_open })
            })
            .collect()
    }

    /// Replace the stored state of an open session
    ///
    /// # Errors
    ///
    /// `UnknownSession` if the session is not registered or not open.
    pub fn store_state(&self, session_id: &str, state: PlayerState) -> Result<()> {
        // Read lock keeps removal out while the store is written
        let sessions = self.sessions.read();
        match sessions.get(session_id) {
            Some(session) if session.is_open() => {
                self.store.insert(session_id, state);
                Ok(())
            }
            _ => Err(Error::UnknownSession(session_id.to_string())),
        }
    }

    /// Run `f` against a session under the write lock
    pub(crate) fn with_session_mut<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<R> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        f(session)
    }

    /// Store snapshot and open transport handles, taken under one read lock
    ///
    /// No session removed before this call appears in either half.
    pub fn open_view(&self) -> OpenView {
        let sessions = self.sessions.read();
        OpenView {
            snapshot: self.store.snapshot(),
            transports: Self::collect_open(&sessions),
        }
    }

    fn collect_open(
        sessions: &HashMap<SessionId, Session>,
    ) -> Vec<(SessionId, Arc<dyn PeerTransport>)> {
        sessions
            .values()
            .filter(|s| s.is_open())
            .filter_map(|s| s.transport.clone().map(|t| (s.id.clone(), t)))
            .collect()
    }

    /// Get a copy of a session
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Check if a session is registered
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Number of open sessions
    pub fn open_count(&self) -> usize {
        self.sessions.read().values().filter(|s| s.is_open()).count()
    }

    /// Most recently created session
    pub fn latest(&self) -> Option<Session> {
        self.sessions
            .read()
            .values()
            .max_by_key(|s| s.generation)
            .cloned()
    }

    /// Summaries of every registered session, ordered by id
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.read().values().map(Session::info).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
