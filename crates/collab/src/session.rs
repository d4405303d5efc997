//! Session lifecycle for one workbook.
//!
//! A session is created connected at the current version. Disconnecting
//! freezes its last-synced version; reconnecting catches it up from there and
//! marks it connected at the new current version. `leave` forgets it.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use cogrid_engine::SessionId;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    /// Highest version this session is known to have applied.
    pub last_synced: u64,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Events were dropped for this session since its last resync.
    pub lagging: bool,
}

impl SessionInfo {
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: FxHashMap<SessionId, SessionInfo>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, session: SessionId) -> Option<&SessionInfo> {
        self.sessions.get(&session)
    }

    /// Create a connected session synced at `version`.
    pub fn connect(&mut self, version: u64) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                state: SessionState::Connected,
                last_synced: version,
                connected_at: Utc::now(),
                disconnected_at: None,
                lagging: false,
            },
        );
        log::info!("session {} connected at version {}", id, version);
        id
    }

    /// The session, which must be connected.
    pub fn require_connected(&self, session: SessionId) -> Result<&SessionInfo, SessionError> {
        let info = self.sessions.get(&session).ok_or(SessionError::Unknown(session))?;
        if !info.is_connected() {
            return Err(SessionError::Disconnected(session));
        }
        Ok(info)
    }

    /// Record that `session` applied everything up to `version`.
    /// Never moves last-synced backwards. Returns the new last-synced version.
    pub fn ack(&mut self, session: SessionId, version: u64, current: u64) -> Result<u64, SessionError> {
        if version > current {
            return Err(SessionError::AckAhead { acked: version, current });
        }
        self.require_connected(session)?;
        let info = self.get_mut(session)?;
        info.last_synced = info.last_synced.max(version);
        Ok(info.last_synced)
    }

    /// The origin of an accepted operation has seen `version` if it was
    /// already synced to the version before it.
    pub fn advance_origin(&mut self, session: SessionId, version: u64) {
        if let Some(info) = self.sessions.get_mut(&session) {
            if info.last_synced + 1 == version {
                info.last_synced = version;
            }
        }
    }

    /// Mark disconnected and return the frozen last-synced version.
    pub fn disconnect(&mut self, session: SessionId) -> Result<u64, SessionError> {
        let info = self.get_mut(session)?;
        if info.is_connected() {
            info.state = SessionState::Disconnected;
            info.disconnected_at = Some(Utc::now());
            log::info!("session {} disconnected at version {}", session, info.last_synced);
        }
        Ok(info.last_synced)
    }

    /// Version a reconnecting session catches up from: the client's own
    /// claim if given, else the version frozen at disconnect.
    pub fn resync_base(&self, session: SessionId, last_known: Option<u64>) -> Result<u64, SessionError> {
        let info = self.sessions.get(&session).ok_or(SessionError::Unknown(session))?;
        Ok(last_known.unwrap_or(info.last_synced))
    }

    /// Mark connected and synced at `version` after a resync.
    pub fn mark_resynced(&mut self, session: SessionId, version: u64) -> Result<(), SessionError> {
        let info = self.get_mut(session)?;
        info.state = SessionState::Connected;
        info.last_synced = version;
        info.disconnected_at = None;
        info.lagging = false;
        Ok(())
    }

    pub fn set_lagging(&mut self, session: SessionId, lagging: bool) {
        if let Some(info) = self.sessions.get_mut(&session) {
            info.lagging = lagging;
        }
    }

    /// Forget the session.
    pub fn leave(&mut self, session: SessionId) -> Result<SessionInfo, SessionError> {
        let info = self.sessions.remove(&session).ok_or(SessionError::Unknown(session))?;
        log::info!("session {} left", session);
        Ok(info)
    }

    /// All sessions, oldest connection first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    pub fn connected(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.values().filter(|s| s.is_connected()).map(|s| s.id)
    }

    fn get_mut(&mut self, session: SessionId) -> Result<&mut SessionInfo, SessionError> {
        self.sessions.get_mut(&session).ok_or(SessionError::Unknown(session))
    }
}
