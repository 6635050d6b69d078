//! Active session registry
//!
//! Sessions are created and expired by the session lifecycle layer. The
//! authorization chain only reads a snapshot through [`SessionSource`].

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;
use uuid::Uuid;

/// An authenticated session as seen by the authorization chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier
    pub session_id: String,

    /// Remote address the session was last seen from (normalized text)
    pub remote_endpoint: String,

    /// User the session belongs to
    pub user_id: Option<Uuid>,

    /// Last time the session made a request
    pub last_activity: SystemTime,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        remote_endpoint: impl Into<String>,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            remote_endpoint: remote_endpoint.into(),
            user_id,
            last_activity: SystemTime::now(),
        }
    }
}

/// Read-only view of the currently active sessions
pub trait SessionSource: Send + Sync {
    /// Snapshot of the active sessions
    fn active_sessions(&self) -> Vec<SessionRecord>;
}

/// In-memory session registry
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session
    pub fn upsert(&self, record: SessionRecord) {
        self.sessions
            .write()
            .insert(record.session_id.clone(), record);
    }

    /// Record activity from `remote_endpoint` on an existing session
    ///
    /// Returns `false` if the session is unknown.
    pub fn touch(&self, session_id: &str, remote_endpoint: &str) -> bool {
        match self.sessions.write().get_mut(session_id) {
            Some(record) => {
                record.remote_endpoint = remote_endpoint.to_string();
                record.last_activity = SystemTime::now();
                true
            }
            None => false,
        }
    }

    /// Remove a session
    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.write().remove(session_id)
    }

    /// Get the number of active sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl SessionSource for SessionRegistry {
    fn active_sessions(&self) -> Vec<SessionRecord> {
        self.sessions.read().values().cloned().collect()
    }
}
