//! Authoritative map of streaming ids to CLI session ids.
//!
//! A session is `ongoing` iff a live streaming id is registered for it;
//! everything else is `completed`. Register/unregister emit typed events on
//! a broadcast channel so listing caches can invalidate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::types::SessionStatus;

// ─── Types ────────────────────────────────────────────────────────────────

/// What the server knew about a conversation at spawn time.
///
/// Used to synthesize an optimistic conversation view for a fresh session
/// whose log entry the CLI has not flushed yet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub initial_prompt: String,
    pub working_directory: String,
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum StatusEvent {
    Registered {
        streaming_id: String,
        session_id: String,
    },
    Unregistered {
        streaming_id: String,
        session_id: Option<String>,
    },
}

#[derive(Default)]
struct TrackerState {
    session_by_stream: HashMap<String, String>,
    stream_by_session: HashMap<String, String>,
    contexts: HashMap<String, SessionContext>,
}

// ─── Tracker ──────────────────────────────────────────────────────────────

pub struct StatusTracker {
    state: Mutex<TrackerState>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(TrackerState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Record the pairing once the child's init record reveals its session
    /// id. The session becomes `ongoing` until [`unregister`] is called.
    pub fn register(&self, streaming_id: &str, session_id: &str, context: SessionContext) {
        {
            let mut state = self.state.lock().unwrap();
            state
                .session_by_stream
                .insert(streaming_id.to_owned(), session_id.to_owned());
            state
                .stream_by_session
                .insert(session_id.to_owned(), streaming_id.to_owned());
            state.contexts.insert(streaming_id.to_owned(), context);
        }
        let _ = self.events.send(StatusEvent::Registered {
            streaming_id: streaming_id.to_owned(),
            session_id: session_id.to_owned(),
        });
    }

    /// Drop the live mapping for `streaming_id`; its session becomes
    /// `completed`. The stream→session memory is kept so late lookups of
    /// `get_session_id` still resolve.
    pub fn unregister(&self, streaming_id: &str) {
        let session_id = {
            let mut state = self.state.lock().unwrap();
            state.contexts.remove(streaming_id);
            let session_id = state.session_by_stream.get(streaming_id).cloned();
            if let Some(sid) = &session_id {
                // Only clear the ongoing entry if it still points at us; a
                // resume may already have claimed the session id.
                if state.stream_by_session.get(sid).map(String::as_str) == Some(streaming_id) {
                    state.stream_by_session.remove(sid);
                }
            }
            session_id
        };
        let _ = self.events.send(StatusEvent::Unregistered {
            streaming_id: streaming_id.to_owned(),
            session_id,
        });
    }

    pub fn get_status(&self, session_id: &str) -> SessionStatus {
        let state = self.state.lock().unwrap();
        if state.stream_by_session.contains_key(session_id) {
            SessionStatus::Ongoing
        } else {
            SessionStatus::Completed
        }
    }

    /// The live streaming id for an ongoing session, if any.
    pub fn get_streaming_id(&self, session_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .stream_by_session
            .get(session_id)
            .cloned()
    }

    pub fn get_session_id(&self, streaming_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .session_by_stream
            .get(streaming_id)
            .cloned()
    }

    pub fn get_context(&self, streaming_id: &str) -> Option<SessionContext> {
        self.state
            .lock()
            .unwrap()
            .contexts
            .get(streaming_id)
            .cloned()
    }

    /// All currently ongoing `(session_id, streaming_id)` pairs.
    pub fn list_ongoing(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .stream_by_session
            .iter()
            .map(|(s, st)| (s.clone(), st.clone()))
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
