//! Session Management
//!
//! Per-conversation streaming state and the process-wide registry that lets
//! unrelated request cycles (resume, terminate) rediscover it by id.
//!
//! # Design Philosophy
//!
//! A session exists exactly while a producer is streaming a conversation.
//! The producer is the only writer of the latest snapshot; resumers only
//! read it. Each [`Session`] owns its lock, so the [`SessionStore`] only
//! serializes create/delete of entries and two conversations never contend.
//!
//! # Resume Signal
//!
//! The resume signal is a `watch` channel carrying the emission counter. The
//! first resumer creates it, later resumers subscribe to the same sender
//! (fan-out). Publishing never waits on a receiver; a resumer that was busy
//! simply observes the latest counter once and re-diffs against its own
//! baseline. Closing drops the sender, which every receiver observes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{StreamError, StreamResult};
use crate::value::empty_baseline;

/// Unique conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Create a conversation ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique conversation ID
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conv_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug)]
struct SessionState {
    latest_snapshot: Value,
    resume_signal: Option<watch::Sender<u64>>,
    signal_closed: bool,
    is_resuming: bool,
    emissions: u64,
}

/// What a resumer gets when it attaches
#[derive(Debug)]
pub struct ResumeAttachment {
    /// Snapshot at the instant of attaching; the catch-up baseline
    pub snapshot: Value,
    /// Follow-on notifications, or `None` if the producer already closed
    /// the signal
    pub signal: Option<watch::Receiver<u64>>,
}

/// Streaming state of one conversation
#[derive(Debug)]
pub struct Session {
    id: ConversationId,
    started_at: DateTime<Utc>,
    state: RwLock<SessionState>,
}

impl Session {
    /// Create a session whose snapshot is the empty baseline
    #[must_use]
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            state: RwLock::new(SessionState {
                latest_snapshot: empty_baseline(),
                resume_signal: None,
                signal_closed: false,
                is_resuming: false,
                emissions: 0,
            }),
        }
    }

    /// Conversation this session belongs to
    #[must_use]
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// When the producer started
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Clone of the last snapshot the producer emitted
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.state.read().latest_snapshot.clone()
    }

    /// Number of snapshots published so far
    #[must_use]
    pub fn emissions(&self) -> u64 {
        self.state.read().emissions
    }

    /// Whether any resumer has attached
    #[must_use]
    pub fn is_resuming(&self) -> bool {
        self.state.read().is_resuming
    }

    /// Whether the resume signal has been closed
    #[must_use]
    pub fn is_signal_closed(&self) -> bool {
        self.state.read().signal_closed
    }

    /// Replace the latest snapshot and notify attached resumers
    ///
    /// Returns the previous snapshot, which is the diff baseline for the
    /// producer's own output. Never blocks on resumers.
    pub fn publish(&self, snapshot: Value) -> Value {
        let mut state = self.state.write();
        let previous = std::mem::replace(&mut state.latest_snapshot, snapshot);
        state.emissions += 1;
        let emissions = state.emissions;
        if let Some(signal) = &state.resume_signal {
            signal.send_replace(emissions);
        }
        previous
    }

    /// Attach a resumer, creating the signal if this is the first one
    ///
    /// The snapshot and the subscription are taken under one lock, so every
    /// publish after the returned snapshot is observed by the receiver.
    pub fn attach_resumer(&self) -> ResumeAttachment {
        let mut state = self.state.write();
        state.is_resuming = true;
        let signal = if state.signal_closed {
            None
        } else {
            let emissions = state.emissions;
            let sender = state
                .resume_signal
                .get_or_insert_with(|| watch::channel(emissions).0);
            Some(sender.subscribe())
        };
        ResumeAttachment {
            snapshot: state.latest_snapshot.clone(),
            signal,
        }
    }

    /// Close the resume signal; later calls are no-ops
    pub fn close_signal(&self) {
        let mut state = self.state.write();
        state.signal_closed = true;
        if state.resume_signal.take().is_some() {
            tracing::debug!(conversation_id = %self.id, "Resume signal closed");
        }
    }
}

/// Process-wide registry of live sessions
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<ConversationId, Arc<Session>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session for a conversation
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionAlreadyActive`] if a producer already
    /// owns the conversation.
    pub fn create(&self, id: &ConversationId) -> StreamResult<Arc<Session>> {
        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(StreamError::SessionAlreadyActive(id.clone())),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(id.clone()));
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Look up a live session
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the entry only if it is still this exact session
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Whether a session exists for the conversation
    #[must_use]
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of all live sessions
    #[must_use]
    pub fn ids(&self) -> Vec<ConversationId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}
