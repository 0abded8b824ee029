//! Cooperative Cancellation
//!
//! A [`CancellationToken`] is created with each session and closed at most
//! once, either by a terminate request or by the producer's own cleanup.
//! The [`StopRegistry`] maps conversation ids to live tokens so a terminate
//! request arriving on another request cycle can find the right one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken as Notify;

use crate::error::{StreamError, StreamResult};
use crate::session::ConversationId;

/// Token state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// Not yet closed
    Open,
    /// Closed; never reopens
    Closed,
}

/// One-shot stop signal with an idempotent close
#[derive(Debug, Default)]
pub struct CancellationToken {
    closed: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create an open token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TokenState {
        if self.closed.load(Ordering::Acquire) {
            TokenState::Closed
        } else {
            TokenState::Open
        }
    }

    /// Whether the token has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == TokenState::Closed
    }

    /// Close the token, waking every waiter
    ///
    /// Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.notify.cancel();
        true
    }

    /// Wait until the token is closed
    ///
    /// Completes immediately if it already is.
    pub async fn closed(&self) {
        self.notify.cancelled().await;
    }
}

/// Process-wide registry of live stop tokens
#[derive(Debug, Default)]
pub struct StopRegistry {
    tokens: DashMap<ConversationId, Arc<CancellationToken>>,
}

impl StopRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for a conversation
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionAlreadyActive`] if a token is already
    /// registered.
    pub fn register(&self, id: &ConversationId) -> StreamResult<Arc<CancellationToken>> {
        match self.tokens.entry(id.clone()) {
            Entry::Occupied(_) => Err(StreamError::SessionAlreadyActive(id.clone())),
            Entry::Vacant(entry) => {
                let token = Arc::new(CancellationToken::new());
                entry.insert(Arc::clone(&token));
                Ok(token)
            }
        }
    }

    /// Close and unregister the token for a conversation
    ///
    /// The entry is removed before closing, so of several concurrent
    /// callers exactly one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] if no token is registered.
    pub fn terminate(&self, id: &ConversationId) -> StreamResult<()> {
        let (_, token) = self
            .tokens
            .remove(id)
            .ok_or_else(|| StreamError::SessionNotFound(id.clone()))?;
        token.close();
        Ok(())
    }

    /// Close this token and drop its entry if the entry is still this token
    pub fn release(&self, id: &ConversationId, token: &Arc<CancellationToken>) {
        token.close();
        self.tokens.remove_if(id, |_, current| Arc::ptr_eq(current, token));
    }

    /// Whether a token is registered for the conversation
    #[must_use]
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.tokens.contains_key(id)
    }

    /// Number of registered tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
