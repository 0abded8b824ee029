//! Streaming Orchestration
//!
//! The three loops that move a conversation's answer from the upstream
//! executor to clients.
//!
//! # Architecture
//!
//! ```text
//!   AgentExecutor ──messages/errors──► ChatOrchestrator ──frames──► client
//!                                          │   ▲
//!                             publish +    │   │ closed()
//!                             notify       ▼   │
//!                                       Session   CancellationToken
//!                                          │           ▲
//!                              watch       ▼           │ close()
//!                                   ResumeOrchestrator  terminate()
//!                                          │
//!                                          └──frames──► late client(s)
//! ```
//!
//! - [`ChatOrchestrator`] is the single producer per conversation. It owns
//!   the session and stop token for its whole lifetime and deletes both on
//!   exit.
//! - [`ResumeOrchestrator`] is an independent consumer: catch-up diff from
//!   the empty baseline, then one diff per notification, then `end`.
//! - [`terminate`] closes the stop token exactly once.
//!
//! Every exit path of an incremental producer, and every resumer, ends its
//! output with exactly one `end` event.

mod chat;
mod resume;
mod terminate;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub use chat::ChatOrchestrator;
pub use resume::ResumeOrchestrator;
pub use terminate::terminate;

use crate::cancel::{CancellationToken, StopRegistry};
use crate::config::StreamConfig;
use crate::session::{Session, SessionStore};
use crate::upstream::{AfterProcessor, StopHandler};

/// State shared by every producer of one engine
pub(crate) struct StreamContext {
    pub(crate) config: StreamConfig,
    pub(crate) sessions: SessionStore,
    pub(crate) stops: StopRegistry,
    pub(crate) processor: Arc<dyn AfterProcessor>,
    pub(crate) stop_handler: Arc<dyn StopHandler>,
    pub(crate) live_streams: AtomicUsize,
}

impl StreamContext {
    pub(crate) fn new(
        config: StreamConfig,
        processor: Arc<dyn AfterProcessor>,
        stop_handler: Arc<dyn StopHandler>,
    ) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            stops: StopRegistry::new(),
            processor,
            stop_handler,
            live_streams: AtomicUsize::new(0),
        }
    }

    /// Take one of the `max_concurrent_streams` slots, if any is free
    pub(crate) fn try_reserve_slot(&self) -> bool {
        let limit = self.config.max_concurrent_streams;
        self.live_streams
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .is_ok()
    }

    pub(crate) fn release_slot(&self) {
        self.live_streams.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drop the session, stop token and slot of a stream that is over
    pub(crate) fn unregister(&self, session: &Arc<Session>, token: &Arc<CancellationToken>) {
        self.stops.release(session.id(), token);
        self.sessions.remove(session);
        self.release_slot();
    }
}

/// Why a producer loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The answer completed, or upstream closed cleanly
    Normal,
    /// Upstream delivered a non-benign error
    UpstreamError,
    /// A terminate request closed the stop token
    UserStopped,
    /// An upstream message could not be framed or normalized
    MalformedInput,
}

impl EndReason {
    /// Whether the answer should be recorded as failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::UpstreamError | Self::MalformedInput)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::UpstreamError => "upstream_error",
            Self::UserStopped => "user_stopped",
            Self::MalformedInput => "malformed_input",
        };
        f.write_str(name)
    }
}
