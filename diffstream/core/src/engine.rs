//! Stream Engine
//!
//! The exposed surface: start a conversation's stream, resume it from
//! another consumer, terminate it, and inspect what is live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::cancel::CancellationToken;
use crate::config::{ConfigError, StreamConfig};
use crate::error::{StreamError, StreamResult};
use crate::session::{ConversationId, Session};
use crate::streaming::{self, ChatOrchestrator, ResumeOrchestrator, StreamContext};
use crate::upstream::{AfterProcessor, AgentExecutor, StopHandler};
use crate::wire::OutputMode;

/// Output of a started or resumed stream, one wire frame per item
pub type EventStream = ReceiverStream<String>;

/// Snapshot of a live session for diagnostics
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Conversation
    pub conversation_id: ConversationId,
    /// When the producer started
    pub started_at: DateTime<Utc>,
    /// Snapshots published so far
    pub emissions: u64,
    /// Whether a resumer has attached
    pub is_resuming: bool,
}

/// Entry point for streaming conversations
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct StreamEngine {
    ctx: Arc<StreamContext>,
    executor: Arc<dyn AgentExecutor>,
}

impl StreamEngine {
    /// Create an engine
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `config` is unusable.
    pub fn new(
        config: StreamConfig,
        executor: Arc<dyn AgentExecutor>,
        processor: Arc<dyn AfterProcessor>,
        stop_handler: Arc<dyn StopHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(StreamContext::new(config, processor, stop_handler)),
            executor,
        })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.ctx.config
    }

    /// Start streaming a conversation's answer
    ///
    /// Creates the session and stop token, calls the executor and spawns the
    /// producer. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`StreamError::TooManyStreams`] at the configured limit
    /// - [`StreamError::SessionAlreadyActive`] if the conversation is
    ///   already streaming
    /// - [`StreamError::UpstreamCall`] if the executor call fails; nothing is
    ///   left registered in that case
    pub async fn start(
        &self,
        id: &ConversationId,
        params: &Value,
        mode: OutputMode,
    ) -> StreamResult<EventStream> {
        if !self.ctx.try_reserve_slot() {
            let limit = self.ctx.config.max_concurrent_streams;
            tracing::warn!(conversation_id = %id, limit, "Stream limit reached");
            return Err(StreamError::TooManyStreams { limit });
        }
        let mut registration = Registration::new(&self.ctx);

        let session = self.ctx.sessions.create(id)?;
        registration.session = Some(Arc::clone(&session));
        let token = self.ctx.stops.register(id)?;
        registration.token = Some(Arc::clone(&token));

        // Dropping this future before the spawn below unwinds the
        // registration through `Registration::drop`.
        let call = self.executor.call(id, params).await.map_err(|e| {
            tracing::error!(
                conversation_id = %id,
                executor = self.executor.name(),
                error = %e,
                "Executor call failed"
            );
            StreamError::UpstreamCall(format!("{e:#}"))
        })?;

        let (tx, rx) = mpsc::channel(self.ctx.config.output_buffer);
        let producer = ChatOrchestrator::new(Arc::clone(&self.ctx), session, token, mode, tx);
        tokio::spawn(producer.run(call));
        registration.disarm();
        Ok(ReceiverStream::new(rx))
    }

    /// Attach another consumer to a live conversation
    ///
    /// The returned stream starts with a catch-up batch diffed from the empty
    /// baseline, follows the producer, and ends with `end`. Any number of
    /// resumers may follow one conversation. Must be called within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] if no session is live.
    pub fn resume(&self, id: &ConversationId) -> StreamResult<EventStream> {
        let session = self
            .ctx
            .sessions
            .get(id)
            .ok_or_else(|| StreamError::SessionNotFound(id.clone()))?;

        let attachment = session.attach_resumer();
        let (tx, rx) = mpsc::channel(self.ctx.config.output_buffer);
        let resumer = ResumeOrchestrator::new(session, tx);
        tokio::spawn(resumer.run(attachment));
        tracing::info!(conversation_id = %id, "Resume attached");
        Ok(ReceiverStream::new(rx))
    }

    /// Stop a live conversation
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionNotFound`] if there is nothing to stop,
    /// including when it was already terminated.
    pub fn terminate(&self, id: &ConversationId) -> StreamResult<()> {
        streaming::terminate(&self.ctx.stops, id)
    }

    /// IDs of every conversation with a live session
    #[must_use]
    pub fn active_conversations(&self) -> Vec<ConversationId> {
        let mut ids = self.ctx.sessions.ids();
        ids.sort();
        ids
    }

    /// Whether the conversation has a live session
    #[must_use]
    pub fn is_active(&self, id: &ConversationId) -> bool {
        self.ctx.sessions.contains(id)
    }

    /// Diagnostics for one live session
    #[must_use]
    pub fn session_info(&self, id: &ConversationId) -> Option<SessionInfo> {
        self.ctx.sessions.get(id).map(|session| SessionInfo {
            conversation_id: session.id().clone(),
            started_at: session.started_at(),
            emissions: session.emissions(),
            is_resuming: session.is_resuming(),
        })
    }
}

/// Registry entries of a `start` that has not handed off to its producer
///
/// Released on drop unless disarmed, so a failed or cancelled `start`
/// never leaves a session, stop token or stream slot behind.
struct Registration<'a> {
    ctx: &'a StreamContext,
    session: Option<Arc<Session>>,
    token: Option<Arc<CancellationToken>>,
    armed: bool,
}

impl<'a> Registration<'a> {
    fn new(ctx: &'a StreamContext) -> Self {
        Self {
            ctx,
            session: None,
            token: None,
            armed: true,
        }
    }

    /// The producer owns cleanup from here on
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let (Some(session), Some(token)) = (&self.session, &self.token) {
            self.ctx.stops.release(session.id(), token);
        }
        if let Some(session) = &self.session {
            self.ctx.sessions.remove(session);
            tracing::debug!(
                conversation_id = %session.id(),
                "Start abandoned, registration released"
            );
        }
        self.ctx.release_slot();
    }
}

impl std::fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("config", &self.ctx.config)
            .field("active", &self.ctx.sessions.len())
            .field("executor", &self.executor.name())
            .finish()
    }
}
