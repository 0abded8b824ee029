//! Upstream Collaborators
//!
//! Trait seams for everything the engine consumes but does not own: the
//! agent executor that produces raw messages, the after-processor that turns
//! one raw message into a full normalized snapshot, and the stop handler that
//! persists terminal states.
//!
//! # Design Philosophy
//!
//! The engine never interprets the agent's answer. It only needs:
//! - a stream of raw `event:payload` messages plus an error stream
//! - a way to cancel the upstream call
//! - a normalizer that yields the full answer so far and whether it is final
//!
//! Implementations handle provider-specific details (transport, answer
//! schema, storage).

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::session::ConversationId;

/// Error delivered on the upstream error stream
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Clean end of the upstream body
    #[error("EOF")]
    Eof,
    /// Body ended mid-frame; still treated as a normal close
    #[error("unexpected EOF")]
    UnexpectedEof,
    /// Anything else the executor reports
    #[error("{0}")]
    Failure(String),
}

impl UpstreamError {
    /// Whether this value is a close sentinel rather than a failure
    #[must_use]
    pub fn is_benign_close(&self) -> bool {
        matches!(self, Self::Eof | Self::UnexpectedEof)
    }

    /// Classify a transport error message
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        match message {
            "EOF" => Self::Eof,
            "unexpected EOF" => Self::UnexpectedEof,
            other => Self::Failure(other.to_string()),
        }
    }
}

/// Propagates cancellation into an in-flight executor call
pub type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// A running executor call
pub struct UpstreamCall {
    /// Raw `event:payload` messages; closes when the answer is complete
    pub messages: mpsc::Receiver<String>,
    /// Errors and close sentinels
    pub errors: mpsc::Receiver<UpstreamError>,
    /// Cancels the call
    pub cancel: CancelFn,
}

impl UpstreamCall {
    /// Bundle the parts of a call
    pub fn new(
        messages: mpsc::Receiver<String>,
        errors: mpsc::Receiver<UpstreamError>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            messages,
            errors,
            cancel: Box::new(cancel),
        }
    }
}

impl fmt::Debug for UpstreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCall")
            .field("messages", &self.messages)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

/// Agent executor that streams raw answer messages
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executor name for logging
    fn name(&self) -> &str {
        "executor"
    }

    /// Start a call for a conversation
    ///
    /// `params` is passed through untouched.
    async fn call(
        &self,
        conversation_id: &ConversationId,
        params: &Value,
    ) -> anyhow::Result<UpstreamCall>;
}

/// Output of the after-processor for one raw message
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    /// The full answer so far
    pub snapshot: Value,
    /// Whether this is the final snapshot
    pub is_end: bool,
}

/// Turns one raw upstream payload into a full normalized snapshot
#[async_trait]
pub trait AfterProcessor: Send + Sync {
    /// Normalize one payload (the part after `event:`)
    async fn process(
        &self,
        conversation_id: &ConversationId,
        payload: &str,
    ) -> anyhow::Result<Normalized>;
}

/// Persists terminal states of a conversation
#[async_trait]
pub trait StopHandler: Send + Sync {
    /// Record a user stop, with the last snapshot actually emitted
    async fn on_stop(&self, conversation_id: &ConversationId, last: &Value) -> anyhow::Result<()>;

    /// Record a failed answer
    async fn on_failure(
        &self,
        _conversation_id: &ConversationId,
        _last: &Value,
        _error: &StreamError,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// After-processor for executors that already emit full JSON snapshots
///
/// The payload is parsed as JSON and returned as is; the end flag is read
/// from a top-level boolean field.
#[derive(Clone, Debug)]
pub struct JsonPassThrough {
    end_field: String,
}

impl JsonPassThrough {
    /// Use `end_field` as the end flag
    pub fn new(end_field: impl Into<String>) -> Self {
        Self {
            end_field: end_field.into(),
        }
    }
}

impl Default for JsonPassThrough {
    fn default() -> Self {
        Self::new("end")
    }
}

#[async_trait]
impl AfterProcessor for JsonPassThrough {
    async fn process(&self, _: &ConversationId, payload: &str) -> anyhow::Result<Normalized> {
        let snapshot: Value = serde_json::from_str(payload.trim())?;
        let is_end = snapshot
            .get(&self.end_field)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Normalized { snapshot, is_end })
    }
}

/// Stop handler that only logs
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingStopHandler;

#[async_trait]
impl StopHandler for LoggingStopHandler {
    async fn on_stop(&self, conversation_id: &ConversationId, last: &Value) -> anyhow::Result<()> {
        tracing::info!(
            conversation_id = %conversation_id,
            bytes = last.to_string().len(),
            "Conversation cancelled"
        );
        Ok(())
    }

    async fn on_failure(
        &self,
        conversation_id: &ConversationId,
        _last: &Value,
        error: &StreamError,
    ) -> anyhow::Result<()> {
        tracing::warn!(conversation_id = %conversation_id, error = %error, "Conversation failed");
        Ok(())
    }
}
