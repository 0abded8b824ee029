//! Error Types
//!
//! The failure taxonomy of the streaming engine. Benign upstream closes
//! (`EOF` sentinels) are not errors at all and never reach this type; see
//! [`UpstreamError::is_benign_close`](crate::upstream::UpstreamError::is_benign_close).

use thiserror::Error;

use crate::session::ConversationId;
use crate::wire::ErrorPayload;

/// Errors produced by the streaming engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// An upstream message did not match the `event:payload` framing
    #[error("malformed upstream frame: {frame}")]
    MalformedUpstreamFrame {
        /// The offending raw frame (truncated for logging)
        frame: String,
    },

    /// The after-processor failed to normalize an upstream message
    #[error("normalization failed: {0}")]
    Normalization(String),

    /// The upstream executor delivered a non-benign error
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// The executor call itself could not be started
    #[error("upstream call failed: {0}")]
    UpstreamCall(String),

    /// No live session (or stop token) exists for the conversation
    #[error("session not found: {0}")]
    SessionNotFound(ConversationId),

    /// A producer is already running for the conversation
    #[error("session already active: {0}")]
    SessionAlreadyActive(ConversationId),

    /// The configured concurrent stream limit was reached
    #[error("maximum concurrent streams reached ({limit})")]
    TooManyStreams {
        /// The configured limit
        limit: usize,
    },
}

impl StreamError {
    /// Build a malformed-frame error, truncating very long frames
    pub fn malformed(frame: &str) -> Self {
        const MAX_LOGGED: usize = 256;
        let frame = match frame.char_indices().nth(MAX_LOGGED) {
            Some((idx, _)) => format!("{}...", &frame[..idx]),
            None => frame.to_string(),
        };
        Self::MalformedUpstreamFrame { frame }
    }

    /// Stable machine-readable code used in client-facing payloads
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedUpstreamFrame { .. } => "Upstream.MalformedFrame",
            Self::Normalization(_) => "Upstream.NormalizationFailed",
            Self::UpstreamFailure(_) | Self::UpstreamCall(_) => "Upstream.Failure",
            Self::SessionNotFound(_) => "Session.NotFound",
            Self::SessionAlreadyActive(_) => "Session.AlreadyActive",
            Self::TooManyStreams { .. } => "Session.TooManyStreams",
        }
    }

    /// Convert into the payload shape surfaced to clients
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        let description = match self {
            Self::MalformedUpstreamFrame { .. } => "upstream sent an unexpected frame",
            Self::Normalization(_) => "failed to process upstream message",
            Self::UpstreamFailure(_) | Self::UpstreamCall(_) => "agent executor failed",
            Self::SessionNotFound(_) => "conversation is not streaming",
            Self::SessionAlreadyActive(_) => "conversation is already streaming",
            Self::TooManyStreams { .. } => "too many concurrent conversations",
        };
        ErrorPayload {
            code: self.code().to_string(),
            description: description.to_string(),
            detail: self.to_string(),
        }
    }
}

/// Result alias for engine operations
pub type StreamResult<T> = Result<T, StreamError>;
