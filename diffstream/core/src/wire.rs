//! Wire Format
//!
//! Output frames are Server-Sent-Event bodies:
//!
//! ```text
//! data: {"seq_id":0,"key":["text"],"content":"hi","action":"upsert"}\n
//! \n
//! ```
//!
//! Incremental clients receive one frame per [`Change`]; snapshot clients
//! receive the full payload in the same framing; blocking clients receive the
//! raw payload with no framing at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::Change;

/// How a client wants its output
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// SSE diff events plus a terminal `end` event
    #[default]
    Incremental,
    /// SSE-framed full payload per emission
    Snapshot,
    /// Raw full payload per emission, no framing
    Blocking,
}

impl OutputMode {
    /// Whether the client receives diffs
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental)
    }

    /// Parse from a user-supplied string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "incremental" | "inc" | "diff" => Some(Self::Incremental),
            "snapshot" | "full" | "stream" => Some(Self::Snapshot),
            "blocking" | "raw" => Some(Self::Blocking),
            _ => None,
        }
    }
}

/// Error body surfaced to clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable code, e.g. `Upstream.Failure`
    pub code: String,
    /// Short human-readable description
    pub description: String,
    /// Underlying error text
    pub detail: String,
}

impl ErrorPayload {
    /// Render as a JSON value
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "code": self.code,
            "description": self.description,
            "detail": self.detail,
        })
    }
}

/// Wrap a JSON body in SSE framing
#[must_use]
pub fn sse_frame(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// Render a change as its SSE frame
#[must_use]
pub fn change_frame(change: &Change) -> String {
    // Change is plain data (string keys, no maps with non-string keys), so
    // serialization cannot fail.
    let body = serde_json::to_string(change).unwrap_or_default();
    sse_frame(&body)
}

/// Render a full payload for a non-incremental client
#[must_use]
pub fn payload_frame(mode: OutputMode, payload: &Value) -> String {
    let body = payload.to_string();
    match mode {
        OutputMode::Blocking => body,
        OutputMode::Incremental | OutputMode::Snapshot => sse_frame(&body),
    }
}

/// Parse an SSE frame back into a change
///
/// Used by clients and tests; returns `None` for frames that are not change
/// events.
#[must_use]
pub fn parse_change_frame(frame: &str) -> Option<Change> {
    let body = frame.strip_prefix("data: ")?.trim_end_matches('\n');
    serde_json::from_str(body).ok()
}
