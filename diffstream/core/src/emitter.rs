//! Change Emitter
//!
//! Numbers changes with a stream-wide counter and writes them to the output
//! channel as SSE frames. One emitter lives for the whole lifetime of one
//! producer (or one resumer), so sequence ids are strictly increasing across
//! every `diff` it emits, and the terminal `end` event reuses the same
//! counter.
//!
//! A closed output channel means the client went away. That is not an error
//! for the emitter: numbering continues so the session stays consistent, and
//! the client can come back through a resume.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::diff::{diff, Change};
use crate::session::ConversationId;
use crate::wire::{change_frame, payload_frame, OutputMode};

/// Writes numbered change events to one output stream
#[derive(Debug)]
pub struct ChangeEmitter {
    conversation_id: ConversationId,
    tx: mpsc::Sender<String>,
    next_seq: u64,
    frames: u64,
    ended: bool,
    disconnected: bool,
}

impl ChangeEmitter {
    /// Create an emitter whose first sequence id is 0
    #[must_use]
    pub fn new(conversation_id: ConversationId, tx: mpsc::Sender<String>) -> Self {
        Self {
            conversation_id,
            tx,
            next_seq: 0,
            frames: 0,
            ended: false,
            disconnected: false,
        }
    }

    /// Sequence id the next change will receive
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Frames delivered to the receiver so far
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Whether the terminal event has been written
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Whether the receiving side has gone away
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Number and write a batch of changes, returning how many were written
    pub async fn emit(&mut self, changes: Vec<Change>) -> usize {
        let count = changes.len();
        for mut change in changes {
            change.seq_id = self.next_seq;
            self.next_seq += 1;
            let frame = change_frame(&change);
            self.send(frame).await;
        }
        count
    }

    /// Diff two snapshots and emit the result
    ///
    /// An empty diff is valid; it is logged and nothing is written.
    pub async fn emit_diff(&mut self, old: &Value, new: &Value) -> usize {
        let changes = diff(old, new, &[]);
        if changes.is_empty() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "Diff produced no changes"
            );
            return 0;
        }
        self.emit(changes).await
    }

    /// Write a full payload for a non-incremental client
    pub async fn emit_payload(&mut self, mode: OutputMode, payload: &Value) {
        let frame = payload_frame(mode, payload);
        self.send(frame).await;
    }

    /// Write the terminal `end` event
    ///
    /// Only the first call writes anything; returns whether this call did.
    pub async fn end(&mut self) -> bool {
        if self.ended {
            return false;
        }
        self.ended = true;
        let change = Change::end(self.next_seq);
        self.next_seq += 1;
        let frame = change_frame(&change);
        self.send(frame).await;
        true
    }

    async fn send(&mut self, frame: String) {
        if self.disconnected {
            return;
        }
        if self.tx.send(frame).await.is_ok() {
            self.frames += 1;
        } else {
            self.disconnected = true;
            tracing::debug!(
                conversation_id = %self.conversation_id,
                seq = self.next_seq,
                "Output receiver dropped, continuing without client"
            );
        }
    }
}
