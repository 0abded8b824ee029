//! Secondary consumer loop

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::diff::diff;
use crate::emitter::ChangeEmitter;
use crate::session::{ResumeAttachment, Session};
use crate::value::empty_baseline;

/// Follows a live session on behalf of a reattached client
///
/// Each resumer keeps its own baseline and sequence counter, so any number
/// of them can follow the same session.
pub struct ResumeOrchestrator {
    session: Arc<Session>,
    emitter: ChangeEmitter,
    baseline: Value,
}

impl ResumeOrchestrator {
    /// Create a resumer writing to `tx`
    #[must_use]
    pub fn new(session: Arc<Session>, tx: mpsc::Sender<String>) -> Self {
        let emitter = ChangeEmitter::new(session.id().clone(), tx);
        Self {
            session,
            emitter,
            baseline: empty_baseline(),
        }
    }

    /// Emit the catch-up batch, follow notifications, then emit `end`
    pub async fn run(mut self, attachment: ResumeAttachment) {
        let id = self.session.id().clone();
        let ResumeAttachment { snapshot, signal } = attachment;

        let caught_up = self.advance(snapshot).await;
        tracing::info!(conversation_id = %id, changes = caught_up, "Resume caught up");
        if self.emitter.is_disconnected() {
            tracing::debug!(conversation_id = %id, "Resume client gone during catch-up");
            return;
        }

        if let Some(mut signal) = signal {
            while signal.changed().await.is_ok() {
                let current = self.session.snapshot();
                self.advance(current).await;
                if self.emitter.is_disconnected() {
                    tracing::debug!(conversation_id = %id, "Resume client gone");
                    return;
                }
            }
            // Producer closed the signal; pick up its final publish.
            let current = self.session.snapshot();
            self.advance(current).await;
        }

        self.emitter.end().await;
        tracing::info!(
            conversation_id = %id,
            events = self.emitter.next_seq(),
            "Resume stream finished"
        );
    }

    /// Emit the delta from the local baseline to `current`
    async fn advance(&mut self, current: Value) -> usize {
        let changes = diff(&self.baseline, &current, &[]);
        self.baseline = current;
        self.emitter.emit(changes).await
    }
}
