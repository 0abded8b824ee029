//! Producer loop

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};

use super::{EndReason, StreamContext};
use crate::cancel::CancellationToken;
use crate::emitter::ChangeEmitter;
use crate::error::{StreamError, StreamResult};
use crate::session::Session;
use crate::upstream::{CancelFn, UpstreamCall};
use crate::wire::OutputMode;

enum Flow {
    Continue,
    End,
}

/// Split an `event:payload` frame, requiring the expected event name
fn split_frame<'a>(raw: &'a str, event: &str) -> Option<&'a str> {
    match raw.split_once(':') {
        Some((name, payload)) if name == event => Some(payload),
        _ => None,
    }
}

/// The single producer of one conversation
///
/// Consumes the upstream call, drives the diff engine, keeps the session
/// snapshot current and owns cleanup of the session and stop token.
pub struct ChatOrchestrator {
    ctx: Arc<StreamContext>,
    session: Arc<Session>,
    token: Arc<CancellationToken>,
    mode: OutputMode,
    emitter: ChangeEmitter,
    accepted: u64,
    pending: Option<Value>,
}

impl ChatOrchestrator {
    pub(crate) fn new(
        ctx: Arc<StreamContext>,
        session: Arc<Session>,
        token: Arc<CancellationToken>,
        mode: OutputMode,
        tx: mpsc::Sender<String>,
    ) -> Self {
        let emitter = ChangeEmitter::new(session.id().clone(), tx);
        Self {
            ctx,
            session,
            token,
            mode,
            emitter,
            accepted: 0,
            pending: None,
        }
    }

    /// Run until the answer ends, fails or is stopped
    pub async fn run(mut self, call: UpstreamCall) -> EndReason {
        let started = Instant::now();
        let id = self.session.id().clone();
        tracing::info!(conversation_id = %id, mode = ?self.mode, "Chat stream started");

        let UpstreamCall {
            mut messages,
            mut errors,
            cancel,
        } = call;
        let mut cancel = Some(cancel);
        let token = Arc::clone(&self.token);

        let period = self.ctx.config.idle_timeout;
        let mut idle = interval_at(tokio::time::Instant::now() + period, period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failure = None;
        let reason = loop {
            tokio::select! {
                biased;

                () = token.closed() => {
                    break self.handle_stop(cancel.take()).await;
                }

                message = messages.recv() => {
                    idle.reset();
                    let Some(raw) = message else {
                        // Message source closed; honour an error already queued.
                        match errors.try_recv() {
                            Ok(err) if !err.is_benign_close() => {
                                failure = Some(StreamError::UpstreamFailure(err.to_string()));
                                break EndReason::UpstreamError;
                            }
                            _ => break EndReason::Normal,
                        }
                    };
                    match self.handle_message(&raw).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::End) => break EndReason::Normal,
                        Err(err) => {
                            if let Some(cancel) = cancel.take() {
                                cancel();
                            }
                            failure = Some(err);
                            break EndReason::MalformedInput;
                        }
                    }
                }

                error = errors.recv() => {
                    idle.reset();
                    match error {
                        None => break EndReason::Normal,
                        Some(err) if err.is_benign_close() => {
                            tracing::debug!(conversation_id = %id, close = %err, "Upstream closed");
                            break EndReason::Normal;
                        }
                        Some(err) => {
                            tracing::error!(conversation_id = %id, error = %err, "Upstream failure");
                            failure = Some(StreamError::UpstreamFailure(err.to_string()));
                            break EndReason::UpstreamError;
                        }
                    }
                }

                _ = idle.tick() => {
                    tracing::debug!(
                        conversation_id = %id,
                        idle_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
                        "No upstream activity"
                    );
                }
            }
        };

        self.finish(reason, failure, started).await;
        reason
    }

    async fn handle_message(&mut self, raw: &str) -> StreamResult<Flow> {
        let id = self.session.id();
        let Some(payload) = split_frame(raw, &self.ctx.config.upstream_event) else {
            let err = StreamError::malformed(raw);
            tracing::error!(conversation_id = %id, error = %err, "Invalid upstream frame");
            return Err(err);
        };

        let normalized = match self.ctx.processor.process(id, payload).await {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::error!(conversation_id = %id, error = %e, "After-processing failed");
                return Err(StreamError::Normalization(format!("{e:#}")));
            }
        };

        let index = self.accepted;
        self.accepted += 1;
        if index % self.ctx.config.diff_frequency == 0 || normalized.is_end {
            self.emit_snapshot(normalized.snapshot).await;
        } else {
            self.pending = Some(normalized.snapshot);
        }

        if normalized.is_end {
            self.session.close_signal();
            return Ok(Flow::End);
        }
        Ok(Flow::Continue)
    }

    /// Publish a snapshot and write it to the client
    async fn emit_snapshot(&mut self, snapshot: Value) {
        self.pending = None;
        if self.mode.is_incremental() {
            let previous = self.session.publish(snapshot.clone());
            self.emitter.emit_diff(&previous, &snapshot).await;
        } else {
            self.emitter.emit_payload(self.mode, &snapshot).await;
            self.session.publish(snapshot);
        }
    }

    async fn handle_stop(&self, cancel: Option<CancelFn>) -> EndReason {
        let id = self.session.id();
        let last = self.session.snapshot();
        if let Err(e) = self.ctx.stop_handler.on_stop(id, &last).await {
            tracing::error!(conversation_id = %id, error = %e, "Failed to persist cancelled state");
        }
        if let Some(cancel) = cancel {
            cancel();
        }
        tracing::info!(conversation_id = %id, "Stop handled");
        EndReason::UserStopped
    }

    /// Show the failure to the client and persist it
    async fn surface_failure(&mut self, err: &StreamError) {
        let id = self.session.id().clone();
        let last = self.session.snapshot();
        let payload = err.to_payload().to_value();

        if self.mode.is_incremental() {
            let mut snapshot = last.clone();
            match &mut snapshot {
                Value::Object(map) => {
                    map.insert("error".to_string(), payload);
                }
                other => *other = json!({ "error": payload }),
            }
            self.session.publish(snapshot.clone());
            self.emitter.emit_diff(&last, &snapshot).await;
        } else {
            self.emitter.emit_payload(self.mode, &payload).await;
        }

        if let Err(e) = self.ctx.stop_handler.on_failure(&id, &last, err).await {
            tracing::error!(conversation_id = %id, error = %e, "Failed to persist failed state");
        }
    }

    async fn finish(mut self, reason: EndReason, failure: Option<StreamError>, started: Instant) {
        if reason != EndReason::UserStopped {
            if let Some(pending) = self.pending.take() {
                self.emit_snapshot(pending).await;
            }
        }
        if let Some(err) = &failure {
            self.surface_failure(err).await;
        }
        if !self.mode.is_incremental() && self.emitter.frames_written() == 0 {
            // Nothing reached a full-payload client; send the last snapshot.
            let last = self.session.snapshot();
            self.emitter.emit_payload(self.mode, &last).await;
        }

        let id = self.session.id().clone();
        self.session.close_signal();
        self.ctx.unregister(&self.session, &self.token);

        if self.mode.is_incremental() {
            self.emitter.end().await;
        }

        tracing::info!(
            conversation_id = %id,
            reason = %reason,
            emissions = self.session.emissions(),
            events = self.emitter.next_seq(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Chat stream finished"
        );
    }
}
