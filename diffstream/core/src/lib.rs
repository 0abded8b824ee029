//! Diffstream Core - Incremental-Diff Streaming for Agent Answers
//!
//! Converts the full snapshots an agent executor produces into a compact,
//! ordered stream of path-addressed edits, keeps per-conversation state so a
//! reattaching client can catch up and keep following, and propagates
//! cancellation back upstream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          StreamEngine                             │
//! │     start()            resume()             terminate()           │
//! │        │                  │                      │                │
//! │        ▼                  ▼                      ▼                │
//! │  ChatOrchestrator   ResumeOrchestrator     StopRegistry           │
//! │   │  │    │                │               (CancellationToken)    │
//! │   │  │    └──publish──► SessionStore ◄──read──┘                   │
//! │   │  │                  (Session)                                 │
//! │   │  └──► AfterProcessor                                          │
//! │   └─────► diff() ──► ChangeEmitter ──► SSE frames                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamEngine`]: start / resume / terminate plus diagnostics
//! - [`Change`]: one `upsert` / `append` / `remove` / `end` edit
//! - [`diff()`]: pure snapshot-to-changes function
//! - [`Session`]: latest emitted snapshot and resume signal
//! - [`CancellationToken`]: idempotent one-shot stop signal
//! - [`AgentExecutor`], [`AfterProcessor`], [`StopHandler`]: collaborator
//!   seams implemented by the embedding service
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use diffstream_core::{
//!     ConversationId, JsonPassThrough, LoggingStopHandler, OutputMode, StreamConfig,
//!     StreamEngine,
//! };
//! use tokio_stream::StreamExt;
//!
//! let engine = StreamEngine::new(
//!     StreamConfig::default(),
//!     Arc::new(my_executor),
//!     Arc::new(JsonPassThrough::default()),
//!     Arc::new(LoggingStopHandler),
//! )?;
//!
//! let id = ConversationId::new("c1");
//! let mut events = engine.start(&id, &params, OutputMode::Incremental).await?;
//! while let Some(frame) = events.next().await {
//!     print!("{frame}");
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod diff;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod session;
pub mod streaming;
pub mod upstream;
pub mod value;
pub mod wire;

pub use cancel::{CancellationToken, StopRegistry, TokenState};
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, StreamConfig,
};
pub use diff::{diff, Action, Change};
pub use emitter::ChangeEmitter;
pub use engine::{EventStream, SessionInfo, StreamEngine};
pub use error::{StreamError, StreamResult};
pub use session::{ConversationId, ResumeAttachment, Session, SessionStore};
pub use streaming::{terminate, ChatOrchestrator, EndReason, ResumeOrchestrator};
pub use upstream::{
    AfterProcessor, AgentExecutor, CancelFn, JsonPassThrough, LoggingStopHandler, Normalized,
    StopHandler, UpstreamCall, UpstreamError,
};
pub use value::{
    apply_change, apply_changes, empty_baseline, ApplyError, JsonValue, Path, PathSegment,
    ValueKind,
};
pub use wire::{
    change_frame, parse_change_frame, payload_frame, sse_frame, ErrorPayload, OutputMode,
};
