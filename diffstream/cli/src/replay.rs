//! Transcript Replay
//!
//! Feeds a recorded upstream transcript through a live [`StreamEngine`].
//! Each non-empty line of the transcript is one raw upstream message
//! (`data:{...}`); a line of the form `error:<text>` is delivered on the
//! upstream error stream instead (`error:EOF` closes cleanly).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use diffstream_core::{
    AgentExecutor, ConfigOverrides, ConversationId, EventStream, JsonPassThrough,
    LoggingStopHandler, OutputMode, StreamConfig, StreamEngine, StreamError, UpstreamCall,
    UpstreamError,
};

/// Arguments of the `replay` command
#[derive(clap::Args, Debug)]
pub struct ReplayArgs {
    /// Transcript file, one upstream message per line
    pub file: PathBuf,

    /// Output mode (incremental, snapshot, blocking)
    #[arg(short, long, default_value = "incremental", value_parser = parse_mode)]
    pub mode: OutputMode,

    /// Emit every Nth message (overrides configuration)
    #[arg(short, long)]
    pub frequency: Option<u64>,

    /// Idle debug-log interval in milliseconds (overrides configuration)
    #[arg(long, value_name = "MS")]
    pub idle_timeout_ms: Option<u64>,

    /// Upstream event name (overrides configuration)
    #[arg(long)]
    pub event: Option<String>,

    /// Top-level boolean field marking the final snapshot
    #[arg(long, default_value = "end")]
    pub end_field: String,

    /// Attach a resumer and print its frames too, prefixed with `resume `
    #[arg(long)]
    pub resume: bool,

    /// Delay between transcript lines in milliseconds
    #[arg(long, value_name = "MS")]
    pub pace_ms: Option<u64>,

    /// Conversation ID (generated if omitted)
    #[arg(long)]
    pub conversation_id: Option<String>,
}

impl ReplayArgs {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(frequency) = self.frequency {
            overrides = overrides.with_diff_frequency(frequency);
        }
        if let Some(ms) = self.idle_timeout_ms {
            overrides = overrides.with_idle_timeout_ms(ms);
        }
        if let Some(event) = &self.event {
            overrides = overrides.with_upstream_event(event.clone());
        }
        overrides
    }
}

fn parse_mode(s: &str) -> Result<OutputMode, String> {
    OutputMode::parse(s)
        .ok_or_else(|| format!("unknown mode {s:?} (expected incremental, snapshot or blocking)"))
}

/// Executor that plays back a transcript file
#[derive(Debug)]
pub struct FileExecutor {
    path: PathBuf,
    pace: Option<Duration>,
}

impl FileExecutor {
    /// Create an executor for the transcript at `path`
    pub fn new(path: PathBuf, pace: Option<Duration>) -> Self {
        Self { path, pace }
    }
}

#[async_trait]
impl AgentExecutor for FileExecutor {
    fn name(&self) -> &str {
        "file"
    }

    async fn call(&self, id: &ConversationId, _params: &Value) -> anyhow::Result<UpstreamCall> {
        let transcript = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read transcript {}", self.path.display()))?;
        let lines: Vec<String> = transcript
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(conversation_id = %id, lines = lines.len(), "Transcript loaded");

        let (msg_tx, msg_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(1);
        let mut ticker = self.pace.map(|pace| {
            let mut ticker = tokio::time::interval(pace);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let id = id.clone();

        let feeder = tokio::spawn(async move {
            for line in lines {
                if let Some(ticker) = ticker.as_mut() {
                    ticker.tick().await;
                }
                let delivered = match line.strip_prefix("error:") {
                    Some(error) => err_tx
                        .send(UpstreamError::from_message(error.trim()))
                        .await
                        .is_ok(),
                    None => msg_tx.send(line).await.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            debug!(conversation_id = %id, "Transcript exhausted");
        });

        Ok(UpstreamCall::new(msg_rx, err_rx, move || feeder.abort()))
    }
}

/// Write every frame of `events` to stdout, returning the frame count
async fn print_events(mut events: EventStream, prefix: &'static str) -> Result<usize> {
    let mut stdout = tokio::io::stdout();
    let mut frames = 0;
    while let Some(frame) = events.next().await {
        stdout.write_all(format!("{prefix}{frame}").as_bytes()).await?;
        stdout.flush().await?;
        frames += 1;
    }
    Ok(frames)
}

/// Run the `replay` command
pub async fn run(args: ReplayArgs, mut config: StreamConfig) -> Result<()> {
    args.overrides().apply(&mut config);

    let pace = args.pace_ms.map(Duration::from_millis);
    let engine = StreamEngine::new(
        config,
        Arc::new(FileExecutor::new(args.file.clone(), pace)),
        Arc::new(JsonPassThrough::new(args.end_field.clone())),
        Arc::new(LoggingStopHandler),
    )?;
    debug!(?engine, "Engine ready");

    let id = args
        .conversation_id
        .clone()
        .map_or_else(ConversationId::generate, ConversationId::new);
    let params = json!({ "transcript": args.file.display().to_string() });

    let events = engine.start(&id, &params, args.mode).await?;
    info!(conversation_id = %id, mode = ?args.mode, "Replay started");

    let resumed = if args.resume {
        match engine.resume(&id) {
            Ok(events) => Some(events),
            Err(StreamError::SessionNotFound(_)) => {
                warn!(conversation_id = %id, "Replay finished before the resumer attached");
                None
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        None
    };

    let mut producer = tokio::spawn(print_events(events, ""));
    let resumer = resumed.map(|events| tokio::spawn(print_events(events, "resume ")));

    let frames = tokio::select! {
        joined = &mut producer => joined??,
        _ = tokio::signal::ctrl_c() => {
            info!(conversation_id = %id, "Interrupted, terminating conversation");
            if let Err(e) = engine.terminate(&id) {
                warn!(conversation_id = %id, error = %e, "Terminate failed");
            }
            producer.await??
        }
    };

    let resumed_frames = match resumer {
        Some(handle) => handle.await??,
        None => 0,
    };

    info!(
        conversation_id = %id,
        frames,
        resumed_frames,
        "Replay complete"
    );
    Ok(())
}
