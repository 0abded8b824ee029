//! Diffstream CLI - Drive the Streaming Engine from the Command Line
//!
//! Two commands:
//! - `diff` prints the change events between two JSON documents
//! - `replay` streams an upstream transcript through a real engine
//!
//! # Usage
//!
//! ```bash
//! # Change events between two snapshots
//! diffstream diff old.json new.json
//!
//! # Replay a transcript, emitting every 2nd message
//! diffstream replay transcript.txt --frequency 2
//!
//! # Replay with a resumer attached, one message every 200ms
//! diffstream replay transcript.txt --resume --pace-ms 200
//!
//! # Verbose logging (logs go to stderr)
//! RUST_LOG=debug diffstream replay transcript.txt
//! ```
//!
//! # Signals
//!
//! - `SIGINT` during `replay`: terminate the conversation (the stream still
//!   ends with its `end` event)

mod replay;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use diffstream_core::{change_frame, diff, load_config_from_path, Change};

/// Diffstream - incremental-diff streaming for agent answers
#[derive(Parser, Debug)]
#[command(name = "diffstream")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(
        short = 'c',
        long,
        env = "DIFFSTREAM_CONFIG",
        value_name = "FILE",
        global = true
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        env = "DIFFSTREAM_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the change events that turn OLD into NEW
    Diff {
        /// Previous snapshot (JSON file)
        old: PathBuf,
        /// Next snapshot (JSON file)
        new: PathBuf,
    },

    /// Stream an upstream transcript through the engine
    Replay(replay::ReplayArgs),
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout carries only stream frames.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("diffstream={level},diffstream_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Render the numbered change events from `old` to `new`, ending with `end`
fn diff_frames(old: &Value, new: &Value) -> Vec<String> {
    let mut frames = Vec::new();
    let mut seq = 0;
    for mut change in diff(old, new, &[]) {
        change.seq_id = seq;
        seq += 1;
        frames.push(change_frame(&change));
    }
    frames.push(change_frame(&Change::end(seq)));
    frames
}

fn run_diff(old: &Path, new: &Path) -> Result<()> {
    let old = read_json(old)?;
    let new = read_json(new)?;
    let frames = diff_frames(&old, &new);
    info!(changes = frames.len() - 1, "Diff computed");

    let mut stdout = std::io::stdout().lock();
    for frame in frames {
        stdout.write_all(frame.as_bytes())?;
    }
    stdout.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    match args.command {
        Command::Diff { old, new } => run_diff(&old, &new),
        Command::Replay(replay_args) => {
            let config = load_config_from_path(
                args.config.or_else(diffstream_core::default_config_path),
            )?;
            info!(source = %config.source(), "Configuration loaded");
            replay::run(replay_args, config).await
        }
    }
}
