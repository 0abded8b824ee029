//! Configuration
//!
//! Streaming engine settings, loaded from a TOML file at
//! `~/.config/diffstream/diffstream.toml` plus environment overrides.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [stream]
//! diff_frequency = 1
//! idle_timeout_ms = 5000
//! output_buffer = 100
//! max_concurrent_streams = 1024
//! upstream_event = "data"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[stream]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Accepted upstream messages per actual emission
    pub diff_frequency: Option<u64>,

    /// Idle liveness log interval in milliseconds
    pub idle_timeout_ms: Option<u64>,

    /// Capacity of each output channel
    pub output_buffer: Option<usize>,

    /// Upper bound on live sessions
    pub max_concurrent_streams: Option<usize>,

    /// Expected event name in upstream frames
    pub upstream_event: Option<String>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffstreamToml {
    /// Streaming settings
    pub stream: StreamToml,
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Resolved streaming engine configuration
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Emit every Nth accepted message (the final one always)
    pub diff_frequency: u64,

    /// Idle liveness log interval
    pub idle_timeout: Duration,

    /// Capacity of each output channel
    pub output_buffer: usize,

    /// Upper bound on live sessions
    pub max_concurrent_streams: usize,

    /// Expected event name in `event:payload` frames
    pub upstream_event: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            diff_frequency: 1,
            idle_timeout: Duration::from_secs(5),
            output_buffer: 100,
            max_concurrent_streams: 1024,
            upstream_event: "data".to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values the engine cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.diff_frequency == 0 {
            return Err(ConfigError::ValidationError(
                "diff_frequency must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "idle_timeout must be non-zero".to_string(),
            ));
        }
        if self.output_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "output_buffer must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_streams == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        if self.upstream_event.is_empty() || self.upstream_event.contains(':') {
            return Err(ConfigError::ValidationError(format!(
                "upstream_event {:?} is not a valid event name",
                self.upstream_event
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/diffstream/diffstream.toml` or
/// `~/.config/diffstream/diffstream.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("diffstream").join("diffstream.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values do not validate. A missing file is not an error.
pub fn load_config() -> Result<StreamConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values do not validate.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StreamConfig, ConfigError> {
    let mut config = StreamConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DiffstreamToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, |name| std::env::var(name).ok());

    config.validate()?;
    Ok(config)
}

fn apply_toml_config(config: &mut StreamConfig, toml: &DiffstreamToml) {
    let stream = &toml.stream;
    if let Some(frequency) = stream.diff_frequency {
        config.diff_frequency = frequency;
    }
    if let Some(ms) = stream.idle_timeout_ms {
        config.idle_timeout = Duration::from_millis(ms);
    }
    if let Some(buffer) = stream.output_buffer {
        config.output_buffer = buffer;
    }
    if let Some(max) = stream.max_concurrent_streams {
        config.max_concurrent_streams = max;
    }
    if let Some(ref event) = stream.upstream_event {
        config.upstream_event = event.clone();
    }
}

/// Apply environment overrides read through `lookup`
///
/// Unparseable values are logged and ignored.
fn apply_env_config(config: &mut StreamConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        name: &str,
    ) -> Option<T> {
        let raw = lookup(name)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment override");
                None
            }
        }
    }

    if let Some(frequency) = parsed::<u64>(&lookup, "DIFFSTREAM_DIFF_FREQUENCY") {
        config.diff_frequency = frequency;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = parsed::<u64>(&lookup, "DIFFSTREAM_IDLE_TIMEOUT_MS") {
        config.idle_timeout = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(buffer) = parsed::<usize>(&lookup, "DIFFSTREAM_OUTPUT_BUFFER") {
        config.output_buffer = buffer;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = parsed::<usize>(&lookup, "DIFFSTREAM_MAX_STREAMS") {
        config.max_concurrent_streams = max;
        config.source = ConfigSource::Env;
    }
    if let Some(event) = lookup("DIFFSTREAM_UPSTREAM_EVENT") {
        config.upstream_event = event;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Command-line overrides, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Diff frequency override
    pub diff_frequency: Option<u64>,

    /// Idle timeout override in milliseconds
    pub idle_timeout_ms: Option<u64>,

    /// Output buffer override
    pub output_buffer: Option<usize>,

    /// Upstream event name override
    pub upstream_event: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set diff frequency override
    #[must_use]
    pub fn with_diff_frequency(mut self, frequency: u64) -> Self {
        self.diff_frequency = Some(frequency);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    /// Set output buffer override
    #[must_use]
    pub fn with_output_buffer(mut self, buffer: usize) -> Self {
        self.output_buffer = Some(buffer);
        self
    }

    /// Set upstream event name override
    #[must_use]
    pub fn with_upstream_event(mut self, event: impl Into<String>) -> Self {
        self.upstream_event = Some(event.into());
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut StreamConfig) {
        if self.diff_frequency.is_some()
            || self.idle_timeout_ms.is_some()
            || self.output_buffer.is_some()
            || self.upstream_event.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(frequency) = self.diff_frequency {
            config.diff_frequency = frequency;
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(buffer) = self.output_buffer {
            config.output_buffer = buffer;
        }
        if let Some(ref event) = self.upstream_event {
            config.upstream_event = event.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
