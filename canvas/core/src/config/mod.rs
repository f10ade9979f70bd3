//! TOML Configuration File Support
//!
//! Centralized configuration loading for the canvas, supporting a TOML file
//! at `~/.config/vizcanvas/canvas.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`VIZCANVAS_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/vizcanvas/canvas.toml` (typically `~/.config/vizcanvas/canvas.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:8000"
//! request_timeout_ms = 30000
//!
//! [loader]
//! max_retries = 3
//! initial_backoff_ms = 500
//! backoff_multiplier = 1.5
//! max_backoff_ms = 10000
//! use_jitter = false
//!
//! [animation]
//! settle_ms = 600
//! exit_ms = 400
//! highlight_ms = 4000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::animation::AnimationTimings;
use crate::modules::RetryConfig;

/// Default visualization service address
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_API_URL: &str = "VIZCANVAS_API_URL";
const ENV_TIMEOUT_MS: &str = "VIZCANVAS_TIMEOUT_MS";
const ENV_MAX_RETRIES: &str = "VIZCANVAS_MAX_RETRIES";
const ENV_INITIAL_BACKOFF_MS: &str = "VIZCANVAS_INITIAL_BACKOFF_MS";
const ENV_JITTER: &str = "VIZCANVAS_RETRY_JITTER";
const ENV_HIGHLIGHT_MS: &str = "VIZCANVAS_HIGHLIGHT_MS";

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

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

/// API section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Service base URL
    pub base_url: Option<String>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Loader section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderToml {
    /// Retries after the first fetch attempt
    pub max_retries: Option<u32>,

    /// First backoff in milliseconds
    pub initial_backoff_ms: Option<u64>,

    /// Backoff growth factor
    pub backoff_multiplier: Option<f32>,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: Option<u64>,

    /// Whether to randomize backoff
    pub use_jitter: Option<bool>,
}

/// Animation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationToml {
    /// Entry animation in milliseconds
    pub settle_ms: Option<u64>,

    /// Exit animation in milliseconds
    pub exit_ms: Option<u64>,

    /// "New" highlight duration in milliseconds
    pub highlight_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasToml {
    /// API section
    pub api: ApiToml,

    /// Loader section
    pub loader: LoaderToml,

    /// Animation section
    pub animation: AnimationToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Visualization service connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    /// Service base URL, without trailing slash
    pub base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Centralized configuration for the canvas
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct CanvasConfig {
    /// Service connection
    pub api: ApiConfig,

    /// Module fetch retry policy
    pub retry: RetryConfig,

    /// Animation durations
    pub animation: AnimationTimings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            retry: RetryConfig::default(),
            animation: AnimationTimings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl CanvasConfig {
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

    /// Check values that would make the canvas misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.api.base_url
            )));
        }
        if self.api.request_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "api.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "loader.backoff_multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "loader.initial_backoff_ms exceeds loader.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/vizcanvas/canvas.toml` or
/// `~/.config/vizcanvas/canvas.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vizcanvas").join("canvas.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<CanvasConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<CanvasConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<CanvasConfig, ConfigError> {
    let mut config = CanvasConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: CanvasToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut CanvasConfig, toml: &CanvasToml) {
    if let Some(ref url) = toml.api.base_url {
        config.api.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ms) = toml.api.request_timeout_ms {
        config.api.request_timeout = Duration::from_millis(ms);
    }

    if let Some(retries) = toml.loader.max_retries {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = toml.loader.initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(multiplier) = toml.loader.backoff_multiplier {
        config.retry.backoff_multiplier = multiplier;
    }
    if let Some(ms) = toml.loader.max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(jitter) = toml.loader.use_jitter {
        config.retry.use_jitter = jitter;
    }

    if let Some(ms) = toml.animation.settle_ms {
        config.animation.settle = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.animation.exit_ms {
        config.animation.exit = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.animation.highlight_ms {
        config.animation.highlight = Duration::from_millis(ms);
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut CanvasConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(url) = env(ENV_API_URL) {
        config.api.base_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env(ENV_TIMEOUT_MS) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.api.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(retries) = env(ENV_MAX_RETRIES) {
        if let Ok(n) = retries.parse::<u32>() {
            config.retry.max_retries = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(backoff) = env(ENV_INITIAL_BACKOFF_MS) {
        if let Ok(ms) = backoff.parse::<u64>() {
            config.retry.initial_backoff_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(jitter) = env(ENV_JITTER) {
        config.retry.use_jitter = jitter != "0" && jitter.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(highlight) = env(ENV_HIGHLIGHT_MS) {
        if let Ok(ms) = highlight.parse::<u64>() {
            config.animation.highlight = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Service base URL override
    pub api_url: Option<String>,

    /// Request timeout override (milliseconds)
    pub request_timeout_ms: Option<u64>,

    /// Retry count override
    pub max_retries: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set service base URL override
    #[must_use]
    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Set retry count override
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut CanvasConfig) {
        if self.api_url.is_some() || self.request_timeout_ms.is_some() || self.max_retries.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.api_url {
            config.api.base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(ms) = self.request_timeout_ms {
            config.api.request_timeout = Duration::from_millis(ms);
        }

        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
