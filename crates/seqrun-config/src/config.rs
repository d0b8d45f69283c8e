// crates/seqrun-config/src/config.rs
// ============================================================================
// Module: seqrun Configuration
// Description: Configuration loading and validation for the seqrun client.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: seqrun-core, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Resolution order is an explicit path, then `SEQRUN_CONFIG`, then
//! `seqrun.toml` in the working directory. Only the last of these may be
//! absent, in which case defaults apply. Invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use seqrun_core::PollMode;
use seqrun_core::ToolRecord;
use seqrun_core::ToolRegistry;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "seqrun.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SEQRUN_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default environment variable holding the API key.
pub const DEFAULT_API_KEY_ENV: &str = "SEQRUN_API_KEY";
/// Key file location relative to the home directory.
const DEFAULT_KEY_FILE: &str = ".seqrun/key";
/// Upper bound for concurrently live workers.
pub(crate) const MAX_WORKERS_LIMIT: usize = 256;
/// Maximum API key length in bytes.
pub(crate) const MAX_API_KEY_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Top-Level Config
// ============================================================================

/// seqrun configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeqrunConfig {
    /// Job service connection settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Job runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Object storage settings for delegated downloads and remote inputs.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Run event logging settings.
    #[serde(default)]
    pub events: EventsConfig,
    /// Tool records that add to or replace built-in entries.
    #[serde(default)]
    pub tools: Vec<ToolRecord>,
}

impl SeqrunConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, required) = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound && !required => {
                let mut config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(err) => return Err(ConfigError::Io(err.to_string())),
        };
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.runner.validate()?;
        self.storage.validate()?;
        self.events.validate()?;
        for tool in &self.tools {
            tool.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(())
    }

    /// Returns the built-in tool table with configured overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an override is inconsistent.
    pub fn tool_registry(&self) -> Result<ToolRegistry, ConfigError> {
        let mut registry = ToolRegistry::builtin();
        for tool in &self.tools {
            registry
                .register(tool.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(registry)
    }
}

// ============================================================================
// SECTION: Server Config
// ============================================================================

/// Job service connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Base URL of the job service.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request transport timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Key file read when the environment variable is unset.
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            api_key_env: default_api_key_env(),
            api_key_file: None,
        }
    }
}

impl ServerConfig {
    /// Validates server settings.
    fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("server.base_url invalid: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid("server.base_url must be http or https".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("server.timeout_ms must be > 0".to_string()));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid("server.api_key_env must be non-empty".to_string()));
        }
        if let Some(path) = &self.api_key_file {
            validate_path(path)?;
        }
        Ok(())
    }

    /// Returns the transport timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the parsed base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the URL is invalid.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("server.base_url invalid: {err}")))
    }
}

/// Default job service URL.
fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

/// Default request timeout.
const fn default_timeout_ms() -> u64 {
    60_000
}

/// Default API key environment variable.
fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

// ============================================================================
// SECTION: Runner Config
// ============================================================================

/// Job runner timing and concurrency settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Remote status poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Supervisor check interval in milliseconds.
    #[serde(default = "default_supervise_interval_ms")]
    pub supervise_interval_ms: u64,
    /// Delay between worker spawns in milliseconds.
    #[serde(default = "default_spawn_stagger_ms")]
    pub spawn_stagger_ms: u64,
    /// Maximum number of concurrently live workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Directory for split chunks and per-chunk outputs.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Poll delay formula.
    #[serde(default)]
    pub poll_mode: PollMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            supervise_interval_ms: default_supervise_interval_ms(),
            spawn_stagger_ms: default_spawn_stagger_ms(),
            max_workers: default_max_workers(),
            work_dir: None,
            poll_mode: PollMode::default(),
        }
    }
}

impl RunnerConfig {
    /// Validates runner settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("runner.poll_interval_ms must be > 0".to_string()));
        }
        if self.supervise_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "runner.supervise_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "runner.max_workers must be between 1 and {MAX_WORKERS_LIMIT}"
            )));
        }
        if let Some(path) = &self.work_dir {
            validate_path(path)?;
        }
        Ok(())
    }

    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the supervisor interval.
    #[must_use]
    pub const fn supervise_interval(&self) -> Duration {
        Duration::from_millis(self.supervise_interval_ms)
    }

    /// Returns the spawn stagger.
    #[must_use]
    pub const fn spawn_stagger(&self) -> Duration {
        Duration::from_millis(self.spawn_stagger_ms)
    }

    /// Returns the working directory, defaulting to the system temp dir.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

/// Default poll interval.
const fn default_poll_interval_ms() -> u64 {
    10_000
}

/// Default supervisor interval.
const fn default_supervise_interval_ms() -> u64 {
    1_000
}

/// Default spawn stagger.
const fn default_spawn_stagger_ms() -> u64 {
    500
}

/// Default worker cap.
const fn default_max_workers() -> usize {
    16
}

// ============================================================================
// SECTION: Storage Config
// ============================================================================

/// Object storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// AWS region (optional; falls back to environment configuration).
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint URL (for S3-compatible stores).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Force path-style addressing (for S3-compatible stores).
    #[serde(default)]
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Validates storage settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(region) = &self.region
            && region.trim().is_empty()
        {
            return Err(ConfigError::Invalid("storage.region must be non-empty".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            Url::parse(endpoint)
                .map_err(|err| ConfigError::Invalid(format!("storage.endpoint invalid: {err}")))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Events Config
// ============================================================================

/// Destination for run events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Events are discarded.
    None,
}

/// Run event logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: EventSinkKind,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl EventsConfig {
    /// Validates event settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (EventSinkKind::File, None) => {
                Err(ConfigError::Invalid("events.path is required for the file sink".to_string()))
            }
            (_, Some(path)) => validate_path(path),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: API Key
// ============================================================================

/// Job service API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a raw key after trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingApiKey`] for empty or oversized keys.
    pub fn new(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_API_KEY_LENGTH {
            return Err(ConfigError::MissingApiKey("api key is empty or too long".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the raw key for request signing.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Resolves the API key from the configured environment variable, then the
/// key file.
///
/// # Errors
///
/// Returns [`ConfigError::MissingApiKey`] when neither source yields a key.
pub fn resolve_api_key(server: &ServerConfig) -> Result<ApiKey, ConfigError> {
    if let Ok(value) = env::var(&server.api_key_env)
        && !value.trim().is_empty()
    {
        return ApiKey::new(&value);
    }
    let path = match &server.api_key_file {
        Some(path) => path.clone(),
        None => {
            let home = env::var_os("HOME").ok_or_else(|| {
                ConfigError::MissingApiKey(format!(
                    "{} is unset and no home directory is known",
                    server.api_key_env
                ))
            })?;
            PathBuf::from(home).join(DEFAULT_KEY_FILE)
        }
    };
    let content = fs::read_to_string(&path).map_err(|err| {
        ConfigError::MissingApiKey(format!(
            "{} is unset and {} is unreadable: {err}",
            server.api_key_env,
            path.display()
        ))
    })?;
    ApiKey::new(&content)
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// No usable API key was found.
    #[error("api key unavailable: {0}")]
    MissingApiKey(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path. Returns whether the file must exist.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates a path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid("path must be non-empty".to_string()));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("path component too long".to_string()));
        }
    }
    Ok(())
}
