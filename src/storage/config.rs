//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/aicw/config.toml`
//! - macOS: `~/Library/Application Support/com.aicw.aicw/config.toml`
//! - Windows: `%APPDATA%/aicw/aicw/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `AICW_CONFIG`: Override config file path
//! - `AICW_FORMAT`: Output format (human, json)
//! - `AICW_PRETTY`, `AICW_VERBOSE`: Output flags (1, true, yes, on)
//! - `AICW_BATCH_SIZE`, `AICW_BATCH_DELAY_MS`, `AICW_ENABLE_BATCHING`,
//!   `AICW_MAX_CONCURRENT`: Batch classifier
//! - `AICW_WORKER_ENABLED`, `AICW_WORKER_INTERVAL_SECS`,
//!   `AICW_WORKER_HEALTH_CHECK_SECS`, `AICW_WORKER_AUTO_START`: Persistent worker

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::cli::args::{Cli, OutputFormat};
use crate::core::batch::BatchOptions;
use crate::core::classifier::MAX_ATTEMPTS;
use crate::core::registry::RegistryOptions;
use crate::core::worker::{ServerlessConfig, WorkerConfig};
use crate::error::{AicwError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "AICW_CONFIG";
/// Environment variable for output format.
pub const ENV_FORMAT: &str = "AICW_FORMAT";
/// Environment variable for pretty JSON output.
pub const ENV_PRETTY: &str = "AICW_PRETTY";
/// Environment variable for verbose output.
pub const ENV_VERBOSE: &str = "AICW_VERBOSE";

pub const ENV_BATCH_SIZE: &str = "AICW_BATCH_SIZE";
pub const ENV_BATCH_DELAY_MS: &str = "AICW_BATCH_DELAY_MS";
pub const ENV_ENABLE_BATCHING: &str = "AICW_ENABLE_BATCHING";
pub const ENV_MAX_CONCURRENT: &str = "AICW_MAX_CONCURRENT";
/// Enables both the persistent and the serverless worker.
pub const ENV_WORKER_ENABLED: &str = "AICW_WORKER_ENABLED";
pub const ENV_WORKER_INTERVAL_SECS: &str = "AICW_WORKER_INTERVAL_SECS";
pub const ENV_WORKER_HEALTH_CHECK_SECS: &str = "AICW_WORKER_HEALTH_CHECK_SECS";
pub const ENV_WORKER_AUTO_START: &str = "AICW_WORKER_AUTO_START";

/// Upper bound of a serverless session budget.
pub const MAX_SERVERLESS_SECS: u64 = 900;

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// File config with environment overrides applied.
    pub config: Config,
    /// Path the config was loaded from (may not exist).
    pub config_path: PathBuf,
    /// Output format.
    pub format: OutputFormat,
    /// Whether to pretty-print JSON output.
    pub pretty: bool,
    /// Whether verbose logging is enabled.
    pub verbose: bool,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub config_path: ConfigSource,
    pub format: ConfigSource,
    pub pretty: ConfigSource,
    pub verbose: ConfigSource,
    pub batch_size: ConfigSource,
    pub max_concurrent: ConfigSource,
    pub worker_enabled: ConfigSource,
    pub worker_interval: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI args, environment variables, and config file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file exists but is invalid
    /// - An environment override cannot be parsed
    /// - Any resolved value fails validation
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let mut sources = ConfigSources::default();
        let config_path = Self::resolve_config_path(cli, &mut sources.config_path);
        let mut config = Config::load_from(&config_path)?;
        let file_defaults = Config::default();

        apply_env_overrides(&mut config, &file_defaults, &mut sources)?;
        config.validate()?;

        let format = Self::resolve_format(cli, &config, &mut sources.format)?;
        let pretty = Self::resolve_flag(cli.pretty, ENV_PRETTY, config.general.pretty, &mut sources.pretty);
        let verbose = Self::resolve_flag(cli.verbose, ENV_VERBOSE, false, &mut sources.verbose);

        Ok(Self {
            config,
            config_path,
            format,
            pretty,
            verbose,
            sources,
        })
    }

    fn resolve_config_path(cli: &Cli, source: &mut ConfigSource) -> PathBuf {
        if let Some(path) = &cli.config {
            *source = ConfigSource::Cli;
            return path.clone();
        }
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            *source = ConfigSource::Env;
            return PathBuf::from(path);
        }
        *source = ConfigSource::Default;
        Config::config_path()
    }

    /// Resolve output format setting.
    fn resolve_format(cli: &Cli, config: &Config, source: &mut ConfigSource) -> Result<OutputFormat> {
        // 1. CLI --json flag (shorthand)
        if cli.json {
            *source = ConfigSource::Cli;
            return Ok(OutputFormat::Json);
        }

        // clap fills in `human` by default, so only a non-default value
        // counts as an explicit flag.
        if cli.format != OutputFormat::Human {
            *source = ConfigSource::Cli;
            return Ok(cli.format);
        }

        // 2. Environment variable
        if let Ok(format_env) = std::env::var(ENV_FORMAT) {
            *source = ConfigSource::Env;
            return Self::parse_format(&format_env);
        }

        // 3. Config file
        if let Some(format_str) = &config.general.format {
            *source = ConfigSource::ConfigFile;
            return Self::parse_format(format_str);
        }

        // 4. Default
        *source = ConfigSource::Default;
        Ok(OutputFormat::Human)
    }

    /// Parse a format string into `OutputFormat`.
    fn parse_format(s: &str) -> Result<OutputFormat> {
        match s.to_lowercase().as_str() {
            "human" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            _ => Err(AicwError::Config(format!(
                "Invalid format '{s}'. Valid formats: human, json"
            ))),
        }
    }

    fn resolve_flag(cli: bool, env: &str, file: bool, source: &mut ConfigSource) -> bool {
        if cli {
            *source = ConfigSource::Cli;
            return true;
        }
        if is_env_truthy(env) {
            *source = ConfigSource::Env;
            return true;
        }
        if file {
            *source = ConfigSource::ConfigFile;
            return true;
        }
        *source = ConfigSource::Default;
        false
    }

    /// Provider registry file, honoring `[general] provider_store`.
    #[must_use]
    pub fn providers_file(&self, paths: &AppPaths) -> PathBuf {
        self.config
            .general
            .provider_store
            .clone()
            .unwrap_or_else(|| paths.providers_file())
    }

    /// Event log database, honoring `[general] event_log`.
    #[must_use]
    pub fn events_db_file(&self, paths: &AppPaths) -> PathBuf {
        self.config
            .general
            .event_log
            .clone()
            .unwrap_or_else(|| paths.events_db_file())
    }
}

fn apply_env_overrides(config: &mut Config, defaults: &Config, sources: &mut ConfigSources) -> Result<()> {
    sources.batch_size = file_source(config.batch.batch_size != defaults.batch.batch_size);
    sources.max_concurrent = file_source(
        config.batch.max_concurrent_requests != defaults.batch.max_concurrent_requests,
    );
    sources.worker_enabled = file_source(config.worker.enabled != defaults.worker.enabled);
    sources.worker_interval = file_source(
        config.worker.processing_interval_secs != defaults.worker.processing_interval_secs,
    );

    if let Some(v) = parse_env(ENV_BATCH_SIZE)? {
        config.batch.batch_size = v;
        sources.batch_size = ConfigSource::Env;
    }
    if let Some(v) = parse_env(ENV_BATCH_DELAY_MS)? {
        config.batch.delay_between_batches_ms = v;
    }
    if let Some(v) = parse_env_bool(ENV_ENABLE_BATCHING)? {
        config.batch.enable_batching = v;
    }
    if let Some(v) = parse_env(ENV_MAX_CONCURRENT)? {
        config.batch.max_concurrent_requests = v;
        sources.max_concurrent = ConfigSource::Env;
    }
    if let Some(v) = parse_env_bool(ENV_WORKER_ENABLED)? {
        config.worker.enabled = v;
        config.serverless.enabled = v;
        sources.worker_enabled = ConfigSource::Env;
    }
    if let Some(v) = parse_env(ENV_WORKER_INTERVAL_SECS)? {
        config.worker.processing_interval_secs = v;
        sources.worker_interval = ConfigSource::Env;
    }
    if let Some(v) = parse_env(ENV_WORKER_HEALTH_CHECK_SECS)? {
        config.worker.health_check_interval_secs = v;
    }
    if let Some(v) = parse_env_bool(ENV_WORKER_AUTO_START)? {
        config.worker.auto_start = v;
    }
    Ok(())
}

const fn file_source(changed: bool) -> ConfigSource {
    if changed {
        ConfigSource::ConfigFile
    } else {
        ConfigSource::Default
    }
}

fn parse_env<T: FromStr>(var: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AicwError::ConfigInvalid {
                key: var.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn parse_env_bool(var: &str) -> Result<Option<bool>> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(AicwError::ConfigInvalid {
            key: var.to_string(),
            value: raw,
            message: "expected true or false".to_string(),
        }),
    }
}

/// Check if an environment variable is set to a truthy value.
fn is_env_truthy(var: &str) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

// =============================================================================
// File Configuration
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub classifier: ClassifierConfig,
    pub batch: BatchConfig,
    pub worker: WorkerSection,
    pub serverless: ServerlessSection,
}

/// General application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Default output format (human, json).
    pub format: Option<String>,
    /// Whether to pretty-print JSON output.
    pub pretty: bool,
    /// Provider registry file (defaults to `providers.json` in the config dir).
    pub provider_store: Option<PathBuf>,
    /// Event log database (defaults to `events.sqlite` in the data dir).
    pub event_log: Option<PathBuf>,
}

/// Classifier and provider health settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub max_attempts: usize,
    pub health_ttl_secs: u64,
    pub probe_timeout_ms: u64,
    pub monitor_interval_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            health_ttl_secs: 30,
            probe_timeout_ms: 5000,
            monitor_interval_secs: 60,
        }
    }
}

impl ClassifierConfig {
    #[must_use]
    pub const fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            health_ttl: Duration::from_secs(self.health_ttl_secs),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

/// Batch classifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub delay_between_batches_ms: u64,
    pub item_delay_ms: u64,
    pub enable_batching: bool,
    pub max_concurrent_requests: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            delay_between_batches_ms: 2000,
            item_delay_ms: 500,
            enable_batching: true,
            max_concurrent_requests: 3,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub const fn options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size,
            delay_between_batches: Duration::from_millis(self.delay_between_batches_ms),
            item_delay: Duration::from_millis(self.item_delay_ms),
            enable_batching: self.enable_batching,
            max_concurrent_requests: self.max_concurrent_requests,
        }
    }
}

/// Persistent worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub enabled: bool,
    pub batch_size: usize,
    pub processing_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub auto_start: bool,
    pub restart_pause_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 5,
            processing_interval_secs: 30,
            health_check_interval_secs: 60,
            auto_start: true,
            restart_pause_ms: 2000,
        }
    }
}

impl WorkerSection {
    #[must_use]
    pub const fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            enabled: self.enabled,
            batch_size: self.batch_size,
            processing_interval: Duration::from_secs(self.processing_interval_secs),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            auto_start: self.auto_start,
            restart_pause: Duration::from_millis(self.restart_pause_ms),
        }
    }
}

/// Serverless worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerlessSection {
    pub enabled: bool,
    pub max_processing_time_secs: u64,
    pub inter_batch_pause_ms: u64,
    pub pause_guard_ms: u64,
}

impl Default for ServerlessSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_processing_time_secs: 480,
            inter_batch_pause_ms: 1000,
            pause_guard_ms: 5000,
        }
    }
}

impl ServerlessSection {
    #[must_use]
    pub const fn serverless_config(&self, batch_size: usize) -> ServerlessConfig {
        ServerlessConfig {
            enabled: self.enabled,
            batch_size,
            max_processing_time: Duration::from_secs(self.max_processing_time_secs),
            inter_batch_pause: Duration::from_millis(self.inter_batch_pause_ms),
            pause_guard: Duration::from_millis(self.pause_guard_ms),
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AicwError::Config(format!("Invalid config file: {e}")))
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AicwError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`AicwError::ConfigInvalid`] naming the first bad key.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, value: impl ToString, message: &str) -> AicwError {
            AicwError::ConfigInvalid {
                key: key.to_string(),
                value: value.to_string(),
                message: message.to_string(),
            }
        }

        if let Some(format) = &self.general.format
            && !["human", "json"].contains(&format.as_str())
        {
            return Err(invalid("general.format", format, "expected human or json"));
        }
        let attempts = self.classifier.max_attempts;
        if attempts == 0 || attempts > MAX_ATTEMPTS {
            return Err(invalid(
                "classifier.max_attempts",
                attempts,
                &format!("must be between 1 and {MAX_ATTEMPTS}"),
            ));
        }
        if self.classifier.probe_timeout_ms == 0 {
            return Err(invalid("classifier.probe_timeout_ms", 0, "must be greater than 0"));
        }
        if self.batch.batch_size == 0 {
            return Err(invalid("batch.batch_size", 0, "must be at least 1"));
        }
        if self.batch.max_concurrent_requests == 0 {
            return Err(invalid("batch.max_concurrent_requests", 0, "must be at least 1"));
        }
        if self.worker.batch_size == 0 {
            return Err(invalid("worker.batch_size", 0, "must be at least 1"));
        }
        if self.worker.processing_interval_secs == 0 {
            return Err(invalid("worker.processing_interval_secs", 0, "must be greater than 0"));
        }
        if self.worker.health_check_interval_secs == 0 {
            return Err(invalid("worker.health_check_interval_secs", 0, "must be greater than 0"));
        }
        let budget = self.serverless.max_processing_time_secs;
        if budget == 0 || budget > MAX_SERVERLESS_SECS {
            return Err(invalid(
                "serverless.max_processing_time_secs",
                budget,
                "must be between 1 and 900 seconds",
            ));
        }
        Ok(())
    }
}
