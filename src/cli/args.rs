//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::provider::ProviderType;
use crate::core::secrets::ApiKeyRef;
use crate::error::{AicwError, Result};

/// AI Classification Worker - classify articles through routed LLM providers.
#[derive(Parser, Debug)]
#[command(name = "aicw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    /// Shorthand for --format json
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (overrides AICW_CONFIG)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a single article
    Classify(ClassifyArgs),

    /// Classify a JSON array of articles
    Batch(BatchArgs),

    /// Manage classification providers
    #[command(subcommand)]
    Providers(ProvidersCommand),

    /// Run the persistent worker over a queue file until interrupted
    Worker(WorkerArgs),

    /// Run one time-boxed processing session over a queue file
    Drain(DrainArgs),

    /// Show the worker event log
    Events(EventsArgs),
}

/// Arguments for the `classify` command.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// JSON file holding one article
    #[arg(long, value_name = "PATH", conflicts_with_all = ["title", "content"])]
    pub file: Option<PathBuf>,

    /// Article title
    #[arg(long, requires = "content")]
    pub title: Option<String>,

    /// Article body
    #[arg(long, requires = "title")]
    pub content: Option<String>,

    /// Publication or wire service
    #[arg(long)]
    pub source: Option<String>,

    /// Original URL
    #[arg(long)]
    pub url: Option<String>,

    /// Article id (defaults to "cli")
    #[arg(long, default_value = "cli")]
    pub id: String,

    /// Skip providers and use the keyword heuristic
    #[arg(long)]
    pub offline: bool,
}

impl ClassifyArgs {
    /// Validate argument combinations.
    ///
    /// # Errors
    ///
    /// Returns an error when neither a file nor title and content were given.
    pub fn validate(&self) -> Result<()> {
        if self.file.is_none() && (self.title.is_none() || self.content.is_none()) {
            return Err(AicwError::Config(
                "Provide --file, or both --title and --content".to_string(),
            ));
        }
        Ok(())
    }
}

/// Arguments for the `batch` command.
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// JSON array of articles
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,

    /// Items per chunk (overrides config)
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Concurrent provider calls (overrides config)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Classify one item at a time
    #[arg(long)]
    pub sequential: bool,

    /// Write results to this file as JSON
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Arguments for the `worker` command.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// JSON array of articles to enqueue
    #[arg(long, value_name = "PATH")]
    pub queue: PathBuf,

    /// Seconds between processing cycles (overrides config)
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Stop once nothing is left pending
    #[arg(long)]
    pub exit_when_empty: bool,

    /// Write results to this file as JSON on exit
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Do not record events in the event log
    #[arg(long)]
    pub no_event_log: bool,
}

/// Arguments for the `drain` command.
#[derive(Args, Debug)]
pub struct DrainArgs {
    /// JSON array of articles to enqueue
    #[arg(long, value_name = "PATH")]
    pub queue: PathBuf,

    /// Session budget in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    pub budget: Option<u64>,

    /// Write results to this file as JSON
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Do not record events in the event log
    #[arg(long)]
    pub no_event_log: bool,
}

/// Arguments for the `events` command.
#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Number of entries to show
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Show metric snapshots instead of events
    #[arg(long)]
    pub snapshots: bool,

    /// Delete entries older than this many days, then show the rest
    #[arg(long, value_name = "DAYS")]
    pub cleanup: Option<i64>,
}

/// Provider subcommands.
#[derive(Subcommand, Debug)]
pub enum ProvidersCommand {
    /// List providers with usage statistics
    List,

    /// Register a provider
    Add(ProviderAddArgs),

    /// Change provider settings
    Update(ProviderUpdateArgs),

    /// Enable a provider
    Enable {
        /// Provider id
        id: String,
    },

    /// Disable a provider
    Disable {
        /// Provider id
        id: String,
    },

    /// Remove a provider without usage history
    Remove {
        /// Provider id
        id: String,
    },

    /// Probe a provider and record the result
    Test {
        /// Provider id
        id: String,
    },

    /// Probe every enabled provider
    Health,

    /// Register providers for vendor keys found in the environment
    Init,
}

/// Where an API key comes from on the command line.
#[derive(Args, Debug, Default)]
pub struct KeyArgs {
    /// Read the API key from this environment variable at call time
    #[arg(long, value_name = "VAR", conflicts_with = "keyring")]
    pub key_env: Option<String>,

    /// Read the API key from this OS keyring account
    #[arg(long, value_name = "ACCOUNT")]
    pub keyring: Option<String>,

    /// Read a key from stdin and store it under --keyring
    #[arg(long, requires = "keyring")]
    pub store_key: bool,
}

impl KeyArgs {
    #[must_use]
    pub fn key_ref(&self) -> Option<ApiKeyRef> {
        self.key_env
            .as_deref()
            .map(ApiKeyRef::env)
            .or_else(|| self.keyring.as_deref().map(ApiKeyRef::keyring))
    }
}

/// Arguments for `providers add`.
#[derive(Args, Debug)]
pub struct ProviderAddArgs {
    /// Display name
    #[arg(long)]
    pub name: String,

    /// Provider type (openai, anthropic, custom)
    #[arg(long = "type", value_name = "TYPE", value_parser = parse_provider_type)]
    pub provider_type: ProviderType,

    /// Explicit id (derived from the name otherwise)
    #[arg(long)]
    pub id: Option<String>,

    /// Routing priority; higher is tried first
    #[arg(long, default_value = "1", allow_negative_numbers = true)]
    pub priority: i32,

    /// Register disabled
    #[arg(long)]
    pub disabled: bool,

    #[command(flatten)]
    pub key: KeyArgs,

    #[command(flatten)]
    pub settings: ProviderSettingsArgs,
}

/// Arguments for `providers update`.
#[derive(Args, Debug)]
pub struct ProviderUpdateArgs {
    /// Provider id
    pub id: String,

    /// New display name
    #[arg(long)]
    pub name: Option<String>,

    /// New routing priority
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    #[command(flatten)]
    pub key: KeyArgs,

    #[command(flatten)]
    pub settings: ProviderSettingsArgs,
}

/// Call settings shared by `add` and `update`.
#[derive(Args, Debug, Default)]
pub struct ProviderSettingsArgs {
    /// Model name
    #[arg(long)]
    pub model: Option<String>,

    /// API base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Completion token limit
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Per-call timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Cost per 1000 tokens for usage estimates
    #[arg(long, value_name = "USD")]
    pub cost_per_1k: Option<f64>,
}

fn parse_provider_type(s: &str) -> std::result::Result<ProviderType, String> {
    ProviderType::from_cli_name(s).map_err(|e| e.to_string())
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
}
