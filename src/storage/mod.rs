//! Storage for configuration, providers, the work queue and the event log.

pub mod config;
pub mod events;
pub mod paths;
pub mod providers;
pub mod queue;
pub mod schema;

pub use config::{Config, ConfigSource, ConfigSources, ResolvedConfig};
pub use events::SqliteEventLog;
pub use paths::AppPaths;
pub use providers::ProviderStore;
pub use queue::MemoryQueue;
