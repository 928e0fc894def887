//! Core data models, routing, classification and workers.

pub mod batch;
pub mod classifier;
pub mod expiring;
pub mod fallback;
pub mod health;
pub mod http;
pub mod logging;
pub mod models;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod resources;
pub mod secrets;
pub mod sinks;
pub mod worker;

pub use batch::{BatchClassifier, BatchOptions, BatchOutcome};
pub use classifier::{ClassificationOutcome, Classifier, ItemClassifier};
pub use health::{HealthRecord, HealthStatus};
pub use models::{Article, ClassificationResult, DiscriminationType, Location, Severity};
pub use provider::{NewProvider, Provider, ProviderConfig, ProviderType, ProviderUpdate};
pub use queue::{ProcessingResult, QueueMetrics, QueueStore};
pub use registry::{ProviderRegistry, RegistryOptions};
pub use sinks::{AnalyticsSink, EventSink, MetricsSnapshot, Sinks, WorkerEvent};
pub use worker::{PersistentWorker, ServerlessWorker};
