//! Error types for aicw.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are grouped into six categories:
//! - **Network**: Connection failures and request timeouts
//! - **Configuration**: Config file parsing, validation, missing secrets
//! - **Provider**: Unavailable providers, API errors, unparseable responses
//! - **Worker**: Worker lifecycle violations, session and batch failures
//! - **Storage**: Provider store and event log failures
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `AICW-P003`) for programmatic handling.
//!
//! Classification itself never surfaces these to its caller: provider failures
//! are absorbed by the retry loop and the keyword fallback. The variants here
//! are what the retry loop observes, and what admin and worker operations return.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network issues (timeout, connection refused, transport failure).
    Network,
    /// Configuration issues (parse errors, invalid values, missing secrets).
    Configuration,
    /// Provider-specific issues (unavailable, API errors, bad responses).
    Provider,
    /// Worker lifecycle and session issues.
    Worker,
    /// Persistence issues (provider store, event log).
    Storage,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network error",
            Self::Configuration => "Configuration error",
            Self::Provider => "Provider error",
            Self::Worker => "Worker error",
            Self::Storage => "Storage error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Network => "N",
            Self::Configuration => "C",
            Self::Provider => "P",
            Self::Worker => "W",
            Self::Storage => "S",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Provider or resource not found
    NotFound = 2,
    /// Configuration, validation or parse errors
    ParseError = 3,
    /// Timeout
    Timeout = 4,
    /// Worker refused the request (disabled, already running)
    WorkerBusy = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for aicw operations.
///
/// Each variant has:
/// - A stable error code (e.g., `AICW-P003`)
/// - A category for classification
/// - A retryable flag for retry logic
#[derive(Error, Debug)]
pub enum AicwError {
    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Provider call exceeded its per-call timeout.
    #[error("request timeout after {millis}ms for {provider}")]
    Timeout { provider: String, millis: u64 },

    /// Transport-level failure (connection refused, DNS, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    // ==========================================================================
    // Provider errors (Category: Provider)
    // ==========================================================================
    /// No enabled provider is left to try.
    #[error("no provider available: {0}")]
    ProviderUnavailable(String),

    /// Provider API returned a non-success response.
    #[error("provider {provider} API error: {message}")]
    ProviderApiError {
        provider: String,
        status_code: Option<u16>,
        message: String,
    },

    /// Provider response could not be turned into a classification.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    /// No provider with the given id exists.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider has usage history and cannot be removed.
    #[error("provider {0} has usage history; disable it instead of removing it")]
    ProviderInUse(String),

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    /// Unknown provider type name.
    #[error("invalid provider type: {0}")]
    InvalidProviderType(String),

    /// A referenced API key could not be resolved.
    #[error("secret not available for {provider}: {source_name}")]
    SecretMissing {
        provider: String,
        source_name: String,
    },

    // ==========================================================================
    // Worker errors (Category: Worker)
    // ==========================================================================
    /// A whole chunk failed outside per-item handling.
    #[error("batch processing failed: {0}")]
    BatchFailed(String),

    /// A serverless session aborted.
    #[error("worker session {session_id} failed: {message}")]
    WorkerSession { session_id: String, message: String },

    /// Lifecycle operation not valid in the current state.
    #[error("worker state error: {0}")]
    WorkerState(String),

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// Provider store or event log failure.
    #[error("storage error: {0}")]
    Storage(String),

    // ==========================================================================
    // I/O errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ==========================================================================
    // Generic wrapper (Category: Internal)
    // ==========================================================================
    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AicwError {
    /// Map error to process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::ProviderNotFound(_) => ExitCode::NotFound,

            Self::Config(_)
            | Self::ConfigInvalid { .. }
            | Self::InvalidProviderType(_)
            | Self::SecretMissing { .. }
            | Self::ParseResponse(_)
            | Self::ProviderInUse(_) => ExitCode::ParseError,

            Self::Timeout { .. } => ExitCode::Timeout,

            Self::WorkerState(_) => ExitCode::WorkerBusy,

            Self::Network(_)
            | Self::ProviderUnavailable(_)
            | Self::ProviderApiError { .. }
            | Self::BatchFailed(_)
            | Self::WorkerSession { .. }
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout { .. } | Self::Network(_) => ErrorCategory::Network,

            Self::Config(_)
            | Self::ConfigInvalid { .. }
            | Self::InvalidProviderType(_)
            | Self::SecretMissing { .. } => ErrorCategory::Configuration,

            Self::ProviderUnavailable(_)
            | Self::ProviderApiError { .. }
            | Self::ParseResponse(_)
            | Self::ProviderNotFound(_)
            | Self::ProviderInUse(_) => ErrorCategory::Provider,

            Self::BatchFailed(_) | Self::WorkerSession { .. } | Self::WorkerState(_) => {
                ErrorCategory::Worker
            }

            Self::Storage(_) => ErrorCategory::Storage,

            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `AICW-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            // Network errors (N001-N099)
            Self::Timeout { .. } => "AICW-N001",
            Self::Network(_) => "AICW-N099",

            // Configuration errors (C001-C099)
            Self::Config(_) => "AICW-C001",
            Self::ConfigInvalid { .. } => "AICW-C002",
            Self::InvalidProviderType(_) => "AICW-C010",
            Self::SecretMissing { .. } => "AICW-C020",

            // Provider errors (P001-P099)
            Self::ProviderUnavailable(_) => "AICW-P001",
            Self::ProviderNotFound(_) => "AICW-P002",
            Self::ProviderApiError { .. } => "AICW-P003",
            Self::ProviderInUse(_) => "AICW-P004",
            Self::ParseResponse(_) => "AICW-P020",

            // Worker errors (W001-W099)
            Self::WorkerState(_) => "AICW-W001",
            Self::WorkerSession { .. } => "AICW-W002",
            Self::BatchFailed(_) => "AICW-W010",

            // Storage errors (S001-S099)
            Self::Storage(_) => "AICW-S001",

            // Internal errors (X001-X099)
            Self::Io(_) => "AICW-X001",
            Self::Json(_) => "AICW-X002",
            Self::Other(_) => "AICW-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying,
    /// possibly against a different provider.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network(_)
                | Self::ProviderUnavailable(_)
                | Self::ProviderApiError { .. }
                | Self::ParseResponse(_)
                | Self::SecretMissing { .. }
        )
    }

    /// Returns the provider id if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Timeout { provider, .. }
            | Self::ProviderApiError { provider, .. }
            | Self::SecretMissing { provider, .. } => Some(provider),
            Self::ProviderNotFound(p) | Self::ProviderInUse(p) => Some(p),
            _ => None,
        }
    }

    /// HTTP status code returned by the provider, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::ProviderApiError { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for AicwError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for aicw operations.
pub type Result<T> = std::result::Result<T, AicwError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_category_code_prefix() {
        assert_eq!(ErrorCategory::Network.code_prefix(), "N");
        assert_eq!(ErrorCategory::Configuration.code_prefix(), "C");
        assert_eq!(ErrorCategory::Provider.code_prefix(), "P");
        assert_eq!(ErrorCategory::Worker.code_prefix(), "W");
        assert_eq!(ErrorCategory::Storage.code_prefix(), "S");
        assert_eq!(ErrorCategory::Internal.code_prefix(), "X");
    }

    #[test]
    fn error_category_display() {
        assert_eq!(format!("{}", ErrorCategory::Worker), "Worker error");
        assert_eq!(format!("{}", ErrorCategory::Network), "Network error");
    }

    #[test]
    fn provider_errors_have_correct_category() {
        let err = AicwError::ProviderApiError {
            provider: "openai-1".to_string(),
            status_code: Some(500),
            message: "boom".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Provider);
        assert_eq!(err.status_code(), Some(500));

        let err = AicwError::ParseResponse("no json".to_string());
        assert_eq!(err.category(), ErrorCategory::Provider);
    }

    #[test]
    fn error_codes_carry_category_prefix() {
        let errors = vec![
            AicwError::Timeout {
                provider: "p".to_string(),
                millis: 10,
            },
            AicwError::Config("x".to_string()),
            AicwError::ProviderUnavailable("none".to_string()),
            AicwError::WorkerState("already running".to_string()),
            AicwError::Storage("locked".to_string()),
            AicwError::Other(anyhow::anyhow!("bug")),
        ];

        for err in errors {
            let code = err.error_code();
            let expected = format!("AICW-{}", err.category().code_prefix());
            assert!(
                code.starts_with(&expected),
                "{code} should start with {expected}"
            );
        }
    }

    #[test]
    fn error_codes_are_unique() {
        use std::collections::HashSet;

        let codes = [
            AicwError::Timeout {
                provider: String::new(),
                millis: 0,
            }
            .error_code(),
            AicwError::Network(String::new()).error_code(),
            AicwError::Config(String::new()).error_code(),
            AicwError::ConfigInvalid {
                key: String::new(),
                value: String::new(),
                message: String::new(),
            }
            .error_code(),
            AicwError::InvalidProviderType(String::new()).error_code(),
            AicwError::SecretMissing {
                provider: String::new(),
                source_name: String::new(),
            }
            .error_code(),
            AicwError::ProviderUnavailable(String::new()).error_code(),
            AicwError::ProviderNotFound(String::new()).error_code(),
            AicwError::ProviderApiError {
                provider: String::new(),
                status_code: None,
                message: String::new(),
            }
            .error_code(),
            AicwError::ProviderInUse(String::new()).error_code(),
            AicwError::ParseResponse(String::new()).error_code(),
            AicwError::WorkerState(String::new()).error_code(),
            AicwError::WorkerSession {
                session_id: String::new(),
                message: String::new(),
            }
            .error_code(),
            AicwError::BatchFailed(String::new()).error_code(),
            AicwError::Storage(String::new()).error_code(),
        ];

        let unique: HashSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes should be unique");
    }

    #[test]
    fn provider_failures_are_retryable() {
        assert!(
            AicwError::Timeout {
                provider: "p".to_string(),
                millis: 5000,
            }
            .is_retryable()
        );
        assert!(AicwError::ParseResponse("missing severity".to_string()).is_retryable());
        assert!(AicwError::Network("reset".to_string()).is_retryable());
    }

    #[test]
    fn lifecycle_errors_are_not_retryable() {
        assert!(!AicwError::WorkerState("disabled".to_string()).is_retryable());
        assert!(!AicwError::ProviderInUse("p".to_string()).is_retryable());
        assert!(!AicwError::Config("bad".to_string()).is_retryable());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(
            AicwError::ProviderNotFound("x".to_string()).exit_code(),
            ExitCode::NotFound
        );
        assert_eq!(
            AicwError::WorkerState("x".to_string()).exit_code(),
            ExitCode::WorkerBusy
        );
        assert_eq!(i32::from(ExitCode::Timeout), 4);
    }

    #[test]
    fn provider_extraction() {
        let err = AicwError::SecretMissing {
            provider: "anthropic-main".to_string(),
            source_name: "env:ANTHROPIC_API_KEY".to_string(),
        };
        assert_eq!(err.provider(), Some("anthropic-main"));
        assert_eq!(AicwError::Network("x".to_string()).provider(), None);
    }

    #[test]
    fn sqlite_errors_map_to_storage() {
        let err: AicwError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.category(), ErrorCategory::Storage);
    }
}
