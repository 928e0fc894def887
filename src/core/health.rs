//! Provider health records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl HealthStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }

    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the latest probe for one provider.
///
/// Advisory only: may be up to one cache TTL stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub provider_id: String,
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// From the provider's usage counters at probe time.
    pub error_rate: f64,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HealthRecord {
    #[must_use]
    pub fn healthy(provider_id: &str, response_time_ms: u64, error_rate: f64) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            status: HealthStatus::Healthy,
            response_time_ms,
            error_rate,
            last_checked: Utc::now(),
            error_message: None,
        }
    }

    #[must_use]
    pub fn down(
        provider_id: &str,
        response_time_ms: u64,
        error_rate: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            status: HealthStatus::Down,
            response_time_ms,
            error_rate,
            last_checked: Utc::now(),
            error_message: Some(message.into()),
        }
    }
}
