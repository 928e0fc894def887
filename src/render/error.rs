//! Error rendering for aicw.
//!
//! Human mode prints the message, its stable code and a one-line hint.
//! JSON mode prints a structured object for machine consumption.

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::{AicwError, ErrorCategory};

/// Render an error for the given output mode.
#[must_use]
pub fn render_error(error: &AicwError, format: OutputFormat, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_simple(error),
    }
}

/// Render error as structured JSON.
#[must_use]
pub fn render_error_json(error: &AicwError, pretty: bool) -> String {
    let error_json = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&error_json)
    } else {
        serde_json::to_string(&error_json)
    };
    rendered.unwrap_or_else(|_| render_simple(error))
}

/// Plain text: message, code, hint.
#[must_use]
pub fn render_simple(error: &AicwError) -> String {
    let mut out = format!("Error: {error} [{}]", error.error_code());
    if let Some(hint) = hint(error) {
        out.push_str("\n  hint: ");
        out.push_str(hint);
    }
    out
}

fn hint(error: &AicwError) -> Option<&'static str> {
    match error {
        AicwError::ProviderNotFound(_) => Some("run `aicw providers list` to see configured ids"),
        AicwError::ProviderInUse(_) => Some("use `aicw providers disable <id>` instead"),
        AicwError::SecretMissing { .. } => {
            Some("export the referenced variable or store the key with `--keyring ACCOUNT --store-key`")
        }
        AicwError::WorkerState(_) => Some("set `enabled = true` under [worker] or [serverless], or AICW_WORKER_ENABLED=1"),
        AicwError::ConfigInvalid { .. } | AicwError::Config(_) => {
            Some("check the config file (see --config / AICW_CONFIG)")
        }
        _ => match error.category() {
            ErrorCategory::Network => Some("check connectivity to the provider endpoint"),
            _ => None,
        },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorJson {
    error: ErrorBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: &'static str,
    category: String,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl ErrorJson {
    fn from_error(error: &AicwError) -> Self {
        Self {
            error: ErrorBody {
                code: error.error_code(),
                category: error.category().to_string(),
                message: error.to_string(),
                retryable: error.is_retryable(),
                provider: error.provider().map(String::from),
                hint: hint(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_contains;

    #[test]
    fn simple_rendering_includes_code_and_hint() {
        let rendered = render_simple(&AicwError::ProviderNotFound("ghost".to_string()));
        assert_contains!(rendered, "provider not found: ghost");
        assert_contains!(rendered, "[AICW-P002]");
        assert_contains!(rendered, "aicw providers list");
    }

    #[test]
    fn json_rendering_is_structured() {
        let error = AicwError::Timeout {
            provider: "openai".to_string(),
            millis: 30_000,
        };
        let json: serde_json::Value =
            serde_json::from_str(&render_error(&error, OutputFormat::Json, false)).unwrap();
        assert_eq!(json["error"]["code"], "AICW-N001");
        assert_eq!(json["error"]["retryable"], true);
        assert_eq!(json["error"]["provider"], "openai");
        assert_eq!(json["error"]["category"], "Network error");
    }

    #[test]
    fn internal_errors_have_no_hint() {
        let error = AicwError::Other(anyhow::anyhow!("boom"));
        assert!(!render_simple(&error).contains("hint"));
    }
}
