//! Robot-mode output (JSON).
//!
//! Every command wraps its payload in the same envelope so scripts can rely
//! on `schemaVersion`, `command`, `data` and `errors` being present.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "aicw.v1";

/// Envelope for JSON output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotOutput<T> {
    pub schema_version: &'static str,
    pub generated_at: DateTime<Utc>,
    pub command: String,
    pub data: T,
    pub errors: Vec<String>,
}

impl<T> RobotOutput<T> {
    pub fn new(command: impl Into<String>, data: T) -> Self {
        Self::with_errors(command, data, Vec::new())
    }

    pub fn with_errors(command: impl Into<String>, data: T, errors: Vec<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            command: command.into(),
            data,
            errors,
        }
    }
}

/// Serialize `output`, optionally pretty-printed.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_json<T: Serialize>(output: &T, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(output)?)
    } else {
        Ok(serde_json::to_string(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_fields_are_camel_case() {
        let output = RobotOutput::with_errors("batch", vec![1, 2], vec!["a2: timeout".to_string()]);
        let json: serde_json::Value =
            serde_json::from_str(&render_json(&output, false).unwrap()).unwrap();

        assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(json["command"], "batch");
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        assert_eq!(json["errors"][0], "a2: timeout");
        assert!(json["generatedAt"].is_string());
    }

    #[test]
    fn pretty_output_is_multiline() {
        let output = RobotOutput::new("events", serde_json::json!({"a": 1}));
        assert!(render_json(&output, true).unwrap().contains('\n'));
        assert!(!render_json(&output, false).unwrap().contains('\n'));
    }
}
