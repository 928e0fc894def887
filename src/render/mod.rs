//! Output rendering for human and robot modes.

pub mod error;
pub mod human;
pub mod robot;

use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::Result;

pub use robot::{RobotOutput, render_json};

/// Render `data` as human text or inside the JSON envelope.
///
/// `human` is only called in human mode.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render<T: Serialize>(
    command: &str,
    data: &T,
    errors: Vec<String>,
    format: OutputFormat,
    pretty: bool,
    human: impl FnOnce(&T) -> String,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human(data)),
        OutputFormat::Json => render_json(&RobotOutput::with_errors(command, data, errors), pretty),
    }
}
