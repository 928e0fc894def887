//! Structured per-test logging.
//!
//! Output goes to stderr (shown by `cargo test` only for failing tests or
//! with `--nocapture`). Controlled by:
//! - `AICW_TEST_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//! - `AICW_TEST_LOG_JSON`: "1" or "true" for one JSON object per line
#![allow(dead_code)]

use std::env;
use std::fmt::Display;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    test: &'a str,
    phase: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a serde_json::Value>,
}

struct Settings {
    min_level: LogLevel,
    json: bool,
}

fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| Settings {
        min_level: env::var("AICW_TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("AICW_TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

/// Per-test logger with phase and duration tracking.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    phase: Mutex<String>,
}

impl TestLogger {
    #[must_use]
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            phase: Mutex::new("init".to_string()),
        };
        logger.log(LogLevel::Info, "test starting", None);
        logger
    }

    /// Common phases: "setup", "test", "verify".
    pub fn phase(&self, phase: &str) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase.to_string();
        self.log(LogLevel::Debug, &format!("phase: {phase}"), None);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn with_context(&self, level: LogLevel, message: &str, context: &serde_json::Value) {
        self.log(level, message, Some(context));
    }

    pub fn finish_ok(&self) {
        let message = format!("test passed ({}ms)", self.elapsed_ms());
        self.log(LogLevel::Info, &message, None);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn log(&self, level: LogLevel, message: &str, context: Option<&serde_json::Value>) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if settings.json {
            let entry = LogEntry {
                timestamp: Utc::now(),
                level,
                test: &self.test_name,
                phase: &phase,
                message,
                context,
            };
            if let Ok(line) = serde_json::to_string(&entry) {
                eprintln!("{line}");
            }
        } else {
            let suffix = context.map(|c| format!(" {c}")).unwrap_or_default();
            eprintln!(
                "[{level:<5}] {} [{phase}] {message}{suffix}",
                self.test_name
            );
        }
    }
}
