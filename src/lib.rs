//! aicw - AI Classification Worker
//!
//! Classifies news articles about AI-related discrimination through a pool of
//! LLM providers. A health-aware registry routes each call, the classifier
//! retries across providers and falls back to a keyword heuristic, a batch
//! classifier bounds concurrency, and two workers (a timer-driven persistent
//! one and a time-boxed serverless one) drain a queue through it.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod providers;
pub mod render;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{AicwError, ExitCode, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
