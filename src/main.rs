//! aicw - AI Classification Worker
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use aicw::cli::{Cli, Commands, OutputFormat};
use aicw::core::logging;
use aicw::storage::config::ResolvedConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let resolved = ResolvedConfig::resolve(&cli);

    // Initialize logging: flag, then AICW_LOG, then the config file.
    let log_level = cli
        .log_level
        .as_deref()
        .and_then(logging::LogLevel::from_arg)
        .or_else(logging::parse_log_level_from_env)
        .or_else(|| {
            resolved
                .as_ref()
                .ok()
                .and_then(|r| r.config.general.log_level.as_deref())
                .and_then(logging::LogLevel::from_arg)
        })
        .unwrap_or_default();
    let log_format = if cli.json_output {
        logging::LogFormat::Json
    } else {
        logging::parse_log_format_from_env().unwrap_or_default()
    };
    let verbose = cli.verbose || resolved.as_ref().is_ok_and(|r| r.verbose);
    logging::init(log_level, log_format, logging::parse_log_file_from_env(), verbose);

    let (format, pretty) = match &resolved {
        Ok(r) => (r.format, r.pretty),
        Err(_) if cli.json => (OutputFormat::Json, cli.pretty),
        Err(_) => (cli.format, cli.pretty),
    };

    let result = match resolved {
        Ok(resolved) => run(cli, resolved).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{}", e);
            eprintln!("{}", aicw::render::error::render_error(&e, format, pretty));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli, resolved: ResolvedConfig) -> aicw::Result<()> {
    match cli.command {
        None => {
            print_quickstart();
            Ok(())
        }
        Some(Commands::Classify(args)) => aicw::cli::classify::execute(&args, &resolved).await,
        Some(Commands::Batch(args)) => aicw::cli::batch::execute(&args, &resolved).await,
        Some(Commands::Providers(cmd)) => aicw::cli::providers::execute(&cmd, &resolved).await,
        Some(Commands::Worker(args)) => aicw::cli::worker::execute(&args, &resolved).await,
        Some(Commands::Drain(args)) => aicw::cli::drain::execute(&args, &resolved).await,
        Some(Commands::Events(args)) => aicw::cli::events::execute(&args, &resolved),
    }
}

fn print_quickstart() {
    println!(
        "aicw {} - AI Classification Worker

Quick start:
  aicw providers init                      Register providers from OPENAI_API_KEY / ANTHROPIC_API_KEY
  aicw classify --title T --content C      Classify one article
  aicw batch --file articles.json          Classify a JSON array of articles
  aicw drain --queue articles.json         Run one time-boxed processing session
  aicw worker --queue articles.json        Process on a timer until Ctrl-C
  aicw events                              Show the worker event log

Add --json for machine-readable output. Run `aicw --help` for all options.",
        env!("CARGO_PKG_VERSION")
    );
}
