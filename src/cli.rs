// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Launch flags live on [`RawRequest`] so the parsed command line is the
//! resolver's input as-is; this module only adds the launcher's own knobs.

use clap::{Parser, ValueEnum};

use crate::resolve::RawRequest;

/// Command-line arguments for `trainlaunch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "trainlaunch",
    version,
    about = "Launch a training script on the right distributed backend.",
    long_about = None,
    rename_all = "snake_case"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub request: RawRequest,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRAINLAUNCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Resolve and print the launch plan, but don't start anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
