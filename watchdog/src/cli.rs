//! Command-line interface definitions for the watchdog.

use clap::{Parser, Subcommand, ValueEnum};

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "pixelwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Monitor devices until SIGTERM or Ctrl-C.
    Run(ServiceArgs),

    /// Probe every registered device once and print the result.
    Probe(ProbeArgs),
}

/// Arguments for the long-running watchdog.
#[derive(Debug, Parser)]
pub struct ServiceArgs {
    /// Path to the configuration file
    #[arg(short, long, env = "PIXELWATCH_CONFIG", default_value = "pixelwatch.toml")]
    pub config: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Arguments for a one-shot probe.
#[derive(Debug, Parser)]
pub struct ProbeArgs {
    /// Path to the configuration file
    #[arg(short, long, env = "PIXELWATCH_CONFIG", default_value = "pixelwatch.toml")]
    pub config: String,

    /// Print results as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
    Pretty,
}
