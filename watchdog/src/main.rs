//! Standalone `pixelwatch_watchdog` binary.

use clap::Parser as _;
use eyre::Result;
use pixelwatch_watchdog::{cli::Cli, inner_main};

#[tokio::main]
async fn main() -> Result<()> {
    inner_main(Cli::parse()).await
}
