//! Shim binary that calls into the `pixelwatch_watchdog` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    pixelwatch_watchdog::inner_main(pixelwatch_watchdog::cli::Cli::parse()).await
}
