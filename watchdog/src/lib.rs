//! Library entry for the `pixelwatch_watchdog` crate.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the watchdog logic.
//!
//! Provides commands to run the watchdog or probe every device once.
#![cfg_attr(
    test,
    expect(
        clippy::indexing_slicing,
        clippy::unwrap_used,
        reason = "This is not problematic in tests",
    )
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod control;
pub mod device;
pub mod events;
pub mod health;
pub mod http;
pub mod probe;
pub mod registry;

use alloc::sync::Arc;
use std::{env, fs, io, sync::Once};

use eyre::{Result, WrapErr as _, eyre};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{Instrument as _, info, info_span};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use app::ProbeReport;
use cli::{Cli, Command, LogFormat, ProbeArgs};

static INIT_TRACING: Once = Once::new();

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("PIXELWATCH_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_writer(io::stderr)
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// The watchdog's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the watchdog fails to
/// start, or (for `probe`) any device is unreachable.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Run(args) => {
            let config = &args.config;
            let config_path =
                fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))?;

            init_tracing(args.log_format);

            let startup_span = info_span!(
                "pixelwatch",
                ?config_path,
                pid = ?std::process::id(),
                version = env!("CARGO_PKG_VERSION")
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                app::wait_for_signal().await;
                info!("Received shutdown signal");
                drop(shutdown_tx.send(true));
            });

            async {
                info!("Starting watchdog");
                app::start(&config_path, shutdown_rx).await
            }
            .instrument(startup_span)
            .await
        }
        Command::Probe(args) => probe_devices(args).await,
    }
}

#[derive(Serialize)]
struct ProbeLine<'a> {
    id: &'a str,
    name: &'a str,
    address: Option<&'a str>,
    reachable: bool,
    latency_ms: Option<u64>,
    error: Option<&'a str>,
}

impl<'a> From<&'a ProbeReport> for ProbeLine<'a> {
    fn from(&(ref device, ref result): &'a ProbeReport) -> Self {
        let (reachable, latency_ms, error) = match *result {
            Ok(ref outcome) => (
                outcome.reachable,
                u64::try_from(outcome.latency.as_millis()).ok(),
                outcome.error_detail.as_deref(),
            ),
            Err(ref reason) => (false, None, Some(reason.as_str())),
        };
        Self {
            id: &device.id,
            name: device.display_name(),
            address: device.probe_address(),
            reachable,
            latency_ms,
            error,
        }
    }
}

async fn probe_devices(args: ProbeArgs) -> Result<()> {
    init_tracing(LogFormat::Compact);

    let config = config::load(&args.config).await?;
    let (_config_tx, config_rx) = watch::channel(Arc::new(config.clone()));
    let watchdog = app::build_watchdog(&config, config_rx)?;
    let reports = watchdog.probe_once().await?;
    let lines: Vec<ProbeLine<'_>> = reports.iter().map(ProbeLine::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
    } else {
        for line in &lines {
            let state = if line.reachable { "up" } else { "DOWN" };
            let latency = line
                .latency_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms} ms"));
            println!(
                "{:<16} {:<24} {:<5} {:>8}  {}",
                line.id,
                line.address.unwrap_or("-"),
                state,
                latency,
                line.error.unwrap_or_default()
            );
        }
    }

    let unreachable = lines.iter().filter(|line| !line.reachable).count();
    if unreachable > 0 {
        return Err(eyre!(
            "{unreachable} of {} devices are unreachable",
            lines.len()
        ));
    }
    Ok(())
}
