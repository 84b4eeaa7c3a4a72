//! Wires configuration, collaborators and background tasks together.

use alloc::sync::Arc;
use core::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use std::path::Path;

use eyre::WrapErr as _;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{Instrument as _, info, warn};

use super::{
    config_watcher::watch_config_file,
    scheduler::{SchedulerSettings, Watchdog},
    state::{AppState, ConfigRx, ShutdownRx},
};
use crate::{
    config::{self, ConfigError, WatchdogConfig, parse_http_url},
    control::HttpDeviceControl,
    events::{EventSink, Fanout, TracingSink, WebhookSink},
    health::{RecoveryDispatcher, Tracker},
    http,
    probe::{HttpProber, ProbeMethod, Prober, TcpProber},
    registry::{ConfigRegistry, DeviceRegistry, HttpRegistry},
};

/// Build a watchdog from `config`.
///
/// Without a `[registry] url` the devices come from `config_rx`.
///
/// # Errors
///
/// Returns an error if a configured URL is invalid or an HTTP client cannot be built.
pub fn build_watchdog(config: &WatchdogConfig, config_rx: ConfigRx) -> eyre::Result<Watchdog> {
    let &WatchdogConfig {
        watchdog: ref scheduler,
        ref recovery,
        ref registry,
        ref notifications,
        ..
    } = config;

    let prober: Arc<dyn Prober> = match scheduler.probe {
        ProbeMethod::Http => Arc::new(
            HttpProber::new(&scheduler.probe_path).wrap_err("Failed to build HTTP prober")?,
        ),
        ProbeMethod::Tcp => Arc::new(TcpProber::new(scheduler.tcp_port)),
    };

    let registry: Arc<dyn DeviceRegistry> = match registry.url.as_deref() {
        Some(url) => {
            let url = parse_http_url("[registry] url", url)?;
            info!(%url, "Reading devices from remote registry");
            Arc::new(
                HttpRegistry::new(url, Duration::from_millis(registry.timeout_ms))
                    .wrap_err("Failed to build registry client")?,
            )
        }
        None => Arc::new(ConfigRegistry::new(config_rx)),
    };

    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink)];
    if let Some(url) = notifications.webhook_url.as_deref() {
        let url = parse_http_url("[notifications] webhook_url", url)?;
        sinks.push(Arc::new(
            WebhookSink::new(url).wrap_err("Failed to build webhook client")?,
        ));
    }

    let watchdog = Watchdog::new(
        registry,
        prober,
        Arc::new(Fanout(sinks)),
        SchedulerSettings::from(scheduler),
        Tracker::new(scheduler.summary_interval()),
    );

    if !recovery.enabled {
        info!("Recovery disabled, devices are only monitored");
        return Ok(watchdog);
    }
    let control_url = recovery
        .control_url
        .as_deref()
        .ok_or(ConfigError::MissingControlUrl)?;
    let control = HttpDeviceControl::new(parse_http_url("[recovery] control_url", control_url)?)
        .wrap_err("Failed to build device control client")?;
    let policy = recovery.policy();
    info!(
        action = %policy.action,
        threshold = policy.threshold,
        cooldown_secs = policy.cooldown.as_secs(),
        "Recovery enabled"
    );
    Ok(watchdog.with_recovery(RecoveryDispatcher::new(policy, Arc::new(control))))
}

async fn bind_status_api(bind: &str, port: u16) -> eyre::Result<TcpListener> {
    let ip: IpAddr = bind
        .parse()
        .wrap_err(format!("Invalid [server] bind address: {bind}"))?;
    let addr = SocketAddr::from((ip, port));
    TcpListener::bind(addr)
        .await
        .wrap_err(format!("Failed to bind status API to {addr}"))
}

/// Load the config at `config_path` and run the watchdog until `shutdown`.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the status API
/// cannot bind or a background task fails.
pub async fn start(config_path: &Path, shutdown: ShutdownRx) -> eyre::Result<()> {
    let config = config::load(config_path).await?;
    let listener = match config.server.as_ref() {
        Some(server) => Some(bind_status_api(&server.bind, server.port).await?),
        None => None,
    };

    let (config_tx, config_rx) = watch::channel(Arc::new(config.clone()));
    let watchdog = build_watchdog(&config, config_rx)?;
    let app_state = AppState {
        health_rx: watchdog.subscribe(),
    };

    // Start config file watcher
    {
        let path = config_path.to_path_buf();
        tokio::spawn(
            async move {
                watch_config_file(path, config_tx).await;
            }
            .in_current_span(),
        );
    }

    let watchdog_task = tokio::spawn(watchdog.run(shutdown.clone()).in_current_span());

    if let Some(listener) = listener {
        http::serve(app_state, listener, shutdown).await?;
    }
    watchdog_task.await.wrap_err("Watchdog task failed")?;
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C.
pub(crate) async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    res = signal::ctrl_c() => drop(res),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C stops the watchdog");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}
