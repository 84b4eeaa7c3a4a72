//! Reloads the `[devices]` table when the config file changes.

use alloc::sync::Arc;
use std::{
    fs,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr as _};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn};

use super::state::{ConfigRx, ConfigTx};
use crate::config::{self, WatchdogConfig};

/// Load the changed file and forward its `[devices]` table.
///
/// Every other section keeps the value the process started with.
async fn process_config_change(path: &Path, tx: &ConfigTx, rx: &ConfigRx) -> Result<()> {
    info!("Config file modified. Reloading...");
    let prev = rx.borrow().clone();
    let new_config = config::load(path)
        .await
        .wrap_err(format!("Failed to reload config at: {}", path.display()))?;
    let effective = WatchdogConfig {
        devices: new_config.devices.clone(),
        ..prev.as_ref().clone()
    };
    let uneffective_change = effective != new_config;
    let devices_changed = new_config.devices != prev.devices;

    if uneffective_change {
        warn!(
            "Detected change outside of [devices] during runtime. Such changes need a restart and are ignored."
        );
    }

    if devices_changed {
        tx.send(Arc::new(effective))
            .wrap_err("Failed to send updated config through watch channel")?;
        info!(devices = new_config.devices.len(), "Applied [devices] changes from config file.");
    } else if !uneffective_change {
        info!("No changes detected in config.");
    }
    Ok(())
}

fn is_config_event(event: &Event, path: &Path) -> bool {
    let Some(config_filename) = path.file_name() else {
        return false;
    };
    event.paths.iter().any(|event_path| {
        if event_path == path {
            return true;
        }
        if let (Ok(canonical_event), Ok(canonical_config)) =
            (fs::canonicalize(event_path), fs::canonicalize(path))
            && canonical_event == canonical_config
        {
            return true;
        }
        // Editors that write atomically rename a temp file over the config.
        event_path.file_name() == Some(config_filename)
    })
}

/// Watch `path` and publish device list changes through `tx`.
///
/// A file that fails to load is reported and skipped; the last good
/// configuration stays in effect.
pub(super) async fn watch_config_file(path: PathBuf, tx: ConfigTx) {
    let (raw_tx, mut raw_rx) = unbounded_channel::<Event>();

    let watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res
                && raw_tx.send(event).is_err()
            {
                error!("Failed to send event to config watcher channel");
            }
        },
        notify::Config::default(),
    );
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            error!(error = %e, "Failed to create file watcher, config reload disabled");
            return;
        }
    };

    let Some(dir) = path.parent() else {
        error!(path = %path.display(), "Config file has no parent directory, config reload disabled");
        return;
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        error!(error = %e, "Failed to watch config directory, config reload disabled");
        return;
    }

    let rx = tx.subscribe();

    while let Some(event) = raw_rx.recv().await {
        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && is_config_event(&event, &path)
            && let Err(e) = process_config_change(&path, &tx, &rx).await
        {
            error!(error = ?e, "Failed to process config change, keeping previous devices");
        }
    }
}
