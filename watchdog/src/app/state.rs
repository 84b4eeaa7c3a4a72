use alloc::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::WatchdogConfig,
    health::{HealthState, HealthTable},
};

pub type ConfigRx = watch::Receiver<Arc<WatchdogConfig>>;
pub(crate) type ConfigTx = watch::Sender<Arc<WatchdogConfig>>;
/// Receiver for the health table, republished after every completed tick.
pub type HealthRx = watch::Receiver<Arc<HealthTable>>;
pub(crate) type HealthTx = watch::Sender<Arc<HealthTable>>;
/// Flips to `true` once the process should stop.
pub type ShutdownRx = watch::Receiver<bool>;

/// Read-only health query for one device.
pub fn get_health(health_rx: &HealthRx, device_id: &str) -> Option<HealthState> {
    health_rx.borrow().get(device_id).cloned()
}

/// Resolves once shutdown was requested or the shutdown sender is gone.
pub async fn shutdown_requested(shutdown: &mut ShutdownRx) {
    drop(shutdown.wait_for(|&stop| stop).await);
}

/// State shared with the status API.
#[derive(Clone)]
pub(crate) struct AppState {
    /// Receiver for per-device health.
    pub health_rx: HealthRx,
}
