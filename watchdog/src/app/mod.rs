//! The running watchdog: scheduler loop, shared channels and process wiring.

mod config_watcher;
mod scheduler;
mod startup;
mod state;

pub use scheduler::{ProbeReport, SchedulerSettings, TickError, TickReport, Watchdog};
pub use startup::{build_watchdog, start};
pub(crate) use startup::wait_for_signal;
pub(crate) use state::AppState;
pub use state::{ConfigRx, HealthRx, ShutdownRx, get_health, shutdown_requested};
