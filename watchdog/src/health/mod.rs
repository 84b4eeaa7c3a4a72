//! Device health bookkeeping: the failure tracker and the recovery dispatcher.

mod recovery;
mod tracker;

pub use recovery::{
    DEFAULT_RECOVERY_COOLDOWN, DEFAULT_RECOVERY_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT,
    RecoveryAttempt, RecoveryDispatcher, RecoveryPolicy,
};
pub use tracker::{
    DEFAULT_SUMMARY_INTERVAL, HealthState, HealthStatus, HealthTable, Tracker, TrackerError,
    Transition,
};
