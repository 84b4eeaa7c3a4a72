//! Recovery dispatch for devices that stay unhealthy.

use alloc::sync::Arc;
use core::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::timeout;

use super::tracker::{HealthState, HealthStatus, elapsed};
use crate::control::{ControlError, DeviceControl, RecoveryAction};

pub const DEFAULT_RECOVERY_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_COOLDOWN: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// When and how to recover a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Consecutive failures before a device is eligible.
    pub threshold: u32,
    /// Minimum time between two attempts for the same device.
    pub cooldown: Duration,
    pub action: RecoveryAction,
    /// Upper bound for one control call.
    pub timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RECOVERY_THRESHOLD,
            cooldown: DEFAULT_RECOVERY_COOLDOWN,
            action: RecoveryAction::SoftReset,
            timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// Result of [`RecoveryDispatcher::maybe_recover`].
#[derive(Debug)]
pub enum RecoveryAttempt {
    NotAttempted,
    Succeeded,
    Failed(ControlError),
}

impl RecoveryAttempt {
    pub const fn attempted(&self) -> bool {
        !matches!(*self, Self::NotAttempted)
    }
}

pub struct RecoveryDispatcher {
    policy: RecoveryPolicy,
    control: Arc<dyn DeviceControl>,
}

impl RecoveryDispatcher {
    pub fn new(policy: RecoveryPolicy, control: Arc<dyn DeviceControl>) -> Self {
        Self { policy, control }
    }

    pub const fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Unhealthy for at least `threshold` probes and out of cooldown.
    pub fn is_eligible(&self, state: &HealthState, now: DateTime<Utc>) -> bool {
        state.status == HealthStatus::Unhealthy
            && state.consecutive_failures >= self.policy.threshold
            && state
                .last_recovery_attempt_at
                .is_none_or(|at| elapsed(at, now) >= self.policy.cooldown)
    }

    /// Run the configured recovery action if `state` is eligible.
    ///
    /// The caller records the attempt in the tracker; a failed action is
    /// returned, never retried here.
    pub async fn maybe_recover(
        &self,
        device_id: &str,
        state: &HealthState,
        now: DateTime<Utc>,
    ) -> RecoveryAttempt {
        if !self.is_eligible(state, now) {
            return RecoveryAttempt::NotAttempted;
        }

        let action = self.policy.action;
        match timeout(self.policy.timeout, self.control.perform(action, device_id)).await {
            Ok(Ok(())) => RecoveryAttempt::Succeeded,
            Ok(Err(e)) => RecoveryAttempt::Failed(e),
            Err(_elapsed) => RecoveryAttempt::Failed(ControlError::Timeout {
                device_id: device_id.to_string(),
                action,
                timeout: self.policy.timeout,
            }),
        }
    }
}
