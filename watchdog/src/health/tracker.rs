//! Per-device failure state machine.
//!
//! The tracker turns a stream of probe outcomes into a small number of
//! transitions: one event when a device goes offline, rate limited summaries
//! while it stays offline, and one event when it comes back. It is a pure
//! function of its inputs; time is always passed in.

use core::time::Duration;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::probe::ProbeOutcome;

/// Default spacing of "still unhealthy" summaries.
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Device health as seen by the watchdog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Unhealthy,
}

/// Everything the watchdog remembers about one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub status: HealthStatus,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Start of the current unhealthy streak.
    pub first_failure_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    /// Last time the outage was reported (streak start or summary).
    pub last_summary_at: Option<DateTime<Utc>>,
    pub last_recovery_attempt_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// What a single probe outcome changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameUnhealthy,
    StillUnhealthySummaryDue {
        /// Time since the streak started.
        downtime: Duration,
        failed_checks: u32,
    },
    Recovered {
        downtime: Duration,
        failed_checks: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TrackerError {
    #[error("probe result carries an empty device id")]
    EmptyDeviceId,
    #[error("more than one probe result for device '{0}' in the same batch")]
    DuplicateResult(String),
    #[error("no health state for device '{0}'")]
    UnknownDevice(String),
}

/// Table of per-device health, keyed by device id.
pub type HealthTable = HashMap<String, HealthState>;

pub(super) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    // A clock stepping backwards reads as no time having passed.
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl HealthState {
    /// Time since the current streak started, zero while healthy.
    pub fn downtime(&self, now: DateTime<Utc>) -> Duration {
        self.first_failure_at
            .map_or(Duration::ZERO, |since| elapsed(since, now))
    }

    fn apply(
        &mut self,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
        summary_interval: Duration,
    ) -> Transition {
        self.last_check_at = Some(now);
        self.last_latency_ms = Some(millis(outcome.latency));
        self.last_error.clone_from(&outcome.error_detail);

        if outcome.reachable {
            return match self.status {
                HealthStatus::Healthy => Transition::None,
                HealthStatus::Unhealthy => {
                    let transition = Transition::Recovered {
                        downtime: self.downtime(now),
                        failed_checks: self.consecutive_failures,
                    };
                    self.status = HealthStatus::Healthy;
                    self.consecutive_failures = 0;
                    self.first_failure_at = None;
                    self.last_summary_at = None;
                    transition
                }
            };
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            HealthStatus::Healthy => {
                self.status = HealthStatus::Unhealthy;
                self.first_failure_at = Some(now);
                self.last_summary_at = Some(now);
                Transition::BecameUnhealthy
            }
            HealthStatus::Unhealthy => {
                let due = self
                    .last_summary_at
                    .is_none_or(|at| elapsed(at, now) >= summary_interval);
                if due {
                    self.last_summary_at = Some(now);
                    Transition::StillUnhealthySummaryDue {
                        downtime: self.downtime(now),
                        failed_checks: self.consecutive_failures,
                    }
                } else {
                    Transition::None
                }
            }
        }
    }
}

/// Owns the health table and derives transitions from probe outcomes.
#[derive(Debug, Clone)]
pub struct Tracker {
    summary_interval: Duration,
    states: HealthTable,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_INTERVAL)
    }
}

impl Tracker {
    pub fn new(summary_interval: Duration) -> Self {
        Self {
            summary_interval,
            states: HealthTable::new(),
        }
    }

    pub const fn summary_interval(&self) -> Duration {
        self.summary_interval
    }

    /// Feed one probe outcome for `device_id`, creating its state on first sight.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::EmptyDeviceId`] for an empty id; nothing is recorded then.
    pub fn record(
        &mut self,
        device_id: &str,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> Result<Transition, TrackerError> {
        if device_id.trim().is_empty() {
            return Err(TrackerError::EmptyDeviceId);
        }
        let summary_interval = self.summary_interval;
        let state = self.states.entry(device_id.to_string()).or_default();
        Ok(state.apply(outcome, now, summary_interval))
    }

    /// Apply all outcomes of one tick, or none of them.
    ///
    /// Transitions are returned in input order.
    ///
    /// # Errors
    ///
    /// Returns an error without touching any state if an id is empty or a device
    /// appears twice (its results would be applied out of probe order).
    pub fn record_all<'a, I>(
        &mut self,
        outcomes: I,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transition>, TrackerError>
    where
        I: IntoIterator<Item = (&'a str, &'a ProbeOutcome)> + Clone,
    {
        let mut seen = HashSet::new();
        for (device_id, _) in outcomes.clone() {
            if device_id.trim().is_empty() {
                return Err(TrackerError::EmptyDeviceId);
            }
            if !seen.insert(device_id) {
                return Err(TrackerError::DuplicateResult(device_id.to_string()));
            }
        }

        outcomes
            .into_iter()
            .map(|(device_id, outcome)| self.record(device_id, outcome, now))
            .collect()
    }

    /// Remember that a recovery action was dispatched for `device_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::UnknownDevice`] if the device was never probed.
    pub fn note_recovery_attempt(
        &mut self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let state = self
            .states
            .get_mut(device_id)
            .ok_or_else(|| TrackerError::UnknownDevice(device_id.to_string()))?;
        state.last_recovery_attempt_at = Some(now);
        Ok(())
    }

    pub fn state(&self, device_id: &str) -> Option<&HealthState> {
        self.states.get(device_id)
    }

    /// Drop the state of every device not in `registered`. Returns how many were dropped.
    pub fn retain<'ids>(&mut self, registered: impl IntoIterator<Item = &'ids str>) -> usize {
        let keep: HashSet<&str> = registered.into_iter().collect();
        let before = self.states.len();
        self.states.retain(|id, _| keep.contains(id.as_str()));
        before - self.states.len()
    }

    pub fn snapshot(&self) -> HealthTable {
        self.states.clone()
    }
}
