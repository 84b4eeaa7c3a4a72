//! The watchdog loop: probe every registered device once per tick, feed the
//! outcomes to the tracker and turn transitions into events.

use alloc::sync::Arc;
use core::{error::Error, time::Duration};
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::{StreamExt as _, future, stream};
use thiserror::Error as ThisError;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info};

use super::state::{HealthRx, HealthTx, ShutdownRx, shutdown_requested};
use crate::{
    config::SchedulerConfig,
    device::DeviceRecord,
    events::{EventSink, Severity, WatchdogEvent},
    health::{RecoveryAttempt, RecoveryDispatcher, Tracker, TrackerError, Transition},
    probe::{ProbeError, ProbeOutcome, Prober},
    registry::{DeviceRegistry, RegistryError},
};

/// Cadence and fan-out of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            probe_timeout: config.probe_timeout(),
            max_concurrent_probes: config.max_concurrent_probes,
        }
    }
}

/// What one completed tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub probed: usize,
    /// Devices left out because they cannot be probed.
    pub skipped: usize,
    /// Transitions other than [`Transition::None`].
    pub transitions: usize,
    pub recoveries: usize,
    /// Health states dropped for devices no longer registered.
    pub pruned: usize,
}

#[derive(Debug, ThisError)]
pub enum TickError {
    #[error("device registry unavailable")]
    Registry(#[from] RegistryError),
    #[error("tick cancelled by shutdown")]
    Cancelled,
    #[error("tick abandoned, no health state was changed")]
    Contract(#[from] TrackerError),
}

/// Result of probing one device outside of the loop.
pub type ProbeReport = (DeviceRecord, Result<ProbeOutcome, String>);

pub struct Watchdog {
    registry: Arc<dyn DeviceRegistry>,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn EventSink>,
    dispatcher: Option<RecoveryDispatcher>,
    settings: SchedulerSettings,
    tracker: Tracker,
    health_tx: HealthTx,
    /// Devices reported as misconfigured; warned about once until fixed.
    misconfigured: HashSet<String>,
    registry_lost: bool,
}

impl Watchdog {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn EventSink>,
        settings: SchedulerSettings,
        tracker: Tracker,
    ) -> Self {
        let (health_tx, _) = watch::channel(Arc::new(tracker.snapshot()));
        Self {
            registry,
            prober,
            sink,
            dispatcher: None,
            settings,
            tracker,
            health_tx,
            misconfigured: HashSet::new(),
            registry_lost: false,
        }
    }

    /// Enable recovery of devices that stay unhealthy.
    #[must_use]
    pub fn with_recovery(mut self, dispatcher: RecoveryDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Health table as of the last completed tick.
    pub fn subscribe(&self) -> HealthRx {
        self.health_tx.subscribe()
    }

    pub const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Tick until shutdown is requested.
    ///
    /// Ticks never overlap; a tick running long delays the next one.
    pub async fn run(mut self, mut shutdown: ShutdownRx) {
        let mut ticker = interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_interval_ms = self.settings.tick_interval.as_millis(),
            probe_timeout_ms = self.settings.probe_timeout.as_millis(),
            recovery = self.dispatcher.is_some(),
            "Watchdog started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match self.tick(Utc::now(), &mut shutdown).await {
                Ok(report) => debug!(?report, "Tick complete"),
                Err(TickError::Cancelled) => break,
                Err(e @ TickError::Registry(_)) => debug!(error = %e, "Tick skipped"),
                Err(e @ TickError::Contract(_)) => error!(error = %e, "Tick abandoned"),
            }
        }
        info!("Watchdog stopped");
    }

    /// One full pass over the registered devices at `now`.
    ///
    /// # Errors
    ///
    /// - [`TickError::Registry`] if the device list cannot be read.
    /// - [`TickError::Cancelled`] if shutdown arrives while probes are in flight.
    /// - [`TickError::Contract`] if the probe results cannot be applied as a whole.
    ///
    /// In every error case the health table is left as it was.
    pub async fn tick(
        &mut self,
        now: DateTime<Utc>,
        shutdown: &mut ShutdownRx,
    ) -> Result<TickReport, TickError> {
        let listed = tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => return Err(TickError::Cancelled),
            listed = self.registry.list_devices() => listed,
        };
        let devices = match listed {
            Ok(devices) => {
                self.registry_reachable(now);
                devices
            }
            Err(e) => {
                self.registry_unreachable(&e, now);
                return Err(e.into());
            }
        };

        let mut flagged = HashSet::new();
        let targets = self.probe_targets(&devices, &mut flagged, now);
        let results = tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => return Err(TickError::Cancelled),
            results = self.probe_all(targets) => results,
        };

        let mut outcomes = Vec::with_capacity(results.len());
        for (device, result) in results {
            match result {
                Ok(outcome) => outcomes.push((device, outcome)),
                Err(e) => self.flag_misconfigured(&device, &e.to_string(), &mut flagged, now),
            }
        }

        let transitions = self.tracker.record_all(
            outcomes
                .iter()
                .map(|&(ref device, ref outcome)| (device.id.as_str(), outcome)),
            now,
        )?;

        let mut report = TickReport {
            probed: outcomes.len(),
            skipped: flagged.len(),
            pruned: self
                .tracker
                .retain(devices.iter().map(|device| device.id.as_str())),
            ..TickReport::default()
        };
        self.misconfigured = flagged;

        for (&(ref device, ref outcome), transition) in outcomes.iter().zip(transitions) {
            if let Some(event) = Self::transition_event(device, outcome, transition, now) {
                report.transitions += 1;
                self.sink.emit(&event);
            }
        }

        report.recoveries = self.recover(&outcomes, now).await?;

        self.health_tx.send_replace(Arc::new(self.tracker.snapshot()));
        Ok(report)
    }

    /// Probe every registered device once, without touching health state.
    ///
    /// # Errors
    ///
    /// Returns an error if the device list cannot be read.
    pub async fn probe_once(&self) -> Result<Vec<ProbeReport>, RegistryError> {
        let devices = self.registry.list_devices().await?;
        let mut reports = Vec::with_capacity(devices.len());
        let mut probeable = Vec::with_capacity(devices.len());
        for device in devices {
            match device.misconfiguration() {
                Some(reason) => reports.push((device, Err(reason.to_string()))),
                None => probeable.push(device),
            }
        }
        for (device, result) in self.probe_all(probeable).await {
            reports.push((device, result.map_err(|e| e.to_string())));
        }
        reports.sort_by(|a, b| a.0.id.cmp(&b.0.id));
        Ok(reports)
    }

    /// Devices worth probing this tick. Every other one ends up in `flagged`.
    fn probe_targets(
        &self,
        devices: &[DeviceRecord],
        flagged: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<DeviceRecord> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(devices.len());
        for device in devices {
            if let Some(reason) = device.misconfiguration() {
                self.flag_misconfigured(device, reason, flagged, now);
            } else if !seen.insert(device.id.as_str()) {
                self.flag_misconfigured(device, "device id is registered twice", flagged, now);
            } else {
                targets.push(device.clone());
            }
        }
        targets
    }

    /// Probe `targets` with at most `max_concurrent_probes` in flight.
    ///
    /// Probe futures own their device and prober handle; the tick runs inside
    /// a spawned task and must stay `Send`.
    async fn probe_all(
        &self,
        targets: Vec<DeviceRecord>,
    ) -> Vec<(DeviceRecord, Result<ProbeOutcome, ProbeError>)> {
        let limit = self.settings.probe_timeout;
        let probes: Vec<_> = targets
            .into_iter()
            .map(|device| {
                let prober = Arc::clone(&self.prober);
                async move {
                    let address = device.probe_address().unwrap_or_default().to_owned();
                    let result = prober.probe(&address, limit).await;
                    debug!(device_id = %device.id, %address, ?result, "Probed device");
                    (device, result)
                }
            })
            .collect();
        stream::iter(probes)
            .buffer_unordered(self.settings.max_concurrent_probes.max(1))
            .collect()
            .await
    }

    fn flag_misconfigured(
        &self,
        device: &DeviceRecord,
        reason: &str,
        flagged: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) {
        if flagged.insert(device.id.clone()) && !self.misconfigured.contains(&device.id) {
            self.sink.emit(
                &WatchdogEvent::device(
                    Severity::Warning,
                    device,
                    format!("{} is misconfigured and will not be monitored", device.display_name()),
                    now,
                )
                .with("reason", reason),
            );
        }
    }

    fn transition_event(
        device: &DeviceRecord,
        outcome: &ProbeOutcome,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Option<WatchdogEvent> {
        let name = device.display_name();
        let event = match transition {
            Transition::None => return None,
            Transition::BecameUnhealthy => WatchdogEvent::device(
                Severity::Warning,
                device,
                format!("{name} is unreachable"),
                now,
            )
            .with("address", device.probe_address().unwrap_or_default())
            .with("error", outcome.error_detail.clone().unwrap_or_default()),
            Transition::StillUnhealthySummaryDue {
                downtime,
                failed_checks,
            } => WatchdogEvent::device(
                Severity::Warning,
                device,
                format!(
                    "{name} still unreachable after {}, {failed_checks} failed checks",
                    human_duration(downtime)
                ),
                now,
            )
            .with("downtime_secs", downtime.as_secs())
            .with("failed_checks", failed_checks)
            .with("error", outcome.error_detail.clone().unwrap_or_default()),
            Transition::Recovered {
                downtime,
                failed_checks,
            } => WatchdogEvent::device(
                Severity::Info,
                device,
                format!("{name} is back online after {}", human_duration(downtime)),
                now,
            )
            .with("downtime_secs", downtime.as_secs())
            .with("failed_checks", failed_checks)
            .with("latency_ms", millis(outcome.latency)),
        };
        Some(event)
    }

    /// Dispatch recovery for every probed device that became eligible.
    async fn recover(
        &mut self,
        probed: &[(DeviceRecord, ProbeOutcome)],
        now: DateTime<Utc>,
    ) -> Result<usize, TrackerError> {
        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return Ok(0);
        };

        let candidates: Vec<_> = probed
            .iter()
            .filter_map(|&(ref device, _)| {
                let state = self.tracker.state(&device.id)?;
                dispatcher
                    .is_eligible(state, now)
                    .then(|| (device.clone(), state.clone()))
            })
            .collect();
        // Recorded up front so a failing control service still gets the cooldown.
        for &(ref device, _) in &candidates {
            self.tracker.note_recovery_attempt(&device.id, now)?;
        }

        let mut calls = Vec::with_capacity(candidates.len());
        for (device, state) in candidates {
            calls.push(async move {
                let attempt = dispatcher.maybe_recover(&device.id, &state, now).await;
                (device, attempt)
            });
        }
        let attempts = future::join_all(calls).await;

        let action = dispatcher.policy().action;
        let mut dispatched = 0;
        for (device, attempt) in attempts {
            let consecutive_failures = self
                .tracker
                .state(&device.id)
                .map_or(0, |state| state.consecutive_failures);
            let event = match attempt {
                RecoveryAttempt::NotAttempted => continue,
                RecoveryAttempt::Succeeded => WatchdogEvent::device(
                    Severity::Info,
                    &device,
                    format!("{action} sent to {}", device.display_name()),
                    now,
                ),
                RecoveryAttempt::Failed(e) => WatchdogEvent::device(
                    Severity::Warning,
                    &device,
                    format!("{action} of {} failed", device.display_name()),
                    now,
                )
                .with("error", error_chain(&e)),
            };
            dispatched += 1;
            self.sink.emit(
                &event
                    .with("action", action.to_string())
                    .with("consecutive_failures", consecutive_failures),
            );
        }
        Ok(dispatched)
    }

    fn registry_unreachable(&mut self, err: &RegistryError, now: DateTime<Utc>) {
        if self.registry_lost {
            debug!(error = %err, "Device registry still unreachable");
            return;
        }
        self.registry_lost = true;
        self.sink.emit(
            &WatchdogEvent::process(
                Severity::Error,
                "device registry is unreachable, monitoring is paused",
                now,
            )
            .with("error", error_chain(err)),
        );
    }

    fn registry_reachable(&mut self, now: DateTime<Utc>) {
        if self.registry_lost {
            self.registry_lost = false;
            self.sink.emit(&WatchdogEvent::process(
                Severity::Info,
                "device registry is reachable again, monitoring resumed",
                now,
            ));
        }
    }
}

fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn human_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3_600 => format!("{}m {}s", secs / 60, secs % 60),
        _ => format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
