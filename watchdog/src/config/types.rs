//! Configuration data types for the watchdog.
//!
//! Every section is optional; a file with only `[devices]` runs with defaults.

use core::time::Duration;
use std::collections::HashMap;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error as ThisError;

use crate::{
    control::RecoveryAction,
    device::DeviceRecord,
    health::{
        DEFAULT_RECOVERY_COOLDOWN, DEFAULT_RECOVERY_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT,
        DEFAULT_SUMMARY_INTERVAL, RecoveryPolicy,
    },
    probe::ProbeMethod,
};

/// The `[watchdog]` section: probe cadence and method.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Must stay below `tick_interval_ms` so one slow device cannot stretch a tick.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
    #[serde(default)]
    pub probe: ProbeMethod,
    /// Path requested by HTTP probes for bare addresses.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    /// Port used by TCP probes when the address has none.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            summary_interval_secs: default_summary_interval_secs(),
            probe: ProbeMethod::default(),
            probe_path: default_probe_path(),
            tcp_port: default_tcp_port(),
        }
    }
}

impl SchedulerConfig {
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub const fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }
}

const fn default_tick_interval_ms() -> u64 {
    5_000
}

const fn default_probe_timeout_ms() -> u64 {
    2_000
}

const fn default_max_concurrent_probes() -> usize {
    16
}

const fn default_summary_interval_secs() -> u64 {
    DEFAULT_SUMMARY_INTERVAL.as_secs()
}

fn default_probe_path() -> String {
    "/".to_string()
}

const fn default_tcp_port() -> u16 {
    80
}

/// The `[recovery]` section.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Recovery is opt-in; without it the watchdog only reports.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recovery_threshold")]
    pub threshold: u32,
    #[serde(default = "default_recovery_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub action: RecoveryAction,
    /// Base URL of the device control service. Required when enabled.
    #[serde(default)]
    pub control_url: Option<String>,
    #[serde(default = "default_recovery_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_recovery_threshold(),
            cooldown_secs: default_recovery_cooldown_secs(),
            action: RecoveryAction::default(),
            control_url: None,
            timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

impl RecoveryConfig {
    pub const fn policy(&self) -> RecoveryPolicy {
        RecoveryPolicy {
            threshold: self.threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            action: self.action,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

const fn default_recovery_threshold() -> u32 {
    DEFAULT_RECOVERY_THRESHOLD
}

const fn default_recovery_cooldown_secs() -> u64 {
    DEFAULT_RECOVERY_COOLDOWN.as_secs()
}

const fn default_recovery_timeout_ms() -> u64 {
    DEFAULT_RECOVERY_TIMEOUT.as_secs() * 1_000
}

/// The `[registry]` section. Without a URL the `[devices]` table is the registry.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_registry_timeout_ms(),
        }
    }
}

const fn default_registry_timeout_ms() -> u64 {
    3_000
}

/// The `[notifications]` section.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Every watchdog event is POSTed here as JSON.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// The optional `[server]` section for the read-only status API.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

/// One `[devices.<id>]` entry.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
}

impl DeviceEntry {
    pub fn to_record(&self, id: &str) -> DeviceRecord {
        DeviceRecord {
            id: id.to_string(),
            name: self.name.clone().unwrap_or_default(),
            address: self.address.clone(),
            driver: self.driver.clone(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub watchdog: SchedulerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// Device id => device. Only consulted when no registry URL is set.
    #[serde(default)]
    pub devices: HashMap<String, DeviceEntry>,
}

/// Semantic problems in an otherwise well-formed config file.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    #[error(
        "[watchdog] probe_timeout_ms ({probe_timeout_ms}) must be shorter than tick_interval_ms ({tick_interval_ms})"
    )]
    ProbeTimeoutTooLong {
        probe_timeout_ms: u64,
        tick_interval_ms: u64,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("[recovery] is enabled but control_url is not set")]
    MissingControlUrl,
    #[error("{field} is not a valid http URL: '{value}'")]
    InvalidUrl { field: &'static str, value: String },
}

/// Parse `value` as an absolute plain http URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUrl`] naming `field` otherwise.
pub fn parse_http_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value)
        .ok()
        .filter(|url| url.scheme() == "http" && url.host_str().is_some())
        .ok_or_else(|| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
}

impl WatchdogConfig {
    /// Check the constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let &Self {
            ref watchdog,
            ref recovery,
            ref registry,
            ref notifications,
            ..
        } = self;

        if watchdog.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("[watchdog] tick_interval_ms"));
        }
        if watchdog.probe_timeout_ms == 0 {
            return Err(ConfigError::Zero("[watchdog] probe_timeout_ms"));
        }
        if watchdog.max_concurrent_probes == 0 {
            return Err(ConfigError::Zero("[watchdog] max_concurrent_probes"));
        }
        if watchdog.probe_timeout_ms >= watchdog.tick_interval_ms {
            return Err(ConfigError::ProbeTimeoutTooLong {
                probe_timeout_ms: watchdog.probe_timeout_ms,
                tick_interval_ms: watchdog.tick_interval_ms,
            });
        }

        if recovery.enabled {
            if recovery.threshold == 0 {
                return Err(ConfigError::Zero("[recovery] threshold"));
            }
            if recovery.timeout_ms == 0 {
                return Err(ConfigError::Zero("[recovery] timeout_ms"));
            }
            let control_url = recovery
                .control_url
                .as_deref()
                .ok_or(ConfigError::MissingControlUrl)?;
            parse_http_url("[recovery] control_url", control_url)?;
        }

        if let Some(url) = registry.url.as_deref() {
            parse_http_url("[registry] url", url)?;
        }
        if let Some(url) = notifications.webhook_url.as_deref() {
            parse_http_url("[notifications] webhook_url", url)?;
        }
        Ok(())
    }
}
