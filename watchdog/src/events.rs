//! Structured watchdog events and the sinks that deliver them.
//!
//! The watchdog never writes log lines for device health directly; it emits
//! [`WatchdogEvent`]s and lets the configured sinks decide where they go.

use alloc::sync::Arc;
use core::fmt;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::device::DeviceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogEvent {
    pub severity: Severity,
    /// `None` for process level events such as a lost registry.
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub message: String,
    pub metadata: Map<String, Value>,
    pub at: DateTime<Utc>,
}

impl WatchdogEvent {
    pub fn device(
        severity: Severity,
        device: &DeviceRecord,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            severity,
            device_id: Some(device.id.clone()),
            device_name: Some(device.display_name().to_string()),
            message: message.into(),
            metadata: Map::new(),
            at,
        }
    }

    pub fn process(severity: Severity, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            severity,
            device_id: None,
            device_name: None,
            message: message.into(),
            metadata: Map::new(),
            at,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Receives watchdog events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &WatchdogEvent);
}

/// Logs every event through `tracing` at the level matching its severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &WatchdogEvent) {
        let metadata = Value::Object(event.metadata.clone());
        let device_id = event.device_id.as_deref().unwrap_or("-");
        let device = event.device_name.as_deref().unwrap_or("-");
        match event.severity {
            Severity::Info => info!(device_id, device, %metadata, "{}", event.message),
            Severity::Warning => warn!(device_id, device, %metadata, "{}", event.message),
            Severity::Error => error!(device_id, device, %metadata, "{}", event.message),
        }
    }
}

/// Posts every event as JSON to a webhook, in the background.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pixelwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(core::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

impl EventSink for WebhookSink {
    fn emit(&self, event: &WatchdogEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, dropping webhook notification");
            return;
        };
        let request = self.client.post(self.url.clone()).json(event);
        handle.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => debug!(status = %resp.status(), "Webhook rejected notification"),
                Err(e) => debug!(error = %e, "Failed to deliver webhook notification"),
            }
        });
    }
}

/// Hands each event to several sinks.
#[derive(Clone, Default)]
pub struct Fanout(pub Vec<Arc<dyn EventSink>>);

impl EventSink for Fanout {
    fn emit(&self, event: &WatchdogEvent) {
        for sink in &self.0 {
            sink.emit(event);
        }
    }
}
