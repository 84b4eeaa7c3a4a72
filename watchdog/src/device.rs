//! Device records as handed out by the device registry.

use serde::{Deserialize, Serialize};

/// A registered display device. Owned by the registry; the watchdog only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable identifier, used as the key of all per-device state.
    pub id: String,
    /// Human readable name for events and the status API.
    #[serde(default)]
    pub name: String,
    /// Network address (`host`, `host:port` or a full `http://` URL for HTTP probes).
    #[serde(default)]
    pub address: Option<String>,
    /// Driver currently registered for the device, e.g. `pixoo64`.
    #[serde(default)]
    pub driver: Option<String>,
}

impl DeviceRecord {
    /// The address to probe, if the record carries a usable one.
    pub fn probe_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }

    /// Name for display, falling back to the id when the registry left it empty.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Why this record cannot be probed, or `None` if it can.
    pub fn misconfiguration(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            Some("device entry has an empty id")
        } else if self.probe_address().is_none() {
            Some("device entry has no network address")
        } else {
            None
        }
    }
}
