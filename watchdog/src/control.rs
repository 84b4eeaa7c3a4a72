//! Client side of the device control service used for recovery actions.

use core::{fmt, time::Duration};

use futures::future::BoxFuture;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Corrective operation the watchdog can ask the control service for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Restart the device's rendering session.
    #[default]
    SoftReset,
    /// Full device reboot.
    Reboot,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SoftReset => f.write_str("soft reset"),
            Self::Reboot => f.write_str("reboot"),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum ControlError {
    #[error("control request for device '{device_id}' failed")]
    Request {
        device_id: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("control service answered {status} for device '{device_id}'")]
    Rejected {
        device_id: String,
        status: StatusCode,
    },
    #[error("{action} of device '{device_id}' timed out after {} ms", timeout.as_millis())]
    Timeout {
        device_id: String,
        action: RecoveryAction,
        timeout: Duration,
    },
    #[error("control service base URL '{0}' cannot carry a path")]
    InvalidBaseUrl(String),
    #[error("device control unavailable: {0}")]
    Unavailable(String),
}

/// Operations of the device control service.
pub trait DeviceControl: Send + Sync {
    /// Restart the rendering session of a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the control service could not be reached or refused the request.
    fn soft_reset<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<(), ControlError>>;

    /// Reboot a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the control service could not be reached or refused the request.
    fn reboot<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<(), ControlError>>;

    /// Run `action` against `device_id`.
    ///
    /// # Errors
    ///
    /// Forwards the error of the underlying operation.
    fn perform<'a>(
        &'a self,
        action: RecoveryAction,
        device_id: &'a str,
    ) -> BoxFuture<'a, Result<(), ControlError>> {
        match action {
            RecoveryAction::SoftReset => self.soft_reset(device_id),
            RecoveryAction::Reboot => self.reboot(device_id),
        }
    }
}

/// Talks to the dashboard's control API:
/// `POST {base}/api/devices/{id}/reset` and `POST {base}/api/devices/{id}/reboot`.
#[derive(Debug, Clone)]
pub struct HttpDeviceControl {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpDeviceControl {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pixelwatch/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()?;
        Ok(Self { client, base_url })
    }

    /// URL of `operation` for `device_id`; the id is percent-encoded as one path segment.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidBaseUrl`] if the base URL cannot have path segments.
    pub fn endpoint(&self, device_id: &str, operation: &str) -> Result<Url, ControlError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ControlError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "devices", device_id, operation]);
        Ok(url)
    }

    async fn post(&self, device_id: &str, operation: &str) -> Result<(), ControlError> {
        let url = self.endpoint(device_id, operation)?;
        let resp = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|source| ControlError::Request {
                device_id: device_id.to_string(),
                source,
            })?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ControlError::Rejected {
                device_id: device_id.to_string(),
                status: resp.status(),
            })
        }
    }
}

impl DeviceControl for HttpDeviceControl {
    fn soft_reset<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<(), ControlError>> {
        Box::pin(self.post(device_id, "reset"))
    }

    fn reboot<'a>(&'a self, device_id: &'a str) -> BoxFuture<'a, Result<(), ControlError>> {
        Box::pin(self.post(device_id, "reboot"))
    }
}
