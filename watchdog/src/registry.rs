//! Sources of the device list the watchdog monitors.

use alloc::sync::Arc;
use core::time::Duration;

use futures::future::{self, BoxFuture};
use reqwest::{StatusCode, Url};
use thiserror::Error as ThisError;
use tokio::sync::watch;

use crate::{config::WatchdogConfig, device::DeviceRecord};

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("device registry at {url} is unreachable")]
    Unreachable {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("device registry at {url} answered {status}")]
    BadStatus { url: Url, status: StatusCode },
    #[error("device registry at {url} returned an unreadable device list")]
    Malformed {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("device registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the registered devices.
pub trait DeviceRegistry: Send + Sync {
    /// Current set of devices. May change between calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read right now.
    fn list_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceRecord>, RegistryError>>;
}

/// Devices from the `[devices]` table of the live configuration.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    config_rx: watch::Receiver<Arc<WatchdogConfig>>,
}

impl ConfigRegistry {
    pub const fn new(config_rx: watch::Receiver<Arc<WatchdogConfig>>) -> Self {
        Self { config_rx }
    }
}

impl DeviceRegistry for ConfigRegistry {
    fn list_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceRecord>, RegistryError>> {
        let config = self.config_rx.borrow().clone();
        let mut devices: Vec<_> = config
            .devices
            .iter()
            .map(|(id, entry)| entry.to_record(id))
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Box::pin(future::ready(Ok(devices)))
    }
}

/// Devices fetched from the dashboard as a JSON array of device records.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    url: Url,
}

impl HttpRegistry {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pixelwatch/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }

    async fn fetch(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|source| RegistryError::Unreachable {
                url: self.url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(RegistryError::BadStatus {
                url: self.url.clone(),
                status: resp.status(),
            });
        }
        resp.json()
            .await
            .map_err(|source| RegistryError::Malformed {
                url: self.url.clone(),
                source,
            })
    }
}

impl DeviceRegistry for HttpRegistry {
    fn list_devices(&self) -> BoxFuture<'_, Result<Vec<DeviceRecord>, RegistryError>> {
        Box::pin(self.fetch())
    }
}
