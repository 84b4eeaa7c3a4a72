//! Single bounded liveness checks against a device address.
//!
//! Probers never log and never fail for ordinary network trouble: refused
//! connections, timeouts and non-2xx answers all come back as an unreachable
//! [`ProbeOutcome`]. Only an address that cannot be probed at all is an error.

use core::time::Duration;

use futures::future::BoxFuture;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tokio::{
    net::TcpStream,
    time::{Instant, timeout},
};

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub reachable: bool,
    /// Time from issuing the probe until it resolved (or was cut off).
    pub latency: Duration,
    /// Why the device counted as unreachable.
    pub error_detail: Option<String>,
}

impl ProbeOutcome {
    pub const fn reachable(latency: Duration) -> Self {
        Self {
            reachable: true,
            latency,
            error_detail: None,
        }
    }

    pub fn unreachable(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            reachable: false,
            latency,
            error_detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProbeError {
    #[error("invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: &'static str },
}

fn invalid(address: &str, reason: &'static str) -> ProbeError {
    ProbeError::InvalidAddress {
        address: address.to_string(),
        reason,
    }
}

/// A liveness check against one device.
///
/// Implementations must resolve within `limit`, whatever the network does.
pub trait Prober: Send + Sync {
    /// Probe `address`, giving up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidAddress`] if `address` cannot be probed with this method.
    fn probe<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<ProbeOutcome, ProbeError>>;
}

/// How devices are probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// `GET http://{address}{path}`, any 2xx counts as reachable.
    #[default]
    Http,
    /// A plain TCP connect.
    Tcp,
}

/// Probes a device's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    path: String,
}

impl HttpProber {
    /// Devices are always contacted directly; proxy environment variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(path: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pixelwatch/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Ok(Self { client, path })
    }

    /// Resolve the URL probed for `address`.
    ///
    /// Bare addresses get the configured path; full URLs are used as given.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidAddress`] for anything that is not a valid HTTP target.
    pub fn url_for(&self, address: &str) -> Result<Url, ProbeError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(invalid(address, "address is empty"));
        }

        if address.contains("://") {
            let url = Url::parse(address).map_err(|_| invalid(address, "not a valid URL"))?;
            if url.scheme() != "http" {
                return Err(invalid(address, "only plain http URLs can be probed"));
            }
            if url.host_str().is_none() {
                return Err(invalid(address, "URL has no host"));
            }
            return Ok(url);
        }

        let mut url = Url::parse(&format!("http://{address}"))
            .map_err(|_| invalid(address, "not a valid host or host:port"))?;
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(invalid(
                address,
                "bare addresses must not carry a path, use a full URL instead",
            ));
        }
        url.set_path(&self.path);
        Ok(url)
    }
}

impl Prober for HttpProber {
    fn probe<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<ProbeOutcome, ProbeError>> {
        Box::pin(async move {
            let url = self.url_for(address)?;
            let started = Instant::now();
            let request = self.client.get(url).timeout(limit).send();

            let outcome = match timeout(limit, request).await {
                Ok(Ok(resp)) if resp.status().is_success() => {
                    ProbeOutcome::reachable(started.elapsed())
                }
                Ok(Ok(resp)) => {
                    ProbeOutcome::unreachable(started.elapsed(), format!("HTTP {}", resp.status()))
                }
                Ok(Err(e)) if e.is_timeout() => {
                    ProbeOutcome::unreachable(started.elapsed(), timed_out(limit))
                }
                Ok(Err(e)) => ProbeOutcome::unreachable(started.elapsed(), e.to_string()),
                Err(_elapsed) => ProbeOutcome::unreachable(started.elapsed(), timed_out(limit)),
            };
            Ok(outcome)
        })
    }
}

/// Probes a device by opening a TCP connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    default_port: u16,
}

impl TcpProber {
    pub const fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    /// Split `host[:port]` (IPv6 literals in brackets) into host and port.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidAddress`] if the address is empty, carries a scheme or path,
    /// or has an unparsable port.
    pub fn host_port(&self, address: &str) -> Result<(String, u16), ProbeError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(invalid(address, "address is empty"));
        }
        if trimmed.contains(['/', ' ', '\t']) {
            return Err(invalid(address, "expected host or host:port"));
        }

        let parse_port = |port: &str| {
            port.parse::<u16>()
                .ok()
                .filter(|&p| p != 0)
                .ok_or_else(|| invalid(address, "port is not a number in 1..=65535"))
        };

        if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid(address, "unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => self.default_port,
                None => return Err(invalid(address, "garbage after IPv6 literal")),
            };
            return Ok((host.to_string(), port));
        }

        match trimmed.matches(':').count() {
            0 => Ok((trimmed.to_string(), self.default_port)),
            1 => {
                let (host, port) = trimmed
                    .split_once(':')
                    .ok_or_else(|| invalid(address, "expected host or host:port"))?;
                if host.is_empty() {
                    return Err(invalid(address, "host is empty"));
                }
                Ok((host.to_string(), parse_port(port)?))
            }
            // bare IPv6 literal
            _ => Ok((trimmed.to_string(), self.default_port)),
        }
    }
}

impl Prober for TcpProber {
    fn probe<'a>(
        &'a self,
        address: &'a str,
        limit: Duration,
    ) -> BoxFuture<'a, Result<ProbeOutcome, ProbeError>> {
        Box::pin(async move {
            let (host, port) = self.host_port(address)?;
            let started = Instant::now();
            let outcome = match timeout(limit, TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    ProbeOutcome::reachable(started.elapsed())
                }
                Ok(Err(e)) => ProbeOutcome::unreachable(started.elapsed(), e.to_string()),
                Err(_elapsed) => ProbeOutcome::unreachable(started.elapsed(), timed_out(limit)),
            };
            Ok(outcome)
        })
    }
}

fn timed_out(limit: Duration) -> String {
    format!("timed out after {} ms", limit.as_millis())
}
