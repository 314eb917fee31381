//! Gateway discovery
//!
//! Locates a gateway by host name and reads its serial number from the
//! unauthenticated `/info` document. Host resolution goes through the system
//! resolver, which answers `.local` names over mDNS on hosts configured for it.

use crate::client::DEFAULT_TIMEOUT;
use crate::error::{EnvoyError, Result};
use reqwest::Url;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

const INFO_PATH: &str = "/info";

/// A gateway found on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    /// Resolved address, when the host name resolved to a usable IP
    pub ip: Option<IpAddr>,
    /// Gateway serial number
    pub serial: String,
}

/// Gateway locator
#[derive(Debug, Clone)]
pub struct Discovery {
    http: reqwest::Client,
    base: Url,
}

impl Discovery {
    /// Create a locator for the gateway behind `address`
    pub fn new(address: &str) -> Result<Self> {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    /// Create a locator with a custom request timeout
    pub fn with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(address)
            .map_err(|e| EnvoyError::InvalidAddress(format!("{}: {}", address, e)))?;
        if base.host_str().is_none() {
            return Err(EnvoyError::InvalidAddress(address.to_string()));
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base })
    }

    /// Resolve the gateway address and read its serial number
    pub async fn discover(&self) -> Result<Discovered> {
        let ip = self.resolve().await;

        let url = self
            .base
            .join(INFO_PATH)
            .map_err(|e| EnvoyError::InvalidAddress(e.to_string()))?;
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EnvoyError::Discovery(format!(
                "{} returned {}",
                INFO_PATH,
                status.as_u16()
            )));
        }

        let body = resp.text().await?;
        let serial = parse_serial(&body)
            .ok_or_else(|| EnvoyError::Discovery(format!("no serial number in {}", INFO_PATH)))?;

        Ok(Discovered { ip, serial })
    }

    async fn resolve(&self) -> Option<IpAddr> {
        let host = self.base.host_str()?;
        let port = self.base.port_or_known_default().unwrap_or(443);
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => {
                let addrs: Vec<_> = addrs.map(|a| a.ip()).collect();
                addrs
                    .iter()
                    .copied()
                    .find(IpAddr::is_ipv4)
                    .or_else(|| addrs.first().copied())
            }
            Err(e) => {
                debug!(host, error = %e, "Gateway host did not resolve");
                None
            }
        }
    }
}

/// Extract the `<sn>` element of an `/info` document
pub fn parse_serial(info: &str) -> Option<String> {
    let start = info.find("<sn>")? + "<sn>".len();
    let end = start + info[start..].find("</sn>")?;
    let serial = info[start..end].trim();
    if serial.is_empty() {
        None
    } else {
        Some(serial.to_string())
    }
}
