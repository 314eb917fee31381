// Envoy Exporter - Prometheus exporter for Enphase Envoy gateways
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Envoy Exporter
//!
//! Polls an Enphase Envoy / IQ Gateway for production and inverter data and
//! exposes the latest values to Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Credentials from the environment, serial discovered on the LAN
//! ENVOY_USERNAME=owner@example.com ENVOY_PASSWORD=secret envoy-exporter
//!
//! # Explicit gateway and a pre-issued token
//! envoy-exporter --address https://192.168.1.20 --serial 122300000001 --jwt eyJ...
//! ```
//!
//! ## Exit codes
//!
//! - `1`: invalid configuration, or the metrics server failed
//! - `2`: no serial configured and discovery failed
//! - `3`: the gateway client could not be created

mod config;
mod metrics;
mod poller;
mod server;
mod sink;

use clap::Parser;
use config::{Args, Settings};
use envoy::{Discovery, EnvoyClient};
use metrics::MetricsStore;
use poller::Poller;
use sink::SessionSink;
use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

const EXIT_STARTUP: u8 = 1;
const EXIT_DISCOVERY: u8 = 2;
const EXIT_CLIENT: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (settings, config_file) = match Settings::load(args) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_tracing(false);
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    init_tracing(settings.debug);
    info!("Envoy Exporter v{}", env!("CARGO_PKG_VERSION"));
    match &config_file {
        Some(path) => info!(path = %path.display(), "Loaded config file"),
        None => info!("Config file not found"),
    }
    debug!(?settings, "Settings");

    let mut address = settings.address.clone();
    let serial = if settings.serial.is_empty() {
        let discovered = match Discovery::new(&address) {
            Ok(discovery) => discovery.discover().await,
            Err(e) => Err(e),
        };
        match discovered {
            Ok(found) => {
                info!(envoy_ip = ?found.ip, serial = %found.serial, "Using discovered envoy");
                if let Some(url) = discovered_address(found.ip) {
                    address = url;
                }
                found.serial
            }
            Err(e) => {
                error!(error = %e, "Missing serial and failed discovery");
                return ExitCode::from(EXIT_DISCOVERY);
            }
        }
    } else {
        settings.serial.clone()
    };

    let store = match MetricsStore::new() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to register metrics");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let sink = Arc::new(SessionSink::new(serial.clone(), Arc::clone(&store)));
    let client = match EnvoyClient::builder(serial.clone())
        .gateway_address(&address)
        .credentials(&settings.username, &settings.password)
        .jwt(&settings.jwt)
        .debug(settings.debug)
        .observer(sink)
        .build()
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "Quitting because of error opening envoy");
            return ExitCode::from(EXIT_CLIENT);
        }
    };

    let poller = Poller::new(client, Arc::clone(&store), serial).with_interval(settings.refresh);
    tokio::spawn(poller.run());

    info!(address = %settings.listen, "Start listening");
    let result = server::serve(&settings.listen, store).await;
    info!(result = ?result, "Program exit");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(EXIT_STARTUP),
    }
}

/// Initialize tracing: JSON lines on stderr, `RUST_LOG` taking precedence.
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if debug { Level::DEBUG } else { Level::INFO };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Gateway URL for a discovered address.
///
/// Only a concrete address replaces the configured one; an unresolved or
/// unspecified address leaves it untouched.
fn discovered_address(ip: Option<IpAddr>) -> Option<String> {
    match ip? {
        ip if ip.is_unspecified() => None,
        IpAddr::V4(v4) => Some(format!("https://{}", v4)),
        IpAddr::V6(v6) => Some(format!("https://[{}]", v6)),
    }
}
