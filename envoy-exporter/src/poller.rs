// Envoy Exporter - Gateway poller
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Background polling loop.
//!
//! Each cycle runs the communication check, the production fetch and the
//! inverter fetch in sequence, publishes whatever succeeded and then sleeps
//! for the configured interval. Failures are logged and leave the previous
//! values in place; the loop itself never stops.

use crate::metrics::{Metric, MetricsError, MetricsStore};
use envoy::DeviceClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Default delay between two cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(20);

/// What one cycle achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(dead_code)]
pub struct CycleSummary {
    /// Devices reported by the communication check, if it succeeded
    pub devices: Option<usize>,
    /// Whether the session was dropped after an unauthorized response
    pub session_invalidated: bool,
    /// Whether the production gauges were updated
    pub production_updated: bool,
    /// Number of inverter gauges updated
    pub inverters_updated: usize,
}

/// Periodic fetch-and-publish task for one gateway.
pub struct Poller<C: ?Sized> {
    client: Arc<C>,
    store: Arc<MetricsStore>,
    gateway: String,
    interval: Duration,
}

impl<C: DeviceClient + ?Sized> Poller<C> {
    pub fn new(client: Arc<C>, store: Arc<MetricsStore>, gateway: impl Into<String>) -> Self {
        Self {
            client,
            store,
            gateway: gateway.into(),
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Set the delay between cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[allow(dead_code)]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run cycles until the process exits.
    ///
    /// The sleep follows each cycle, so the period drifts by the time the
    /// fetches take and cycles never overlap.
    pub async fn run(self) {
        info!(
            gateway = %self.gateway,
            interval_secs = self.interval.as_secs(),
            "Starting poller"
        );

        loop {
            let summary = self.poll_once().await;
            debug!(?summary, "Poll cycle complete");
            sleep(self.interval).await;
        }
    }

    /// Execute a single cycle.
    pub async fn poll_once(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        match self.client.comm_check().await {
            Ok(devices) => {
                if !devices.is_empty() {
                    info!(count = devices.len(), "Found devices");
                }
                summary.devices = Some(devices.len());
            }
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "Communication check unauthorized, invalidating session");
                self.client.invalidate_session().await;
                summary.session_invalidated = true;
            }
            Err(e) => {
                error!(error = %e, "error running communication check");
            }
        }

        match self.client.production().await {
            Ok(production) => match production.primary() {
                Some(record) => {
                    let labels = [self.gateway.as_str()];
                    self.publish(self.store.set_gauge(
                        Metric::ProductionWattsNow,
                        &labels,
                        record.w_now,
                    ));
                    self.publish(self.store.set_gauge(
                        Metric::ProductionWhLifetime,
                        &labels,
                        record.wh_lifetime,
                    ));
                    summary.production_updated = true;
                }
                None => debug!("Production report carried no records"),
            },
            Err(e) => {
                error!(error = %e, "error getting production data");
            }
        }

        match self.client.inverters().await {
            Ok(inverters) => {
                for inverter in &inverters {
                    self.publish(self.store.set_gauge(
                        Metric::InverterLastReportWatts,
                        &[self.gateway.as_str(), inverter.serial_number.as_str()],
                        inverter.last_report_watts as f64,
                    ));
                }
                summary.inverters_updated = inverters.len();
            }
            Err(e) => {
                error!(error = %e, "error getting inverters data");
            }
        }

        summary
    }

    fn publish(&self, result: Result<(), MetricsError>) {
        if let Err(e) = result {
            warn!(gateway = %self.gateway, error = %e, "Failed to update metric");
        }
    }
}
