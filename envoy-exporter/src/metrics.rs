// Envoy Exporter - Prometheus metrics store
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for gateway monitoring.
//!
//! [`MetricsStore`] owns a private registry holding every series the
//! exporter publishes. It is written by the poller and the session sink and
//! read by the `/metrics` handler; each point write is atomic, so a scrape
//! never sees a torn value even while a poll cycle is in flight.

use prometheus::proto::MetricType;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};

/// Prefix shared by every exported series
#[allow(dead_code)]
pub const METRIC_PREFIX: &str = "envoy_";

/// Every series the exporter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    ProductionWattsNow,
    ProductionWhLifetime,
    InverterLastReportWatts,
    JwtRefreshes,
    SessionRefreshes,
    SessionUses,
}

impl Metric {
    #[allow(dead_code)]
    pub const ALL: [Metric; 6] = [
        Metric::ProductionWattsNow,
        Metric::ProductionWhLifetime,
        Metric::InverterLastReportWatts,
        Metric::JwtRefreshes,
        Metric::SessionRefreshes,
        Metric::SessionUses,
    ];

    /// Full series name, prefix included
    pub fn name(&self) -> &'static str {
        match self {
            Metric::ProductionWattsNow => "envoy_production_watts_now",
            Metric::ProductionWhLifetime => "envoy_production_wh_lifetime",
            Metric::InverterLastReportWatts => "envoy_inverter_last_report_watts",
            Metric::JwtRefreshes => "envoy_jwt_refreshes",
            Metric::SessionRefreshes => "envoy_session_refreshes",
            Metric::SessionUses => "envoy_session_uses",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Metric::ProductionWattsNow => "Watts being produced now",
            Metric::ProductionWhLifetime => "Watt-hour generated over lifetime",
            Metric::InverterLastReportWatts => "Generated watts by inverter",
            Metric::JwtRefreshes => "Number of JWT token refreshes during runtime",
            Metric::SessionRefreshes => "Number of session refreshes during runtime",
            Metric::SessionUses => "Number of uses of the current session",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::JwtRefreshes | Metric::SessionRefreshes => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            Metric::InverterLastReportWatts => &["gateway", "serial"],
            _ => &["gateway"],
        }
    }
}

/// Gauge or counter semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// One series instance as seen by a snapshot.
#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub kind: MetricKind,
    pub value: f64,
}

impl Sample {
    /// Value of a label, if present
    #[allow(dead_code)]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Metrics store errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("{metric} is a {actual:?} series, not a {expected:?}")]
    WrongKind {
        metric: &'static str,
        expected: MetricKind,
        actual: MetricKind,
    },

    #[error("Exposition is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Concurrency-safe store of every exported series.
pub struct MetricsStore {
    registry: Registry,
    production_watts_now: GaugeVec,
    production_wh_lifetime: GaugeVec,
    inverter_last_report_watts: GaugeVec,
    jwt_refreshes: CounterVec,
    session_refreshes: CounterVec,
    session_uses: GaugeVec,
}

impl MetricsStore {
    /// Create a store and register all series in a fresh registry
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let gauge = |metric: Metric| -> Result<GaugeVec, MetricsError> {
            let vec = GaugeVec::new(Opts::new(metric.name(), metric.help()), metric.label_names())?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let counter = |metric: Metric| -> Result<CounterVec, MetricsError> {
            let vec =
                CounterVec::new(Opts::new(metric.name(), metric.help()), metric.label_names())?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let production_watts_now = gauge(Metric::ProductionWattsNow)?;
        let production_wh_lifetime = gauge(Metric::ProductionWhLifetime)?;
        let inverter_last_report_watts = gauge(Metric::InverterLastReportWatts)?;
        let jwt_refreshes = counter(Metric::JwtRefreshes)?;
        let session_refreshes = counter(Metric::SessionRefreshes)?;
        let session_uses = gauge(Metric::SessionUses)?;

        Ok(Self {
            registry,
            production_watts_now,
            production_wh_lifetime,
            inverter_last_report_watts,
            jwt_refreshes,
            session_refreshes,
            session_uses,
        })
    }

    fn gauge(&self, metric: Metric) -> Option<&GaugeVec> {
        match metric {
            Metric::ProductionWattsNow => Some(&self.production_watts_now),
            Metric::ProductionWhLifetime => Some(&self.production_wh_lifetime),
            Metric::InverterLastReportWatts => Some(&self.inverter_last_report_watts),
            Metric::SessionUses => Some(&self.session_uses),
            Metric::JwtRefreshes | Metric::SessionRefreshes => None,
        }
    }

    fn counter(&self, metric: Metric) -> Option<&CounterVec> {
        match metric {
            Metric::JwtRefreshes => Some(&self.jwt_refreshes),
            Metric::SessionRefreshes => Some(&self.session_refreshes),
            _ => None,
        }
    }

    /// Replace the value of a gauge series, creating it on first write
    pub fn set_gauge(&self, metric: Metric, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        let vec = self.gauge(metric).ok_or(MetricsError::WrongKind {
            metric: metric.name(),
            expected: MetricKind::Gauge,
            actual: metric.kind(),
        })?;
        vec.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }

    /// Add one to a counter series, creating it on first write
    pub fn increment_counter(&self, metric: Metric, labels: &[&str]) -> Result<(), MetricsError> {
        let vec = self.counter(metric).ok_or(MetricsError::WrongKind {
            metric: metric.name(),
            expected: MetricKind::Counter,
            actual: metric.kind(),
        })?;
        vec.get_metric_with_label_values(labels)?.inc();
        Ok(())
    }

    /// All series instances, ordered by name then labels
    #[allow(dead_code)]
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut samples = Vec::new();

        for family in self.registry.gather() {
            let kind = match family.get_field_type() {
                MetricType::COUNTER => MetricKind::Counter,
                _ => MetricKind::Gauge,
            };
            for m in family.get_metric() {
                let labels = m
                    .get_label()
                    .iter()
                    .map(|l| (l.get_name().to_string(), l.get_value().to_string()))
                    .collect();
                let value = match kind {
                    MetricKind::Counter => m.get_counter().get_value(),
                    MetricKind::Gauge => m.get_gauge().get_value(),
                };
                samples.push(Sample {
                    name: family.get_name().to_string(),
                    labels,
                    kind,
                    value,
                });
            }
        }

        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        samples
    }

    /// Current value of one series, without creating it
    #[allow(dead_code)]
    pub fn value(&self, metric: Metric, labels: &[&str]) -> Option<f64> {
        self.snapshot()
            .into_iter()
            .find(|s| {
                s.name == metric.name()
                    && s.labels.len() == labels.len()
                    && metric
                        .label_names()
                        .iter()
                        .zip(labels)
                        .all(|(name, value)| s.label(name) == Some(*value))
            })
            .map(|s| s.value)
    }

    /// Encode all series to Prometheus text format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_metric_names_carry_prefix() {
        for metric in Metric::ALL {
            assert!(metric.name().starts_with(METRIC_PREFIX), "{:?}", metric);
            assert!(!metric.help().is_empty());
        }
        assert_eq!(Metric::JwtRefreshes.kind(), MetricKind::Counter);
        assert_eq!(Metric::SessionUses.kind(), MetricKind::Gauge);
        assert_eq!(
            Metric::InverterLastReportWatts.label_names(),
            &["gateway", "serial"]
        );
    }

    #[test]
    fn test_set_gauge_replaces_value() {
        let store = MetricsStore::new().unwrap();
        store
            .set_gauge(Metric::ProductionWattsNow, &["123"], 100.0)
            .unwrap();
        store
            .set_gauge(Metric::ProductionWattsNow, &["123"], 450.5)
            .unwrap();

        assert_eq!(store.value(Metric::ProductionWattsNow, &["123"]), Some(450.5));
    }

    #[test]
    fn test_increment_counter_by_one() {
        let store = MetricsStore::new().unwrap();
        for _ in 0..3 {
            store
                .increment_counter(Metric::JwtRefreshes, &["123"])
                .unwrap();
        }
        assert_eq!(store.value(Metric::JwtRefreshes, &["123"]), Some(3.0));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let store = MetricsStore::new().unwrap();

        let err = store
            .increment_counter(Metric::ProductionWattsNow, &["123"])
            .unwrap_err();
        assert!(matches!(err, MetricsError::WrongKind { .. }));

        let err = store
            .set_gauge(Metric::SessionRefreshes, &["123"], 1.0)
            .unwrap_err();
        assert!(matches!(err, MetricsError::WrongKind { .. }));
    }

    #[test]
    fn test_wrong_label_count_is_rejected() {
        let store = MetricsStore::new().unwrap();
        let result = store.set_gauge(Metric::InverterLastReportWatts, &["123"], 10.0);
        assert!(matches!(result, Err(MetricsError::Prometheus(_))));
    }

    #[test]
    fn test_series_are_created_lazily() {
        let store = MetricsStore::new().unwrap();
        assert!(store.snapshot().is_empty());
        assert_eq!(store.value(Metric::SessionUses, &["123"]), None);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let store = MetricsStore::new().unwrap();
        store
            .set_gauge(Metric::InverterLastReportWatts, &["123", "b"], 2.0)
            .unwrap();
        store
            .set_gauge(Metric::InverterLastReportWatts, &["123", "a"], 1.0)
            .unwrap();
        store
            .increment_counter(Metric::SessionRefreshes, &["123"])
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].name, "envoy_inverter_last_report_watts");
        assert_eq!(snapshot[0].label("serial"), Some("a"));
        assert_eq!(snapshot[1].label("serial"), Some("b"));
        assert_eq!(snapshot[2].name, "envoy_session_refreshes");
        assert_eq!(snapshot[2].kind, MetricKind::Counter);
    }

    #[test]
    fn test_encode_metrics() {
        let store = MetricsStore::new().unwrap();
        store
            .set_gauge(Metric::ProductionWattsNow, &["123"], 450.5)
            .unwrap();
        store
            .increment_counter(Metric::JwtRefreshes, &["123"])
            .unwrap();

        let output = store.encode().unwrap();
        assert!(output.contains("# HELP envoy_production_watts_now Watts being produced now"));
        assert!(output.contains("# TYPE envoy_production_watts_now gauge"));
        assert!(output.contains("envoy_production_watts_now{gateway=\"123\"} 450.5"));
        assert!(output.contains("# TYPE envoy_jwt_refreshes counter"));
    }

    #[test]
    fn test_stores_are_independent() {
        let a = MetricsStore::new().unwrap();
        let b = MetricsStore::new().unwrap();
        a.set_gauge(Metric::ProductionWattsNow, &["123"], 1.0).unwrap();
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_writes_never_tear() {
        let store = Arc::new(MetricsStore::new().unwrap());
        let values = [1.25, 4096.5, 123_456.75];

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..5_000 {
                    store
                        .set_gauge(Metric::ProductionWattsNow, &["123"], values[i % values.len()])
                        .unwrap();
                }
            })
        };

        for _ in 0..500 {
            if let Some(v) = store.value(Metric::ProductionWattsNow, &["123"]) {
                assert!(values.contains(&v), "torn value {}", v);
            }
        }
        writer.join().unwrap();
    }
}
