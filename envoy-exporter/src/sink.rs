// Envoy Exporter - Session lifecycle sink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Turns the client's token and session notifications into metrics.

use crate::metrics::{Metric, MetricsError, MetricsStore};
use envoy::{EnvoyError, SessionObserver};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct SessionUses {
    last_session: Option<String>,
    count: u64,
}

/// Session lifecycle observer registered with the gateway client.
///
/// `session_uses` counts uses of the *current* session only: a new
/// session id restarts the count at 1.
pub struct SessionSink {
    gateway: String,
    store: Arc<MetricsStore>,
    uses: Mutex<SessionUses>,
}

impl SessionSink {
    pub fn new(gateway: impl Into<String>, store: Arc<MetricsStore>) -> Self {
        Self {
            gateway: gateway.into(),
            store,
            uses: Mutex::new(SessionUses::default()),
        }
    }

    fn record(&self, result: Result<(), MetricsError>) {
        if let Err(e) = result {
            warn!(gateway = %self.gateway, error = %e, "Failed to update session metric");
        }
    }
}

impl SessionObserver for SessionSink {
    fn jwt_refreshed(&self) {
        debug!("JWT refreshed");
        self.record(
            self.store
                .increment_counter(Metric::JwtRefreshes, &[self.gateway.as_str()]),
        );
    }

    fn jwt_error(&self, err: &EnvoyError) {
        error!(error = %err, "JWT error");
    }

    fn session_refreshed(&self, session_id: &str) {
        debug!(session = session_id, "Session refreshed");
        self.record(
            self.store
                .increment_counter(Metric::SessionRefreshes, &[self.gateway.as_str()]),
        );
    }

    fn session_used(&self, session_id: &str) {
        let count = {
            let mut uses = self.uses.lock().unwrap_or_else(PoisonError::into_inner);
            if uses.last_session.as_deref() != Some(session_id) {
                uses.last_session = Some(session_id.to_string());
                uses.count = 0;
            }
            uses.count += 1;
            uses.count
        };

        self.record(
            self.store
                .set_gauge(Metric::SessionUses, &[self.gateway.as_str()], count as f64),
        );
        debug!(session = session_id, uses = count, "Session used");
    }

    fn session_error(&self, err: &EnvoyError) {
        error!(error = %err, "session error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (SessionSink, Arc<MetricsStore>) {
        let store = Arc::new(MetricsStore::new().unwrap());
        (SessionSink::new("123", Arc::clone(&store)), store)
    }

    #[test]
    fn test_session_uses_reset_on_rotation() {
        let (sink, store) = sink();
        let mut observed = Vec::new();

        for id in ["A", "A", "A", "B", "B"] {
            sink.session_used(id);
            observed.push(store.value(Metric::SessionUses, &["123"]).unwrap());
        }

        assert_eq!(observed, vec![1.0, 2.0, 3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_returning_to_previous_session_restarts_count() {
        let (sink, store) = sink();
        sink.session_used("A");
        sink.session_used("B");
        sink.session_used("A");
        assert_eq!(store.value(Metric::SessionUses, &["123"]), Some(1.0));
    }

    #[test]
    fn test_refresh_counters_increment_by_one() {
        let (sink, store) = sink();

        sink.jwt_refreshed();
        assert_eq!(store.value(Metric::JwtRefreshes, &["123"]), Some(1.0));
        sink.jwt_refreshed();
        assert_eq!(store.value(Metric::JwtRefreshes, &["123"]), Some(2.0));

        sink.session_refreshed("A");
        sink.session_refreshed("B");
        sink.session_refreshed("B");
        assert_eq!(store.value(Metric::SessionRefreshes, &["123"]), Some(3.0));
    }

    #[test]
    fn test_errors_only_log() {
        let (sink, store) = sink();
        sink.jwt_error(&EnvoyError::MissingCredentials);
        sink.session_error(&EnvoyError::Session("no cookie".to_string()));
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_refreshes_do_not_touch_session_uses() {
        let (sink, store) = sink();
        sink.session_used("A");
        sink.session_used("A");
        sink.session_refreshed("B");
        assert_eq!(store.value(Metric::SessionUses, &["123"]), Some(2.0));
        sink.session_used("B");
        assert_eq!(store.value(Metric::SessionUses, &["123"]), Some(1.0));
    }
}
