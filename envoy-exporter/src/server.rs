// Envoy Exporter - HTTP exposition
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP endpoints served to Prometheus.

use crate::metrics::MetricsStore;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Content type of the Prometheus text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build the router: `/metrics` and `/health`.
pub fn router(store: Arc<MetricsStore>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(store)
}

/// Bind `listen` and serve until the server stops.
pub async fn serve(listen: &str, store: Arc<MetricsStore>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Metrics endpoint: http://{}/metrics", listener.local_addr()?);
    axum::serve(listener, router(store)).await
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(store): State<Arc<MetricsStore>>) -> Response {
    match store.encode() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
