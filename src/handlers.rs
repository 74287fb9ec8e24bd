//! HTTP handlers for the scrape server.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error};

use crate::collectors::Exporter;

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Shared server state.
pub struct AppState {
    pub exporter: Exporter,
    pub include_exporter_metrics: bool,
}

pub type SharedState = Arc<AppState>;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    GatherFailed,
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to gather metrics").into_response()
    }
}

/// Handler for the / landing page.
pub async fn root_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        "<html>\
         <head><title>GPFS Exporter</title></head>\
         <body>\
         <h1>GPFS Exporter</h1>\
         <p><a href=\"/metrics\">Metrics</a></p>\
         </body>\
         </html>",
    )
}

/// Handler for the /metrics endpoint. Collector failures surface as
/// self-observation samples inside a 200 response; only a registry or
/// encoder problem produces a 500.
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<([(header::HeaderName, &'static str); 1], Vec<u8>), MetricsError> {
    debug!("Processing /metrics request");

    let registry = state.exporter.gather().await.map_err(|e| {
        error!("Failed to gather metrics: {}", e);
        MetricsError::GatherFailed
    })?;

    if state.include_exporter_metrics {
        let process = prometheus::process_collector::ProcessCollector::for_self();
        if let Err(e) = registry.register(Box::new(process)) {
            error!("Failed to register process metrics: {}", e);
        }
    }

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| {
            error!("Failed to encode metrics: {}", e);
            MetricsError::EncodingFailed
        })?;

    Ok(([(header::CONTENT_TYPE, TEXT_FORMAT)], buffer))
}
