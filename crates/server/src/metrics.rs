// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics module
//!
//! Provides global metrics using the default Prometheus registry via macros and
//! an Axum-compatible metrics handler.

use std::sync::LazyLock;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};
use tracing::warn;

/// Completed requests, labeled by method and response status.
pub static REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests, labeled by method and status",
        &["method", "status"]
    )
    .expect("Failed to create http_requests_total counter vec")
});

/// Connections currently held open by the server.
pub static OPEN_CONNECTIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "http_open_connections",
        "Number of client connections currently open"
    )
    .expect("Failed to create http_open_connections gauge")
});

/// Connections closed because the drain deadline expired.
pub static FORCED_CLOSURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "http_forced_connection_closures_total",
        "Connections forcibly closed when the shutdown drain deadline expired"
    )
    .expect("Failed to create http_forced_connection_closures_total counter")
});

/// Count a finished request
///
/// # Arguments
/// * `method` - The request method
/// * `status` - Response status code, or `aborted` when none was produced
pub fn record_request(method: &str, status: &str) {
    REQUESTS_TOTAL.with_label_values(&[method, status]).inc();
}

/// Count connections closed by force during shutdown
pub fn record_forced_closures(count: usize) {
    FORCED_CLOSURES.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Keeps [`OPEN_CONNECTIONS`] accurate for as long as a connection lives
#[derive(Debug)]
pub struct OpenConnectionGuard(());

impl OpenConnectionGuard {
    /// Count a newly accepted connection
    pub fn new() -> Self {
        OPEN_CONNECTIONS.inc();
        Self(())
    }
}

impl Default for OpenConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OpenConnectionGuard {
    fn drop(&mut self) {
        OPEN_CONNECTIONS.dec();
    }
}

/// Axum handler that exports metrics in Prometheus text format
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer: Vec<u8> = Vec::new();

    if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
        warn!(%error, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        buffer,
    )
        .into_response()
}
