// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! Health check related routes
//!
//! Provides API endpoints for health checks and metrics collection.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::AppState;

/// Basic health check handler
///
/// Returns a simple "OK" response for quick service availability check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is running normally", body = String)
    ),
    operation_id = "health_check"
)]
pub async fn health_check() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
///
/// Returns metrics data in Prometheus text format
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Successfully returned Prometheus metrics", body = String),
        (status = 503, description = "Metrics collection is disabled")
    ),
    operation_id = "metrics"
)]
pub async fn metrics_endpoint(State(app_state): State<AppState>) -> Response {
    let Some(collector) = app_state.prometheus_collector.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Metrics are disabled").into_response();
    };

    app_state.cache.refresh_gauges().await;

    match collector.export() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}
