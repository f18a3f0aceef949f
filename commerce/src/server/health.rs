//! Readiness and metrics endpoints.

use super::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use holdfast_runtime::circuit_breaker::State as BreakerState;
use holdfast_runtime::health::{HealthCheck, HealthReport};
use holdfast_web::handlers::readiness_response;

pub use holdfast_web::handlers::health_check;

/// Readiness probe.
///
/// The store must answer a ping. An open fulfillment circuit only degrades
/// the service: checkouts and webhooks keep working without it.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let store = match state.store.ping().await {
        Ok(()) => HealthCheck::healthy("store"),
        Err(error) => HealthCheck::unhealthy("store", error.to_string()),
    };

    let breaker = state.finalizer.breaker();
    let fulfillment = match breaker.state().await {
        BreakerState::Closed => HealthCheck::healthy(breaker.name()),
        BreakerState::HalfOpen => HealthCheck::degraded(breaker.name(), "circuit half-open"),
        BreakerState::Open => HealthCheck::degraded(
            breaker.name(),
            format!("circuit open after {} failures", breaker.failure_count().await),
        ),
    };

    readiness_response(HealthReport::new(vec![store, fulfillment]))
}

/// Prometheus scrape endpoint. 404 when metrics are disabled.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref().and_then(|m| m.render()) {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
