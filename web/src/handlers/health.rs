//! Health check endpoints.
//!
//! Liveness never touches dependencies; readiness is computed by the
//! application (store ping, breaker state) and rendered here.

use axum::{Json, http::StatusCode};
use holdfast_runtime::health::HealthReport;

/// Liveness probe.
///
/// ```text
/// GET /health  →  200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Render a readiness report.
///
/// - 200 OK: healthy or degraded (an open circuit still serves checkouts)
/// - 503 Service Unavailable: unhealthy
///
/// ```json
/// {
///   "status": "degraded",
///   "checks": [
///     { "component": "store", "status": "healthy" },
///     { "component": "fulfillment", "status": "degraded", "message": "circuit open" }
///   ]
/// }
/// ```
#[must_use]
pub fn readiness_response(report: HealthReport) -> (StatusCode, Json<HealthReport>) {
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
