//! Router configuration.

use super::handlers;
use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use holdfast_web::request_id_layer;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// Probes and `/metrics` sit at the root; everything else is under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Checkout & reservations
        .route("/checkout", post(handlers::checkout))
        .route("/reservations/:id", get(handlers::get_reservation))
        .route(
            "/reservations/:id/payment-reference",
            post(handlers::assign_payment_reference),
        )
        .route(
            "/reservations/:id/release",
            post(handlers::release_reservation),
        )
        // Bookings & sessions
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/:reference/cancel", post(handlers::cancel_booking))
        .route("/sessions/:id/remaining", get(handlers::remaining_seats))
        .route("/courses/:id/next-session", get(handlers::next_session))
        // Payments & orders
        .route("/webhooks/payment", post(handlers::payment_webhook))
        .route("/orders/:reference", get(handlers::get_order))
        .route(
            "/orders/:reference/confirm-shipping",
            post(handlers::confirm_shipping),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
        .with_state(state)
}
