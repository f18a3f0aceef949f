//! API endpoints.
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /api/checkout` | [`checkout`] |
//! | `GET /api/reservations/:id` | [`get_reservation`] |
//! | `POST /api/reservations/:id/payment-reference` | [`assign_payment_reference`] |
//! | `POST /api/reservations/:id/release` | [`release_reservation`] |
//! | `POST /api/bookings` | [`create_booking`] |
//! | `POST /api/bookings/:reference/cancel` | [`cancel_booking`] |
//! | `GET /api/sessions/:id/remaining` | [`remaining_seats`] |
//! | `GET /api/courses/:id/next-session` | [`next_session`] |
//! | `POST /api/webhooks/payment` | [`payment_webhook`] |
//! | `GET /api/orders/:reference` | [`get_order`] |
//! | `POST /api/orders/:reference/confirm-shipping` | [`confirm_shipping`] |

use super::state::AppState;
use crate::finalization::{Finalized, PaymentSucceeded, ShippingConfirmation};
use crate::reservation_ledger::ReleaseOutcome;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use holdfast_core::types::{
    Booking, BookingReference, CourseId, Order, PaymentReference, Reservation, ReservationId,
    ReservationRequest, Session, SessionId,
};
use holdfast_web::{AppError, WebResult};
use serde::{Deserialize, Serialize};

/// Webhook event type that creates orders.
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

// ============================================================================
// Checkout & reservations
// ============================================================================

/// Reserve stock and seats for a checkout.
///
/// Counters are pre-checked first so the common "sold out" case answers
/// without touching anything; the reservation itself decides races.
///
/// # Errors
///
/// 409 when stock or seats ran out, 422 for malformed carts.
pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<ReservationRequest>,
) -> WebResult<(StatusCode, Json<Reservation>)> {
    state.reservations.stock().precheck(&request.items).await?;
    for seat in &request.seats {
        state
            .capacity()
            .precheck(seat.session_id, seat.attendees)
            .await?;
    }

    let reservation = state.reservations.reserve(request).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Load a reservation.
///
/// # Errors
///
/// 404 for unknown ids.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> WebResult<Json<Reservation>> {
    Ok(Json(state.reservations.get(id).await?))
}

/// Body of `POST /api/reservations/:id/payment-reference`.
#[derive(Debug, Deserialize)]
pub struct AssignPaymentReference {
    /// Reference issued by the processor
    pub payment_reference: PaymentReference,
}

/// Attach the processor's payment reference to a reservation.
///
/// # Errors
///
/// 409 if a different reference is already attached, 404 for unknown ids.
pub async fn assign_payment_reference(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
    Json(body): Json<AssignPaymentReference>,
) -> WebResult<Json<Reservation>> {
    Ok(Json(
        state
            .reservations
            .assign_payment_reference(id, body.payment_reference)
            .await?,
    ))
}

/// Abandon a reservation and return its stock.
///
/// # Errors
///
/// 404 for unknown ids.
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> WebResult<Json<ReleaseOutcome>> {
    Ok(Json(state.reservations.release(id).await?))
}

// ============================================================================
// Bookings & sessions
// ============================================================================

/// Body of `POST /api/bookings`.
#[derive(Debug, Deserialize)]
pub struct CreateBooking {
    /// Session to book
    pub session_id: SessionId,
    /// Seats wanted
    pub attendees: u32,
    /// Caller-chosen reference; generated when absent
    #[serde(default)]
    pub reference: Option<BookingReference>,
}

/// Book seats directly, outside a checkout.
///
/// # Errors
///
/// 409 when the session is full or the reference is taken, 422 for zero
/// attendees or an ended session.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(body): Json<CreateBooking>,
) -> WebResult<(StatusCode, Json<Booking>)> {
    let reference = body.reference.unwrap_or_else(BookingReference::generate);
    let booking = state
        .capacity()
        .book(body.session_id, body.attendees, reference)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Cancel a booking.
///
/// # Errors
///
/// 404 for unknown references.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(reference): Path<BookingReference>,
) -> WebResult<Json<Booking>> {
    Ok(Json(state.capacity().cancel(&reference).await?))
}

/// Response of `GET /api/sessions/:id/remaining`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemainingSeats {
    /// Session id
    pub session_id: SessionId,
    /// Seats still free
    pub remaining: u32,
}

/// Seats left in a session.
///
/// # Errors
///
/// 404 for unknown sessions.
pub async fn remaining_seats(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> WebResult<Json<RemainingSeats>> {
    let remaining = state.capacity().remaining_seats(session_id).await?;
    Ok(Json(RemainingSeats {
        session_id,
        remaining,
    }))
}

/// Earliest session of a course that has not ended.
///
/// # Errors
///
/// 404 when the course has no upcoming session.
pub async fn next_session(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
) -> WebResult<Json<Session>> {
    state
        .capacity()
        .next_session(course_id, state.clock.now())
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Upcoming session for course", course_id))
}

// ============================================================================
// Payment webhook
// ============================================================================

/// Body of the webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always true; the event will not be redelivered
    pub received: bool,
    /// Present when the event produced or matched an order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Finalized>,
    /// Present when the event was ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
}

impl WebhookAck {
    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            received: true,
            result: None,
            ignored: Some(reason.into()),
        }
    }
}

/// Payment processor webhook.
///
/// Only `payment.succeeded` is acted on. The response steers redelivery:
///
/// - 200 for success, duplicates, unknown event types, malformed bodies and
///   logic errors (retrying would give the same answer)
/// - 503 for transient failures, so the processor delivers again
///
/// The body is read as raw bytes whatever the content type, so an
/// unparseable delivery is logged and acknowledged here rather than
/// rejected by an extractor.
///
/// # Errors
///
/// 503 when the failure is retryable.
pub async fn payment_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> WebResult<Json<WebhookAck>> {
    let event: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(error = %error, bytes = body.len(), "Unparseable payment webhook");
            return Ok(Json(WebhookAck::ignored(format!("malformed payload: {error}"))));
        }
    };

    let event_type = event
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    if event_type != PAYMENT_SUCCEEDED {
        tracing::debug!(event_type = %event_type, "Ignoring webhook event");
        return Ok(Json(WebhookAck::ignored(format!("unhandled event type '{event_type}'"))));
    }

    let payment: PaymentSucceeded = match serde_json::from_value(event) {
        Ok(payment) => payment,
        Err(error) => {
            tracing::error!(error = %error, "Malformed payment webhook");
            return Ok(Json(WebhookAck::ignored(format!("malformed payload: {error}"))));
        }
    };
    let reference = payment.payment_reference.clone();

    match state.finalizer.finalize_from_webhook(payment).await {
        Ok(finalized) => Ok(Json(WebhookAck {
            received: true,
            result: Some(finalized),
            ignored: None,
        })),
        Err(error) if error.is_retryable() => {
            tracing::warn!(payment_reference = %reference, error = %error, "Payment webhook failed, requesting redelivery");
            Err(AppError::unavailable(error.to_string()))
        }
        Err(error) => {
            tracing::error!(
                payment_reference = %reference,
                code = error.code(),
                error = %error,
                "Payment webhook rejected"
            );
            Ok(Json(WebhookAck::ignored(error.to_string())))
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Load the order for a payment reference.
///
/// # Errors
///
/// 404 when no order exists yet.
pub async fn get_order(
    State(state): State<AppState>,
    Path(reference): Path<PaymentReference>,
) -> WebResult<Json<Order>> {
    state
        .finalizer
        .order(&reference)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Order for payment", &reference))
}

/// Client completion ping.
///
/// Always 200 for a well-formed reference: `pending` until the webhook has
/// created the order.
///
/// # Errors
///
/// 500 if the order cannot be looked up.
pub async fn confirm_shipping(
    State(state): State<AppState>,
    Path(reference): Path<PaymentReference>,
) -> WebResult<Json<ShippingConfirmation>> {
    Ok(Json(state.finalizer.confirm_shipping(&reference).await?))
}
