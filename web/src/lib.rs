//! Axum integration for Holdfast.
//!
//! Handlers in the commerce service return [`WebResult`]; domain failures
//! travel as [`holdfast_core::CommerceError`] and are mapped to HTTP status
//! codes by [`AppError`]'s `From` impl:
//!
//! ```text
//! InsufficientStock / CapacityExceeded / PersistenceConflict  → 409
//! SeatHoldCancelled                                          → 409
//! NotFound                                                   → 404
//! InvalidRequest                                             → 422
//! CircuitOpen                                                → 503
//! Downstream                                                 → 502
//! Storage                                                    → 500
//! ```
//!
//! # Example
//!
//! ```ignore
//! use holdfast_web::{WebResult, request_id_layer};
//! use axum::{Router, routing::get, Json};
//!
//! async fn remaining(State(state): State<AppState>, Path(id): Path<Uuid>) -> WebResult<Json<u32>> {
//!     let seats = state.capacity.remaining_seats(SessionId::from_uuid(id)).await?;
//!     Ok(Json(seats))
//! }
//!
//! let app = Router::new()
//!     .route("/api/sessions/:id/remaining", get(remaining))
//!     .layer(request_id_layer())
//!     .with_state(state);
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use middleware::{REQUEST_ID_HEADER, RequestId, RequestIdExt, request_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
