//! HTTP server for the commerce engine.
//!
//! - [`state`]: shared components handed to every handler
//! - [`routes`]: the axum router
//! - [`handlers`]: checkout, booking, webhook and order endpoints
//! - [`health`]: liveness, readiness and metrics endpoints

pub mod handlers;
pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
