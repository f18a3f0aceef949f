//! # Holdfast Core
//!
//! Domain types, error taxonomy and storage abstractions shared by every
//! Holdfast crate.
//!
//! ## Contents
//!
//! - [`types`]: stock items, sessions, bookings, reservations and orders
//! - [`error`]: the [`CommerceError`](error::CommerceError) taxonomy
//! - [`store`]: dyn-compatible storage traits with conditional-write contracts
//! - [`gateway`]: the downstream fulfillment dependency
//! - [`notify`]: fire-and-forget notification messages and sinks
//! - [`environment`]: injectable clock
//!
//! Storage implementations live elsewhere: `holdfast-testing` ships an
//! in-memory store, `holdfast-postgres` a `PostgreSQL` one.

pub mod error;
pub mod gateway;
pub mod notify;
pub mod store;
pub mod types;

/// Injected environment dependencies.
///
/// Everything that reads the wall clock goes through [`Clock`](environment::Clock)
/// so reservation expiry can be tested deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use error::CommerceError;
pub use store::StoreError;
