//! Storage abstractions with conditional-write contracts.
//!
//! Every mutation that guards a scarce resource is expressed as a single
//! conditional write the backend executes atomically:
//!
//! - [`StockStore::try_decrement`]: "decrement only if current ≥ quantity"
//! - [`BookingStore::insert_within_capacity`]: "insert only if seats remain"
//! - [`ReservationStore::transition_reservation`]: compare-and-swap on status
//! - [`OrderStore::insert_order`]: unique constraint on the payment reference
//!
//! Callers never read a value and write it back. Reads exposed here are for
//! pre-checks and display only.
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] (`Pin<Box<dyn Future>>`) instead of using
//! `async fn` so stores can be shared as `Arc<dyn StockStore>` and friends.

use crate::types::{
    Booking, BookingReference, BookingStatus, CourseId, Order, PaymentReference, Reservation,
    ReservationId, ReservationStatus, Session, SessionId, StockItem, StockKey,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors reported by storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Lookup key
        id: String,
    },

    /// A uniqueness constraint rejected the write.
    #[error("unique violation on {entity}: {key}")]
    UniqueViolation {
        /// Kind of record
        entity: &'static str,
        /// Conflicting key
        key: String,
    },

    /// Connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result of a conditional stock decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// The counter was decremented.
    Applied {
        /// Value before the write
        before: u32,
        /// Value after the write
        after: u32,
    },
    /// The counter held fewer units than requested and was left untouched.
    Insufficient {
        /// Value observed by the conditional write
        available: u32,
    },
}

/// Result of a capacity-guarded booking insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingInsert {
    /// The booking was stored.
    Inserted(Booking),
    /// The session could not seat the booking; nothing was stored.
    Exceeded {
        /// Seats left at the moment of the check
        remaining: u32,
    },
}

/// Result of a compare-and-swap status transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition<T> {
    /// The record matched the expected state and was updated; holds the new record.
    Applied(T),
    /// The record exists but was not in an expected state; holds it as found.
    Unchanged(T),
    /// No record with that key.
    Missing,
}

impl<T> Transition<T> {
    /// The record, whether or not the transition applied.
    #[must_use]
    pub fn into_record(self) -> Option<T> {
        match self {
            Self::Applied(record) | Self::Unchanged(record) => Some(record),
            Self::Missing => None,
        }
    }

    /// Whether this call performed the transition.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Stock counters keyed by [`StockKey`].
pub trait StockStore: Send + Sync {
    /// Create or overwrite a counter. Used by catalog tooling, the demo and tests.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn seed(&self, item: StockItem) -> StoreFuture<'_, ()>;

    /// Current value of a counter.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown keys.
    fn quantity(&self, key: StockKey) -> StoreFuture<'_, u32>;

    /// Atomically decrement by `quantity` only if the counter holds at least
    /// that many units.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown keys. Insufficient stock is not an
    /// error at this layer, see [`DecrementOutcome::Insufficient`].
    fn try_decrement(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, DecrementOutcome>;

    /// Unconditionally add `quantity` units and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown keys.
    fn increment(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, u32>;
}

/// Scheduled class sessions.
pub trait SessionStore: Send + Sync {
    /// Create or replace a session.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn upsert_session(&self, session: Session) -> StoreFuture<'_, ()>;

    /// Load a session.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn get_session(&self, id: SessionId) -> StoreFuture<'_, Option<Session>>;

    /// All sessions of a course, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn sessions_for_course(&self, course_id: CourseId) -> StoreFuture<'_, Vec<Session>>;
}

/// Bookings against session capacity.
pub trait BookingStore: Send + Sync {
    /// Sum of `attendee_count` over bookings of the session that still hold seats.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn active_attendees(&self, session_id: SessionId) -> StoreFuture<'_, u32>;

    /// Insert `booking` only if the session's capacity minus its active
    /// attendees is at least `booking.attendee_count`. The capacity read, the
    /// sum and the insert are one atomic operation.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the session does not exist
    /// - `UniqueViolation`: the booking reference is taken
    fn insert_within_capacity(&self, booking: Booking) -> StoreFuture<'_, BookingInsert>;

    /// Load a booking.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn get_booking(&self, reference: BookingReference) -> StoreFuture<'_, Option<Booking>>;

    /// Move a booking to `to` if its current status is one of `from`.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn transition_booking(
        &self,
        reference: BookingReference,
        from: Vec<BookingStatus>,
        to: BookingStatus,
    ) -> StoreFuture<'_, Transition<Booking>>;
}

/// Reservation records.
pub trait ReservationStore: Send + Sync {
    /// Persist a new reservation.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` when the id or payment reference is taken.
    fn insert_reservation(&self, reservation: Reservation) -> StoreFuture<'_, ()>;

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn get_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>>;

    /// Load the reservation carrying a payment reference.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn find_reservation_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Reservation>>;

    /// Set the payment reference if none is assigned yet.
    ///
    /// `Unchanged` carries the record as found, whichever reference it has.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` when another reservation already carries the reference.
    fn assign_payment_reference(
        &self,
        id: ReservationId,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Reservation>>;

    /// Compare-and-swap the status from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, Transition<Reservation>>;

    /// Up to `limit` reservations still `Reserved` whose `expires_at <= now`,
    /// oldest expiry first.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>>;
}

/// Order records.
pub trait OrderStore: Send + Sync {
    /// Persist a new order.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` when an order with the same payment reference
    /// already exists. This is the backstop for at-most-one order per payment.
    fn insert_order(&self, order: Order) -> StoreFuture<'_, ()>;

    /// Load the order for a payment reference.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn find_order_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Order>>;

    /// Set `metadata.shipping_confirmed` if it is not set yet.
    ///
    /// # Errors
    ///
    /// Returns `Database` on backend failure.
    fn mark_shipping_confirmed(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Order>>;
}

/// A backend implementing every store, plus a liveness probe.
pub trait CommerceStore:
    StockStore + SessionStore + BookingStore + ReservationStore + OrderStore
{
    /// Check that the backend answers queries.
    ///
    /// # Errors
    ///
    /// Returns `Database` when the backend is unreachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
