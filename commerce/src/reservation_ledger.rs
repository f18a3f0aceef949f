//! Reservation Ledger: provisional holds that have already taken stock.
//!
//! A reservation records every stock decrement and seat booking made for one
//! checkout. Its status moves exactly once, through a compare-and-swap at the
//! store:
//!
//! ```text
//! Reserved ──consume──► Consumed   decrements become permanent
//!    │
//!    └──release / expiry──► Released   decrements reversed, bookings cancelled
//! ```
//!
//! Expiry is data (`expires_at`). Nothing in this module runs a timer; a
//! periodic caller (see [`crate::sweeper`]) drives [`ReservationLedger::sweep_expired`].

use crate::capacity_guard::CapacityGuard;
use crate::stock_ledger::StockLedger;
use chrono::{DateTime, Utc};
use holdfast_core::CommerceError;
use holdfast_core::environment::Clock;
use holdfast_core::store::{ReservationStore, Transition};
use holdfast_core::types::{
    BookingReference, PaymentReference, Reservation, ReservationId, ReservationRequest,
    ReservationStatus, SeatHold, StockChange,
};
use holdfast_runtime::metrics::ReservationMetrics;
use serde::Serialize;
use std::sync::Arc;

/// Result of [`ReservationLedger::release`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reservation", rename_all = "snake_case")]
pub enum ReleaseOutcome {
    /// This call released the reservation and returned its stock.
    Released(Reservation),
    /// A previous call already released it.
    AlreadyReleased,
    /// It was consumed by an order; nothing was returned.
    Consumed,
}

/// Counters from one expiry sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired reservations found
    pub examined: usize,
    /// Released by this sweep
    pub released: usize,
    /// Already released or consumed by a concurrent caller
    pub skipped: usize,
    /// Release attempts that failed (retried next sweep)
    pub failed: usize,
}

/// Owns reservation lifecycle and compensation.
#[derive(Clone)]
pub struct ReservationLedger {
    store: Arc<dyn ReservationStore>,
    stock: StockLedger,
    capacity: CapacityGuard,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl ReservationLedger {
    /// Create a ledger. Reservations expire `ttl` after creation.
    #[must_use]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        stock: StockLedger,
        capacity: CapacityGuard,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            stock,
            capacity,
            clock,
            ttl,
        }
    }

    /// Stock ledger used for decrements.
    #[must_use]
    pub const fn stock(&self) -> &StockLedger {
        &self.stock
    }

    /// Capacity guard used for seat holds.
    #[must_use]
    pub const fn capacity(&self) -> &CapacityGuard {
        &self.capacity
    }

    /// Reservation lifetime.
    #[must_use]
    pub const fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Take stock and hold seats for every line of `request`.
    ///
    /// Items are decremented in order, then seats are booked in order. If any
    /// step fails, every decrement already applied is reversed and every
    /// booking already created is cancelled before the error is returned.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty request, a zero quantity or a blank
    ///   payment reference
    /// - `InsufficientStock` naming the first item that ran short
    /// - `CapacityExceeded` naming the first full session
    /// - `PersistenceConflict` if the payment reference is already reserved
    /// - `NotFound` / `Storage` from the stores
    pub async fn reserve(&self, request: ReservationRequest) -> Result<Reservation, CommerceError> {
        validate(&request)?;

        let mut changes: Vec<StockChange> = Vec::with_capacity(request.items.len());
        let mut holds: Vec<SeatHold> = Vec::with_capacity(request.seats.len());

        for item in &request.items {
            match self.stock.try_decrement(&item.key, item.quantity).await {
                Ok(change) => changes.push(change),
                Err(error) => {
                    self.compensate(&changes, &holds).await;
                    return Err(error);
                }
            }
        }

        for seat in &request.seats {
            let reference = BookingReference::generate();
            match self
                .capacity
                .book(seat.session_id, seat.attendees, reference)
                .await
            {
                Ok(booking) => holds.push(SeatHold {
                    session_id: seat.session_id,
                    booking_reference: booking.reference,
                    label: seat.label.clone(),
                    attendees: seat.attendees,
                    unit_price: seat.unit_price,
                }),
                Err(error) => {
                    self.compensate(&changes, &holds).await;
                    return Err(error);
                }
            }
        }

        let now = self.clock.now();
        let reservation = Reservation {
            id: ReservationId::new(),
            payment_reference: request.payment_reference,
            items: request.items,
            seats: holds,
            stock_changes: changes,
            shipping: request.shipping,
            status: ReservationStatus::Reserved,
            created_at: now,
            expires_at: now + self.ttl,
        };

        if let Err(error) = self.store.insert_reservation(reservation.clone()).await {
            self.compensate(&reservation.stock_changes, &reservation.seats)
                .await;
            return Err(error.into());
        }

        ReservationMetrics::record_reserved();
        tracing::info!(
            reservation = %reservation.id,
            items = reservation.items.len(),
            seats = reservation.seats.len(),
            expires_at = %reservation.expires_at,
            "Reservation created"
        );
        Ok(reservation)
    }

    /// Undo applied decrements and bookings of a failed `reserve`.
    async fn compensate(&self, changes: &[StockChange], holds: &[SeatHold]) {
        ReservationMetrics::record_failed();
        self.restore(changes, holds).await;
    }

    /// Return stock and cancel bookings. Individual failures are logged and
    /// do not stop the remaining reversals.
    async fn restore(&self, changes: &[StockChange], holds: &[SeatHold]) {
        for change in changes {
            if let Err(error) = self.stock.increment(&change.key, change.quantity).await {
                tracing::error!(
                    item = %change.key,
                    quantity = change.quantity,
                    error = %error,
                    "Failed to return stock; counter needs reconciliation"
                );
            }
        }
        for hold in holds {
            if let Err(error) = self.capacity.cancel(&hold.booking_reference).await {
                tracing::error!(
                    booking = %hold.booking_reference,
                    session = %hold.session_id,
                    error = %error,
                    "Failed to cancel held booking"
                );
            }
        }
    }

    /// Attach the payment reference issued for this reservation.
    ///
    /// Assigning the same reference again is a no-op.
    ///
    /// # Errors
    ///
    /// - `PersistenceConflict` if a different reference is already set, or
    ///   `reference` belongs to another reservation
    /// - `NotFound` for an unknown reservation, `InvalidRequest` for a blank
    ///   reference, `Storage` on store failure
    pub async fn assign_payment_reference(
        &self,
        id: ReservationId,
        reference: PaymentReference,
    ) -> Result<Reservation, CommerceError> {
        if reference.is_blank() {
            return Err(CommerceError::invalid("payment reference must not be blank"));
        }

        match self
            .store
            .assign_payment_reference(id, reference.clone())
            .await?
        {
            Transition::Applied(reservation) => {
                tracing::debug!(reservation = %id, payment_reference = %reference, "Payment reference assigned");
                Ok(reservation)
            }
            Transition::Unchanged(current)
                if current.payment_reference.as_ref() == Some(&reference) =>
            {
                Ok(current)
            }
            Transition::Unchanged(_) => Err(CommerceError::PersistenceConflict {
                entity: "reservation",
                key: id.to_string(),
            }),
            Transition::Missing => Err(CommerceError::not_found("reservation", id)),
        }
    }

    /// Commit the reservation: its decrements become permanent and its
    /// bookings are confirmed.
    ///
    /// Holds are confirmed before the status swap, so a consumed reservation
    /// never carries a cancelled booking. If one of them was cancelled in the
    /// meantime the reservation is released instead and its stock returned.
    ///
    /// Consuming an already consumed reservation returns it unchanged, so the
    /// call can be repeated after a partial failure.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the reservation is unknown or was released
    /// - `SeatHoldCancelled` if a hold was cancelled; the reservation has
    ///   been released
    /// - `Storage` on store failure
    pub async fn consume(
        &self,
        id: ReservationId,
        payment_reference: &PaymentReference,
    ) -> Result<Reservation, CommerceError> {
        let current = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| CommerceError::not_found("reservation", id))?;
        match current.status {
            ReservationStatus::Released => return Err(CommerceError::not_found("reservation", id)),
            ReservationStatus::Consumed => {
                return self.attach_reference(current, payment_reference).await;
            }
            ReservationStatus::Reserved => {}
        }

        if let Err(error) = self.confirm_holds(&current).await {
            return match error {
                CommerceError::SeatHoldCancelled { .. } => {
                    self.abandon_for_cancelled_hold(id, error, payment_reference)
                        .await
                }
                other => Err(other),
            };
        }

        let reservation = match self
            .store
            .transition_reservation(id, ReservationStatus::Reserved, ReservationStatus::Consumed)
            .await?
        {
            Transition::Applied(reservation) => {
                ReservationMetrics::record_consumed();
                tracing::info!(reservation = %id, payment_reference = %payment_reference, "Reservation consumed");
                reservation
            }
            Transition::Unchanged(current) if current.status == ReservationStatus::Consumed => {
                current
            }
            Transition::Unchanged(_) | Transition::Missing => {
                return Err(CommerceError::not_found("reservation", id));
            }
        };

        self.attach_reference(reservation, payment_reference).await
    }

    async fn confirm_holds(&self, reservation: &Reservation) -> Result<(), CommerceError> {
        for hold in &reservation.seats {
            self.capacity.confirm(&hold.booking_reference).await?;
        }
        Ok(())
    }

    /// A hold disappeared under a reserved reservation: give everything back.
    async fn abandon_for_cancelled_hold(
        &self,
        id: ReservationId,
        error: CommerceError,
        payment_reference: &PaymentReference,
    ) -> Result<Reservation, CommerceError> {
        tracing::warn!(reservation = %id, error = %error, "Seat hold cancelled before consumption");
        match self.release_with_reason(id, "seat_hold_cancelled").await? {
            ReleaseOutcome::Released(_) => Err(error),
            // The sweeper got there first and cancelled the hold itself.
            ReleaseOutcome::AlreadyReleased => Err(CommerceError::not_found("reservation", id)),
            ReleaseOutcome::Consumed => {
                let current = self
                    .store
                    .get_reservation(id)
                    .await?
                    .ok_or_else(|| CommerceError::not_found("reservation", id))?;
                self.attach_reference(current, payment_reference).await
            }
        }
    }

    async fn attach_reference(
        &self,
        reservation: Reservation,
        payment_reference: &PaymentReference,
    ) -> Result<Reservation, CommerceError> {
        match &reservation.payment_reference {
            None => {
                self.assign_payment_reference(reservation.id, payment_reference.clone())
                    .await
            }
            Some(existing) if existing != payment_reference => {
                tracing::warn!(
                    reservation = %reservation.id,
                    recorded = %existing,
                    received = %payment_reference,
                    "Reservation consumed under a different payment reference"
                );
                Ok(reservation)
            }
            Some(_) => Ok(reservation),
        }
    }

    /// Give the reservation's stock and seats back.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown reservation, `Storage` on store failure.
    pub async fn release(&self, id: ReservationId) -> Result<ReleaseOutcome, CommerceError> {
        self.release_with_reason(id, "manual").await
    }

    async fn release_with_reason(
        &self,
        id: ReservationId,
        reason: &'static str,
    ) -> Result<ReleaseOutcome, CommerceError> {
        match self
            .store
            .transition_reservation(id, ReservationStatus::Reserved, ReservationStatus::Released)
            .await?
        {
            Transition::Applied(reservation) => {
                // The status flip is the commit point: only the caller that won it reverses.
                self.restore(&reservation.stock_changes, &reservation.seats)
                    .await;
                ReservationMetrics::record_released(reason);
                tracing::info!(reservation = %id, reason, "Reservation released");
                Ok(ReleaseOutcome::Released(reservation))
            }
            Transition::Unchanged(current) => Ok(match current.status {
                ReservationStatus::Consumed => ReleaseOutcome::Consumed,
                ReservationStatus::Released | ReservationStatus::Reserved => {
                    ReleaseOutcome::AlreadyReleased
                }
            }),
            Transition::Missing => Err(CommerceError::not_found("reservation", id)),
        }
    }

    /// Load a reservation. One found past its expiry is released first.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown reservation, `Storage` on store failure.
    pub async fn get(&self, id: ReservationId) -> Result<Reservation, CommerceError> {
        let reservation = self
            .store
            .get_reservation(id)
            .await?
            .ok_or_else(|| CommerceError::not_found("reservation", id))?;

        if !reservation.is_expired(self.clock.now()) {
            return Ok(reservation);
        }

        match self.release_with_reason(id, "expired").await? {
            ReleaseOutcome::Released(released) => Ok(released),
            ReleaseOutcome::AlreadyReleased | ReleaseOutcome::Consumed => self
                .store
                .get_reservation(id)
                .await?
                .ok_or_else(|| CommerceError::not_found("reservation", id)),
        }
    }

    /// Reservation holding `reference`, in whatever state it is.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn find_by_payment_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Reservation>, CommerceError> {
        Ok(self
            .store
            .find_reservation_by_payment_reference(reference.clone())
            .await?)
    }

    /// Whether `reservation` may be garbage-collected at `now`.
    #[must_use]
    pub fn is_expired(reservation: &Reservation, now: DateTime<Utc>) -> bool {
        reservation.is_expired(now)
    }

    /// Release up to `limit` reservations that expired at or before `now`.
    ///
    /// # Errors
    ///
    /// `Storage` if the expired reservations cannot be listed. Failures of
    /// individual releases are counted in the report.
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<SweepReport, CommerceError> {
        let expired = self.store.list_expired(now, limit).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..SweepReport::default()
        };

        for reservation in expired {
            match self.release_with_reason(reservation.id, "expired").await {
                Ok(ReleaseOutcome::Released(_)) => report.released += 1,
                Ok(ReleaseOutcome::AlreadyReleased | ReleaseOutcome::Consumed) => {
                    report.skipped += 1;
                }
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(reservation = %reservation.id, error = %error, "Failed to release expired reservation");
                }
            }
        }

        Ok(report)
    }
}

fn validate(request: &ReservationRequest) -> Result<(), CommerceError> {
    if request.is_empty() {
        return Err(CommerceError::invalid("reservation has no items or seats"));
    }
    if let Some(item) = request.items.iter().find(|i| i.quantity == 0) {
        return Err(CommerceError::invalid(format!(
            "quantity for {} must be positive",
            item.key
        )));
    }
    if let Some(seat) = request.seats.iter().find(|s| s.attendees == 0) {
        return Err(CommerceError::invalid(format!(
            "attendee count for session {} must be positive",
            seat.session_id
        )));
    }
    if request
        .payment_reference
        .as_ref()
        .is_some_and(PaymentReference::is_blank)
    {
        return Err(CommerceError::invalid("payment reference must not be blank"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use holdfast_core::store::{BookingStore, SessionStore, StockStore};
    use holdfast_core::types::{
        BookingStatus, CourseId, Money, ReservationItem, SeatRequest, Session, SessionId,
        SourceKind, StockItem, StockKey,
    };
    use holdfast_testing::{InMemoryStore, ManualClock, test_clock};

    struct Fixture {
        ledger: ReservationLedger,
        store: Arc<InMemoryStore>,
        clock: ManualClock,
        mat: StockKey,
        block: StockKey,
        session: SessionId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(test_clock().now());
        let mat = StockKey::new("MAT-BLUE", SourceKind::Variant);
        let block = StockKey::new("BLOCK-CORK", SourceKind::Equipment);
        store.seed(StockItem { key: mat.clone(), quantity: 5 }).await.unwrap();
        store.seed(StockItem { key: block.clone(), quantity: 1 }).await.unwrap();

        let starts_at = clock.now() + Duration::days(1);
        let session = Session {
            id: SessionId::new(),
            course_id: CourseId::new(),
            starts_at,
            ends_at: starts_at + Duration::hours(1),
            capacity: 10,
        };
        store.upsert_session(session.clone()).await.unwrap();

        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let stock = StockLedger::new(store.clone());
        let capacity = CapacityGuard::new(store.clone(), store.clone(), clock_arc.clone());
        let ledger = ReservationLedger::new(
            store.clone(),
            stock,
            capacity,
            clock_arc,
            Duration::minutes(15),
        );

        Fixture {
            ledger,
            store,
            clock,
            mat,
            block,
            session: session.id,
        }
    }

    fn item(key: &StockKey, quantity: u32) -> ReservationItem {
        ReservationItem {
            key: key.clone(),
            name: key.item_id.to_string(),
            quantity,
            unit_price: Money::from_cents(2_500),
        }
    }

    fn seats(session: SessionId, attendees: u32) -> SeatRequest {
        SeatRequest {
            session_id: session,
            label: "Morning flow".to_string(),
            attendees,
            unit_price: Money::from_cents(1_800),
        }
    }

    #[tokio::test]
    async fn test_reserve_records_changes_and_holds() {
        let f = fixture().await;

        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 3)],
                seats: vec![seats(f.session, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(reservation.status, ReservationStatus::Reserved);
        assert_eq!(reservation.stock_changes[0].after, 2);
        assert_eq!(reservation.seats.len(), 1);
        assert_eq!(reservation.expires_at, f.clock.now() + Duration::minutes(15));
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 2);
        assert_eq!(f.store.active_attendees(f.session).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_item_reverses_earlier_decrements() {
        let f = fixture().await;

        let err = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 3), item(&f.block, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::InsufficientStock { ref item, .. } if item == "equipment:BLOCK-CORK"));
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
        assert_eq!(f.store.quantity(f.block.clone()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_full_session_reverses_stock_and_cancels_holds() {
        let f = fixture().await;

        let err = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                seats: vec![seats(f.session, 4), seats(f.session, 7)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::CapacityExceeded { remaining: 6, requested: 7, .. }));
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
        assert_eq!(f.store.active_attendees(f.session).await.unwrap(), 0);
        let bookings = f.store.bookings_for_session(f.session).await;
        assert!(bookings.iter().all(|b| b.status == BookingStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_empty_request_is_invalid() {
        let f = fixture().await;
        assert!(matches!(
            f.ledger.reserve(ReservationRequest::default()).await,
            Err(CommerceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_release_restores_counters_once() {
        let f = fixture().await;
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 3), item(&f.block, 1)],
                seats: vec![seats(f.session, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();

        let first = f.ledger.release(reservation.id).await.unwrap();
        let second = f.ledger.release(reservation.id).await.unwrap();

        assert!(matches!(first, ReleaseOutcome::Released(_)));
        assert_eq!(second, ReleaseOutcome::AlreadyReleased);
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
        assert_eq!(f.store.quantity(f.block.clone()).await.unwrap(), 1);
        assert_eq!(f.store.active_attendees(f.session).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_consume_is_idempotent_and_confirms_bookings() {
        let f = fixture().await;
        let reference = PaymentReference::new("PAY-1");
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                seats: vec![seats(f.session, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();

        let first = f.ledger.consume(reservation.id, &reference).await.unwrap();
        let second = f.ledger.consume(reservation.id, &reference).await.unwrap();

        assert_eq!(first.status, ReservationStatus::Consumed);
        assert_eq!(second.status, ReservationStatus::Consumed);
        assert_eq!(first.payment_reference, Some(reference));
        let bookings = f.store.bookings_for_session(f.session).await;
        assert!(bookings.iter().all(|b| b.status == BookingStatus::Confirmed));

        assert_eq!(
            f.ledger.release(reservation.id).await.unwrap(),
            ReleaseOutcome::Consumed
        );
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_hold_releases_instead_of_consuming() {
        let f = fixture().await;
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 2)],
                seats: vec![seats(f.session, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();
        f.ledger
            .capacity()
            .cancel(&reservation.seats[0].booking_reference)
            .await
            .unwrap();

        let err = f
            .ledger
            .consume(reservation.id, &PaymentReference::new("PAY-X"))
            .await
            .unwrap_err();

        assert!(matches!(err, CommerceError::SeatHoldCancelled { .. }));
        assert_eq!(
            f.ledger.get(reservation.id).await.unwrap().status,
            ReservationStatus::Released
        );
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
        assert_eq!(f.ledger.capacity().remaining_seats(f.session).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_released_reservation_cannot_be_consumed() {
        let f = fixture().await;
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();
        f.ledger.release(reservation.id).await.unwrap();

        assert!(matches!(
            f.ledger.consume(reservation.id, &PaymentReference::new("PAY-9")).await,
            Err(CommerceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_payment_reference_is_assigned_once() {
        let f = fixture().await;
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();
        let other = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();

        let reference = PaymentReference::new("PAY-7");
        f.ledger.assign_payment_reference(reservation.id, reference.clone()).await.unwrap();
        f.ledger.assign_payment_reference(reservation.id, reference.clone()).await.unwrap();

        assert!(matches!(
            f.ledger.assign_payment_reference(reservation.id, PaymentReference::new("PAY-8")).await,
            Err(CommerceError::PersistenceConflict { .. })
        ));
        assert!(matches!(
            f.ledger.assign_payment_reference(other.id, reference.clone()).await,
            Err(CommerceError::PersistenceConflict { .. })
        ));
        let found = f.ledger.find_by_payment_reference(&reference).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(reservation.id));
    }

    #[tokio::test]
    async fn test_get_releases_expired_reservation() {
        let f = fixture().await;
        let reservation = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 2)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();

        assert_eq!(f.ledger.get(reservation.id).await.unwrap().status, ReservationStatus::Reserved);

        f.clock.advance(Duration::minutes(15));
        let loaded = f.ledger.get(reservation.id).await.unwrap();

        assert_eq!(loaded.status, ReservationStatus::Released);
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_sweep_releases_only_expired() {
        let f = fixture().await;
        let old = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(10));
        let fresh = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(6));

        assert!(ReservationLedger::is_expired(&old, f.clock.now()));
        assert!(!ReservationLedger::is_expired(&fresh, f.clock.now()));

        let report = f.ledger.sweep_expired(f.clock.now(), 100).await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.released, 1);
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_failed_insert_reverses_everything() {
        let f = fixture().await;
        f.store.fail_operation("insert_reservation").await;

        let err = f
            .ledger
            .reserve(ReservationRequest {
                items: vec![item(&f.mat, 2)],
                seats: vec![seats(f.session, 1)],
                ..ReservationRequest::default()
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(f.store.quantity(f.mat.clone()).await.unwrap(), 5);
        assert_eq!(f.store.active_attendees(f.session).await.unwrap(), 0);
    }
}
