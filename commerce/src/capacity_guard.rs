//! Capacity Guard: seat bookings that never exceed session capacity.
//!
//! The capacity check and the booking insert are one conditional write at the
//! store ([`BookingStore::insert_within_capacity`]). Reads such as
//! [`CapacityGuard::remaining_seats`] are for display and pre-checks.

use chrono::{DateTime, Utc};
use holdfast_core::CommerceError;
use holdfast_core::environment::Clock;
use holdfast_core::store::{BookingInsert, BookingStore, SessionStore, Transition};
use holdfast_core::types::{Booking, BookingReference, BookingStatus, CourseId, Session, SessionId};
use holdfast_runtime::metrics::BookingMetrics;
use std::sync::Arc;

/// Guards session capacity.
#[derive(Clone)]
pub struct CapacityGuard {
    sessions: Arc<dyn SessionStore>,
    bookings: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl CapacityGuard {
    /// Create a guard over the given stores.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        bookings: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            bookings,
            clock,
        }
    }

    async fn session(&self, session_id: SessionId) -> Result<Session, CommerceError> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| CommerceError::not_found("session", session_id))
    }

    /// Capacity minus attendees of every non-cancelled booking, floored at 0.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown session, `Storage` on store failure.
    pub async fn remaining_seats(&self, session_id: SessionId) -> Result<u32, CommerceError> {
        let session = self.session(session_id).await?;
        let taken = self.bookings.active_attendees(session_id).await?;
        Ok(session.capacity.saturating_sub(taken))
    }

    /// Non-binding check that `attendees` seats are free right now.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` with the current remaining count, `NotFound`, or `Storage`.
    pub async fn precheck(
        &self,
        session_id: SessionId,
        attendees: u32,
    ) -> Result<(), CommerceError> {
        let remaining = self.remaining_seats(session_id).await?;
        if remaining < attendees {
            return Err(CommerceError::CapacityExceeded {
                session: session_id.to_string(),
                remaining,
                requested: attendees,
            });
        }
        Ok(())
    }

    /// Create a pending booking if the session still has room.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for zero attendees or a session that has ended
    /// - `CapacityExceeded` with the exact remaining count
    /// - `PersistenceConflict` when `reference` is already taken
    /// - `NotFound` for an unknown session, `Storage` on store failure
    pub async fn book(
        &self,
        session_id: SessionId,
        attendees: u32,
        reference: BookingReference,
    ) -> Result<Booking, CommerceError> {
        if attendees == 0 {
            return Err(CommerceError::invalid("attendee count must be positive"));
        }
        if reference.is_blank() {
            return Err(CommerceError::invalid("booking reference must not be blank"));
        }

        let now = self.clock.now();
        let session = self.session(session_id).await?;
        if session.has_ended(now) {
            return Err(CommerceError::invalid(format!(
                "session {session_id} has ended"
            )));
        }

        let booking = Booking {
            reference,
            session_id,
            attendee_count: attendees,
            status: BookingStatus::Pending,
            created_at: now,
        };

        match self.bookings.insert_within_capacity(booking).await? {
            BookingInsert::Inserted(booking) => {
                BookingMetrics::record_created();
                tracing::info!(
                    session = %session_id,
                    booking = %booking.reference,
                    attendees,
                    "Seats booked"
                );
                Ok(booking)
            }
            BookingInsert::Exceeded { remaining } => {
                BookingMetrics::record_rejected();
                tracing::info!(
                    session = %session_id,
                    remaining,
                    requested = attendees,
                    "Session capacity exceeded"
                );
                Err(CommerceError::CapacityExceeded {
                    session: session_id.to_string(),
                    remaining,
                    requested: attendees,
                })
            }
        }
    }

    /// Earliest session of `course_id` whose end is strictly after `now`.
    ///
    /// Ties on `starts_at` are broken by session id.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn next_session(
        &self,
        course_id: CourseId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, CommerceError> {
        let sessions = self.sessions.sessions_for_course(course_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|s| !s.has_ended(now))
            .min_by_key(|s| (s.starts_at, s.id)))
    }

    /// Mark a pending booking as confirmed. Confirmed bookings are left as is.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown booking, `SeatHoldCancelled` for a
    /// cancelled one, `Storage` on store failure.
    pub async fn confirm(&self, reference: &BookingReference) -> Result<Booking, CommerceError> {
        match self
            .bookings
            .transition_booking(
                reference.clone(),
                vec![BookingStatus::Pending],
                BookingStatus::Confirmed,
            )
            .await?
        {
            Transition::Applied(booking) => Ok(booking),
            Transition::Unchanged(booking) if booking.status == BookingStatus::Confirmed => {
                Ok(booking)
            }
            Transition::Unchanged(_) => Err(CommerceError::SeatHoldCancelled {
                booking: reference.to_string(),
            }),
            Transition::Missing => Err(CommerceError::not_found("booking", reference)),
        }
    }

    /// Cancel a booking, freeing its seats. Cancelling twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown booking, `Storage` on store failure.
    pub async fn cancel(&self, reference: &BookingReference) -> Result<Booking, CommerceError> {
        match self
            .bookings
            .transition_booking(
                reference.clone(),
                vec![BookingStatus::Pending, BookingStatus::Confirmed],
                BookingStatus::Cancelled,
            )
            .await?
        {
            Transition::Applied(booking) => {
                BookingMetrics::record_cancelled();
                tracing::info!(
                    session = %booking.session_id,
                    booking = %reference,
                    attendees = booking.attendee_count,
                    "Booking cancelled"
                );
                Ok(booking)
            }
            Transition::Unchanged(booking) => Ok(booking),
            Transition::Missing => Err(CommerceError::not_found("booking", reference)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use holdfast_testing::{InMemoryStore, ManualClock, test_clock};

    struct Fixture {
        guard: CapacityGuard,
        store: Arc<InMemoryStore>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::new(test_clock().now());
        let guard = CapacityGuard::new(store.clone(), store.clone(), Arc::new(clock.clone()));
        Fixture { guard, store, clock }
    }

    async fn session(
        store: &InMemoryStore,
        course: CourseId,
        starts_in_hours: i64,
        capacity: u32,
    ) -> Session {
        let starts_at = test_clock().now() + Duration::hours(starts_in_hours);
        let session = Session {
            id: SessionId::new(),
            course_id: course,
            starts_at,
            ends_at: starts_at + Duration::hours(1),
            capacity,
        };
        store.upsert_session(session.clone()).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_booking_reduces_remaining_seats() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 24, 10).await;

        f.guard.book(s.id, 8, BookingReference::generate()).await.unwrap();

        assert_eq!(f.guard.remaining_seats(s.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_over_capacity_reports_exact_remaining() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 24, 10).await;
        f.guard.book(s.id, 8, BookingReference::generate()).await.unwrap();

        let err = f.guard.book(s.id, 3, BookingReference::generate()).await.unwrap_err();

        assert_eq!(
            err,
            CommerceError::CapacityExceeded {
                session: s.id.to_string(),
                remaining: 2,
                requested: 3,
            }
        );
        assert!(f.guard.precheck(s.id, 3).await.is_err());
        assert!(f.guard.precheck(s.id, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_frees_seats_and_is_idempotent() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 24, 10).await;
        let booking = f.guard.book(s.id, 8, BookingReference::generate()).await.unwrap();

        f.guard.cancel(&booking.reference).await.unwrap();
        let again = f.guard.cancel(&booking.reference).await.unwrap();

        assert_eq!(again.status, BookingStatus::Cancelled);
        assert_eq!(f.guard.remaining_seats(s.id).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_confirm_cancelled_booking_is_rejected() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 24, 4).await;
        let booking = f.guard.book(s.id, 1, BookingReference::generate()).await.unwrap();
        f.guard.cancel(&booking.reference).await.unwrap();

        assert!(matches!(
            f.guard.confirm(&booking.reference).await,
            Err(CommerceError::SeatHoldCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_ended_session_cannot_be_booked() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 1, 10).await;
        f.clock.advance(Duration::hours(2));

        assert!(matches!(
            f.guard.book(s.id, 1, BookingReference::generate()).await,
            Err(CommerceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_attendees_and_duplicate_reference() {
        let f = fixture();
        let s = session(&f.store, CourseId::new(), 24, 10).await;
        let reference = BookingReference::new("BK-FIXED");

        assert!(matches!(
            f.guard.book(s.id, 0, reference.clone()).await,
            Err(CommerceError::InvalidRequest(_))
        ));
        f.guard.book(s.id, 1, reference.clone()).await.unwrap();
        assert!(matches!(
            f.guard.book(s.id, 1, reference).await,
            Err(CommerceError::PersistenceConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_next_session_skips_ended_sessions() {
        let f = fixture();
        let course = CourseId::new();
        let _past = session(&f.store, course, -3, 10).await;
        let later = session(&f.store, course, 48, 10).await;
        let sooner = session(&f.store, course, 24, 10).await;
        let _other_course = session(&f.store, CourseId::new(), 2, 10).await;

        let next = f.guard.next_session(course, f.clock.now()).await.unwrap();
        assert_eq!(next.map(|s| s.id), Some(sooner.id));

        let after_sooner = sooner.ends_at;
        let next = f.guard.next_session(course, after_sooner).await.unwrap();
        assert_eq!(next.map(|s| s.id), Some(later.id));
    }
}
