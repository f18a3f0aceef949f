//! In-memory implementation of every Holdfast store trait.
//!
//! All state sits behind one `tokio::sync::Mutex`. Each trait method takes the
//! lock once, so conditional writes (decrement-if-enough, insert-within-capacity,
//! status CAS, unique order insert) are atomic with respect to each other.
//!
//! Used by unit and integration tests, and by the server when
//! `STORE_BACKEND=memory`.

use chrono::{DateTime, Utc};
use holdfast_core::store::{
    BookingInsert, BookingStore, CommerceStore, DecrementOutcome, OrderStore, ReservationStore,
    SessionStore, StockStore, StoreError, StoreFuture, Transition,
};
use holdfast_core::types::{
    Booking, BookingReference, BookingStatus, CourseId, Order, OrderId, PaymentReference,
    Reservation, ReservationId, ReservationStatus, Session, SessionId, StockItem, StockKey,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    stock: HashMap<StockKey, u32>,
    sessions: HashMap<SessionId, Session>,
    bookings: HashMap<BookingReference, Booking>,
    reservations: HashMap<ReservationId, Reservation>,
    reservation_refs: HashMap<PaymentReference, ReservationId>,
    orders: HashMap<OrderId, Order>,
    order_refs: HashMap<PaymentReference, OrderId>,
    failing: HashSet<&'static str>,
}

impl Inner {
    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.failing.contains(operation) {
            return Err(StoreError::Database(format!("injected failure in {operation}")));
        }
        Ok(())
    }

    fn active_attendees(&self, session_id: SessionId) -> u32 {
        self.bookings
            .values()
            .filter(|b| b.session_id == session_id && b.status.holds_seats())
            .map(|b| b.attendee_count)
            .fold(0u32, u32::saturating_add)
    }
}

/// `HashMap`-backed store for fast, deterministic tests.
///
/// Cloning shares state.
///
/// # Example
///
/// ```
/// use holdfast_testing::InMemoryStore;
/// use holdfast_core::store::StockStore;
/// use holdfast_core::types::{SourceKind, StockItem, StockKey};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let key = StockKey::new("MAT-BLUE", SourceKind::Variant);
/// store.seed(StockItem { key: key.clone(), quantity: 5 }).await?;
/// assert_eq!(store.quantity(key).await?, 5);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` (the trait method name) fail with a
    /// `Database` error until [`heal`](Self::heal) is called.
    pub async fn fail_operation(&self, operation: &'static str) {
        self.inner.lock().await.failing.insert(operation);
    }

    /// Clear all injected failures.
    pub async fn heal(&self) {
        self.inner.lock().await.failing.clear();
    }

    /// Number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }

    /// All bookings of a session.
    pub async fn bookings_for_session(&self, session_id: SessionId) -> Vec<Booking> {
        self.inner
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect()
    }
}

impl StockStore for InMemoryStore {
    fn seed(&self, item: StockItem) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("seed")?;
            inner.stock.insert(item.key, item.quantity);
            Ok(())
        })
    }

    fn quantity(&self, key: StockKey) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("quantity")?;
            inner.stock.get(&key).copied().ok_or_else(|| StoreError::NotFound {
                entity: "stock item",
                id: key.to_string(),
            })
        })
    }

    fn try_decrement(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, DecrementOutcome> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("try_decrement")?;
            let Some(current) = inner.stock.get_mut(&key) else {
                return Err(StoreError::NotFound {
                    entity: "stock item",
                    id: key.to_string(),
                });
            };
            if *current < quantity {
                return Ok(DecrementOutcome::Insufficient {
                    available: *current,
                });
            }
            let before = *current;
            *current -= quantity;
            Ok(DecrementOutcome::Applied {
                before,
                after: *current,
            })
        })
    }

    fn increment(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("increment")?;
            let Some(current) = inner.stock.get_mut(&key) else {
                return Err(StoreError::NotFound {
                    entity: "stock item",
                    id: key.to_string(),
                });
            };
            *current = current.saturating_add(quantity);
            Ok(*current)
        })
    }
}

impl SessionStore for InMemoryStore {
    fn upsert_session(&self, session: Session) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("upsert_session")?;
            inner.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn get_session(&self, id: SessionId) -> StoreFuture<'_, Option<Session>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("get_session")?;
            Ok(inner.sessions.get(&id).cloned())
        })
    }

    fn sessions_for_course(&self, course_id: CourseId) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("sessions_for_course")?;
            Ok(inner
                .sessions
                .values()
                .filter(|s| s.course_id == course_id)
                .cloned()
                .collect())
        })
    }
}

impl BookingStore for InMemoryStore {
    fn active_attendees(&self, session_id: SessionId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("active_attendees")?;
            Ok(inner.active_attendees(session_id))
        })
    }

    fn insert_within_capacity(&self, booking: Booking) -> StoreFuture<'_, BookingInsert> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("insert_within_capacity")?;
            let Some(capacity) = inner.sessions.get(&booking.session_id).map(|s| s.capacity) else {
                return Err(StoreError::NotFound {
                    entity: "session",
                    id: booking.session_id.to_string(),
                });
            };
            if inner.bookings.contains_key(&booking.reference) {
                return Err(StoreError::UniqueViolation {
                    entity: "booking",
                    key: booking.reference.to_string(),
                });
            }
            let remaining = capacity.saturating_sub(inner.active_attendees(booking.session_id));
            if remaining < booking.attendee_count {
                return Ok(BookingInsert::Exceeded { remaining });
            }
            inner
                .bookings
                .insert(booking.reference.clone(), booking.clone());
            Ok(BookingInsert::Inserted(booking))
        })
    }

    fn get_booking(&self, reference: BookingReference) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("get_booking")?;
            Ok(inner.bookings.get(&reference).cloned())
        })
    }

    fn transition_booking(
        &self,
        reference: BookingReference,
        from: Vec<BookingStatus>,
        to: BookingStatus,
    ) -> StoreFuture<'_, Transition<Booking>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("transition_booking")?;
            let Some(booking) = inner.bookings.get_mut(&reference) else {
                return Ok(Transition::Missing);
            };
            if !from.contains(&booking.status) {
                return Ok(Transition::Unchanged(booking.clone()));
            }
            booking.status = to;
            Ok(Transition::Applied(booking.clone()))
        })
    }
}

impl ReservationStore for InMemoryStore {
    fn insert_reservation(&self, reservation: Reservation) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("insert_reservation")?;
            if inner.reservations.contains_key(&reservation.id) {
                return Err(StoreError::UniqueViolation {
                    entity: "reservation",
                    key: reservation.id.to_string(),
                });
            }
            if let Some(reference) = &reservation.payment_reference {
                if inner.reservation_refs.contains_key(reference) {
                    return Err(StoreError::UniqueViolation {
                        entity: "reservation",
                        key: reference.to_string(),
                    });
                }
                inner
                    .reservation_refs
                    .insert(reference.clone(), reservation.id);
            }
            inner.reservations.insert(reservation.id, reservation);
            Ok(())
        })
    }

    fn get_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("get_reservation")?;
            Ok(inner.reservations.get(&id).cloned())
        })
    }

    fn find_reservation_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("find_reservation_by_payment_reference")?;
            Ok(inner
                .reservation_refs
                .get(&reference)
                .and_then(|id| inner.reservations.get(id))
                .cloned())
        })
    }

    fn assign_payment_reference(
        &self,
        id: ReservationId,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Reservation>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("assign_payment_reference")?;
            let Some(current) = inner.reservations.get(&id) else {
                return Ok(Transition::Missing);
            };
            if current.payment_reference.is_some() {
                return Ok(Transition::Unchanged(current.clone()));
            }
            if inner.reservation_refs.contains_key(&reference) {
                return Err(StoreError::UniqueViolation {
                    entity: "reservation",
                    key: reference.to_string(),
                });
            }
            inner.reservation_refs.insert(reference.clone(), id);
            let Some(reservation) = inner.reservations.get_mut(&id) else {
                return Ok(Transition::Missing);
            };
            reservation.payment_reference = Some(reference);
            Ok(Transition::Applied(reservation.clone()))
        })
    }

    fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, Transition<Reservation>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("transition_reservation")?;
            let Some(reservation) = inner.reservations.get_mut(&id) else {
                return Ok(Transition::Missing);
            };
            if reservation.status != from {
                return Ok(Transition::Unchanged(reservation.clone()));
            }
            reservation.status = to;
            Ok(Transition::Applied(reservation.clone()))
        })
    }

    fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("list_expired")?;
            let mut expired: Vec<Reservation> = inner
                .reservations
                .values()
                .filter(|r| r.is_expired(now))
                .cloned()
                .collect();
            expired.sort_by_key(|r| r.expires_at);
            expired.truncate(limit);
            Ok(expired)
        })
    }
}

impl OrderStore for InMemoryStore {
    fn insert_order(&self, order: Order) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("insert_order")?;
            if let Some(reference) = &order.payment_reference {
                if inner.order_refs.contains_key(reference) {
                    return Err(StoreError::UniqueViolation {
                        entity: "order",
                        key: reference.to_string(),
                    });
                }
                inner.order_refs.insert(reference.clone(), order.id);
            }
            inner.orders.insert(order.id, order);
            Ok(())
        })
    }

    fn find_order_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            inner.check("find_order_by_payment_reference")?;
            Ok(inner
                .order_refs
                .get(&reference)
                .and_then(|id| inner.orders.get(id))
                .cloned())
        })
    }

    fn mark_shipping_confirmed(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Order>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.check("mark_shipping_confirmed")?;
            let Some(id) = inner.order_refs.get(&reference).copied() else {
                return Ok(Transition::Missing);
            };
            let Some(order) = inner.orders.get_mut(&id) else {
                return Ok(Transition::Missing);
            };
            if order.metadata.shipping_confirmed {
                return Ok(Transition::Unchanged(order.clone()));
            }
            order.metadata.shipping_confirmed = true;
            Ok(Transition::Applied(order.clone()))
        })
    }
}

impl CommerceStore for InMemoryStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.inner.lock().await.check("ping") })
    }
}
