//! Stock counters, sessions and capacity-guarded bookings.

use crate::PostgresStore;
use crate::rows::{self, BOOKING_COLUMNS, SESSION_COLUMNS, db, unique_err};
use holdfast_core::store::{
    BookingInsert, BookingStore, DecrementOutcome, SessionStore, StockStore, StoreError,
    StoreFuture, Transition,
};
use holdfast_core::types::{
    Booking, BookingReference, BookingStatus, CourseId, Session, SessionId, StockItem, StockKey,
};
use sqlx::Row;

fn stock_not_found(key: &StockKey) -> StoreError {
    StoreError::NotFound {
        entity: "stock item",
        id: key.to_string(),
    }
}

impl StockStore for PostgresStore {
    fn seed(&self, item: StockItem) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO stock_items (item_id, source_kind, quantity)
                VALUES ($1, $2, $3)
                ON CONFLICT (item_id, source_kind) DO UPDATE SET quantity = EXCLUDED.quantity
                ",
            )
            .bind(item.key.item_id.as_str())
            .bind(item.key.source_kind.as_str())
            .bind(i64::from(item.quantity))
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(())
        })
    }

    fn quantity(&self, key: StockKey) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT quantity FROM stock_items WHERE item_id = $1 AND source_kind = $2",
            )
            .bind(key.item_id.as_str())
            .bind(key.source_kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| stock_not_found(&key))?;
            rows::count_from_db(row.try_get("quantity").map_err(db)?, "quantity")
        })
    }

    fn try_decrement(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, DecrementOutcome> {
        Box::pin(async move {
            let updated = sqlx::query(
                r"
                UPDATE stock_items
                SET quantity = quantity - $3
                WHERE item_id = $1 AND source_kind = $2 AND quantity >= $3
                RETURNING quantity
                ",
            )
            .bind(key.item_id.as_str())
            .bind(key.source_kind.as_str())
            .bind(i64::from(quantity))
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            if let Some(row) = updated {
                let after = rows::count_from_db(row.try_get("quantity").map_err(db)?, "quantity")?;
                return Ok(DecrementOutcome::Applied {
                    before: after.saturating_add(quantity),
                    after,
                });
            }

            // The guard failed; read the value only to report it.
            let available = self.quantity(key).await?;
            Ok(DecrementOutcome::Insufficient { available })
        })
    }

    fn increment(&self, key: StockKey, quantity: u32) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                UPDATE stock_items
                SET quantity = quantity + $3
                WHERE item_id = $1 AND source_kind = $2
                RETURNING quantity
                ",
            )
            .bind(key.item_id.as_str())
            .bind(key.source_kind.as_str())
            .bind(i64::from(quantity))
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| stock_not_found(&key))?;
            rows::count_from_db(row.try_get("quantity").map_err(db)?, "quantity")
        })
    }
}

impl SessionStore for PostgresStore {
    fn upsert_session(&self, session: Session) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO sessions (id, course_id, starts_at, ends_at, capacity)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE SET
                    course_id = EXCLUDED.course_id,
                    starts_at = EXCLUDED.starts_at,
                    ends_at = EXCLUDED.ends_at,
                    capacity = EXCLUDED.capacity
                ",
            )
            .bind(session.id.as_uuid())
            .bind(session.course_id.as_uuid())
            .bind(session.starts_at)
            .bind(session.ends_at)
            .bind(i64::from(session.capacity))
            .execute(&self.pool)
            .await
            .map_err(db)?;
            Ok(())
        })
    }

    fn get_session(&self, id: SessionId) -> StoreFuture<'_, Option<Session>> {
        Box::pin(async move {
            let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
            sqlx::query(&query)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(rows::session)
                .transpose()
        })
    }

    fn sessions_for_course(&self, course_id: CourseId) -> StoreFuture<'_, Vec<Session>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE course_id = $1 ORDER BY starts_at, id"
            );
            sqlx::query(&query)
                .bind(course_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db)?
                .iter()
                .map(rows::session)
                .collect::<Result<Vec<_>, _>>()
        })
    }
}

const ACTIVE_ATTENDEES: &str = r"
    SELECT COALESCE(SUM(attendee_count), 0)::BIGINT AS attendees
    FROM bookings
    WHERE session_id = $1 AND status <> 'cancelled'
";

impl BookingStore for PostgresStore {
    fn active_attendees(&self, session_id: SessionId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let row = sqlx::query(ACTIVE_ATTENDEES)
                .bind(session_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(db)?;
            rows::count_from_db(row.try_get("attendees").map_err(db)?, "attendees")
        })
    }

    fn insert_within_capacity(&self, booking: Booking) -> StoreFuture<'_, BookingInsert> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;

            // Serializes concurrent inserts for the same session.
            let session = sqlx::query("SELECT capacity FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(booking.session_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "session",
                    id: booking.session_id.to_string(),
                })?;
            let capacity =
                rows::count_from_db(session.try_get("capacity").map_err(db)?, "capacity")?;

            let active = sqlx::query(ACTIVE_ATTENDEES)
                .bind(booking.session_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(db)?;
            let active =
                rows::count_from_db(active.try_get("attendees").map_err(db)?, "attendees")?;

            let remaining = capacity.saturating_sub(active);
            if remaining < booking.attendee_count {
                tx.rollback().await.map_err(db)?;
                return Ok(BookingInsert::Exceeded { remaining });
            }

            sqlx::query(
                r"
                INSERT INTO bookings (reference, session_id, attendee_count, status, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(booking.reference.as_str())
            .bind(booking.session_id.as_uuid())
            .bind(i64::from(booking.attendee_count))
            .bind(booking.status.as_str())
            .bind(booking.created_at)
            .execute(&mut *tx)
            .await
            .map_err(unique_err("booking", &booking.reference))?;

            tx.commit().await.map_err(db)?;
            Ok(BookingInsert::Inserted(booking))
        })
    }

    fn get_booking(&self, reference: BookingReference) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = $1");
            sqlx::query(&query)
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(rows::booking)
                .transpose()
        })
    }

    fn transition_booking(
        &self,
        reference: BookingReference,
        from: Vec<BookingStatus>,
        to: BookingStatus,
    ) -> StoreFuture<'_, Transition<Booking>> {
        Box::pin(async move {
            let from: Vec<&str> = from.iter().map(BookingStatus::as_str).collect();
            let query = format!(
                "UPDATE bookings SET status = $2 WHERE reference = $1 AND status = ANY($3) \
                 RETURNING {BOOKING_COLUMNS}"
            );
            let updated = sqlx::query(&query)
                .bind(reference.as_str())
                .bind(to.as_str())
                .bind(from.as_slice())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

            if let Some(row) = updated {
                return Ok(Transition::Applied(rows::booking(&row)?));
            }
            Ok(match self.get_booking(reference).await? {
                Some(current) => Transition::Unchanged(current),
                None => Transition::Missing,
            })
        })
    }
}
