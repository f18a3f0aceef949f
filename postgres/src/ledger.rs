//! Reservations and orders.

use crate::PostgresStore;
use crate::rows::{self, ORDER_COLUMNS, RESERVATION_COLUMNS, db, money_to_db, unique_err};
use chrono::{DateTime, Utc};
use holdfast_core::store::{OrderStore, ReservationStore, StoreFuture, Transition};
use holdfast_core::types::{Order, PaymentReference, Reservation, ReservationId, ReservationStatus};
use sqlx::types::Json;

impl ReservationStore for PostgresStore {
    fn insert_reservation(&self, reservation: Reservation) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let key = reservation
                .payment_reference
                .as_ref()
                .map_or_else(|| reservation.id.to_string(), ToString::to_string);
            sqlx::query(
                r"
                INSERT INTO reservations
                    (id, payment_reference, status, items, seats, stock_changes, shipping, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(reservation.id.as_uuid())
            .bind(reservation.payment_reference.as_ref().map(PaymentReference::as_str))
            .bind(reservation.status.as_str())
            .bind(Json(&reservation.items))
            .bind(Json(&reservation.seats))
            .bind(Json(&reservation.stock_changes))
            .bind(money_to_db(reservation.shipping)?)
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .execute(&self.pool)
            .await
            .map_err(unique_err("reservation", key))?;
            Ok(())
        })
    }

    fn get_reservation(&self, id: ReservationId) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let query = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
            sqlx::query(&query)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(rows::reservation)
                .transpose()
        })
    }

    fn find_reservation_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE payment_reference = $1"
            );
            sqlx::query(&query)
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(rows::reservation)
                .transpose()
        })
    }

    fn assign_payment_reference(
        &self,
        id: ReservationId,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Reservation>> {
        Box::pin(async move {
            let query = format!(
                "UPDATE reservations SET payment_reference = $2 \
                 WHERE id = $1 AND payment_reference IS NULL \
                 RETURNING {RESERVATION_COLUMNS}"
            );
            let updated = sqlx::query(&query)
                .bind(id.as_uuid())
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(unique_err("reservation", &reference))?;

            if let Some(row) = updated {
                return Ok(Transition::Applied(rows::reservation(&row)?));
            }
            Ok(match self.get_reservation(id).await? {
                Some(current) => Transition::Unchanged(current),
                None => Transition::Missing,
            })
        })
    }

    fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    ) -> StoreFuture<'_, Transition<Reservation>> {
        Box::pin(async move {
            let query = format!(
                "UPDATE reservations SET status = $3 WHERE id = $1 AND status = $2 \
                 RETURNING {RESERVATION_COLUMNS}"
            );
            let updated = sqlx::query(&query)
                .bind(id.as_uuid())
                .bind(from.as_str())
                .bind(to.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

            if let Some(row) = updated {
                return Ok(Transition::Applied(rows::reservation(&row)?));
            }
            Ok(match self.get_reservation(id).await? {
                Some(current) => Transition::Unchanged(current),
                None => Transition::Missing,
            })
        })
    }

    fn list_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let query = format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations \
                 WHERE status = 'reserved' AND expires_at <= $1 \
                 ORDER BY expires_at LIMIT $2"
            );
            sqlx::query(&query)
                .bind(now)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(db)?
                .iter()
                .map(rows::reservation)
                .collect::<Result<Vec<_>, _>>()
        })
    }
}

impl OrderStore for PostgresStore {
    fn insert_order(&self, order: Order) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let key = order
                .payment_reference
                .as_ref()
                .map_or_else(|| order.id.to_string(), ToString::to_string);
            sqlx::query(
                r"
                INSERT INTO orders
                    (id, payment_reference, reservation_id, status, lines, subtotal, shipping,
                     total, shipping_address, billing_address, metadata, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ",
            )
            .bind(order.id.as_uuid())
            .bind(order.payment_reference.as_ref().map(PaymentReference::as_str))
            .bind(order.reservation_id.as_ref().map(ReservationId::as_uuid))
            .bind(order.status.as_str())
            .bind(Json(&order.lines))
            .bind(money_to_db(order.subtotal)?)
            .bind(money_to_db(order.shipping)?)
            .bind(money_to_db(order.total)?)
            .bind(order.shipping_address.as_ref().map(Json))
            .bind(order.billing_address.as_ref().map(Json))
            .bind(Json(&order.metadata))
            .bind(order.created_at)
            .execute(&self.pool)
            .await
            .map_err(unique_err("order", key))?;
            Ok(())
        })
    }

    fn find_order_by_payment_reference(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE payment_reference = $1");
            sqlx::query(&query)
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?
                .as_ref()
                .map(rows::order)
                .transpose()
        })
    }

    fn mark_shipping_confirmed(
        &self,
        reference: PaymentReference,
    ) -> StoreFuture<'_, Transition<Order>> {
        Box::pin(async move {
            let query = format!(
                "UPDATE orders \
                 SET metadata = jsonb_set(metadata, '{{shipping_confirmed}}', 'true'::jsonb) \
                 WHERE payment_reference = $1 \
                   AND COALESCE((metadata->>'shipping_confirmed')::boolean, false) = false \
                 RETURNING {ORDER_COLUMNS}"
            );
            let updated = sqlx::query(&query)
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

            if let Some(row) = updated {
                return Ok(Transition::Applied(rows::order(&row)?));
            }
            Ok(match self.find_order_by_payment_reference(reference).await? {
                Some(current) => Transition::Unchanged(current),
                None => Transition::Missing,
            })
        })
    }
}
