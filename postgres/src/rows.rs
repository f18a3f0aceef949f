//! Row decoding and value conversion.

use holdfast_core::store::StoreError;
use holdfast_core::types::{
    Address, Booking, BookingReference, BookingStatus, CourseId, Money, Order, OrderId,
    OrderLine, OrderMetadata, OrderStatus, PaymentReference, Reservation, ReservationId,
    ReservationItem, ReservationStatus, SeatHold, Session, SessionId, StockChange,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

pub(crate) const SESSION_COLUMNS: &str = "id, course_id, starts_at, ends_at, capacity";

pub(crate) const BOOKING_COLUMNS: &str =
    "reference, session_id, attendee_count, status, created_at";

pub(crate) const RESERVATION_COLUMNS: &str = "id, payment_reference, status, items, seats, \
     stock_changes, shipping, created_at, expires_at";

pub(crate) const ORDER_COLUMNS: &str = "id, payment_reference, reservation_id, status, lines, \
     subtotal, shipping, total, shipping_address, billing_address, metadata, created_at";

/// Map a driver error, turning unique violations into `UniqueViolation`.
pub(crate) fn unique_err(
    entity: &'static str,
    key: impl ToString,
) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation {
            entity,
            key: key.to_string(),
        },
        _ => StoreError::Database(error.to_string()),
    }
}

/// Map a driver error without uniqueness handling.
pub(crate) fn db(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

pub(crate) fn money_to_db(money: Money) -> Result<i64, StoreError> {
    i64::try_from(money.cents())
        .map_err(|_| StoreError::Serialization(format!("amount {money} exceeds BIGINT")))
}

fn money_from_db(cents: i64) -> Result<Money, StoreError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Serialization(format!("negative amount {cents}")))
}

pub(crate) fn count_from_db(value: i64, field: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{field} out of range: {value}")))
}

fn status<T>(raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Serialization(format!("unknown status '{raw}'")))
}

pub(crate) fn session(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: SessionId::from_uuid(row.try_get("id").map_err(db)?),
        course_id: CourseId::from_uuid(row.try_get("course_id").map_err(db)?),
        starts_at: row.try_get("starts_at").map_err(db)?,
        ends_at: row.try_get("ends_at").map_err(db)?,
        capacity: count_from_db(row.try_get("capacity").map_err(db)?, "capacity")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking, StoreError> {
    let raw_status: String = row.try_get("status").map_err(db)?;
    Ok(Booking {
        reference: BookingReference::new(row.try_get::<String, _>("reference").map_err(db)?),
        session_id: SessionId::from_uuid(row.try_get("session_id").map_err(db)?),
        attendee_count: count_from_db(
            row.try_get("attendee_count").map_err(db)?,
            "attendee_count",
        )?,
        status: status(&raw_status, BookingStatus::parse)?,
        created_at: row.try_get("created_at").map_err(db)?,
    })
}

pub(crate) fn reservation(row: &PgRow) -> Result<Reservation, StoreError> {
    let raw_status: String = row.try_get("status").map_err(db)?;
    let Json(items): Json<Vec<ReservationItem>> = row.try_get("items").map_err(db)?;
    let Json(seats): Json<Vec<SeatHold>> = row.try_get("seats").map_err(db)?;
    let Json(stock_changes): Json<Vec<StockChange>> = row.try_get("stock_changes").map_err(db)?;
    let payment_reference: Option<String> = row.try_get("payment_reference").map_err(db)?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(db)?),
        payment_reference: payment_reference.map(PaymentReference::new),
        items,
        seats,
        stock_changes,
        shipping: money_from_db(row.try_get("shipping").map_err(db)?)?,
        status: status(&raw_status, ReservationStatus::parse)?,
        created_at: row.try_get("created_at").map_err(db)?,
        expires_at: row.try_get("expires_at").map_err(db)?,
    })
}

pub(crate) fn order(row: &PgRow) -> Result<Order, StoreError> {
    let raw_status: String = row.try_get("status").map_err(db)?;
    let Json(lines): Json<Vec<OrderLine>> = row.try_get("lines").map_err(db)?;
    let Json(metadata): Json<OrderMetadata> = row.try_get("metadata").map_err(db)?;
    let shipping_address: Option<Json<Address>> = row.try_get("shipping_address").map_err(db)?;
    let billing_address: Option<Json<Address>> = row.try_get("billing_address").map_err(db)?;
    let payment_reference: Option<String> = row.try_get("payment_reference").map_err(db)?;
    let reservation_id: Option<uuid::Uuid> = row.try_get("reservation_id").map_err(db)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(db)?),
        payment_reference: payment_reference.map(PaymentReference::new),
        reservation_id: reservation_id.map(ReservationId::from_uuid),
        lines,
        subtotal: money_from_db(row.try_get("subtotal").map_err(db)?)?,
        shipping: money_from_db(row.try_get("shipping").map_err(db)?)?,
        total: money_from_db(row.try_get("total").map_err(db)?)?,
        status: status(&raw_status, OrderStatus::parse)?,
        shipping_address: shipping_address.map(|Json(a)| a),
        billing_address: billing_address.map(|Json(a)| a),
        metadata,
        created_at: row.try_get("created_at").map_err(db)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_round_trips_through_bigint_range() {
        assert_eq!(money_to_db(Money::from_cents(4_195)), Ok(4_195));
        assert!(money_to_db(Money::from_cents(u64::MAX)).is_err());
        assert!(money_from_db(-1).is_err());
    }

    #[test]
    fn test_counts_reject_out_of_range_values() {
        assert_eq!(count_from_db(10, "quantity"), Ok(10));
        assert!(count_from_db(-3, "quantity").is_err());
        assert!(count_from_db(i64::from(u32::MAX) + 1, "quantity").is_err());
    }
}
