//! Schema creation.
//!
//! Statements are idempotent (`IF NOT EXISTS`) so `migrate` can run on every
//! start-up.

use holdfast_core::store::StoreError;
use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS stock_items (
        item_id TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        PRIMARY KEY (item_id, source_kind)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        course_id UUID NOT NULL,
        starts_at TIMESTAMPTZ NOT NULL,
        ends_at TIMESTAMPTZ NOT NULL,
        capacity BIGINT NOT NULL CHECK (capacity > 0)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_sessions_course ON sessions(course_id)",
    r"
    CREATE TABLE IF NOT EXISTS bookings (
        reference TEXT PRIMARY KEY,
        session_id UUID NOT NULL REFERENCES sessions(id),
        attendee_count BIGINT NOT NULL CHECK (attendee_count >= 1),
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_bookings_session ON bookings(session_id) WHERE status <> 'cancelled'",
    r"
    CREATE TABLE IF NOT EXISTS reservations (
        id UUID PRIMARY KEY,
        payment_reference TEXT UNIQUE,
        status TEXT NOT NULL,
        items JSONB NOT NULL,
        seats JSONB NOT NULL,
        stock_changes JSONB NOT NULL,
        shipping BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_reservations_expiry ON reservations(expires_at) WHERE status = 'reserved'",
    r"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        payment_reference TEXT,
        reservation_id UUID,
        status TEXT NOT NULL,
        lines JSONB NOT NULL,
        subtotal BIGINT NOT NULL,
        shipping BIGINT NOT NULL,
        total BIGINT NOT NULL,
        shipping_address JSONB,
        billing_address JSONB,
        metadata JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    // At most one order per payment reference.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_payment_reference ON orders(payment_reference) WHERE payment_reference IS NOT NULL",
];

/// Create tables and indexes.
///
/// # Errors
///
/// Returns `StoreError::Database` if any statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
    }
    tracing::info!(statements = STATEMENTS.len(), "Database schema is up to date");
    Ok(())
}
