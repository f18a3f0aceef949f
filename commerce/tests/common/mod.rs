//! Shared fixtures for the commerce integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use chrono::Duration;
use holdfast_commerce::config::Config;
use holdfast_commerce::{PaymentSucceeded, Services};
use holdfast_core::environment::Clock;
use holdfast_core::store::{SessionStore, StockStore};
use holdfast_core::types::{
    CourseId, Money, PaymentReference, ReservationItem, ReservationRequest, SeatRequest, Session,
    SessionId, SourceKind, StockItem, StockKey,
};
use holdfast_testing::{FlakyGateway, InMemoryStore, ManualClock, RecordingSink, test_clock};
use std::sync::Arc;

pub struct Harness {
    pub services: Services,
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub gateway: FlakyGateway,
    pub sink: RecordingSink,
}

/// Breaker opens after 3 failures for 30 s; notifications are not retried.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.fulfillment.failure_threshold = 3;
    config.fulfillment.open_secs = 30;
    config.notifications.max_retries = 0;
    config
}

pub fn harness(gateway: FlakyGateway) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = ManualClock::new(test_clock().now());
    let sink = RecordingSink::new();
    let services = Services::new(
        store.clone(),
        Arc::new(clock.clone()),
        Arc::new(gateway.clone()),
        Arc::new(sink.clone()),
        &test_config(),
    );
    Harness {
        services,
        store,
        clock,
        gateway,
        sink,
    }
}

pub async fn seed_stock(store: &InMemoryStore, id: &str, quantity: u32) -> StockKey {
    let key = StockKey::new(id, SourceKind::Variant);
    store
        .seed(StockItem {
            key: key.clone(),
            quantity,
        })
        .await
        .unwrap();
    key
}

pub async fn seed_session(store: &InMemoryStore, clock: &ManualClock, capacity: u32) -> SessionId {
    let starts_at = clock.now() + Duration::days(1);
    let session = Session {
        id: SessionId::new(),
        course_id: CourseId::new(),
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        capacity,
    };
    store.upsert_session(session.clone()).await.unwrap();
    session.id
}

pub fn item(key: &StockKey, quantity: u32) -> ReservationItem {
    ReservationItem {
        key: key.clone(),
        name: format!("Item {}", key.item_id),
        quantity,
        unit_price: Money::from_cents(4_000),
    }
}

pub fn seats(session_id: SessionId, attendees: u32) -> SeatRequest {
    SeatRequest {
        session_id,
        label: "Morning flow".to_string(),
        attendees,
        unit_price: Money::from_cents(1_800),
    }
}

pub fn request(
    items: Vec<ReservationItem>,
    seats: Vec<SeatRequest>,
    reference: Option<&str>,
) -> ReservationRequest {
    ReservationRequest {
        items,
        seats,
        shipping: Money::from_cents(495),
        payment_reference: reference.map(PaymentReference::new),
    }
}

pub fn payment(reference: &str) -> PaymentSucceeded {
    PaymentSucceeded {
        payment_reference: PaymentReference::new(reference),
        lines: vec![],
        shipping: Money::ZERO,
        shipping_address: None,
        billing_address: None,
    }
}
