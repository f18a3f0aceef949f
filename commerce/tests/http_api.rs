//! Router tests over the in-memory backend.

#![allow(clippy::unwrap_used)]

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{Harness, harness, seed_session, seed_stock};
use holdfast_commerce::server::build_router;
use holdfast_core::types::{Order, OrderStatus, Reservation, ReservationStatus};
use holdfast_testing::FlakyGateway;
use serde_json::{Value, json};

fn server(h: &Harness) -> TestServer {
    TestServer::new(build_router(h.services.app_state(None))).unwrap()
}

fn cart(item_id: &str, quantity: u32, reference: &str) -> Value {
    json!({
        "items": [{
            "key": { "item_id": item_id, "source_kind": "variant" },
            "name": "Yoga mat",
            "quantity": quantity,
            "unit_price": 4000
        }],
        "shipping": 495,
        "payment_reference": reference
    })
}

#[tokio::test]
async fn test_health_and_readiness() {
    let h = harness(FlakyGateway::healthy());
    let server = server(&h);

    let health = server.get("/health").await;
    health.assert_status_ok();
    health.assert_text("ok");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    assert_eq!(ready.json::<Value>()["status"], "healthy");

    h.store.fail_operation("ping").await;
    server
        .get("/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let h = harness(FlakyGateway::healthy());
    server(&h)
        .get("/metrics")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_webhook_and_order_lookup() {
    let h = harness(FlakyGateway::healthy());
    seed_stock(&h.store, "MAT-BLUE", 5).await;
    let server = server(&h);

    let response = server.post("/api/checkout").json(&cart("MAT-BLUE", 2, "PAY-1")).await;
    response.assert_status(StatusCode::CREATED);
    let reservation: Reservation = response.json();
    assert_eq!(reservation.status, ReservationStatus::Reserved);

    let webhook = server
        .post("/api/webhooks/payment")
        .json(&json!({ "type": "payment.succeeded", "payment_reference": "PAY-1" }))
        .await;
    webhook.assert_status_ok();
    let body: Value = webhook.json();
    assert_eq!(body["result"]["disposition"], "created");
    assert_eq!(body["result"]["downstream"]["status"], "confirmed");

    let duplicate: Value = server
        .post("/api/webhooks/payment")
        .json(&json!({ "type": "payment.succeeded", "payment_reference": "PAY-1" }))
        .await
        .json();
    assert_eq!(duplicate["result"]["disposition"], "already_finalized");

    let order: Order = server.get("/api/orders/PAY-1").await.json();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.reservation_id, Some(reservation.id));
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn test_sold_out_checkout_is_conflict() {
    let h = harness(FlakyGateway::healthy());
    seed_stock(&h.store, "MAT-BLUE", 1).await;

    let response = server(&h)
        .post("/api/checkout")
        .json(&cart("MAT-BLUE", 3, "PAY-2"))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["code"], "insufficient_stock");
}

#[tokio::test]
async fn test_empty_checkout_is_unprocessable() {
    let h = harness(FlakyGateway::healthy());

    server(&h)
        .post("/api/checkout")
        .json(&json!({}))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let h = harness(FlakyGateway::healthy());

    let response = server(&h)
        .post("/api/webhooks/payment")
        .json(&json!({ "type": "payment.refunded", "payment_reference": "PAY-3" }))
        .await;

    response.assert_status_ok();
    assert!(response.json::<Value>()["ignored"].is_string());
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_unparseable_webhook_body_is_acknowledged() {
    let h = harness(FlakyGateway::healthy());
    let server = server(&h);

    let garbage = server
        .post("/api/webhooks/payment")
        .text("payment_reference=PAY-4&type=payment.succeeded")
        .await;
    garbage.assert_status_ok();
    let body: Value = garbage.json();
    assert_eq!(body["received"], true);
    assert!(body["ignored"].as_str().unwrap().starts_with("malformed payload"));

    let truncated = server
        .post("/api/webhooks/payment")
        .text(r#"{"type": "payment.succeeded", "payment_reference": "#)
        .content_type("application/json")
        .await;
    truncated.assert_status_ok();
    assert!(truncated.json::<Value>()["ignored"].is_string());

    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_logic_error_is_acknowledged_and_storage_error_is_retried() {
    let h = harness(FlakyGateway::healthy());
    let server = server(&h);
    let event = json!({ "type": "payment.succeeded", "payment_reference": "PAY-NOTHING" });

    // No reservation and no lines: final answer, stop retrying.
    server.post("/api/webhooks/payment").json(&event).await.assert_status_ok();

    h.store.fail_operation("find_order_by_payment_reference").await;
    server
        .post("/api/webhooks/payment")
        .json(&event)
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_confirm_shipping_before_webhook_is_pending() {
    let h = harness(FlakyGateway::healthy());

    let response = server(&h)
        .post("/api/orders/PAY-EARLY/confirm-shipping")
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["state"], "pending");
    assert_eq!(h.store.order_count().await, 0);
}

#[tokio::test]
async fn test_bookings_and_remaining_seats() {
    let h = harness(FlakyGateway::healthy());
    let session = seed_session(&h.store, &h.clock, 10).await;
    let server = server(&h);

    let booking = server
        .post("/api/bookings")
        .json(&json!({ "session_id": session, "attendees": 8, "reference": "BK-FAMILY" }))
        .await;
    booking.assert_status(StatusCode::CREATED);

    let remaining: Value = server
        .get(&format!("/api/sessions/{session}/remaining"))
        .await
        .json();
    assert_eq!(remaining["remaining"], 2);

    server
        .post("/api/bookings")
        .json(&json!({ "session_id": session, "attendees": 3 }))
        .await
        .assert_status(StatusCode::CONFLICT);

    server
        .post("/api/bookings/BK-FAMILY/cancel")
        .await
        .assert_status_ok();
    let remaining: Value = server
        .get(&format!("/api/sessions/{session}/remaining"))
        .await
        .json();
    assert_eq!(remaining["remaining"], 10);
}

#[tokio::test]
async fn test_unknown_reservation_is_not_found() {
    let h = harness(FlakyGateway::healthy());

    server(&h)
        .get(&format!("/api/reservations/{}", uuid::Uuid::new_v4()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
