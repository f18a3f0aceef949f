//! Order finalization under duplicate deliveries and a failing downstream.

#![allow(clippy::unwrap_used)]

mod common;

use common::{harness, item, payment, request, seats, seed_session, seed_stock};
use holdfast_commerce::finalization::{FAILURE_REASON, SEAT_HOLD_CANCELLED};
use holdfast_commerce::{Disposition, DownstreamStatus, ShippingConfirmation};
use holdfast_core::notify::Notification;
use holdfast_core::store::StockStore;
use holdfast_core::types::{OrderStatus, PaymentReference, ReservationStatus};
use holdfast_runtime::circuit_breaker::State;
use holdfast_testing::FlakyGateway;
use std::time::Duration;

#[tokio::test]
async fn test_duplicate_pay_1_creates_one_order() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;
    h.services
        .reservations
        .reserve(request(vec![item(&mat, 1)], vec![], Some("PAY-1")))
        .await
        .unwrap();

    let first = h.services.finalizer.finalize_from_webhook(payment("PAY-1")).await.unwrap();
    let second = h.services.finalizer.finalize_from_webhook(payment("PAY-1")).await.unwrap();

    assert_eq!(first.disposition, Disposition::Created);
    assert_eq!(second.disposition, Disposition::AlreadyFinalized);
    assert_eq!(first.order.id, second.order.id);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries_agree_on_one_order() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;
    h.services
        .reservations
        .reserve(request(vec![item(&mat, 2)], vec![], Some("PAY-1")))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let finalizer = h.services.finalizer.clone();
            tokio::spawn(async move { finalizer.finalize_from_webhook(payment("PAY-1")).await })
        })
        .collect();

    let mut ids = Vec::new();
    let mut created = 0;
    for handle in handles {
        let finalized = handle.await.unwrap().unwrap();
        if finalized.disposition == Disposition::Created {
            created += 1;
        }
        ids.push(finalized.order.id);
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn test_ping_before_and_after_webhook() {
    let h = harness(FlakyGateway::down());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;
    h.services
        .reservations
        .reserve(request(vec![item(&mat, 1)], vec![], Some("PAY-2")))
        .await
        .unwrap();
    let reference = PaymentReference::new("PAY-2");
    let finalizer = &h.services.finalizer;

    assert_eq!(
        finalizer.confirm_shipping(&reference).await.unwrap(),
        ShippingConfirmation::Pending
    );

    finalizer.finalize_from_webhook(payment("PAY-2")).await.unwrap();
    assert!(matches!(
        finalizer.confirm_shipping(&reference).await.unwrap(),
        ShippingConfirmation::Confirmed(_)
    ));
    assert!(matches!(
        finalizer.confirm_shipping(&reference).await.unwrap(),
        ShippingConfirmation::AlreadyConfirmed(_)
    ));
    assert!(
        finalizer
            .order(&reference)
            .await
            .unwrap()
            .unwrap()
            .metadata
            .shipping_confirmed
    );
}

#[tokio::test(start_paused = true)]
async fn test_breaker_threshold_three_then_single_trial() {
    let h = harness(FlakyGateway::down());
    let mat = seed_stock(&h.store, "MAT-BLUE", 10).await;
    for n in 1..=6 {
        h.services
            .reservations
            .reserve(request(vec![item(&mat, 1)], vec![], Some(&format!("PAY-{n}"))))
            .await
            .unwrap();
    }
    let finalizer = &h.services.finalizer;

    for n in 1..=3 {
        let finalized = finalizer
            .finalize_from_webhook(payment(&format!("PAY-{n}")))
            .await
            .unwrap();
        assert!(matches!(finalized.downstream, DownstreamStatus::Failed { .. }));
    }
    assert_eq!(finalizer.breaker().state().await, State::Open);

    let rejected = finalizer.finalize_from_webhook(payment("PAY-4")).await.unwrap();
    assert_eq!(rejected.downstream, DownstreamStatus::CircuitOpen { failures: 3 });
    assert_eq!(rejected.order.status, OrderStatus::Paid);
    assert_eq!(h.gateway.calls(), 3);

    tokio::time::advance(Duration::from_secs(31)).await;
    h.gateway.recover();

    let trial = finalizer.finalize_from_webhook(payment("PAY-5")).await.unwrap();
    assert!(matches!(trial.downstream, DownstreamStatus::Confirmed { .. }));
    assert_eq!(h.gateway.calls(), 4);
    assert_eq!(finalizer.breaker().state().await, State::Closed);

    let after = finalizer.finalize_from_webhook(payment("PAY-6")).await.unwrap();
    assert!(after.order.metadata.shipping_confirmed);
}

#[tokio::test]
async fn test_failed_order_raises_admin_alert_only() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;
    let reservation = h
        .services
        .reservations
        .reserve(request(vec![item(&mat, 1)], vec![], Some("PAY-LATE")))
        .await
        .unwrap();
    h.services.reservations.release(reservation.id).await.unwrap();

    let finalized = h
        .services
        .finalizer
        .finalize_from_webhook(payment("PAY-LATE"))
        .await
        .unwrap();
    h.services.notifier.shutdown().await;

    assert_eq!(finalized.order.status, OrderStatus::Failed);
    let delivered = h.sink.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert!(matches!(
        &delivered[0],
        Notification::AdminAlert { status: OrderStatus::Failed, .. }
    ));
}

#[tokio::test]
async fn test_cancelled_seat_hold_still_yields_one_order() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;
    let session = seed_session(&h.store, &h.clock, 10).await;
    let reservation = h
        .services
        .reservations
        .reserve(request(vec![item(&mat, 2)], vec![seats(session, 2)], Some("PAY-X")))
        .await
        .unwrap();
    let guard = h.services.reservations.capacity();
    guard.cancel(&reservation.seats[0].booking_reference).await.unwrap();

    let first = h.services.finalizer.finalize_from_webhook(payment("PAY-X")).await.unwrap();
    let second = h.services.finalizer.finalize_from_webhook(payment("PAY-X")).await.unwrap();
    h.services.notifier.shutdown().await;

    assert_eq!(first.disposition, Disposition::Created);
    assert_eq!(first.order.status, OrderStatus::Failed);
    assert_eq!(
        first.order.metadata.notes.get(FAILURE_REASON).map(String::as_str),
        Some(SEAT_HOLD_CANCELLED)
    );
    assert_eq!(first.downstream, DownstreamStatus::Skipped);
    assert_eq!(second.disposition, Disposition::AlreadyFinalized);
    assert_eq!(second.order.id, first.order.id);
    assert_eq!(h.store.order_count().await, 1);

    let released = h.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(released.status, ReservationStatus::Released);
    assert_eq!(h.store.quantity(mat).await.unwrap(), 5);
    assert_eq!(guard.remaining_seats(session).await.unwrap(), 10);
    assert_eq!(h.gateway.calls(), 0);

    let delivered = h.sink.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert!(matches!(
        &delivered[0],
        Notification::AdminAlert { status: OrderStatus::Failed, .. }
    ));
}
