//! Races between checkouts against one counter or one session.

#![allow(clippy::unwrap_used)]

mod common;

use common::{harness, item, request, seats, seed_session, seed_stock};
use futures::future::join_all;
use holdfast_core::CommerceError;
use holdfast_core::store::StockStore;
use holdfast_core::types::BookingReference;
use holdfast_testing::FlakyGateway;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_checkouts_for_three_of_five_units() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-BLUE", 5).await;

    let first = {
        let ledger = h.services.reservations.clone();
        let req = request(vec![item(&mat, 3)], vec![], None);
        tokio::spawn(async move { ledger.reserve(req).await })
    };
    let second = {
        let ledger = h.services.reservations.clone();
        let req = request(vec![item(&mat, 3)], vec![], None);
        tokio::spawn(async move { ledger.reserve(req).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        failure,
        &CommerceError::InsufficientStock {
            item: mat.to_string(),
            available: 2,
            requested: 3,
        }
    );
    assert_eq!(h.store.quantity(mat).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_single_unit_checkouts_never_oversell() {
    let h = harness(FlakyGateway::healthy());
    let mat = seed_stock(&h.store, "MAT-GREEN", 5).await;

    let handles = (0..20).map(|_| {
        let ledger = h.services.reservations.clone();
        let req = request(vec![item(&mat, 1)], vec![], None);
        tokio::spawn(async move { ledger.reserve(req).await })
    });

    let succeeded = join_all(handles)
        .await
        .into_iter()
        .filter(|joined| joined.as_ref().unwrap().is_ok())
        .count();

    assert_eq!(succeeded, 5);
    assert_eq!(h.store.quantity(mat).await.unwrap(), 0);
}

#[tokio::test]
async fn test_capacity_ten_with_eight_booked() {
    let h = harness(FlakyGateway::healthy());
    let session = seed_session(&h.store, &h.clock, 10).await;
    let guard = h.services.reservations.capacity();
    guard.book(session, 8, BookingReference::generate()).await.unwrap();

    let err = guard
        .book(session, 3, BookingReference::generate())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CommerceError::CapacityExceeded {
            session: session.to_string(),
            remaining: 2,
            requested: 3,
        }
    );
    guard.book(session, 2, BookingReference::generate()).await.unwrap();
    assert_eq!(guard.remaining_seats(session).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_respect_capacity() {
    let h = harness(FlakyGateway::healthy());
    let session = seed_session(&h.store, &h.clock, 10).await;
    h.services
        .reservations
        .capacity()
        .book(session, 8, BookingReference::generate())
        .await
        .unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ledger = h.services.reservations.clone();
            let req = request(vec![], vec![seats(session, 1)], None);
            tokio::spawn(async move { ledger.reserve(req).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(error) => assert!(matches!(error, CommerceError::CapacityExceeded { .. })),
        }
    }

    assert_eq!(succeeded, 2);
    let held: u32 = h
        .store
        .bookings_for_session(session)
        .await
        .iter()
        .filter(|b| b.status.holds_seats())
        .map(|b| b.attendee_count)
        .sum();
    assert_eq!(held, 10);
}
