//! Reservation and finalization throughput over the in-memory store.
//!
//! Measures the engine's own overhead: conditional writes, compensation
//! bookkeeping and order assembly, without database latency.
//!
//! Run with: `cargo bench -p holdfast-commerce`

#![allow(missing_docs)]
#![allow(clippy::expect_used)]

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use holdfast_commerce::app::Services;
use holdfast_commerce::config::Config;
use holdfast_commerce::notifications::LoggingSink;
use holdfast_commerce::{PaymentSucceeded, StockLedger};
use holdfast_core::store::StockStore;
use holdfast_core::types::{
    Money, PaymentReference, ReservationItem, ReservationRequest, SourceKind, StockItem, StockKey,
};
use holdfast_testing::{FlakyGateway, InMemoryStore, test_clock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

fn seeded_store(runtime: &tokio::runtime::Runtime, key: &StockKey) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    runtime
        .block_on(store.seed(StockItem {
            key: key.clone(),
            quantity: u32::MAX / 2,
        }))
        .expect("Failed to seed stock");
    store
}

fn services(runtime: &tokio::runtime::Runtime, store: Arc<InMemoryStore>) -> Services {
    let _guard = runtime.enter();
    let mut config = Config::default();
    config.notifications.max_retries = 0;
    Services::new(
        store,
        Arc::new(test_clock()),
        Arc::new(FlakyGateway::healthy()),
        Arc::new(LoggingSink),
        &config,
    )
}

fn cart(key: &StockKey, reference: Option<PaymentReference>) -> ReservationRequest {
    ReservationRequest {
        items: vec![ReservationItem {
            key: key.clone(),
            name: "Yoga mat".to_string(),
            quantity: 1,
            unit_price: Money::from_cents(4_000),
        }],
        seats: vec![],
        shipping: Money::from_cents(495),
        payment_reference: reference,
    }
}

fn benchmark_stock_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("stock_ledger");
    group.throughput(Throughput::Elements(1));
    let runtime = runtime();
    let key = StockKey::new("MAT-BLUE", SourceKind::Variant);
    let ledger = StockLedger::new(seeded_store(&runtime, &key));

    group.bench_function("decrement_increment", |b| {
        b.to_async(&runtime).iter(|| async {
            let change = ledger
                .try_decrement(black_box(&key), 1)
                .await
                .expect("decrement failed");
            ledger.increment(&key, change.quantity).await.expect("increment failed");
        });
    });

    group.finish();
}

fn benchmark_reservations(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservations");
    group.throughput(Throughput::Elements(1));
    let runtime = runtime();
    let key = StockKey::new("MAT-BLUE", SourceKind::Variant);
    let services = services(&runtime, seeded_store(&runtime, &key));

    group.bench_function("reserve_release", |b| {
        b.to_async(&runtime).iter(|| async {
            let reservation = services
                .reservations
                .reserve(black_box(cart(&key, None)))
                .await
                .expect("reserve failed");
            services
                .reservations
                .release(reservation.id)
                .await
                .expect("release failed");
        });
    });

    let counter = AtomicU64::new(0);
    group.bench_function("reserve_finalize", |b| {
        b.to_async(&runtime).iter(|| async {
            let reference =
                PaymentReference::new(format!("PAY-{}", counter.fetch_add(1, Ordering::Relaxed)));
            services
                .reservations
                .reserve(cart(&key, Some(reference.clone())))
                .await
                .expect("reserve failed");
            services
                .finalizer
                .finalize_from_webhook(PaymentSucceeded {
                    payment_reference: reference,
                    lines: vec![],
                    shipping: Money::ZERO,
                    shipping_address: None,
                    billing_address: None,
                })
                .await
                .expect("finalize failed");
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_stock_ledger, benchmark_reservations);
criterion_main!(benches);
