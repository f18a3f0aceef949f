//! Component wiring.
//!
//! [`Services`] builds every component over one backend so the binary, the
//! integration tests and the benches assemble the engine the same way.

use crate::capacity_guard::CapacityGuard;
use crate::config::Config;
use crate::finalization::OrderFinalizer;
use crate::notifications::NotificationDispatcher;
use crate::reservation_ledger::ReservationLedger;
use crate::server::AppState;
use crate::stock_ledger::StockLedger;
use chrono::Duration as ChronoDuration;
use holdfast_core::StoreError;
use holdfast_core::environment::Clock;
use holdfast_core::gateway::FulfillmentGateway;
use holdfast_core::notify::NotificationSink;
use holdfast_core::store::{CommerceStore, SessionStore, StockStore};
use holdfast_core::types::{CourseId, Session, SessionId, SourceKind, StockItem, StockKey};
use holdfast_runtime::metrics::MetricsServer;
use holdfast_runtime::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;

/// Name of the fulfillment breaker in logs and metric labels.
pub const FULFILLMENT_BREAKER: &str = "fulfillment";

/// The assembled engine.
#[derive(Clone)]
pub struct Services {
    /// Backend shared by every component
    pub store: Arc<dyn CommerceStore>,
    /// Reservation lifecycle (owns the stock ledger and capacity guard)
    pub reservations: ReservationLedger,
    /// Order finalization
    pub finalizer: OrderFinalizer,
    /// Notification queue, for draining on shutdown
    pub notifier: NotificationDispatcher,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Wire every component over `store`.
    ///
    /// Must be called inside a tokio runtime: the notification consumer is
    /// spawned here.
    #[must_use]
    pub fn new<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn FulfillmentGateway>,
        sink: Arc<dyn NotificationSink>,
        config: &Config,
    ) -> Self
    where
        S: CommerceStore + 'static,
    {
        let stock = StockLedger::new(store.clone());
        let capacity = CapacityGuard::new(store.clone(), store.clone(), clock.clone());
        let reservations = ReservationLedger::new(
            store.clone(),
            stock,
            capacity,
            clock.clone(),
            config.reservation_ttl(),
        );

        let breaker = CircuitBreaker::new(
            FULFILLMENT_BREAKER,
            CircuitBreakerConfig::builder()
                .failure_threshold(config.fulfillment.failure_threshold)
                .open_duration(Duration::from_secs(config.fulfillment.open_secs))
                .build(),
        );

        let notifier = NotificationDispatcher::spawn(
            sink,
            WorkerConfig {
                capacity: config.notifications.queue_capacity,
                retry: RetryPolicy::builder()
                    .max_retries(config.notifications.max_retries)
                    .initial_delay(Duration::from_millis(config.notifications.initial_delay_ms))
                    .build(),
            },
        );

        let finalizer = OrderFinalizer::new(
            store.clone(),
            reservations.clone(),
            gateway,
            breaker,
            notifier.clone(),
            clock.clone(),
        );

        Self {
            store,
            reservations,
            finalizer,
            notifier,
            clock,
        }
    }

    /// HTTP state over these services.
    #[must_use]
    pub fn app_state(&self, metrics: Option<Arc<MetricsServer>>) -> AppState {
        AppState::new(
            self.reservations.clone(),
            self.finalizer.clone(),
            self.store.clone(),
            self.clock.clone(),
            metrics,
        )
    }
}

/// Seed a small catalog so the in-memory backend is usable out of the box.
///
/// # Errors
///
/// Returns the first store error.
pub async fn seed_demo_catalog<S>(store: &S, clock: &dyn Clock) -> Result<(), StoreError>
where
    S: StockStore + SessionStore,
{
    let items = [
        ("MAT-BLUE", SourceKind::Variant, 25),
        ("MAT-GREEN", SourceKind::Variant, 10),
        ("STARTER-KIT", SourceKind::BundledProduct, 5),
        ("BLOCK-CORK", SourceKind::Equipment, 40),
    ];
    for (id, kind, quantity) in items {
        store
            .seed(StockItem {
                key: StockKey::new(id, kind),
                quantity,
            })
            .await?;
    }

    let course = CourseId::new();
    let now = clock.now();
    for days in [1, 8] {
        let starts_at = now + ChronoDuration::days(days);
        let session = Session {
            id: SessionId::new(),
            course_id: course,
            starts_at,
            ends_at: starts_at + ChronoDuration::minutes(75),
            capacity: 12,
        };
        tracing::info!(course = %course, session = %session.id, starts_at = %starts_at, "Demo session");
        store.upsert_session(session).await?;
    }

    tracing::info!(items = items.len(), "Demo catalog seeded");
    Ok(())
}
