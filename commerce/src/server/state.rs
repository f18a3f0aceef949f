//! Application state for the HTTP server.

use crate::capacity_guard::CapacityGuard;
use crate::finalization::OrderFinalizer;
use crate::reservation_ledger::ReservationLedger;
use holdfast_core::environment::Clock;
use holdfast_core::store::CommerceStore;
use holdfast_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// Components shared by all handlers.
///
/// Cloned per request; every field is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Reservation lifecycle (holds the stock ledger and capacity guard)
    pub reservations: ReservationLedger,

    /// Order creation and shipping confirmation
    pub finalizer: OrderFinalizer,

    /// Backend, for readiness probes
    pub store: Arc<dyn CommerceStore>,

    /// Time source for "next session" lookups
    pub clock: Arc<dyn Clock>,

    /// Prometheus handle; `None` when metrics are disabled
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// Create the state.
    #[must_use]
    pub fn new(
        reservations: ReservationLedger,
        finalizer: OrderFinalizer,
        store: Arc<dyn CommerceStore>,
        clock: Arc<dyn Clock>,
        metrics: Option<Arc<MetricsServer>>,
    ) -> Self {
        Self {
            reservations,
            finalizer,
            store,
            clock,
            metrics,
        }
    }

    /// Capacity guard behind the reservation ledger.
    #[must_use]
    pub const fn capacity(&self) -> &CapacityGuard {
        self.reservations.capacity()
    }
}
