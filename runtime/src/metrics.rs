//! Prometheus metrics for the reservation engine.
//!
//! [`MetricsServer`] installs the global Prometheus recorder; the HTTP layer
//! renders it on `GET /metrics`. The `*Metrics` unit structs are thin
//! recorders called from the component that owns the measurement.
//!
//! # Example
//!
//! ```rust,no_run
//! use holdfast_runtime::metrics::{MetricsServer, StockMetrics};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! StockMetrics::record_decrement(3);
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Owner of the Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an un-started server.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can be installed once per process. If one already exists
    /// (several tests in one binary) this logs a warning, returns `Ok` and
    /// [`render`](Self::render) yields `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Stock
    describe_counter!("stock_decrements_total", "Successful conditional stock decrements");
    describe_counter!("stock_units_decremented_total", "Units taken by successful decrements");
    describe_counter!("stock_insufficient_total", "Decrements rejected for insufficient stock");
    describe_counter!("stock_increments_total", "Compensating stock increments");

    // Bookings
    describe_counter!("bookings_created_total", "Bookings inserted within capacity");
    describe_counter!("bookings_rejected_total", "Bookings rejected for lack of capacity");
    describe_counter!("bookings_cancelled_total", "Bookings cancelled");

    // Reservations
    describe_counter!("reservations_reserved_total", "Reservations created");
    describe_counter!("reservations_consumed_total", "Reservations converted into orders");
    describe_counter!("reservations_released_total", "Reservations released, by reason");
    describe_counter!("reservations_failed_total", "Reservation attempts rolled back");

    // Orders
    describe_counter!("orders_created_total", "Orders persisted, by status");
    describe_counter!("orders_duplicate_total", "Duplicate finalization attempts");
    describe_counter!("orders_shipping_confirmed_total", "Shipping confirmations recorded");
    describe_histogram!("order_finalization_duration_seconds", "Time taken to finalize an order");

    // Circuit breaker
    describe_gauge!(
        "circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!("circuit_breaker_calls_total", "Calls through circuit breaker");
    describe_counter!("circuit_breaker_successes_total", "Successful calls");
    describe_counter!("circuit_breaker_failures_total", "Failed calls");
    describe_counter!("circuit_breaker_rejections_total", "Rejected calls (circuit open)");

    // Worker queues
    describe_counter!("worker_jobs_enqueued_total", "Jobs accepted by a worker queue");
    describe_counter!("worker_jobs_dropped_total", "Jobs dropped because the queue was full or closed");
    describe_counter!("worker_jobs_completed_total", "Jobs handled successfully");
    describe_counter!("worker_jobs_failed_total", "Jobs abandoned after retries");

    // Retry
    describe_counter!("retry_attempts_total", "Retry attempts");
    describe_counter!("retry_exhausted_total", "Operations that exhausted their retries");
}

/// Stock ledger metrics recorder.
pub struct StockMetrics;

impl StockMetrics {
    /// Record a successful decrement of `units`.
    pub fn record_decrement(units: u32) {
        counter!("stock_decrements_total").increment(1);
        counter!("stock_units_decremented_total").increment(u64::from(units));
    }

    /// Record a decrement rejected for insufficient stock.
    pub fn record_insufficient() {
        counter!("stock_insufficient_total").increment(1);
    }

    /// Record a compensating increment.
    pub fn record_increment() {
        counter!("stock_increments_total").increment(1);
    }
}

/// Capacity guard metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a booking insert.
    pub fn record_created() {
        counter!("bookings_created_total").increment(1);
    }

    /// Record a capacity rejection.
    pub fn record_rejected() {
        counter!("bookings_rejected_total").increment(1);
    }

    /// Record a cancellation.
    pub fn record_cancelled() {
        counter!("bookings_cancelled_total").increment(1);
    }
}

/// Reservation ledger metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a new reservation.
    pub fn record_reserved() {
        counter!("reservations_reserved_total").increment(1);
    }

    /// Record a consumed reservation.
    pub fn record_consumed() {
        counter!("reservations_consumed_total").increment(1);
    }

    /// Record a release; `reason` is `manual`, `expired` or similar.
    pub fn record_released(reason: &'static str) {
        counter!("reservations_released_total", "reason" => reason).increment(1);
    }

    /// Record a reservation attempt that was compensated.
    pub fn record_failed() {
        counter!("reservations_failed_total").increment(1);
    }
}

/// Order finalization metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record a persisted order.
    pub fn record_created(status: &'static str, duration: Duration) {
        counter!("orders_created_total", "status" => status).increment(1);
        histogram!("order_finalization_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a duplicate finalization (existing order returned).
    pub fn record_duplicate() {
        counter!("orders_duplicate_total").increment(1);
    }

    /// Record a shipping confirmation.
    pub fn record_shipping_confirmed() {
        counter!("orders_shipping_confirmed_total").increment(1);
    }
}

/// Circuit breaker metrics recorder, labelled by breaker name.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Record circuit breaker state (0 = Closed, 1 = `HalfOpen`, 2 = Open).
    pub fn record_state(name: &str, state: f64) {
        gauge!("circuit_breaker_state", "breaker" => name.to_owned()).set(state);
    }

    /// Record a call attempt.
    pub fn record_call(name: &str) {
        counter!("circuit_breaker_calls_total", "breaker" => name.to_owned()).increment(1);
    }

    /// Record a successful call.
    pub fn record_success(name: &str) {
        counter!("circuit_breaker_successes_total", "breaker" => name.to_owned()).increment(1);
    }

    /// Record a failed call.
    pub fn record_failure(name: &str) {
        counter!("circuit_breaker_failures_total", "breaker" => name.to_owned()).increment(1);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection(name: &str) {
        counter!("circuit_breaker_rejections_total", "breaker" => name.to_owned()).increment(1);
    }
}

/// Worker queue metrics recorder, labelled by queue name.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record an accepted job.
    pub fn record_enqueued(queue: &str) {
        counter!("worker_jobs_enqueued_total", "queue" => queue.to_owned()).increment(1);
    }

    /// Record a dropped job.
    pub fn record_dropped(queue: &str) {
        counter!("worker_jobs_dropped_total", "queue" => queue.to_owned()).increment(1);
    }

    /// Record a completed job.
    pub fn record_completed(queue: &str) {
        counter!("worker_jobs_completed_total", "queue" => queue.to_owned()).increment(1);
    }

    /// Record a job abandoned after retries.
    pub fn record_failed(queue: &str) {
        counter!("worker_jobs_failed_total", "queue" => queue.to_owned()).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
