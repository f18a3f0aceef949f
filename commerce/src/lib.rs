//! # Holdfast Commerce
//!
//! Stock and seat reservations for a studio shop, with exactly-once order
//! finalization.
//!
//! ```text
//! checkout ──► ReservationLedger::reserve ──► StockLedger::try_decrement
//!                    │                      └► CapacityGuard::book
//!                    ▼
//! payment webhook ──► OrderFinalizer::finalize_from_webhook
//!                    ├─ consume reservation
//!                    ├─ insert order (unique per payment reference)
//!                    ├─ FulfillmentGateway through the CircuitBreaker
//!                    └─ notifications (background queue)
//!
//! client ping ─────► OrderFinalizer::confirm_shipping
//! sweeper ─────────► ReservationLedger::sweep_expired
//! ```
//!
//! Every guard against overselling is a conditional write at the store; no
//! component caches counts or takes in-process locks, so any number of
//! replicas can serve traffic against one database.

pub mod app;
pub mod capacity_guard;
pub mod config;
pub mod finalization;
pub mod gateway;
pub mod notifications;
pub mod reservation_ledger;
pub mod server;
pub mod stock_ledger;
pub mod sweeper;

pub use app::Services;
pub use capacity_guard::CapacityGuard;
pub use config::Config;
pub use finalization::{
    Disposition, DownstreamStatus, Finalized, OrderFinalizer, PaymentLine, PaymentSucceeded,
    ShippingConfirmation,
};
pub use reservation_ledger::{ReleaseOutcome, ReservationLedger, SweepReport};
pub use stock_ledger::StockLedger;
