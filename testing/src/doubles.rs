//! Test doubles for the downstream gateway and the notification sink.

use holdfast_core::gateway::{FulfillmentGateway, GatewayError, GatewayResult, ShipmentReceipt};
use holdfast_core::notify::{Notification, NotificationError, NotificationSink};
use holdfast_core::types::{Order, PaymentReference};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

/// Consume one unit of a "fail this many more times" budget.
/// `u32::MAX` means fail forever.
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
            0 => None,
            u32::MAX => Some(u32::MAX),
            n => Some(n - 1),
        })
        .is_ok()
}

/// Fulfillment gateway that fails on demand and counts calls.
///
/// Cloning shares counters.
#[derive(Clone, Debug, Default)]
pub struct FlakyGateway {
    calls: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
    confirmed: Arc<Mutex<Vec<PaymentReference>>>,
}

impl FlakyGateway {
    /// A gateway that always succeeds.
    #[must_use]
    pub fn healthy() -> Self {
        Self::default()
    }

    /// A gateway whose next `count` calls fail.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        let gateway = Self::default();
        gateway.failures.store(count, Ordering::SeqCst);
        gateway
    }

    /// A gateway that fails until [`recover`](Self::recover) is called.
    #[must_use]
    pub fn down() -> Self {
        Self::failing(u32::MAX)
    }

    /// Stop failing.
    pub fn recover(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Number of times `confirm_shipment` was invoked.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payment references confirmed successfully, in call order.
    pub async fn confirmed(&self) -> Vec<PaymentReference> {
        self.confirmed.lock().await.clone()
    }
}

impl FulfillmentGateway for FlakyGateway {
    fn confirm_shipment<'a>(
        &'a self,
        order: &'a Order,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<ShipmentReceipt>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.failures) {
                return Err(GatewayError::Transport("connection refused".to_string()));
            }
            let reference = order
                .payment_reference
                .clone()
                .unwrap_or_else(|| PaymentReference::new(order.id.to_string()));
            self.confirmed.lock().await.push(reference.clone());
            Ok(ShipmentReceipt {
                payment_reference: reference,
                confirmation_id: format!("test_ship_{}", order.id),
            })
        })
    }
}

/// Notification sink that records deliveries.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    delivered: Arc<Mutex<Vec<Notification>>>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl RecordingSink {
    /// A sink that always delivers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose next `count` deliveries fail.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        let sink = Self::default();
        sink.failures.store(count, Ordering::SeqCst);
        sink
    }

    /// Delivered notifications, in delivery order.
    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }

    /// Delivery attempts including failed ones.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationSink for RecordingSink {
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + 'a>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.failures) {
                return Err(NotificationError("mailer unavailable".to_string()));
            }
            self.delivered.lock().await.push(notification.clone());
            Ok(())
        })
    }
}
