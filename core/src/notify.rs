//! One-way notification messages.
//!
//! Notifications are handed to a background queue after the order commits.
//! Delivery failures are logged and retried by the queue; they never affect
//! the caller.

use crate::types::{Money, OrderId, OrderStatus, PaymentReference};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A message for the notification service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Receipt for the customer
    OrderReceipt {
        /// Order id
        order_id: OrderId,
        /// Payment reference
        payment_reference: PaymentReference,
        /// Amount charged
        total: Money,
    },
    /// Heads-up for shop staff
    AdminAlert {
        /// Payment reference
        payment_reference: PaymentReference,
        /// Status of the order that triggered the alert
        status: OrderStatus,
        /// Human-readable summary
        summary: String,
    },
}

impl Notification {
    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OrderReceipt { .. } => "order_receipt",
            Self::AdminAlert { .. } => "admin_alert",
        }
    }
}

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Delivers notifications (email, chat, ...).
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] when delivery fails; the queue retries.
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + 'a>>;
}
