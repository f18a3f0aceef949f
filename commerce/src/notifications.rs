//! Notification dispatch outside the consistency boundary.
//!
//! [`NotificationDispatcher::notify`] hands a message to a bounded worker
//! queue and returns immediately. Delivery, retries and failure logging
//! happen on the queue's consumer task; none of it reaches the caller.

use holdfast_core::notify::{Notification, NotificationError, NotificationSink};
use holdfast_runtime::worker::{JobHandler, WorkerConfig, WorkerQueue};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

struct SinkHandler {
    sink: Arc<dyn NotificationSink>,
}

impl JobHandler<Notification> for SinkHandler {
    type Error = NotificationError;

    async fn handle(&self, job: &Notification) -> Result<(), Self::Error> {
        let result = self.sink.deliver(job).await;
        if let Err(error) = &result {
            tracing::warn!(kind = job.kind(), error = %error, "Notification delivery failed");
        }
        result
    }
}

/// Fire-and-forget notification queue.
///
/// Cloning shares the queue.
#[derive(Clone)]
pub struct NotificationDispatcher {
    queue: Arc<WorkerQueue<Notification>>,
}

impl NotificationDispatcher {
    /// Start the consumer task delivering to `sink`.
    #[must_use]
    pub fn spawn(sink: Arc<dyn NotificationSink>, config: WorkerConfig) -> Self {
        Self {
            queue: Arc::new(WorkerQueue::spawn(
                "notifications",
                config,
                SinkHandler { sink },
            )),
        }
    }

    /// Queue a notification. Returns `false` if it was dropped.
    pub fn notify(&self, notification: Notification) -> bool {
        let kind = notification.kind();
        let queued = self.queue.enqueue(notification);
        if queued {
            tracing::debug!(kind, "Notification queued");
        }
        queued
    }

    /// Deliver what is queued, then stop.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

/// Sink that writes notifications to the log.
///
/// Used when no notification service is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn deliver<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + 'a>> {
        Box::pin(async move {
            match notification {
                Notification::OrderReceipt {
                    order_id,
                    payment_reference,
                    total,
                } => tracing::info!(
                    order = %order_id,
                    payment_reference = %payment_reference,
                    total = %total,
                    "Order receipt"
                ),
                Notification::AdminAlert {
                    payment_reference,
                    status,
                    summary,
                } => tracing::info!(
                    payment_reference = %payment_reference,
                    status = status.as_str(),
                    summary = %summary,
                    "Admin alert"
                ),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::types::{Money, OrderId, PaymentReference};
    use holdfast_runtime::RetryPolicy;
    use holdfast_testing::RecordingSink;
    use std::time::Duration;

    fn receipt() -> Notification {
        Notification::OrderReceipt {
            order_id: OrderId::new(),
            payment_reference: PaymentReference::new("PAY-1"),
            total: Money::from_cents(4_495),
        }
    }

    fn config(max_retries: u32) -> WorkerConfig {
        WorkerConfig {
            capacity: 16,
            retry: RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(2))
                .build(),
        }
    }

    #[tokio::test]
    async fn test_notifications_are_delivered_after_retries() {
        let sink = RecordingSink::failing(2);
        let dispatcher = NotificationDispatcher::spawn(Arc::new(sink.clone()), config(3));

        assert!(dispatcher.notify(receipt()));
        dispatcher.shutdown().await;

        assert_eq!(sink.delivered().await.len(), 1);
        assert_eq!(sink.attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_delivery_is_dropped_quietly() {
        let sink = RecordingSink::failing(u32::MAX);
        let dispatcher = NotificationDispatcher::spawn(Arc::new(sink.clone()), config(1));

        assert!(dispatcher.notify(receipt()));
        dispatcher.shutdown().await;

        assert!(sink.delivered().await.is_empty());
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_is_dropped() {
        let dispatcher = NotificationDispatcher::spawn(Arc::new(LoggingSink), config(0));
        dispatcher.shutdown().await;

        assert!(!dispatcher.notify(receipt()));
    }
}
