//! Fulfillment gateway implementations.
//!
//! - [`HttpFulfillmentGateway`]: posts shipment confirmations to the
//!   processor's HTTP endpoint with a per-request deadline.
//! - [`LoggingGateway`]: logs confirmations; used when no endpoint is
//!   configured (local runs, demos).

use holdfast_core::gateway::{FulfillmentGateway, GatewayError, GatewayResult, ShipmentReceipt};
use holdfast_core::types::{Order, PaymentReference};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Serialize)]
struct ConfirmShipmentRequest<'a> {
    payment_reference: Option<&'a PaymentReference>,
    order_id: String,
    total_cents: u64,
}

#[derive(Deserialize)]
struct ConfirmShipmentResponse {
    confirmation_id: String,
}

/// Gateway calling the processor over HTTP.
#[derive(Clone, Debug)]
pub struct HttpFulfillmentGateway {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpFulfillmentGateway {
    /// Create a gateway posting to `url`; each call is abandoned after `timeout`.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    async fn send(&self, order: &Order) -> GatewayResult<ShipmentReceipt> {
        let body = ConfirmShipmentRequest {
            payment_reference: order.payment_reference.as_ref(),
            order_id: order.id.to_string(),
            total_cents: order.total.cents(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ConfirmShipmentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid response body: {e}")))?;

        Ok(ShipmentReceipt {
            payment_reference: order
                .payment_reference
                .clone()
                .unwrap_or_else(|| PaymentReference::new(order.id.to_string())),
            confirmation_id: parsed.confirmation_id,
        })
    }
}

impl FulfillmentGateway for HttpFulfillmentGateway {
    fn confirm_shipment<'a>(
        &'a self,
        order: &'a Order,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<ShipmentReceipt>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.send(order)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        order = %order.id,
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "Fulfillment call timed out"
                    );
                    Err(GatewayError::Timeout)
                }
            }
        })
    }
}

/// Gateway that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingGateway;

impl FulfillmentGateway for LoggingGateway {
    fn confirm_shipment<'a>(
        &'a self,
        order: &'a Order,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<ShipmentReceipt>> + Send + 'a>> {
        Box::pin(async move {
            let payment_reference = order
                .payment_reference
                .clone()
                .unwrap_or_else(|| PaymentReference::new(order.id.to_string()));
            tracing::info!(
                order = %order.id,
                payment_reference = %payment_reference,
                total = %order.total,
                "Shipment confirmation logged"
            );
            Ok(ShipmentReceipt {
                payment_reference,
                confirmation_id: format!("log_{}", order.id),
            })
        })
    }
}
