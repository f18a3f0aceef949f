//! The downstream fulfillment dependency.
//!
//! After an order is created the processor is told to confirm shipment. The
//! call is unreliable; callers wrap it in a circuit breaker and never let its
//! failure undo the order.

use crate::types::{Order, PaymentReference};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors reported by a fulfillment gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No answer within the configured deadline
    #[error("fulfillment gateway timed out")]
    Timeout,

    /// The remote side rejected the request
    #[error("fulfillment gateway rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status or processor code
        status: u16,
        /// Remote message
        message: String,
    },

    /// Network or decoding failure
    #[error("fulfillment gateway transport error: {0}")]
    Transport(String),
}

/// Acknowledgement of a shipment confirmation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShipmentReceipt {
    /// Payment the confirmation refers to
    pub payment_reference: PaymentReference,
    /// Identifier assigned by the remote side
    pub confirmation_id: String,
}

/// Confirms shipment of a paid order with the payment/shipping processor.
pub trait FulfillmentGateway: Send + Sync {
    /// Confirm shipment for `order`.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the remote call fails or times out.
    fn confirm_shipment<'a>(
        &'a self,
        order: &'a Order,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<ShipmentReceipt>> + Send + 'a>>;
}
