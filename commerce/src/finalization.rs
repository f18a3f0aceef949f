//! Order Finalization Workflow.
//!
//! Two triggers race to complete a purchase: the payment processor's webhook
//! and the client's completion ping. Both may arrive any number of times, in
//! any order. Per payment reference the workflow moves
//!
//! ```text
//! unseen ──webhook──► order created ──ping──► shipping confirmed
//! ```
//!
//! and never backwards. At most one order exists per payment reference; the
//! store's unique constraint decides concurrent duplicates.
//!
//! Everything after the order insert (the downstream shipment call and the
//! notifications) is best effort. Its failures are reported and logged, never
//! rolled back into the order.

use crate::notifications::NotificationDispatcher;
use crate::reservation_ledger::ReservationLedger;
use holdfast_core::CommerceError;
use holdfast_core::environment::Clock;
use holdfast_core::gateway::{FulfillmentGateway, GatewayError};
use holdfast_core::notify::Notification;
use holdfast_core::store::{OrderStore, Transition};
use holdfast_core::types::{
    Address, LineSubject, Money, Order, OrderId, OrderLine, OrderMetadata, OrderStatus,
    PaymentReference, Reservation, ReservationStatus, order_totals,
};
use holdfast_runtime::metrics::OrderMetrics;
use holdfast_runtime::{CircuitBreaker, CircuitBreakerError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Note key recording why an order could not be fulfilled.
pub const FAILURE_REASON: &str = "failure_reason";

/// Failure reason: the reservation was released before payment arrived.
pub const RESERVATION_RELEASED: &str = "reservation_released";

/// Failure reason: one of the reservation's seat holds was cancelled.
pub const SEAT_HOLD_CANCELLED: &str = "seat_hold_cancelled";

/// A line as the payment processor reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLine {
    /// Display name
    pub description: String,
    /// Units paid for
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Money,
}

/// Payload of a `payment.succeeded` event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    /// Processor-assigned payment reference
    pub payment_reference: PaymentReference,
    /// Lines as charged; only used when no reservation exists
    #[serde(default)]
    pub lines: Vec<PaymentLine>,
    /// Shipping charged; only used when no reservation exists
    #[serde(default)]
    pub shipping: Money,
    /// Shipping address
    #[serde(default)]
    pub shipping_address: Option<Address>,
    /// Billing address
    #[serde(default)]
    pub billing_address: Option<Address>,
}

/// Whether this call created the order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// This call persisted the order
    Created,
    /// An order already existed for the payment reference
    AlreadyFinalized,
}

/// Outcome of the downstream shipment call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownstreamStatus {
    /// The processor confirmed shipment
    Confirmed {
        /// Identifier assigned by the processor
        confirmation_id: String,
    },
    /// The call ran and failed
    Failed {
        /// Error reported by the gateway
        reason: String,
    },
    /// The breaker rejected the call without running it
    CircuitOpen {
        /// Consecutive failures recorded by the breaker
        failures: u32,
    },
    /// No call was made (duplicate delivery or failed order)
    Skipped,
}

/// Result of [`OrderFinalizer::finalize_from_webhook`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finalized {
    /// The order for the payment reference
    pub order: Order,
    /// Whether this call created it
    pub disposition: Disposition,
    /// What happened downstream
    pub downstream: DownstreamStatus,
}

/// Result of [`OrderFinalizer::confirm_shipping`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "order", rename_all = "snake_case")]
pub enum ShippingConfirmation {
    /// No order exists yet; the webhook has not been processed
    Pending,
    /// This call set the shipping flag
    Confirmed(Order),
    /// The flag was already set
    AlreadyConfirmed(Order),
}

/// Turns confirmed payments into orders, exactly once per payment reference.
#[derive(Clone)]
pub struct OrderFinalizer {
    orders: Arc<dyn OrderStore>,
    reservations: ReservationLedger,
    gateway: Arc<dyn FulfillmentGateway>,
    breaker: CircuitBreaker,
    notifier: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

impl OrderFinalizer {
    /// Create a finalizer.
    ///
    /// `breaker` guards `gateway`; share it with anything else calling the
    /// same dependency.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        reservations: ReservationLedger,
        gateway: Arc<dyn FulfillmentGateway>,
        breaker: CircuitBreaker,
        notifier: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            reservations,
            gateway,
            breaker,
            notifier,
            clock,
        }
    }

    /// Breaker guarding the fulfillment gateway.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Order for a payment reference, if one exists.
    ///
    /// # Errors
    ///
    /// `Storage` on store failure.
    pub async fn order(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<Order>, CommerceError> {
        Ok(self
            .orders
            .find_order_by_payment_reference(reference.clone())
            .await?)
    }

    /// Create the order for a successful payment, or return the existing one.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a blank reference, or when no reservation
    ///   exists and the payload has no usable lines
    /// - `Storage` on store failure (safe to redeliver)
    pub async fn finalize_from_webhook(
        &self,
        payment: PaymentSucceeded,
    ) -> Result<Finalized, CommerceError> {
        let started = Instant::now();
        let reference = payment.payment_reference.clone();
        if reference.is_blank() {
            return Err(CommerceError::invalid("payment reference must not be blank"));
        }

        if let Some(order) = self.order(&reference).await? {
            return Ok(self.duplicate(order));
        }

        let order = self.build_order(payment).await?;

        match self.orders.insert_order(order.clone()).await {
            Ok(()) => {}
            Err(error) => {
                return match CommerceError::from(error) {
                    CommerceError::PersistenceConflict { .. } => {
                        let winner = self
                            .order(&reference)
                            .await?
                            .ok_or_else(|| CommerceError::not_found("order", &reference))?;
                        Ok(self.duplicate(winner))
                    }
                    other => Err(other),
                };
            }
        }

        tracing::info!(
            order = %order.id,
            payment_reference = %reference,
            status = order.status.as_str(),
            total = %order.total,
            "Order created"
        );

        let (order, downstream) = if order.status == OrderStatus::Paid {
            self.confirm_downstream(order).await
        } else {
            (order, DownstreamStatus::Skipped)
        };

        self.queue_notifications(&order, &reference);
        OrderMetrics::record_created(order.status.as_str(), started.elapsed());

        Ok(Finalized {
            order,
            disposition: Disposition::Created,
            downstream,
        })
    }

    fn duplicate(&self, order: Order) -> Finalized {
        OrderMetrics::record_duplicate();
        tracing::info!(
            order = %order.id,
            payment_reference = ?order.payment_reference,
            "Payment already finalized"
        );
        Finalized {
            order,
            disposition: Disposition::AlreadyFinalized,
            downstream: DownstreamStatus::Skipped,
        }
    }

    /// Decide what the new order contains, consuming the reservation if there is one.
    async fn build_order(&self, payment: PaymentSucceeded) -> Result<Order, CommerceError> {
        let reference = &payment.payment_reference;
        let Some(reservation) = self.reservations.find_by_payment_reference(reference).await?
        else {
            return self.order_from_payload(payment);
        };

        if reservation.status == ReservationStatus::Released {
            return self.failed_order(&reservation, payment, RESERVATION_RELEASED);
        }

        match self.reservations.consume(reservation.id, reference).await {
            Ok(consumed) => self.order_from_reservation(&consumed, payment, OrderStatus::Paid),
            // Released by the sweeper between the lookup and the swap.
            Err(CommerceError::NotFound { .. }) => {
                self.failed_order(&reservation, payment, RESERVATION_RELEASED)
            }
            // The ledger has already released the reservation.
            Err(CommerceError::SeatHoldCancelled { .. }) => {
                self.failed_order(&reservation, payment, SEAT_HOLD_CANCELLED)
            }
            Err(error) => Err(error),
        }
    }

    fn order_from_payload(&self, payment: PaymentSucceeded) -> Result<Order, CommerceError> {
        if payment.lines.is_empty() {
            return Err(CommerceError::invalid(format!(
                "payment {} has no reservation and no lines",
                payment.payment_reference
            )));
        }

        let lines = payment
            .lines
            .iter()
            .map(|line| {
                if line.quantity == 0 {
                    return Err(CommerceError::invalid(format!(
                        "line '{}' has zero quantity",
                        line.description
                    )));
                }
                OrderLine::new(
                    line.description.clone(),
                    LineSubject::Other,
                    line.quantity,
                    line.unit_price,
                )
                .ok_or_else(|| CommerceError::invalid("line total overflows"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let shipping = payment.shipping;
        self.assemble(payment, None, lines, shipping, OrderStatus::Paid)
    }

    fn order_from_reservation(
        &self,
        reservation: &Reservation,
        payment: PaymentSucceeded,
        status: OrderStatus,
    ) -> Result<Order, CommerceError> {
        let stock_lines = reservation.items.iter().map(|item| {
            OrderLine::new(
                item.name.clone(),
                LineSubject::Stock {
                    key: item.key.clone(),
                },
                item.quantity,
                item.unit_price,
            )
        });
        let seat_lines = reservation.seats.iter().map(|seat| {
            OrderLine::new(
                seat.label.clone(),
                LineSubject::Seats {
                    session_id: seat.session_id,
                    booking_reference: Some(seat.booking_reference.clone()),
                },
                seat.attendees,
                seat.unit_price,
            )
        });
        let lines = stock_lines
            .chain(seat_lines)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CommerceError::invalid("line total overflows"))?;

        self.assemble(
            payment,
            Some(reservation),
            lines,
            reservation.shipping,
            status,
        )
    }

    fn failed_order(
        &self,
        reservation: &Reservation,
        payment: PaymentSucceeded,
        reason: &'static str,
    ) -> Result<Order, CommerceError> {
        tracing::error!(
            reservation = %reservation.id,
            payment_reference = %payment.payment_reference,
            reason,
            "Payment arrived for a reservation that can no longer be fulfilled"
        );
        let mut order = self.order_from_reservation(reservation, payment, OrderStatus::Failed)?;
        order
            .metadata
            .notes
            .insert(FAILURE_REASON.to_string(), reason.to_string());
        Ok(order)
    }

    fn assemble(
        &self,
        payment: PaymentSucceeded,
        reservation: Option<&Reservation>,
        lines: Vec<OrderLine>,
        shipping: Money,
        status: OrderStatus,
    ) -> Result<Order, CommerceError> {
        let (subtotal, total) = order_totals(&lines, shipping)
            .ok_or_else(|| CommerceError::invalid("order total overflows"))?;

        Ok(Order {
            id: OrderId::new(),
            payment_reference: Some(payment.payment_reference),
            reservation_id: reservation.map(|r| r.id),
            lines,
            subtotal,
            shipping,
            total,
            status,
            shipping_address: payment.shipping_address,
            billing_address: payment.billing_address,
            metadata: OrderMetadata::default(),
            created_at: self.clock.now(),
        })
    }

    /// Tell the processor to ship. The order stands whatever happens here.
    async fn confirm_downstream(&self, order: Order) -> (Order, DownstreamStatus) {
        let result = self
            .breaker
            .call(|| self.gateway.confirm_shipment(&order))
            .await
            .map_err(|error| self.downstream_error(error));

        match result {
            Ok(receipt) => {
                let order = self.flag_shipping(order).await;
                (
                    order,
                    DownstreamStatus::Confirmed {
                        confirmation_id: receipt.confirmation_id,
                    },
                )
            }
            Err(CommerceError::CircuitOpen { failures, .. }) => {
                tracing::warn!(
                    order = %order.id,
                    breaker = self.breaker.name(),
                    failures,
                    "Shipment confirmation skipped, circuit open"
                );
                (order, DownstreamStatus::CircuitOpen { failures })
            }
            Err(error) => {
                tracing::warn!(
                    order = %order.id,
                    code = error.code(),
                    error = %error,
                    "Shipment confirmation failed"
                );
                (
                    order,
                    DownstreamStatus::Failed {
                        reason: error.to_string(),
                    },
                )
            }
        }
    }

    fn downstream_error(&self, error: CircuitBreakerError<GatewayError>) -> CommerceError {
        match error {
            CircuitBreakerError::Open { failures, .. } => CommerceError::CircuitOpen {
                dependency: self.breaker.name().to_string(),
                failures,
            },
            CircuitBreakerError::Inner(error) => CommerceError::Downstream(error.to_string()),
        }
    }

    /// Set the shipping flag, returning the stored order when it changed.
    async fn flag_shipping(&self, order: Order) -> Order {
        let Some(reference) = order.payment_reference.clone() else {
            return order;
        };
        match self.orders.mark_shipping_confirmed(reference).await {
            Ok(Transition::Applied(updated)) => {
                OrderMetrics::record_shipping_confirmed();
                updated
            }
            Ok(Transition::Unchanged(updated)) => updated,
            Ok(Transition::Missing) => order,
            Err(error) => {
                tracing::warn!(
                    order = %order.id,
                    error = %error,
                    "Failed to record shipping confirmation"
                );
                order
            }
        }
    }

    fn queue_notifications(&self, order: &Order, reference: &PaymentReference) {
        if order.status == OrderStatus::Paid {
            self.notifier.notify(Notification::OrderReceipt {
                order_id: order.id,
                payment_reference: reference.clone(),
                total: order.total,
            });
        }

        let summary = match order.metadata.notes.get(FAILURE_REASON) {
            Some(reason) => format!("order {} could not be fulfilled: {reason}", order.id),
            None => format!("order {} paid, total {}", order.id, order.total),
        };
        self.notifier.notify(Notification::AdminAlert {
            payment_reference: reference.clone(),
            status: order.status,
            summary,
        });
    }

    /// Record the client's completion ping.
    ///
    /// Never creates an order: a ping that beats the webhook gets `Pending`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a blank reference, `Storage` if the order cannot
    /// be looked up.
    pub async fn confirm_shipping(
        &self,
        reference: &PaymentReference,
    ) -> Result<ShippingConfirmation, CommerceError> {
        if reference.is_blank() {
            return Err(CommerceError::invalid("payment reference must not be blank"));
        }

        let Some(order) = self.order(reference).await? else {
            tracing::debug!(payment_reference = %reference, "Shipping ping before order exists");
            return Ok(ShippingConfirmation::Pending);
        };

        if order.metadata.shipping_confirmed {
            return Ok(ShippingConfirmation::AlreadyConfirmed(order));
        }

        match self.orders.mark_shipping_confirmed(reference.clone()).await {
            Ok(Transition::Applied(updated)) => {
                OrderMetrics::record_shipping_confirmed();
                tracing::info!(
                    order = %updated.id,
                    payment_reference = %reference,
                    "Shipping confirmed"
                );
                Ok(ShippingConfirmation::Confirmed(updated))
            }
            Ok(Transition::Unchanged(current)) => {
                Ok(ShippingConfirmation::AlreadyConfirmed(current))
            }
            Ok(Transition::Missing) => Ok(ShippingConfirmation::Pending),
            Err(error) => {
                tracing::warn!(
                    order = %order.id,
                    payment_reference = %reference,
                    error = %error,
                    "Failed to persist shipping confirmation"
                );
                Ok(ShippingConfirmation::Confirmed(order))
            }
        }
    }
}
