//! Error taxonomy for the reservation engine.

use crate::store::StoreError;
use thiserror::Error;

/// Every failure a commerce operation can report.
///
/// Logic errors (`InsufficientStock`, `CapacityExceeded`, `NotFound`,
/// `InvalidRequest`, ...) are final: retrying the same input yields the same
/// answer. [`CommerceError::is_retryable`] separates them from transient
/// infrastructure failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommerceError {
    /// Not enough units left to satisfy the request.
    #[error("insufficient stock for {item}: {available} available, {requested} requested")]
    InsufficientStock {
        /// Item that ran short
        item: String,
        /// Units available when the decrement was attempted
        available: u32,
        /// Units requested
        requested: u32,
    },

    /// The session cannot seat the requested attendees.
    #[error("session {session} has {remaining} seats left, {requested} requested")]
    CapacityExceeded {
        /// Session id
        session: String,
        /// Seats left at the moment of the conditional insert
        remaining: u32,
        /// Seats requested
        requested: u32,
    },

    /// A reservation, order, booking, session or stock item does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Lookup key
        id: String,
    },

    /// A seat hold was cancelled before its reservation could be consumed.
    #[error("seat hold {booking} was cancelled")]
    SeatHoldCancelled {
        /// Booking reference of the hold
        booking: String,
    },

    /// The downstream dependency is isolated by its circuit breaker.
    #[error("circuit open for {dependency} after {failures} consecutive failures")]
    CircuitOpen {
        /// Breaker name
        dependency: String,
        /// Consecutive failures recorded by the breaker
        failures: u32,
    },

    /// A storage uniqueness constraint rejected the write.
    #[error("conflicting {entity} for key {key}")]
    PersistenceConflict {
        /// Kind of record
        entity: &'static str,
        /// Conflicting key
        key: String,
    },

    /// Malformed or semantically invalid input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Store I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The downstream dependency returned an error.
    #[error("downstream error: {0}")]
    Downstream(String),
}

impl CommerceError {
    /// Shorthand for [`CommerceError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`CommerceError::InvalidRequest`].
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Whether a caller (typically the payment processor) should retry.
    ///
    /// Only infrastructure failures qualify; everything else is a final answer.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::CircuitOpen { .. } | Self::Downstream(_)
        )
    }

    /// Stable machine-readable code, used in API bodies and metric labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::NotFound { .. } => "not_found",
            Self::SeatHoldCancelled { .. } => "seat_hold_cancelled",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Storage(_) => "storage_error",
            Self::Downstream(_) => "downstream_error",
        }
    }
}

impl From<StoreError> for CommerceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::UniqueViolation { entity, key } => {
                Self::PersistenceConflict { entity, key }
            }
            StoreError::Database(message) => Self::Storage(message),
            StoreError::Serialization(message) => {
                Self::Storage(format!("serialization: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_errors_are_not_retryable() {
        let errors = [
            CommerceError::InsufficientStock {
                item: "MAT".into(),
                available: 1,
                requested: 2,
            },
            CommerceError::not_found("order", "PAY-1"),
            CommerceError::invalid("empty"),
            CommerceError::SeatHoldCancelled {
                booking: "BK-0001".into(),
            },
        ];
        assert!(errors.iter().all(|e| !e.is_retryable()));
    }

    #[test]
    fn test_circuit_open_is_retryable() {
        let error = CommerceError::CircuitOpen {
            dependency: "fulfillment".into(),
            failures: 3,
        };
        assert!(error.is_retryable());
        assert_eq!(error.code(), "circuit_open");
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let error: CommerceError = StoreError::Database("connection reset".into()).into();
        assert!(error.is_retryable());
        assert_eq!(error.code(), "storage_error");
    }

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let error: CommerceError = StoreError::UniqueViolation {
            entity: "order",
            key: "PAY-1".into(),
        }
        .into();
        assert_eq!(
            error,
            CommerceError::PersistenceConflict {
                entity: "order",
                key: "PAY-1".into()
            }
        );
    }

    #[test]
    fn test_insufficient_stock_message_names_item_and_counts() {
        let error = CommerceError::InsufficientStock {
            item: "variant:MAT-BLUE".into(),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            error.to_string(),
            "insufficient stock for variant:MAT-BLUE: 2 available, 3 requested"
        );
    }
}
