//! Stock Ledger: conditional decrements and compensating increments.
//!
//! The only write that can take stock is [`StockLedger::try_decrement`], a
//! single conditional update at the store. Pre-checks read counters for
//! user-facing messages but are never trusted for correctness.

use holdfast_core::CommerceError;
use holdfast_core::store::{DecrementOutcome, StockStore};
use holdfast_core::types::{ReservationItem, StockChange, StockKey};
use holdfast_runtime::metrics::StockMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Guards product stock counters.
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn StockStore>,
}

impl StockLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }

    /// Take `quantity` units if at least that many are available.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a zero quantity
    /// - `InsufficientStock` when the counter holds fewer units
    /// - `NotFound` for an unknown item
    /// - `Storage` on store failure
    pub async fn try_decrement(
        &self,
        key: &StockKey,
        quantity: u32,
    ) -> Result<StockChange, CommerceError> {
        if quantity == 0 {
            return Err(CommerceError::invalid(format!(
                "quantity for {key} must be positive"
            )));
        }

        match self.store.try_decrement(key.clone(), quantity).await? {
            DecrementOutcome::Applied { before, after } => {
                StockMetrics::record_decrement(quantity);
                tracing::debug!(item = %key, quantity, before, after, "Stock decremented");
                Ok(StockChange {
                    key: key.clone(),
                    quantity,
                    before,
                    after,
                })
            }
            DecrementOutcome::Insufficient { available } => {
                StockMetrics::record_insufficient();
                tracing::info!(
                    item = %key,
                    available,
                    requested = quantity,
                    "Insufficient stock"
                );
                Err(CommerceError::InsufficientStock {
                    item: key.to_string(),
                    available,
                    requested: quantity,
                })
            }
        }
    }

    /// Return `quantity` units. Used to reverse a prior decrement.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown item, `Storage` on store failure.
    pub async fn increment(&self, key: &StockKey, quantity: u32) -> Result<u32, CommerceError> {
        let after = self.store.increment(key.clone(), quantity).await?;
        StockMetrics::record_increment();
        tracing::debug!(item = %key, quantity, after, "Stock returned");
        Ok(after)
    }

    /// Current counter value.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown item, `Storage` on store failure.
    pub async fn available(&self, key: &StockKey) -> Result<u32, CommerceError> {
        Ok(self.store.quantity(key.clone()).await?)
    }

    /// Advisory check that every line could be served right now.
    ///
    /// Lines for the same counter are summed. A concurrent checkout may still
    /// win the race; [`try_decrement`](Self::try_decrement) decides.
    ///
    /// # Errors
    ///
    /// The first shortfall as `InsufficientStock`, or `NotFound`/`Storage`.
    pub async fn precheck(&self, items: &[ReservationItem]) -> Result<(), CommerceError> {
        let mut wanted: BTreeMap<&StockKey, u32> = BTreeMap::new();
        for item in items {
            let total = wanted.entry(&item.key).or_default();
            *total = total.saturating_add(item.quantity);
        }

        for (key, requested) in wanted {
            let available = self.available(key).await?;
            if available < requested {
                return Err(CommerceError::InsufficientStock {
                    item: key.to_string(),
                    available,
                    requested,
                });
            }
        }
        Ok(())
    }
}
