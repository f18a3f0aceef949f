//! # Holdfast Testing
//!
//! Testing utilities for the Holdfast workspace:
//!
//! - [`InMemoryStore`]: every store trait over in-process maps
//! - [`mocks::FixedClock`] and [`mocks::ManualClock`]: deterministic time
//! - [`FlakyGateway`] and [`RecordingSink`]: doubles for external collaborators
//!
//! ## Example
//!
//! ```ignore
//! use holdfast_testing::{InMemoryStore, test_clock};
//!
//! #[tokio::test]
//! async fn reserve_and_release() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let clock = Arc::new(test_clock());
//!     let ledger = ReservationLedger::new(store.clone(), stock, guard, clock, ttl);
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use holdfast_core::environment::Clock;

mod doubles;
mod memory_store;

pub use doubles::{FlakyGateway, RecordingSink};
pub use memory_store::InMemoryStore;

/// Deterministic clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use holdfast_testing::mocks::FixedClock;
    /// use holdfast_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to. Clones share the same time.
    ///
    /// ```
    /// use holdfast_testing::mocks::ManualClock;
    /// use holdfast_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::minutes(20));
    /// assert_eq!(clock.now(), start + Duration::minutes(20));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            let mut time = self
                .time
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let other = clock.clone();
        other.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::seconds(90));
    }
}
