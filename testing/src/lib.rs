//! # EventDesk Testing
//!
//! Testing utilities and helpers for the EventDesk crates.
//!
//! This crate provides:
//! - [`FixedClock`], a deterministic clock that tests can move forward
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - Effect assertion helpers
//!
//! ## Example
//!
//! ```ignore
//! use eventdesk_testing::test_clock;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn sla_alert_after_a_day() {
//!     let clock = Arc::new(test_clock());
//!     let service = PipelineService::new(store, clock.clone(), config);
//!
//!     let event = service.create_event(&admin, draft).await?;
//!     clock.advance(chrono::Duration::hours(25));
//!
//!     let alerts = service.get_sla_alerts(&admin).await?;
//!     assert_eq!(alerts.alerts.len(), 1);
//! }
//! ```

use chrono::{DateTime, Duration, FixedOffset, Utc};
use eventdesk_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, FixedOffset, Utc};
    use chrono::Offset;
    use std::sync::{PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same instant until a test explicitly moves it with
    /// [`FixedClock::set`] or [`FixedClock::advance`]. Share it behind an `Arc` to
    /// move time under a running service.
    ///
    /// # Example
    ///
    /// ```
    /// use eventdesk_testing::mocks::FixedClock;
    /// use eventdesk_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - time1, Duration::hours(1));
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: RwLock<DateTime<Utc>>,
        offset: FixedOffset,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time and a UTC local offset
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self::with_offset(time, Utc.fix())
        }

        /// Create a new fixed clock reporting local dates in `offset`
        #[must_use]
        pub const fn with_offset(time: DateTime<Utc>, offset: FixedOffset) -> Self {
            Self {
                time: RwLock::new(time),
                offset,
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `by`
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clone for FixedClock {
        fn clone(&self) -> Self {
            Self::with_offset(self.now(), self.offset)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }

        fn offset(&self) -> FixedOffset {
            self.offset
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 12:00:00 UTC, UTC offset)
    ///
    /// Noon keeps the local date stable for any whole-hour offset a test switches to.
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
