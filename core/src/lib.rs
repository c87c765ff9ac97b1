//! # EventDesk Core
//!
//! Core traits shared by the EventDesk crates.
//!
//! The pipeline is written as a functional core wrapped by an imperative shell:
//!
//! - **Reducer**: `(State, Action, Environment) → Result<Effects, Error>`
//! - **Effect**: a description of work the shell must perform (append a ledger row,
//!   discard pre-check items, ...). Reducers never touch storage themselves.
//! - **Environment**: injected dependencies, most importantly the [`environment::Clock`].
//!
//! A reducer either accepts an action (mutating the state and returning the effects the
//! shell must commit together) or rejects it with an error, in which case the state the
//! shell loaded must be discarded.
//!
//! ## Example
//!
//! ```ignore
//! use eventdesk_core::reducer::Reducer;
//! use eventdesk_core::SmallVec;
//!
//! impl Reducer for CounterReducer {
//!     type State = Counter;
//!     type Action = CounterAction;
//!     type Environment = ();
//!     type Effect = CounterEffect;
//!     type Error = CounterError;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut Counter,
//!         action: CounterAction,
//!         _env: &(),
//!     ) -> Result<SmallVec<[CounterEffect; 4]>, CounterError> {
//!         state.value += 1;
//!         Ok(SmallVec::new())
//!     }
//! }
//! ```

pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for business logic
pub mod reducer {
    use smallvec::SmallVec;

    /// Effects returned by a single reduction.
    ///
    /// Almost every action produces at most a handful of effects, so they stay inline.
    pub type Effects<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Work the caller must perform after a successful reduction
    /// - `Error`: Why an action was refused
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Side effects produced by an accepted action
        type Effect;

        /// Rejection reason for a refused action
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed by the caller
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is refused. The state may have been
        /// partially modified and must not be persisted in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Effects<Self::Effect>, Self::Error>;
    }
}

/// Environment module - Dependency injection traits
///
/// All time-dependent rules (SLA thresholds, grace windows, "is the event date in the
/// past") read time through [`Clock`] so tests can pin it.
pub mod environment {
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Instants are always UTC. Calendar questions ("what day is it?") are answered in the
    /// deployment's fixed local offset returned by [`Clock::offset`].
    ///
    /// # Examples
    ///
    /// ```
    /// use eventdesk_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock::utc();
    /// assert_eq!(clock.today(), clock.now().date_naive());
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current instant
        fn now(&self) -> DateTime<Utc>;

        /// Fixed local offset of the deployment
        fn offset(&self) -> FixedOffset;

        /// Current wall-clock time in the local offset
        fn local_now(&self) -> NaiveDateTime {
            self.now().with_timezone(&self.offset()).naive_local()
        }

        /// Current calendar date in the local offset
        fn today(&self) -> NaiveDate {
            self.local_now().date()
        }
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy)]
    pub struct SystemClock {
        offset: FixedOffset,
    }

    impl SystemClock {
        /// System clock reporting local dates in `offset`
        #[must_use]
        pub const fn new(offset: FixedOffset) -> Self {
            Self { offset }
        }

        /// System clock with a UTC local offset
        #[must_use]
        pub fn utc() -> Self {
            Self::new(Utc.fix())
        }

        /// System clock for a whole-hour offset such as `-3`.
        ///
        /// Returns `None` when the offset is out of range.
        #[must_use]
        pub fn from_hours(hours: i32) -> Option<Self> {
            FixedOffset::east_opt(hours.checked_mul(3600)?).map(Self::new)
        }
    }

    impl Default for SystemClock {
        fn default() -> Self {
            Self::utc()
        }
    }

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn offset(&self) -> FixedOffset {
            self.offset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_reports_dates_in_its_offset() {
        let clock = SystemClock::from_hours(-3).unwrap_or_default();
        let expected = clock
            .now()
            .with_timezone(&clock.offset())
            .date_naive();
        assert_eq!(clock.today(), expected);
    }

    #[test]
    fn out_of_range_offsets_are_rejected() {
        assert!(SystemClock::from_hours(30).is_none());
        assert!(SystemClock::from_hours(i32::MAX).is_none());
    }
}
