//! Automatic state derivation.
//!
//! The pipeline state of an event follows from what is known about it: an owner, a
//! schedule, a budget. [`StatePolicy::derive_state`] computes that state; manual
//! overrides (approve, reject, delete, revert) live in the event reducer.

use crate::error::{CrmError, Result};
use crate::types::{Event, EventState, UserId};

/// Priority rank of every state.
///
/// Derivation only ever moves an existing event to a strictly higher rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatePriorities {
    ranks: [u8; EventState::ALL.len()],
}

impl StatePriorities {
    /// The standard funnel ranking
    #[must_use]
    pub const fn standard() -> Self {
        let mut ranks = [0; EventState::ALL.len()];
        ranks[EventState::Incoming as usize] = 1;
        ranks[EventState::Assigned as usize] = 2;
        ranks[EventState::Contacted as usize] = 3;
        ranks[EventState::Quoted as usize] = 4;
        ranks[EventState::Approved as usize] = 5;
        ranks[EventState::Rejected as usize] = 5;
        ranks[EventState::MultiBooking as usize] = 5;
        ranks[EventState::Concluded as usize] = 6;
        ranks[EventState::Deleted as usize] = 7;
        Self { ranks }
    }

    /// Rank of `state`
    #[must_use]
    pub const fn rank(&self, state: EventState) -> u8 {
        self.ranks[state as usize]
    }
}

impl Default for StatePriorities {
    fn default() -> Self {
        Self::standard()
    }
}

/// Derivation rules, parameterised by the priority table and the multi-booking account.
#[derive(Clone, Debug, Default)]
pub struct StatePolicy {
    priorities: StatePriorities,
    multi_booking_account: Option<UserId>,
}

impl StatePolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(priorities: StatePriorities, multi_booking_account: Option<UserId>) -> Self {
        Self {
            priorities,
            multi_booking_account,
        }
    }

    /// The priority table in use
    #[must_use]
    pub const fn priorities(&self) -> &StatePriorities {
        &self.priorities
    }

    /// Account whose assignment parks an event in `MULTI_BOOKING`
    #[must_use]
    pub const fn multi_booking_account(&self) -> Option<UserId> {
        self.multi_booking_account
    }

    /// State implied by the event's attributes.
    ///
    /// New events take the derived state as is. Existing events only move up: a lower
    /// or equal derived rank keeps the current state, and terminal states never change.
    #[must_use]
    pub fn derive_state(&self, event: &Event, is_new: bool) -> EventState {
        let derived = self.implied_state(event);

        if is_new {
            return derived;
        }
        if event.state.is_terminal() {
            return event.state;
        }
        if self.priorities.rank(derived) > self.priorities.rank(event.state) {
            derived
        } else {
            event.state
        }
    }

    fn implied_state(&self, event: &Event) -> EventState {
        let Some(salesperson) = event.salesperson_id else {
            return EventState::Incoming;
        };
        if Some(salesperson) == self.multi_booking_account {
            return EventState::MultiBooking;
        }

        let mut state = EventState::Assigned;
        if event.has_schedule() {
            state = EventState::Contacted;
        }
        if event.budget.is_some() {
            state = EventState::Quoted;
        }
        state
    }
}

/// Schedule and budget require an owner.
///
/// # Errors
///
/// Returns [`CrmError::Validation`] when a start/end time or a budget is set on an
/// event without an assigned salesperson.
pub fn validate_dependencies(event: &Event) -> Result<()> {
    if event.salesperson_id.is_some() {
        return Ok(());
    }
    if event.has_schedule() {
        return Err(CrmError::validation(
            "start_time",
            "a schedule requires an assigned salesperson",
        ));
    }
    if event.budget.is_some() {
        return Err(CrmError::validation(
            "budget",
            "a budget requires an assigned salesperson",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ClientId, EventId};
    use chrono::{NaiveTime, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn event() -> Event {
        Event::new(EventId::new(), ClientId::new(), Utc::now())
    }

    #[test]
    fn bare_event_is_incoming() {
        let policy = StatePolicy::default();
        assert_eq!(policy.derive_state(&event(), true), EventState::Incoming);
    }

    #[test]
    fn each_attribute_raises_the_floor() {
        let policy = StatePolicy::default();
        let mut e = event();

        e.salesperson_id = Some(UserId::new());
        assert_eq!(policy.derive_state(&e, true), EventState::Assigned);

        e.start_time = NaiveTime::from_hms_opt(20, 0, 0);
        assert_eq!(policy.derive_state(&e, true), EventState::Contacted);

        e.budget = Some(Decimal::new(150_000, 2));
        assert_eq!(policy.derive_state(&e, true), EventState::Quoted);
    }

    #[test]
    fn budget_without_schedule_still_quotes() {
        let policy = StatePolicy::default();
        let mut e = event();
        e.salesperson_id = Some(UserId::new());
        e.budget = Some(Decimal::ONE);
        assert_eq!(policy.derive_state(&e, true), EventState::Quoted);
    }

    #[test]
    fn multi_booking_account_short_circuits() {
        let account = UserId::new();
        let policy = StatePolicy::new(StatePriorities::standard(), Some(account));
        let mut e = event();
        e.salesperson_id = Some(account);
        e.budget = Some(Decimal::ONE);
        assert_eq!(policy.derive_state(&e, true), EventState::MultiBooking);
    }

    #[test]
    fn existing_events_never_move_down() {
        let policy = StatePolicy::default();
        let mut e = event();
        e.salesperson_id = Some(UserId::new());
        e.state = EventState::Quoted;

        assert_eq!(policy.derive_state(&e, false), EventState::Quoted);
    }

    #[test]
    fn terminal_states_are_kept() {
        let policy = StatePolicy::default();
        for state in [EventState::Approved, EventState::Rejected, EventState::Concluded] {
            let mut e = event();
            e.state = state;
            e.salesperson_id = Some(UserId::new());
            e.budget = Some(Decimal::ONE);
            assert_eq!(policy.derive_state(&e, false), state);
        }
    }

    #[test]
    fn schedule_without_salesperson_is_rejected() {
        let mut e = event();
        e.end_time = NaiveTime::from_hms_opt(23, 0, 0);
        let err = validate_dependencies(&e).unwrap_err();
        assert!(matches!(err, CrmError::Validation { field: "start_time", .. }));
    }

    #[test]
    fn budget_without_salesperson_is_rejected() {
        let mut e = event();
        e.budget = Some(Decimal::TEN);
        let err = validate_dependencies(&e).unwrap_err();
        assert!(matches!(err, CrmError::Validation { field: "budget", .. }));
    }

    fn arb_state() -> impl Strategy<Value = EventState> {
        proptest::sample::select(EventState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn derivation_is_monotonic(
            state in arb_state(),
            assigned in any::<bool>(),
            scheduled in any::<bool>(),
            budgeted in any::<bool>(),
        ) {
            let policy = StatePolicy::default();
            let mut e = event();
            e.state = state;
            if assigned {
                e.salesperson_id = Some(UserId::new());
            }
            if scheduled {
                e.start_time = NaiveTime::from_hms_opt(19, 30, 0);
            }
            if budgeted {
                e.budget = Some(Decimal::ONE_HUNDRED);
            }

            let derived = policy.derive_state(&e, false);
            let priorities = policy.priorities();
            prop_assert!(priorities.rank(derived) >= priorities.rank(state));

            e.state = derived;
            prop_assert_eq!(policy.derive_state(&e, false), derived);
        }
    }
}
