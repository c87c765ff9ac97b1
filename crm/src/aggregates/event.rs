//! Event lifecycle aggregate.
//!
//! Applies edits, assignments and manual state requests to a single event and reports
//! the ledger rows and side work the caller must commit with it. Nothing here touches
//! storage.

use crate::error::CrmError;
use crate::policy::{StatePolicy, validate_dependencies};
use crate::types::{
    ClientId, Event, EventPatch, EventState, SoftDeletion, StateTransition, TransitionId,
    TransitionOrigin, UserId,
};
use eventdesk_core::{environment::Clock, reducer::Effects, reducer::Reducer, smallvec};
use std::sync::Arc;

// ============================================================================
// Actions
// ============================================================================

/// Explicit state change requested alongside an update
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateRequest {
    /// Client accepted
    Approve,
    /// Client declined
    Reject {
        /// Why
        reason: String,
    },
    /// Soft delete
    Delete {
        /// Why
        reason: String,
    },
    /// Undo approval, rejection or deletion
    Revert,
    /// Anything else a caller sent; handled as a plain update
    Other(String),
}

impl StateRequest {
    /// Parse a request label such as `"APPROVED"` or `"REVERT_STATE"`.
    ///
    /// `reason` feeds rejections and deletions.
    #[must_use]
    pub fn from_label(label: &str, reason: Option<String>) -> Self {
        let reason = reason.unwrap_or_default();
        match label {
            "APPROVED" => Self::Approve,
            "REJECTED" => Self::Reject { reason },
            "DELETED" => Self::Delete { reason },
            "REVERT_STATE" => Self::Revert,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Actions accepted by [`EventReducer`]
#[derive(Clone, Debug)]
pub enum EventAction {
    /// A freshly built event enters the pipeline with its derived state
    Open {
        /// Creating user, `None` for automated sources
        actor: Option<UserId>,
        /// Source of the event
        origin: TransitionOrigin,
    },

    /// A historical event enters the pipeline in a given state
    Import {
        /// Importing user
        actor: Option<UserId>,
        /// State to start in
        state: EventState,
    },

    /// Edit attributes, optionally with an explicit state request
    Update {
        /// Attribute changes
        patch: EventPatch,
        /// Manual transition, evaluated before automatic derivation
        request: Option<StateRequest>,
        /// Acting user
        actor: Option<UserId>,
        /// Source of the edit
        origin: TransitionOrigin,
    },

    /// Hand the event to a salesperson
    AssignSalesperson {
        /// New owner
        salesperson: UserId,
        /// Acting user
        actor: Option<UserId>,
        /// Source of the assignment
        origin: TransitionOrigin,
    },

    /// Toggle VAT on the pre-check
    SetInvoiced {
        /// New value
        invoiced: bool,
    },

    /// Close an approved event whose date has passed
    AutoConclude,
}

/// Work the caller must commit together with the updated event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEffect {
    /// Append a ledger row
    RecordTransition(StateTransition),
    /// Drop pre-check concepts and additionals (payments stay)
    DiscardPrecheckItems,
    /// Remember the owner for the client's next inquiry
    SetPreferredSalesperson {
        /// Client
        client: ClientId,
        /// Salesperson
        salesperson: UserId,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of [`EventReducer`]
#[derive(Clone)]
pub struct LifecycleEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Derivation rules
    pub policy: StatePolicy,
    /// Minimum deletion reason length
    pub deletion_reason_min_len: usize,
}

impl LifecycleEnvironment {
    /// Creates a new `LifecycleEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, policy: StatePolicy, deletion_reason_min_len: usize) -> Self {
        Self {
            clock,
            policy,
            deletion_reason_min_len,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the event lifecycle
#[derive(Clone, Debug, Default)]
pub struct EventReducer;

impl EventReducer {
    /// Creates a new `EventReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

type LifecycleResult = Result<Effects<LifecycleEffect>, CrmError>;

impl Reducer for EventReducer {
    type State = Event;
    type Action = EventAction;
    type Environment = LifecycleEnvironment;
    type Effect = LifecycleEffect;
    type Error = CrmError;

    fn reduce(&self, state: &mut Event, action: EventAction, env: &LifecycleEnvironment) -> LifecycleResult {
        match action {
            EventAction::Open { actor, origin } => open(state, actor, origin, env),
            EventAction::Import { actor, state: initial } => import(state, actor, initial, env),
            EventAction::Update {
                patch,
                request,
                actor,
                origin,
            } => update(state, patch, request, actor, origin, env),
            EventAction::AssignSalesperson {
                salesperson,
                actor,
                origin,
            } => assign(state, salesperson, actor, origin, env),
            EventAction::SetInvoiced { invoiced } => {
                ensure_not_deleted(state)?;
                state.invoiced = invoiced;
                state.updated_at = env.clock.now();
                Ok(Effects::new())
            }
            EventAction::AutoConclude => auto_conclude(state, env),
        }
    }
}

fn open(
    event: &mut Event,
    actor: Option<UserId>,
    origin: TransitionOrigin,
    env: &LifecycleEnvironment,
) -> LifecycleResult {
    validate_dependencies(event)?;

    let now = env.clock.now();
    event.state = env.policy.derive_state(event, true);
    event.state_changed_at = Some(now);
    event.updated_at = now;

    let mut effects: Effects<LifecycleEffect> =
        smallvec![transition(event, None, event.state, actor, origin, now)];
    if let Some(salesperson) = event.salesperson_id {
        effects.push(LifecycleEffect::SetPreferredSalesperson {
            client: event.client_id,
            salesperson,
        });
    }
    Ok(effects)
}

fn import(
    event: &mut Event,
    actor: Option<UserId>,
    initial: EventState,
    env: &LifecycleEnvironment,
) -> LifecycleResult {
    validate_dependencies(event)?;

    let now = env.clock.now();
    event.state = initial;
    event.state_changed_at = Some(now);
    event.updated_at = now;

    Ok(smallvec![transition(
        event,
        None,
        initial,
        actor,
        TransitionOrigin::Migration,
        now
    )])
}

fn update(
    event: &mut Event,
    patch: EventPatch,
    request: Option<StateRequest>,
    actor: Option<UserId>,
    origin: TransitionOrigin,
    env: &LifecycleEnvironment,
) -> LifecycleResult {
    if event.state == EventState::Deleted && request != Some(StateRequest::Revert) {
        return Err(CrmError::Conflict(format!(
            "event {} is deleted; only a revert is allowed",
            event.id
        )));
    }
    if event.state == EventState::Concluded && request.is_some() {
        return Err(CrmError::Conflict(format!(
            "event {} is concluded; state changes are not allowed",
            event.id
        )));
    }
    if event.state == EventState::Deleted && !patch.is_empty() {
        return Err(CrmError::Conflict(format!(
            "event {} is deleted; revert it before editing",
            event.id
        )));
    }

    let mut next = event.clone();
    patch.apply(&mut next);
    let mut effects = Effects::new();

    match request {
        Some(StateRequest::Approve) => {
            next.state = if next
                .event_date
                .is_some_and(|date| date < env.clock.today())
            {
                EventState::Concluded
            } else {
                EventState::Approved
            };
            clear_flags(&mut next);
        }
        Some(StateRequest::Reject { reason }) => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(CrmError::validation(
                    "rejection_reason",
                    "a rejection needs a reason",
                ));
            }
            next.state = EventState::Rejected;
            next.rejection_reason = Some(reason.to_string());
            clear_flags(&mut next);
        }
        Some(StateRequest::Delete { reason }) => {
            let reason = reason.trim();
            if reason.chars().count() < env.deletion_reason_min_len {
                return Err(CrmError::validation(
                    "deletion_reason",
                    format!(
                        "a deletion needs a reason of at least {} characters",
                        env.deletion_reason_min_len
                    ),
                ));
            }
            next.deletion = Some(SoftDeletion {
                reason: reason.to_string(),
                restore_to: event.state,
            });
            next.state = EventState::Deleted;
            clear_flags(&mut next);
        }
        Some(StateRequest::Revert) => match event.state {
            EventState::Approved | EventState::Rejected => {
                next.rejection_reason = None;
                next.state = env.policy.derive_state(&next, true);
                effects.push(LifecycleEffect::DiscardPrecheckItems);
            }
            EventState::Deleted => {
                let Some(deletion) = next.deletion.take() else {
                    return Err(CrmError::Conflict(format!(
                        "event {} has no deletion record to restore",
                        event.id
                    )));
                };
                next.state = deletion.restore_to;
            }
            other => {
                return Err(CrmError::Conflict(format!(
                    "cannot revert an event in {other}"
                )));
            }
        },
        Some(StateRequest::Other(label)) => {
            tracing::debug!(event_id = %event.id, label = %label, "Unrecognized state request, deriving");
            next.state = env.policy.derive_state(&next, false);
        }
        None => {
            next.state = env.policy.derive_state(&next, false);
        }
    }

    validate_dependencies(&next)?;

    let now = env.clock.now();
    if next.state != event.state {
        effects.push(transition(
            &next,
            Some(event.state),
            next.state,
            actor,
            origin,
            now,
        ));
        next.state_changed_at = Some(now);
    }
    if let Some(salesperson) = next.salesperson_id.filter(|s| event.salesperson_id != Some(*s)) {
        effects.push(LifecycleEffect::SetPreferredSalesperson {
            client: next.client_id,
            salesperson,
        });
    }
    next.updated_at = now;

    *event = next;
    Ok(effects)
}

fn assign(
    event: &mut Event,
    salesperson: UserId,
    actor: Option<UserId>,
    origin: TransitionOrigin,
    env: &LifecycleEnvironment,
) -> LifecycleResult {
    let patch = EventPatch {
        salesperson_id: Some(Some(salesperson)),
        ..EventPatch::default()
    };
    update(event, patch, None, actor, origin, env)
}

fn auto_conclude(event: &mut Event, env: &LifecycleEnvironment) -> LifecycleResult {
    let due = event.state == EventState::Approved
        && event
            .event_date
            .is_some_and(|date| date < env.clock.today());
    if !due {
        return Ok(Effects::new());
    }

    let now = env.clock.now();
    let row = transition(
        event,
        Some(EventState::Approved),
        EventState::Concluded,
        None,
        TransitionOrigin::System,
        now,
    );
    event.state = EventState::Concluded;
    event.state_changed_at = Some(now);
    event.updated_at = now;
    Ok(smallvec![row])
}

fn ensure_not_deleted(event: &Event) -> Result<(), CrmError> {
    if event.state == EventState::Deleted {
        return Err(CrmError::Conflict(format!("event {} is deleted", event.id)));
    }
    Ok(())
}

const fn clear_flags(event: &mut Event) {
    event.priority = false;
    event.tentative = false;
}

fn transition(
    event: &Event,
    from_state: Option<EventState>,
    to_state: EventState,
    actor: Option<UserId>,
    origin: TransitionOrigin,
    at: chrono::DateTime<chrono::Utc>,
) -> LifecycleEffect {
    LifecycleEffect::RecordTransition(StateTransition {
        id: TransitionId::new(),
        event_id: event.id,
        from_state,
        to_state,
        actor,
        origin,
        at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ClientId, EventId};
    use chrono::{Duration, NaiveTime};
    use eventdesk_testing::{ReducerTest, assertions, test_clock};
    use rust_decimal::Decimal;

    fn env() -> LifecycleEnvironment {
        LifecycleEnvironment::new(Arc::new(test_clock()), StatePolicy::default(), 5)
    }

    fn event_in(state: EventState) -> Event {
        let mut event = Event::new(EventId::new(), ClientId::new(), test_clock().now());
        event.state = state;
        event.salesperson_id = Some(UserId::new());
        event.budget = Some(Decimal::new(5000, 0));
        event
    }

    fn update(request: StateRequest) -> EventAction {
        EventAction::Update {
            patch: EventPatch::default(),
            request: Some(request),
            actor: Some(UserId::new()),
            origin: TransitionOrigin::Manual,
        }
    }

    fn recorded(effects: &[LifecycleEffect]) -> Vec<&StateTransition> {
        effects
            .iter()
            .filter_map(|e| match e {
                LifecycleEffect::RecordTransition(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_without_owner_is_incoming() {
        let event = Event::new(EventId::new(), ClientId::new(), test_clock().now());
        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(EventAction::Open {
                actor: None,
                origin: TransitionOrigin::AutomatedIntegration,
            })
            .then_state(|event| {
                assert_eq!(event.state, EventState::Incoming);
                assert!(event.state_changed_at.is_some());
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                let rows = recorded(effects);
                assert_eq!(rows[0].from_state, None);
                assert_eq!(rows[0].to_state, EventState::Incoming);
                assert_eq!(rows[0].actor, None);
            })
            .run();
    }

    #[test]
    fn open_with_owner_remembers_the_preference() {
        let mut event = Event::new(EventId::new(), ClientId::new(), test_clock().now());
        let salesperson = UserId::new();
        event.salesperson_id = Some(salesperson);
        let client = event.client_id;

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(EventAction::Open {
                actor: Some(salesperson),
                origin: TransitionOrigin::Manual,
            })
            .then_state(|event| assert_eq!(event.state, EventState::Assigned))
            .then_effects(move |effects| {
                assertions::assert_has_effect(effects, |e| {
                    *e == LifecycleEffect::SetPreferredSalesperson {
                        client,
                        salesperson,
                    }
                });
            })
            .run();
    }

    #[test]
    fn reject_requires_a_reason() {
        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event_in(EventState::Quoted))
            .when_action(update(StateRequest::Reject {
                reason: "   ".to_string(),
            }))
            .then_state(|event| assert_eq!(event.state, EventState::Quoted))
            .then_error(|error| {
                assert!(matches!(
                    error,
                    CrmError::Validation {
                        field: "rejection_reason",
                        ..
                    }
                ));
            })
            .run();
    }

    #[test]
    fn reject_stores_reason_and_clears_flags() {
        let mut event = event_in(EventState::Quoted);
        event.priority = true;
        event.tentative = true;

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(update(StateRequest::Reject {
                reason: "precio alto".to_string(),
            }))
            .then_state(|event| {
                assert_eq!(event.state, EventState::Rejected);
                assert_eq!(event.rejection_reason.as_deref(), Some("precio alto"));
                assert!(!event.priority && !event.tentative);
            })
            .then_effects(|effects| {
                let rows = recorded(effects);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].from_state, Some(EventState::Quoted));
                assert_eq!(rows[0].to_state, EventState::Rejected);
            })
            .run();
    }

    #[test]
    fn approving_a_past_event_concludes_it() {
        let mut event = event_in(EventState::Quoted);
        event.event_date = Some(test_clock().today() - Duration::days(1));

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(update(StateRequest::Approve))
            .then_state(|event| assert_eq!(event.state, EventState::Concluded))
            .run();
    }

    #[test]
    fn deletion_needs_a_long_enough_reason() {
        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event_in(EventState::Assigned))
            .when_action(update(StateRequest::Delete {
                reason: "dup".to_string(),
            }))
            .then_error(|error| {
                assert!(matches!(
                    error,
                    CrmError::Validation {
                        field: "deletion_reason",
                        ..
                    }
                ));
            })
            .run();
    }

    #[test]
    fn deleted_events_only_accept_revert() {
        let mut event = event_in(EventState::Deleted);
        event.deletion = Some(SoftDeletion {
            reason: "duplicate inquiry".to_string(),
            restore_to: EventState::Contacted,
        });

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event.clone())
            .when_action(EventAction::Update {
                patch: EventPatch {
                    guest_count: Some(Some(40)),
                    ..EventPatch::default()
                },
                request: None,
                actor: None,
                origin: TransitionOrigin::Manual,
            })
            .then_error(|error| assert!(matches!(error, CrmError::Conflict(_))))
            .run();

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(update(StateRequest::Revert))
            .then_state(|event| {
                assert_eq!(event.state, EventState::Contacted);
                assert!(event.deletion.is_none());
            })
            .then_effects(|effects| assert_eq!(recorded(effects).len(), 1))
            .run();
    }

    #[test]
    fn revert_from_deleted_refuses_attribute_edits() {
        let mut event = event_in(EventState::Deleted);
        event.guest_count = Some(80);
        event.deletion = Some(SoftDeletion {
            reason: "duplicate inquiry".to_string(),
            restore_to: EventState::Quoted,
        });
        let before = event.clone();

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(EventAction::Update {
                patch: EventPatch {
                    guest_count: Some(Some(10)),
                    ..EventPatch::default()
                },
                request: Some(StateRequest::Revert),
                actor: None,
                origin: TransitionOrigin::Manual,
            })
            .then_state(move |event| assert_eq!(*event, before))
            .then_error(|error| assert!(matches!(error, CrmError::Conflict(_))))
            .run();
    }

    #[test]
    fn revert_from_approved_rederives_and_discards_items() {
        let mut event = event_in(EventState::Approved);
        event.start_time = NaiveTime::from_hms_opt(21, 0, 0);

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(update(StateRequest::Revert))
            .then_state(|event| assert_eq!(event.state, EventState::Quoted))
            .then_effects(|effects| {
                assertions::assert_has_effect(effects, |e| {
                    *e == LifecycleEffect::DiscardPrecheckItems
                });
            })
            .run();
    }

    #[test]
    fn revert_from_an_open_state_conflicts() {
        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event_in(EventState::Quoted))
            .when_action(update(StateRequest::Revert))
            .then_error(|error| assert!(matches!(error, CrmError::Conflict(_))))
            .run();
    }

    #[test]
    fn concluded_events_refuse_state_requests() {
        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event_in(EventState::Concluded))
            .when_action(update(StateRequest::Other("QUOTED".to_string())))
            .then_error(|error| assert!(matches!(error, CrmError::Conflict(_))))
            .run();
    }

    #[test]
    fn unknown_requests_fall_back_to_derivation() {
        let mut event = event_in(EventState::Assigned);
        event.budget = None;

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(EventAction::Update {
                patch: EventPatch {
                    budget: Some(Some(Decimal::new(900, 0))),
                    ..EventPatch::default()
                },
                request: Some(StateRequest::from_label("SOMETHING", None)),
                actor: None,
                origin: TransitionOrigin::Manual,
            })
            .then_state(|event| assert_eq!(event.state, EventState::Quoted))
            .run();
    }

    #[test]
    fn schedule_without_owner_leaves_event_untouched() {
        let event = Event::new(EventId::new(), ClientId::new(), test_clock().now());
        let before = event.clone();

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(event)
            .when_action(EventAction::Update {
                patch: EventPatch {
                    start_time: Some(NaiveTime::from_hms_opt(20, 0, 0)),
                    ..EventPatch::default()
                },
                request: None,
                actor: None,
                origin: TransitionOrigin::Manual,
            })
            .then_state(move |event| assert_eq!(*event, before))
            .then_error(|error| assert!(matches!(error, CrmError::Validation { .. })))
            .run();
    }

    #[test]
    fn auto_conclude_only_touches_past_approved_events() {
        let mut past = event_in(EventState::Approved);
        past.event_date = Some(test_clock().today() - Duration::days(2));

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(past)
            .when_action(EventAction::AutoConclude)
            .then_state(|event| assert_eq!(event.state, EventState::Concluded))
            .then_effects(|effects| {
                let rows = recorded(effects);
                assert_eq!(rows[0].origin, TransitionOrigin::System);
            })
            .run();

        let mut today = event_in(EventState::Approved);
        today.event_date = Some(test_clock().today());

        ReducerTest::new(EventReducer::new())
            .with_env(env())
            .given_state(today)
            .when_action(EventAction::AutoConclude)
            .then_state(|event| assert_eq!(event.state, EventState::Approved))
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }
}
