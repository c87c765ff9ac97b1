//! Storage seam of the pipeline.
//!
//! [`CrmStore`] is everything the service needs from persistence. Each method is one
//! unit of work; [`CrmStore::commit_event`] is the only multi-record write and must be
//! atomic.

use crate::error::Result;
use crate::precheck::{Additional, Concept, Payment, Precheck, ReviewState};
use crate::types::{
    AdditionalId, Client, ClientId, ConceptId, Event, EventId, EventState, PaymentId,
    SlaViolation, StateTransition, User, UserId, Venue, VenueId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

mod memory;

pub use memory::InMemoryCrmStore;

/// Everything written when an event changes.
#[derive(Clone, Debug)]
pub struct EventChange {
    /// New event contents; its `version` is ignored
    pub event: Event,
    /// Version the change was computed from, `None` for an insert
    pub expected_version: Option<i64>,
    /// Ledger rows to append
    pub transitions: Vec<StateTransition>,
    /// Drop the event's pre-check concepts and additionals
    pub discard_precheck_items: bool,
    /// Client to create alongside the event
    pub new_client: Option<Client>,
    /// Record a client's preferred salesperson
    pub preferred_salesperson: Option<(ClientId, UserId)>,
}

impl EventChange {
    /// Insert of a new event
    #[must_use]
    pub const fn insert(event: Event) -> Self {
        Self {
            event,
            expected_version: None,
            transitions: Vec::new(),
            discard_precheck_items: false,
            new_client: None,
            preferred_salesperson: None,
        }
    }

    /// Update of an event loaded at `expected_version`
    #[must_use]
    pub const fn update(event: Event, expected_version: i64) -> Self {
        Self {
            event,
            expected_version: Some(expected_version),
            transitions: Vec::new(),
            discard_precheck_items: false,
            new_client: None,
            preferred_salesperson: None,
        }
    }
}

/// Event selection. Empty or `None` criteria match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only these states
    pub states: Vec<EventState>,
    /// Only this venue
    pub venue_id: Option<VenueId>,
    /// Only events dated within this inclusive range; undated events never match
    pub event_date_between: Option<(NaiveDate, NaiveDate)>,
}

impl EventFilter {
    /// Events in any of `states`
    #[must_use]
    pub fn in_states(states: &[EventState]) -> Self {
        Self {
            states: states.to_vec(),
            ..Self::default()
        }
    }

    /// Whether `event` satisfies the filter
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if !self.states.is_empty() && !self.states.contains(&event.state) {
            return false;
        }
        if self.venue_id.is_some() && event.venue_id != self.venue_id {
            return false;
        }
        if let Some((from, to)) = self.event_date_between {
            return event.event_date.is_some_and(|d| d >= from && d <= to);
        }
        true
    }
}

/// Violation selection, newest first
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViolationFilter {
    /// Breached at or after
    pub from: Option<DateTime<Utc>>,
    /// Breached at or before
    pub to: Option<DateTime<Utc>>,
    /// Only breaches of this salesperson
    pub salesperson: Option<UserId>,
    /// Maximum rows returned
    pub limit: usize,
}

impl ViolationFilter {
    /// Whether `violation` satisfies the filter, ignoring the limit
    #[must_use]
    pub fn matches(&self, violation: &SlaViolation) -> bool {
        self.from.is_none_or(|from| violation.breached_at >= from)
            && self.to.is_none_or(|to| violation.breached_at <= to)
            && self.salesperson.is_none_or(|id| {
                violation
                    .salesperson
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.id == id)
            })
    }
}

/// Persistence used by the pipeline service.
#[async_trait]
pub trait CrmStore: Send + Sync {
    // ------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------

    /// Load a user
    async fn user(&self, id: UserId) -> Result<Option<User>>;

    /// Find a user by e-mail, case-insensitively
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// All users
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Create or replace a user
    async fn save_user(&self, user: &User) -> Result<()>;

    /// Load a venue
    async fn venue(&self, id: VenueId) -> Result<Option<Venue>>;

    /// All venues
    async fn list_venues(&self) -> Result<Vec<Venue>>;

    /// Create or replace a venue
    async fn save_venue(&self, venue: &Venue) -> Result<()>;

    /// Load a client
    async fn client(&self, id: ClientId) -> Result<Option<Client>>;

    /// Find a client by normalized phone
    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>>;

    // ------------------------------------------------------------------
    // Events and ledger
    // ------------------------------------------------------------------

    /// Load an event
    async fn event(&self, id: EventId) -> Result<Option<Event>>;

    /// Find the event carrying an external thread id
    async fn find_event_by_thread(&self, thread_id: &str) -> Result<Option<Event>>;

    /// Events matching `filter`
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Atomically write an event change and return the stored event.
    ///
    /// Fails with `Conflict` when `expected_version` is stale, when an insert reuses an
    /// existing id or thread id, or when a new client reuses a phone.
    async fn commit_event(&self, change: EventChange) -> Result<Event>;

    /// Ledger rows of one event, oldest first
    async fn transitions_for(&self, event_id: EventId) -> Result<Vec<StateTransition>>;

    /// Ledger rows recorded within `[from, to]`, oldest first
    async fn transitions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StateTransition>>;

    // ------------------------------------------------------------------
    // SLA violations
    // ------------------------------------------------------------------

    /// Store `violation` unless one exists for the same (event, state).
    ///
    /// Returns whether a row was written.
    async fn record_violation(&self, violation: &SlaViolation) -> Result<bool>;

    /// Violations matching `filter`, newest first
    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<SlaViolation>>;

    // ------------------------------------------------------------------
    // Pre-checks
    // ------------------------------------------------------------------

    /// Every line of one event's pre-check
    async fn precheck(&self, event_id: EventId) -> Result<Precheck>;

    /// Pre-checks of many events in one round trip; events without lines are absent
    async fn prechecks_for(&self, event_ids: &[EventId]) -> Result<HashMap<EventId, Precheck>>;

    /// Create or replace a concept
    async fn save_concept(&self, concept: &Concept) -> Result<()>;

    /// Delete a concept; returns whether it existed
    async fn delete_concept(&self, event_id: EventId, id: ConceptId) -> Result<bool>;

    /// Create or replace an additional
    async fn save_additional(&self, additional: &Additional) -> Result<()>;

    /// Delete an additional; returns whether it existed
    async fn delete_additional(&self, event_id: EventId, id: AdditionalId) -> Result<bool>;

    /// Load a payment of an event
    async fn payment(&self, event_id: EventId, id: PaymentId) -> Result<Option<Payment>>;

    /// Create or replace a payment
    async fn save_payment(&self, payment: &Payment) -> Result<()>;

    /// Replace a payment only while the stored row is still pending.
    ///
    /// # Errors
    ///
    /// [`CrmError::Conflict`](crate::error::CrmError::Conflict) when the payment was
    /// reviewed since it was read, `NotFound` when it is gone.
    async fn update_pending_payment(&self, payment: &Payment) -> Result<()>;

    /// Delete a payment that is still pending; returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`CrmError::Conflict`](crate::error::CrmError::Conflict) when it was reviewed.
    async fn delete_pending_payment(&self, event_id: EventId, id: PaymentId) -> Result<bool>;

    /// Payments in a review state, across events
    async fn payments_in_review_state(&self, state: ReviewState) -> Result<Vec<Payment>>;
}
