//! Domain types for the event pipeline.
//!
//! Identifiers, pipeline states, events and their ledger records, plus the read-only
//! reference data (users, venues, clients) the pipeline consults.

use crate::error::{CrmError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for an event (an inquiry moving through the funnel)
    EventId
);
id_type!(
    /// Unique identifier for a client
    ClientId
);
id_type!(
    /// Unique identifier for a venue
    VenueId
);
id_type!(
    /// Unique identifier for a user
    UserId
);
id_type!(
    /// Unique identifier for a state transition ledger row
    TransitionId
);
id_type!(
    /// Unique identifier for an SLA violation record
    ViolationId
);
id_type!(
    /// Unique identifier for a pre-check concept line
    ConceptId
);
id_type!(
    /// Unique identifier for a pre-check additional line
    AdditionalId
);
id_type!(
    /// Unique identifier for a pre-check payment
    PaymentId
);

// ============================================================================
// Pipeline state
// ============================================================================

/// Commercial state of an event.
///
/// Declaration order follows the funnel, so the derived `Ord` sorts columns the way the
/// pipeline board shows them. Priorities used by automatic derivation live in
/// [`crate::policy::StatePriorities`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    /// New inquiry, nobody assigned yet
    Incoming,
    /// A salesperson owns the inquiry
    Assigned,
    /// Schedule details were agreed with the client
    Contacted,
    /// A budget was sent
    Quoted,
    /// The client accepted
    Approved,
    /// The client declined
    Rejected,
    /// Parked on the shared multi-booking account
    MultiBooking,
    /// The event took place
    Concluded,
    /// Soft-deleted, recoverable with a revert
    Deleted,
}

impl EventState {
    /// Every state, in funnel order
    pub const ALL: [Self; 9] = [
        Self::Incoming,
        Self::Assigned,
        Self::Contacted,
        Self::Quoted,
        Self::Approved,
        Self::Rejected,
        Self::MultiBooking,
        Self::Concluded,
        Self::Deleted,
    ];

    /// Convert state to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "INCOMING",
            Self::Assigned => "ASSIGNED",
            Self::Contacted => "CONTACTED",
            Self::Quoted => "QUOTED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::MultiBooking => "MULTI_BOOKING",
            Self::Concluded => "CONCLUDED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parse state from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] if the string doesn't match a known state.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CrmError::validation("state", format!("unknown state {s}")))
    }

    /// Whether automatic derivation may never move an event out of this state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::MultiBooking | Self::Concluded | Self::Deleted
        )
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of celebration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Birthdays, weddings, private parties
    Social,
    /// Company events
    Corporate,
}

impl EventCategory {
    /// Convert category to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Corporate => "corporate",
        }
    }

    /// Parse category from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown categories.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "social" => Ok(Self::Social),
            "corporate" => Ok(Self::Corporate),
            _ => Err(CrmError::validation("category", format!("unknown category {s}"))),
        }
    }

    /// Capitalised label used in generated titles
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Social => "Social",
            Self::Corporate => "Corporate",
        }
    }
}

/// What caused a state transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionOrigin {
    /// A user acting through the application
    Manual,
    /// The inbound mail / chat bot
    AutomatedIntegration,
    /// Scheduled sweeps
    System,
    /// Bulk import of historical data
    Migration,
}

impl TransitionOrigin {
    /// Convert origin to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutomatedIntegration => "automated-integration",
            Self::System => "system",
            Self::Migration => "migration",
        }
    }

    /// Parse origin from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown origins.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "automated-integration" => Ok(Self::AutomatedIntegration),
            "system" => Ok(Self::System),
            "migration" => Ok(Self::Migration),
            _ => Err(CrmError::validation("origin", format!("unknown origin {s}"))),
        }
    }
}

// ============================================================================
// Principals and reference data
// ============================================================================

/// Role of a user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access
    Admin,
    /// Works their own events
    Salesperson,
    /// Reviews payments
    Treasury,
}

impl Role {
    /// Convert role to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Salesperson => "salesperson",
            Self::Treasury => "treasury",
        }
    }

    /// Parse role from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown roles.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "salesperson" => Ok(Self::Salesperson),
            "treasury" => Ok(Self::Treasury),
            _ => Err(CrmError::validation("role", format!("unknown role {s}"))),
        }
    }
}

/// The authenticated principal performing an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Acting user
    pub user_id: UserId,
    /// Their role
    pub role: Role,
}

impl Actor {
    /// Create an actor
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Whether the actor is an administrator
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Whether the actor may validate or reject payments
    #[must_use]
    pub const fn can_review_payments(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Treasury)
    }

    /// Whether the actor may see and edit `event`
    #[must_use]
    pub fn owns_or_admin(&self, event: &Event) -> bool {
        self.is_admin() || event.salesperson_id == Some(self.user_id)
    }
}

/// A user of the CRM
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Login e-mail
    pub email: String,
    /// Role
    pub role: Role,
    /// Inactive users keep their history but get no new work
    pub active: bool,
}

/// A venue of the group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Identifier
    pub id: VenueId,
    /// Display name
    pub name: String,
    /// Board colour
    pub colour: String,
    /// Whether the venue takes new events
    pub active: bool,
}

/// A client, identified by normalized phone number
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Identifier
    pub id: ClientId,
    /// Normalized phone number, unique
    pub phone: String,
    /// Display name
    pub name: String,
    /// Contact e-mail
    pub email: Option<String>,
    /// Salesperson that last worked with this client
    pub preferred_salesperson: Option<UserId>,
    /// When the client was first seen
    pub created_at: DateTime<Utc>,
}

/// Contact details supplied when an inquiry arrives
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContact {
    /// Phone number, already normalized by the caller
    pub phone: String,
    /// Name as given
    pub name: String,
    /// E-mail if known
    pub email: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

/// Soft-deletion bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeletion {
    /// Why the event was deleted
    pub reason: String,
    /// State restored by a revert
    pub restore_to: EventState,
}

/// An inquiry moving through the commercial funnel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier
    pub id: EventId,
    /// Owning client
    pub client_id: ClientId,
    /// Requested venue
    pub venue_id: Option<VenueId>,
    /// Assigned salesperson
    pub salesperson_id: Option<UserId>,
    /// Display title
    pub title: Option<String>,
    /// Day of the celebration
    pub event_date: Option<NaiveDate>,
    /// Start time agreed with the client
    pub start_time: Option<NaiveTime>,
    /// End time agreed with the client
    pub end_time: Option<NaiveTime>,
    /// Local time at which the client got in touch
    pub inquiry_time: Option<NaiveTime>,
    /// Number of guests
    pub guest_count: Option<u32>,
    /// Social or corporate
    pub category: Option<EventCategory>,
    /// Current pipeline state
    pub state: EventState,
    /// Quoted amount
    pub budget: Option<Decimal>,
    /// When the quote was sent
    pub budget_date: Option<NaiveDate>,
    /// Canonical origin channel slug
    pub channel: Option<String>,
    /// First message received from the client
    pub original_message: Option<String>,
    /// External conversation correlation id
    pub thread_id: Option<String>,
    /// Whether the pre-check is invoiced (adds VAT)
    pub invoiced: bool,
    /// Flagged as high priority
    pub priority: bool,
    /// Date is held but not confirmed
    pub tentative: bool,
    /// Why the client declined
    pub rejection_reason: Option<String>,
    /// Present while the event is soft-deleted
    pub deletion: Option<SoftDeletion>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub updated_at: DateTime<Utc>,
    /// Last state change, the reference point of SLA timers
    pub state_changed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every commit
    pub version: i64,
}

impl Event {
    /// Empty event for `client`, in `INCOMING`, created at `now`
    #[must_use]
    pub fn new(id: EventId, client_id: ClientId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            client_id,
            venue_id: None,
            salesperson_id: None,
            title: None,
            event_date: None,
            start_time: None,
            end_time: None,
            inquiry_time: None,
            guest_count: None,
            category: None,
            state: EventState::Incoming,
            budget: None,
            budget_date: None,
            channel: None,
            original_message: None,
            thread_id: None,
            invoiced: false,
            priority: false,
            tentative: false,
            rejection_reason: None,
            deletion: None,
            created_at: now,
            updated_at: now,
            state_changed_at: None,
            version: 0,
        }
    }

    /// Whether a start or end time is set
    #[must_use]
    pub const fn has_schedule(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    /// Instant SLA timers count from
    #[must_use]
    pub fn sla_reference(&self) -> DateTime<Utc> {
        self.state_changed_at.unwrap_or(self.created_at)
    }

    /// Title shown on boards: the stored title, else one generated from the details.
    #[must_use]
    pub fn display_title(&self, venue_name: Option<&str>, client_name: &str) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => generated_title(self.guest_count, venue_name, self.category, client_name),
        }
    }
}

/// `"PAX 20 — Venue — Social"`, or `"Event for <client>"` when nothing is known.
#[must_use]
pub fn generated_title(
    guest_count: Option<u32>,
    venue_name: Option<&str>,
    category: Option<EventCategory>,
    client_name: &str,
) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(count) = guest_count.filter(|c| *c > 0) {
        parts.push(format!("PAX {count}"));
    }
    if let Some(venue) = venue_name {
        parts.push(venue.to_string());
    }
    if let Some(category) = category {
        parts.push(category.label().to_string());
    }

    if parts.is_empty() {
        format!("Event for {client_name}")
    } else {
        parts.join(" — ")
    }
}

/// Partial update of an event's editable attributes.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::option_option)]
pub struct EventPatch {
    /// Venue
    pub venue_id: Option<Option<VenueId>>,
    /// Assigned salesperson
    pub salesperson_id: Option<Option<UserId>>,
    /// Title
    pub title: Option<Option<String>>,
    /// Event date
    pub event_date: Option<Option<NaiveDate>>,
    /// Start time
    pub start_time: Option<Option<NaiveTime>>,
    /// End time
    pub end_time: Option<Option<NaiveTime>>,
    /// Inquiry time
    pub inquiry_time: Option<Option<NaiveTime>>,
    /// Guest count
    pub guest_count: Option<Option<u32>>,
    /// Category
    pub category: Option<Option<EventCategory>>,
    /// Budget
    pub budget: Option<Option<Decimal>>,
    /// Budget date
    pub budget_date: Option<Option<NaiveDate>>,
    /// Channel slug
    pub channel: Option<Option<String>>,
    /// Original message
    pub original_message: Option<Option<String>>,
    /// Priority flag
    pub priority: Option<bool>,
    /// Tentative flag
    pub tentative: Option<bool>,
}

impl EventPatch {
    /// Whether the patch changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to `event`
    pub fn apply(self, event: &mut Event) {
        fn set<T>(slot: &mut T, update: Option<T>) {
            if let Some(value) = update {
                *slot = value;
            }
        }

        set(&mut event.venue_id, self.venue_id);
        set(&mut event.salesperson_id, self.salesperson_id);
        set(&mut event.title, self.title);
        set(&mut event.event_date, self.event_date);
        set(&mut event.start_time, self.start_time);
        set(&mut event.end_time, self.end_time);
        set(&mut event.inquiry_time, self.inquiry_time);
        set(&mut event.guest_count, self.guest_count);
        set(&mut event.category, self.category);
        set(&mut event.budget, self.budget);
        set(&mut event.budget_date, self.budget_date);
        set(&mut event.channel, self.channel);
        set(&mut event.original_message, self.original_message);
        set(&mut event.priority, self.priority);
        set(&mut event.tentative, self.tentative);
    }
}

/// Everything known about an inquiry when it is created.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Who asked
    pub client: ClientContact,
    /// Requested venue
    pub venue_id: Option<VenueId>,
    /// Salesperson assigned at creation
    pub salesperson_id: Option<UserId>,
    /// Explicit title; generated when absent
    pub title: Option<String>,
    /// Event date
    pub event_date: Option<NaiveDate>,
    /// Start time
    pub start_time: Option<NaiveTime>,
    /// End time
    pub end_time: Option<NaiveTime>,
    /// Inquiry time
    pub inquiry_time: Option<NaiveTime>,
    /// Guest count
    pub guest_count: Option<u32>,
    /// Category
    pub category: Option<EventCategory>,
    /// Budget
    pub budget: Option<Decimal>,
    /// Budget date
    pub budget_date: Option<NaiveDate>,
    /// Channel label as reported by the source; normalized on creation
    pub channel: Option<String>,
    /// Original message
    pub original_message: Option<String>,
    /// External conversation id
    pub thread_id: Option<String>,
}

// ============================================================================
// Ledger records
// ============================================================================

/// One append-only row of an event's state history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Identifier
    pub id: TransitionId,
    /// Event that moved
    pub event_id: EventId,
    /// Previous state, `None` for the creation row
    pub from_state: Option<EventState>,
    /// New state
    pub to_state: EventState,
    /// Acting user, `None` for automated transitions
    pub actor: Option<UserId>,
    /// What caused the move
    pub origin: TransitionOrigin,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Salesperson details frozen at the time of a breach
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalespersonSnapshot {
    /// Salesperson id
    pub id: UserId,
    /// Name at breach time
    pub name: String,
}

/// A recorded SLA breach, at most one per (event, state).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaViolation {
    /// Identifier
    pub id: ViolationId,
    /// Breaching event
    pub event_id: EventId,
    /// State in which the breach happened
    pub state: EventState,
    /// Owner at breach time, if any
    pub salesperson: Option<SalespersonSnapshot>,
    /// When the sweep noticed the breach
    pub breached_at: DateTime<Utc>,
    /// Seconds spent in the state at that point
    pub elapsed_secs: i64,
}
