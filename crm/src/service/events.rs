//! Event creation, edits, assignment and listings.

use super::{PipelineService, can_view, denied, ensure_admin};
use crate::aggregates::{EventAction, StateRequest};
use crate::error::{CrmError, Result};
use crate::integrations::normalize_channel;
use crate::ledger::{TransitionHistory, history};
use crate::precheck::ensure_items_editable;
use crate::sla::SlaStatus;
use crate::store::EventFilter;
use crate::types::{
    Actor, Client, ClientId, Event, EventDraft, EventId, EventPatch, EventState, Role,
    TransitionOrigin, User, UserId, Venue, VenueId, generated_title,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Result of creating an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedEvent {
    /// The stored event
    pub event: Event,
    /// Its client, found or created
    pub client: Client,
    /// Whether the client was created by this call
    pub new_client: bool,
    /// Preferred salesperson of a recurring client, offered when nobody was assigned
    pub suggested_salesperson: Option<UserId>,
}

/// An event with the details shown on its page
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventView {
    /// Event
    pub event: Event,
    /// Display title
    pub title: String,
    /// Client
    pub client: Option<Client>,
    /// Venue
    pub venue: Option<Venue>,
    /// Owner
    pub salesperson: Option<User>,
    /// SLA status of the current state, if it has one
    pub sla_status: Option<SlaStatus>,
}

/// One card of the pipeline board
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardCard {
    /// Event
    pub event: Event,
    /// Display title
    pub title: String,
}

/// One column of the pipeline board
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BoardColumn {
    /// State of the column
    pub state: EventState,
    /// Cards in the column
    pub count: usize,
    /// Sum of the cards' budgets
    pub budget_total: Decimal,
    /// Cards, newest first
    pub cards: Vec<BoardCard>,
}

/// Events grouped by state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Board {
    /// One column per live state, in funnel order
    pub columns: Vec<BoardColumn>,
}

impl Board {
    /// Column of `state`
    #[must_use]
    pub fn column(&self, state: EventState) -> Option<&BoardColumn> {
        self.columns.iter().find(|c| c.state == state)
    }
}

/// A dated event shown on the calendar
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    /// Event
    pub event: Event,
    /// Display title
    pub title: String,
    /// Venue colour
    pub colour: Option<String>,
}

/// States shown on the calendar
pub const CALENDAR_STATES: [EventState; 3] =
    [EventState::Quoted, EventState::Approved, EventState::Concluded];

impl PipelineService {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create an event on behalf of a user.
    ///
    /// Salespeople may only assign new events to themselves.
    ///
    /// # Errors
    ///
    /// - [`CrmError::Validation`] for a missing phone or a schedule/budget without owner
    /// - [`CrmError::Conflict`] when the thread id is already on file
    /// - [`CrmError::NotFound`] for unknown venues or salespeople
    /// - [`CrmError::Permission`] when a salesperson assigns someone else
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn create_event(&self, actor: &Actor, draft: EventDraft) -> Result<CreatedEvent> {
        if let Some(owner) = draft.salesperson_id {
            if !actor.is_admin() && owner != actor.user_id {
                return Err(CrmError::Permission(
                    "salespeople can only assign themselves".to_string(),
                ));
            }
        }
        self.create(draft, Some(actor.user_id), |actor| EventAction::Open {
            actor,
            origin: TransitionOrigin::Manual,
        })
        .await
    }

    /// Create an event reported by the inbound integration.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_event`], minus permissions.
    #[tracing::instrument(skip(self, draft), fields(thread_id = ?draft.thread_id))]
    pub async fn ingest_event(&self, draft: EventDraft) -> Result<CreatedEvent> {
        self.create(draft, None, |actor| EventAction::Open {
            actor,
            origin: TransitionOrigin::AutomatedIntegration,
        })
        .await
    }

    /// Import a historical event in an explicit state (default `ASSIGNED`).
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] for non-admins, otherwise as [`Self::create_event`].
    #[tracing::instrument(skip(self, draft), fields(actor = %actor.user_id))]
    pub async fn import_event(
        &self,
        actor: &Actor,
        draft: EventDraft,
        state: Option<EventState>,
    ) -> Result<CreatedEvent> {
        ensure_admin(actor)?;
        let state = state.unwrap_or(EventState::Assigned);
        self.create(draft, Some(actor.user_id), move |actor| EventAction::Import {
            actor,
            state,
        })
        .await
    }

    async fn create(
        &self,
        draft: EventDraft,
        actor: Option<UserId>,
        action: impl FnOnce(Option<UserId>) -> EventAction + Send,
    ) -> Result<CreatedEvent> {
        let thread_id = draft
            .thread_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if let Some(thread) = &thread_id {
            if let Some(existing) = self.store.find_event_by_thread(thread).await? {
                tracing::info!(thread_id = %thread, event_id = %existing.id, "Duplicate inbound thread");
                return Err(CrmError::Conflict(format!(
                    "thread {thread} already belongs to event {}",
                    existing.id
                )));
            }
        }

        let phone = draft.client.phone.trim();
        if phone.is_empty() {
            return Err(CrmError::validation("phone", "a client phone is required"));
        }

        let venue = match draft.venue_id {
            Some(id) => Some(self.existing_venue(id).await?),
            None => None,
        };
        if let Some(owner) = draft.salesperson_id {
            self.active_user(owner).await?;
        }

        let now = self.clock.now();
        let (client, new_client) = match self.store.find_client_by_phone(phone).await? {
            Some(client) => (client, false),
            None => {
                let name = draft.client.name.trim();
                let client = Client {
                    id: ClientId::new(),
                    phone: phone.to_string(),
                    name: (if name.is_empty() { phone } else { name }).to_string(),
                    email: draft
                        .client
                        .email
                        .as_deref()
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(str::to_string),
                    preferred_salesperson: None,
                    created_at: now,
                };
                (client, true)
            }
        };

        let mut event = Event::new(EventId::new(), client.id, now);
        event.venue_id = draft.venue_id;
        event.salesperson_id = draft.salesperson_id;
        event.event_date = draft.event_date;
        event.start_time = draft.start_time;
        event.end_time = draft.end_time;
        event.inquiry_time = draft.inquiry_time;
        event.guest_count = draft.guest_count;
        event.category = draft.category;
        event.budget = draft.budget;
        event.budget_date = draft.budget_date;
        event.channel = Some(normalize_channel(draft.channel.as_deref()));
        event.original_message = draft.original_message;
        event.thread_id = thread_id;
        event.title = Some(
            draft
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| {
                    generated_title(
                        event.guest_count,
                        venue.as_ref().map(|v| v.name.as_str()),
                        event.category,
                        &client.name,
                    )
                }),
        );

        let suggested_salesperson = if event.salesperson_id.is_none() {
            client.preferred_salesperson
        } else {
            None
        };

        let stored = self
            .apply(event, action(actor), None, new_client.then(|| client.clone()))
            .await?;
        tracing::info!(
            event_id = %stored.id,
            client_id = %client.id,
            state = %stored.state,
            new_client,
            "Event created"
        );

        Ok(CreatedEvent {
            event: stored,
            client,
            new_client,
            suggested_salesperson,
        })
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Edit an event, optionally with an explicit state request.
    ///
    /// # Errors
    ///
    /// - [`CrmError::Permission`] unless the actor administers or owns the event, or
    ///   when a salesperson hands the event to someone else
    /// - [`CrmError::Validation`] / [`CrmError::Conflict`] from the lifecycle rules
    /// - [`CrmError::Conflict`] when the event changed concurrently
    #[tracing::instrument(skip(self, patch), fields(actor = %actor.user_id))]
    pub async fn update_event(
        &self,
        actor: &Actor,
        id: EventId,
        patch: EventPatch,
        request: Option<StateRequest>,
    ) -> Result<Event> {
        let event = self.editable_event(actor, id).await?;

        if let Some(Some(owner)) = patch.salesperson_id {
            if !actor.is_admin() && owner != actor.user_id {
                return Err(CrmError::Permission(
                    "salespeople can only assign themselves".to_string(),
                ));
            }
            self.active_user(owner).await?;
        }
        if let Some(Some(venue)) = patch.venue_id {
            self.existing_venue(venue).await?;
        }

        let version = event.version;
        self.apply(
            event,
            EventAction::Update {
                patch,
                request,
                actor: Some(actor.user_id),
                origin: TransitionOrigin::Manual,
            },
            Some(version),
            None,
        )
        .await
    }

    /// Hand an event to a salesperson.
    ///
    /// Admins assign anyone; salespeople may only take unassigned events for themselves.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`], [`CrmError::NotFound`] for unknown users, and the
    /// lifecycle errors of [`Self::update_event`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn assign_salesperson(
        &self,
        actor: &Actor,
        id: EventId,
        salesperson: UserId,
    ) -> Result<Event> {
        let event = self.load_event(id).await?;
        let allowed = actor.is_admin()
            || (actor.role == Role::Salesperson
                && salesperson == actor.user_id
                && event.salesperson_id.is_none_or(|owner| owner == actor.user_id));
        if !allowed {
            return Err(denied());
        }
        self.active_user(salesperson).await?;

        let version = event.version;
        self.apply(
            event,
            EventAction::AssignSalesperson {
                salesperson,
                actor: Some(actor.user_id),
                origin: TransitionOrigin::Manual,
            },
            Some(version),
            None,
        )
        .await
    }

    /// Assign the event of `thread_id` to the user replying from `email`.
    ///
    /// Returns `None` when the event already has an owner.
    ///
    /// # Errors
    ///
    /// [`CrmError::NotFound`] for unknown threads or users.
    #[tracing::instrument(skip(self))]
    pub async fn assign_by_reply(&self, thread_id: &str, email: &str) -> Result<Option<Event>> {
        let event = self
            .store
            .find_event_by_thread(thread_id)
            .await?
            .ok_or_else(|| CrmError::not_found("thread", thread_id))?;
        let user = self
            .store
            .find_user_by_email(email)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| CrmError::not_found("user", email))?;

        if event.salesperson_id.is_some() {
            tracing::debug!(event_id = %event.id, "Event already assigned, reply ignored");
            return Ok(None);
        }

        let version = event.version;
        let stored = self
            .apply(
                event,
                EventAction::AssignSalesperson {
                    salesperson: user.id,
                    actor: None,
                    origin: TransitionOrigin::AutomatedIntegration,
                },
                Some(version),
                None,
            )
            .await?;
        Ok(Some(stored))
    }

    /// Toggle VAT on the pre-check.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] / [`CrmError::Conflict`] when the pre-check may not be
    /// edited.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn set_invoiced(&self, actor: &Actor, id: EventId, invoiced: bool) -> Result<Event> {
        let event = self.load_event(id).await?;
        ensure_items_editable(
            actor,
            &event,
            self.today(),
            self.config.pipeline.precheck_grace_days,
        )?;

        let version = event.version;
        self.apply(event, EventAction::SetInvoiced { invoiced }, Some(version), None)
            .await
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// An event with its client, venue, owner and SLA status.
    ///
    /// # Errors
    ///
    /// [`CrmError::NotFound`] or [`CrmError::Permission`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_event(&self, actor: &Actor, id: EventId) -> Result<EventView> {
        let event = self.visible_event(actor, id).await?;
        let client = self.store.client(event.client_id).await?;
        let venue = match event.venue_id {
            Some(venue) => self.store.venue(venue).await?,
            None => None,
        };
        let salesperson = match event.salesperson_id {
            Some(user) => self.store.user(user).await?,
            None => None,
        };

        let title = event.display_title(
            venue.as_ref().map(|v| v.name.as_str()),
            client.as_ref().map_or("", |c| c.name.as_str()),
        );
        let sla_status = self
            .sla
            .evaluate(&event, self.clock.now())
            .map(|reading| reading.status);

        Ok(EventView {
            event,
            title,
            client,
            venue,
            salesperson,
            sla_status,
        })
    }

    /// Ledger of an event with residence durations.
    ///
    /// # Errors
    ///
    /// [`CrmError::NotFound`] or [`CrmError::Permission`].
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_transition_history(&self, actor: &Actor, id: EventId) -> Result<TransitionHistory> {
        let event = self.visible_event(actor, id).await?;
        let rows = self.store.transitions_for(event.id).await?;
        Ok(history(rows, self.clock.now()))
    }

    /// Visible events grouped by state, for the pipeline board.
    ///
    /// Deleted events are left out.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] on store failures.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn list_events_by_state(&self, actor: &Actor, venue_id: Option<VenueId>) -> Result<Board> {
        let filter = EventFilter {
            venue_id,
            ..EventFilter::default()
        };
        let events: Vec<Event> = self
            .store
            .list_events(&filter)
            .await?
            .into_iter()
            .filter(|e| e.state != EventState::Deleted && can_view(actor, e))
            .collect();
        let titles = self.titles_for(&events).await?;

        let mut columns: Vec<BoardColumn> = EventState::ALL
            .into_iter()
            .filter(|s| *s != EventState::Deleted)
            .map(|state| BoardColumn {
                state,
                count: 0,
                budget_total: Decimal::ZERO,
                cards: Vec::new(),
            })
            .collect();

        for event in events {
            let Some(column) = columns.iter_mut().find(|c| c.state == event.state) else {
                continue;
            };
            column.count += 1;
            column.budget_total += event.budget.unwrap_or(Decimal::ZERO);
            column.cards.push(BoardCard {
                title: titles.get(&event.id).cloned().unwrap_or_default(),
                event,
            });
        }

        Ok(Board { columns })
    }

    /// Soft-deleted events the actor may see, most recently changed first.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] on store failures.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn list_deleted_events(&self, actor: &Actor) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .store
            .list_events(&EventFilter::in_states(&[EventState::Deleted]))
            .await?
            .into_iter()
            .filter(|e| can_view(actor, e))
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.updated_at));
        Ok(events)
    }

    /// Dated quoted, approved and concluded events, for venue availability.
    ///
    /// Every role sees the whole calendar.
    ///
    /// # Errors
    ///
    /// [`CrmError::Validation`] when `from` is after `to`.
    #[tracing::instrument(skip(self))]
    pub async fn list_calendar(
        &self,
        venue_id: Option<VenueId>,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CalendarEntry>> {
        let range = match (from, to) {
            (Some(from), Some(to)) if from > to => {
                return Err(CrmError::validation("from", "range starts after it ends"));
            }
            (None, None) => None,
            (from, to) => Some((from.unwrap_or(NaiveDate::MIN), to.unwrap_or(NaiveDate::MAX))),
        };
        let filter = EventFilter {
            states: CALENDAR_STATES.to_vec(),
            venue_id,
            event_date_between: range,
        };
        let mut events: Vec<Event> = self
            .store
            .list_events(&filter)
            .await?
            .into_iter()
            .filter(|e| e.event_date.is_some())
            .collect();
        events.sort_by_key(|e| (e.event_date, e.start_time));

        let titles = self.titles_for(&events).await?;
        let colours: HashMap<VenueId, String> = self
            .store
            .list_venues()
            .await?
            .into_iter()
            .map(|v| (v.id, v.colour))
            .collect();

        Ok(events
            .into_iter()
            .map(|event| CalendarEntry {
                title: titles.get(&event.id).cloned().unwrap_or_default(),
                colour: event.venue_id.and_then(|v| colours.get(&v).cloned()),
                event,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Display titles of many events, loading each client once
    pub(super) async fn titles_for(&self, events: &[Event]) -> Result<HashMap<EventId, String>> {
        let venues: HashMap<VenueId, String> = self
            .store
            .list_venues()
            .await?
            .into_iter()
            .map(|v| (v.id, v.name))
            .collect();
        let clients = self.client_names(events.iter().map(|e| e.client_id)).await?;

        Ok(events
            .iter()
            .map(|event| {
                let venue = event.venue_id.and_then(|v| venues.get(&v)).map(String::as_str);
                let client = clients.get(&event.client_id).map_or("", String::as_str);
                (event.id, event.display_title(venue, client))
            })
            .collect())
    }

    pub(super) async fn client_names(
        &self,
        ids: impl Iterator<Item = ClientId> + Send,
    ) -> Result<HashMap<ClientId, String>> {
        let mut names = HashMap::new();
        for id in ids {
            if names.contains_key(&id) {
                continue;
            }
            if let Some(client) = self.store.client(id).await? {
                names.insert(id, client.name);
            }
        }
        Ok(names)
    }

    async fn existing_venue(&self, id: VenueId) -> Result<Venue> {
        self.store
            .venue(id)
            .await?
            .ok_or_else(|| CrmError::not_found("venue", id))
    }

    async fn active_user(&self, id: UserId) -> Result<User> {
        let user = self
            .store
            .user(id)
            .await?
            .ok_or_else(|| CrmError::not_found("user", id))?;
        if !user.active {
            return Err(CrmError::validation(
                "salesperson_id",
                format!("user {} is inactive", user.name),
            ));
        }
        Ok(user)
    }
}
