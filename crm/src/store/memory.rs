//! In-memory [`CrmStore`] for tests and local runs.

use super::{CrmStore, EventChange, EventFilter, ViolationFilter};
use crate::error::{CrmError, Result};
use crate::precheck::{Additional, Concept, Payment, Precheck, ReviewState};
use crate::types::{
    AdditionalId, Client, ClientId, ConceptId, Event, EventId, PaymentId, SlaViolation,
    StateTransition, User, UserId, Venue, VenueId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, User>,
    venues: HashMap<VenueId, Venue>,
    clients: HashMap<ClientId, Client>,
    events: HashMap<EventId, Event>,
    transitions: Vec<StateTransition>,
    violations: Vec<SlaViolation>,
    concepts: Vec<Concept>,
    additionals: Vec<Additional>,
    payments: Vec<Payment>,
}

impl Inner {
    fn check_insert(&self, change: &EventChange) -> Result<()> {
        let event = &change.event;
        if self.events.contains_key(&event.id) {
            return Err(CrmError::Conflict(format!("event {} already exists", event.id)));
        }
        if let Some(thread) = &event.thread_id {
            if let Some(existing) = self
                .events
                .values()
                .find(|e| e.thread_id.as_ref() == Some(thread))
            {
                return Err(CrmError::Conflict(format!(
                    "thread {thread} already belongs to event {}",
                    existing.id
                )));
            }
        }
        Ok(())
    }

    fn check_update(&self, change: &EventChange, expected: i64) -> Result<()> {
        let event = &change.event;
        let stored = self
            .events
            .get(&event.id)
            .ok_or_else(|| CrmError::not_found("event", event.id))?;
        if stored.version != expected {
            return Err(CrmError::Conflict(format!(
                "event {} was modified concurrently (expected version {expected}, found {})",
                event.id, stored.version
            )));
        }
        if let Some(thread) = &event.thread_id {
            if self
                .events
                .values()
                .any(|e| e.id != event.id && e.thread_id.as_ref() == Some(thread))
            {
                return Err(CrmError::Conflict(format!("thread {thread} already in use")));
            }
        }
        Ok(())
    }
}

/// [`CrmStore`] backed by in-process maps.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCrmStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCrmStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn precheck_of(inner: &Inner, event_id: EventId) -> Precheck {
    Precheck {
        concepts: inner
            .concepts
            .iter()
            .filter(|c| c.event_id == event_id)
            .cloned()
            .collect(),
        additionals: inner
            .additionals
            .iter()
            .filter(|a| a.event_id == event_id)
            .cloned()
            .collect(),
        payments: inner
            .payments
            .iter()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect(),
    }
}

fn upsert<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> K) {
    let id = key(&item);
    match items.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

fn ensure_still_pending(stored: &Payment) -> Result<()> {
    if stored.review != ReviewState::Pending {
        return Err(CrmError::Conflict(format!(
            "payment {} was already {}",
            stored.id,
            stored.review.as_str()
        )));
    }
    Ok(())
}

fn remove<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> bool {
    let before = items.len();
    items.retain(|item| !matches(item));
    items.len() != before
}

#[async_trait]
impl CrmStore for InMemoryCrmStore {
    async fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.inner.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn venue(&self, id: VenueId) -> Result<Option<Venue>> {
        Ok(self.inner.read().await.venues.get(&id).cloned())
    }

    async fn list_venues(&self) -> Result<Vec<Venue>> {
        let mut venues: Vec<Venue> = self.inner.read().await.venues.values().cloned().collect();
        venues.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(venues)
    }

    async fn save_venue(&self, venue: &Venue) -> Result<()> {
        self.inner.write().await.venues.insert(venue.id, venue.clone());
        Ok(())
    }

    async fn client(&self, id: ClientId) -> Result<Option<Client>> {
        Ok(self.inner.read().await.clients.get(&id).cloned())
    }

    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>> {
        let inner = self.inner.read().await;
        Ok(inner.clients.values().find(|c| c.phone == phone).cloned())
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.inner.read().await.events.get(&id).cloned())
    }

    async fn find_event_by_thread(&self, thread_id: &str) -> Result<Option<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .values()
            .find(|e| e.thread_id.as_deref() == Some(thread_id))
            .cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        let mut events: Vec<Event> = inner
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        Ok(events)
    }

    async fn commit_event(&self, change: EventChange) -> Result<Event> {
        let mut inner = self.inner.write().await;

        match change.expected_version {
            None => inner.check_insert(&change)?,
            Some(expected) => inner.check_update(&change, expected)?,
        }
        if let Some(client) = &change.new_client {
            if inner.clients.values().any(|c| c.phone == client.phone) {
                return Err(CrmError::Conflict(format!(
                    "a client with phone {} already exists",
                    client.phone
                )));
            }
        }

        let mut event = change.event;
        event.version = change.expected_version.map_or(1, |v| v + 1);

        if let Some(client) = change.new_client {
            inner.clients.insert(client.id, client);
        }
        if let Some((client_id, salesperson)) = change.preferred_salesperson {
            if let Some(client) = inner.clients.get_mut(&client_id) {
                client.preferred_salesperson = Some(salesperson);
            }
        }
        if change.discard_precheck_items {
            inner.concepts.retain(|c| c.event_id != event.id);
            inner.additionals.retain(|a| a.event_id != event.id);
        }
        inner.transitions.extend(change.transitions);
        inner.events.insert(event.id, event.clone());

        Ok(event)
    }

    async fn transitions_for(&self, event_id: EventId) -> Result<Vec<StateTransition>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<StateTransition> = inner
            .transitions
            .iter()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.at);
        Ok(rows)
    }

    async fn transitions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StateTransition>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<StateTransition> = inner
            .transitions
            .iter()
            .filter(|t| t.at >= from && t.at <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.at);
        Ok(rows)
    }

    async fn record_violation(&self, violation: &SlaViolation) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .violations
            .iter()
            .any(|v| v.event_id == violation.event_id && v.state == violation.state);
        if exists {
            return Ok(false);
        }
        inner.violations.push(violation.clone());
        Ok(true)
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<SlaViolation>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<SlaViolation> = inner
            .violations
            .iter()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        rows.sort_by_key(|v| std::cmp::Reverse(v.breached_at));
        rows.truncate(filter.limit);
        Ok(rows)
    }

    async fn precheck(&self, event_id: EventId) -> Result<Precheck> {
        Ok(precheck_of(&*self.inner.read().await, event_id))
    }

    async fn prechecks_for(&self, event_ids: &[EventId]) -> Result<HashMap<EventId, Precheck>> {
        let inner = self.inner.read().await;
        Ok(event_ids
            .iter()
            .map(|id| (*id, precheck_of(&inner, *id)))
            .filter(|(_, p)| p.has_items() || !p.payments.is_empty())
            .collect())
    }

    async fn save_concept(&self, concept: &Concept) -> Result<()> {
        upsert(&mut self.inner.write().await.concepts, concept.clone(), |c| c.id);
        Ok(())
    }

    async fn delete_concept(&self, event_id: EventId, id: ConceptId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(remove(&mut inner.concepts, |c| c.event_id == event_id && c.id == id))
    }

    async fn save_additional(&self, additional: &Additional) -> Result<()> {
        upsert(
            &mut self.inner.write().await.additionals,
            additional.clone(),
            |a| a.id,
        );
        Ok(())
    }

    async fn delete_additional(&self, event_id: EventId, id: AdditionalId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(remove(&mut inner.additionals, |a| {
            a.event_id == event_id && a.id == id
        }))
    }

    async fn payment(&self, event_id: EventId, id: PaymentId) -> Result<Option<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payments
            .iter()
            .find(|p| p.event_id == event_id && p.id == id)
            .cloned())
    }

    async fn save_payment(&self, payment: &Payment) -> Result<()> {
        upsert(&mut self.inner.write().await.payments, payment.clone(), |p| p.id);
        Ok(())
    }

    async fn update_pending_payment(&self, payment: &Payment) -> Result<()> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .payments
            .iter_mut()
            .find(|p| p.event_id == payment.event_id && p.id == payment.id)
            .ok_or_else(|| CrmError::not_found("payment", payment.id))?;
        ensure_still_pending(stored)?;
        *stored = payment.clone();
        Ok(())
    }

    async fn delete_pending_payment(&self, event_id: EventId, id: PaymentId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(stored) = inner
            .payments
            .iter()
            .find(|p| p.event_id == event_id && p.id == id)
        else {
            return Ok(false);
        };
        ensure_still_pending(stored)?;
        Ok(remove(&mut inner.payments, |p| p.event_id == event_id && p.id == id))
    }

    async fn payments_in_review_state(&self, state: ReviewState) -> Result<Vec<Payment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payments
            .iter()
            .filter(|p| p.review == state)
            .cloned()
            .collect())
    }
}
