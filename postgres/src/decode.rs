//! Row decoding and the column lists that go with it.

use chrono::{DateTime, Utc};
use eventdesk_crm::error::{CrmError, Result};
use eventdesk_crm::precheck::{
    Additional, Concept, Payment, PaymentMethod, PrecheckCategory, Receipt, ReviewState,
};
use eventdesk_crm::types::{
    AdditionalId, Client, ClientId, ConceptId, Event, EventCategory, EventId, EventState,
    PaymentId, Role, SalespersonSnapshot, SlaViolation, SoftDeletion, StateTransition,
    TransitionId, TransitionOrigin, User, UserId, Venue, VenueId, ViolationId,
};
use sqlx::postgres::PgRow;
use sqlx::{Decode, Postgres, Row, Type};
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str = "id, name, email, role, active";

pub(crate) const VENUE_COLUMNS: &str = "id, name, colour, active";

pub(crate) const CLIENT_COLUMNS: &str = "id, phone, name, email, preferred_salesperson, created_at";

pub(crate) const EVENT_COLUMNS: &str = "id, client_id, venue_id, salesperson_id, title, \
     event_date, start_time, end_time, inquiry_time, guest_count, category, state, budget, \
     budget_date, channel, original_message, thread_id, invoiced, priority, tentative, \
     rejection_reason, deletion_reason, restore_state, created_at, updated_at, \
     state_changed_at, version";

pub(crate) const TRANSITION_COLUMNS: &str = "id, event_id, from_state, to_state, actor, origin, at";

pub(crate) const VIOLATION_COLUMNS: &str =
    "id, event_id, state, salesperson_id, salesperson_name, breached_at, elapsed_secs";

pub(crate) const CONCEPT_COLUMNS: &str = "id, event_id, category, category_other, description, \
     quantity, unit_price, created_at, updated_at";

pub(crate) const ADDITIONAL_COLUMNS: &str =
    "id, event_id, category, category_other, description, amount, created_at, updated_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, event_id, method, amount, payment_date, \
     deposit_date, clearing_date, receipt_key, receipt_filename, notes, review, \
     external_reference, reviewed_by, reviewed_at, rejection_reason, original_amount, \
     amount_change_note, created_at, updated_at";

/// Decode one column, reporting type mismatches as storage errors
fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| CrmError::Storage(format!("column {name}: {e}")))
}

/// Stored text that no longer parses means the row is corrupt, not the request invalid
fn corrupt(error: CrmError) -> CrmError {
    CrmError::Storage(format!("corrupt row: {error}"))
}

fn state(row: &PgRow, name: &str) -> Result<EventState> {
    let raw: String = col(row, name)?;
    EventState::parse(&raw).map_err(corrupt)
}

fn optional_state(row: &PgRow, name: &str) -> Result<Option<EventState>> {
    let raw: Option<String> = col(row, name)?;
    raw.map(|s| EventState::parse(&s).map_err(corrupt)).transpose()
}

fn optional_user(row: &PgRow, name: &str) -> Result<Option<UserId>> {
    let raw: Option<Uuid> = col(row, name)?;
    Ok(raw.map(UserId::from_uuid))
}

fn category(row: &PgRow) -> Result<PrecheckCategory> {
    let raw: String = col(row, "category")?;
    PrecheckCategory::parse(&raw).map_err(corrupt)
}

pub(crate) fn user(row: &PgRow) -> Result<User> {
    let role: String = col(row, "role")?;
    Ok(User {
        id: UserId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
        email: col(row, "email")?,
        role: Role::parse(&role).map_err(corrupt)?,
        active: col(row, "active")?,
    })
}

pub(crate) fn venue(row: &PgRow) -> Result<Venue> {
    Ok(Venue {
        id: VenueId::from_uuid(col(row, "id")?),
        name: col(row, "name")?,
        colour: col(row, "colour")?,
        active: col(row, "active")?,
    })
}

pub(crate) fn client(row: &PgRow) -> Result<Client> {
    Ok(Client {
        id: ClientId::from_uuid(col(row, "id")?),
        phone: col(row, "phone")?,
        name: col(row, "name")?,
        email: col(row, "email")?,
        preferred_salesperson: optional_user(row, "preferred_salesperson")?,
        created_at: col(row, "created_at")?,
    })
}

pub(crate) fn event(row: &PgRow) -> Result<Event> {
    let guest_count: Option<i64> = col(row, "guest_count")?;
    let guest_count = guest_count
        .map(u32::try_from)
        .transpose()
        .map_err(|e| CrmError::Storage(format!("guest_count out of range: {e}")))?;
    let category: Option<String> = col(row, "category")?;
    let deletion_reason: Option<String> = col(row, "deletion_reason")?;
    let restore_to = optional_state(row, "restore_state")?;
    let venue_id: Option<Uuid> = col(row, "venue_id")?;

    Ok(Event {
        id: EventId::from_uuid(col(row, "id")?),
        client_id: ClientId::from_uuid(col(row, "client_id")?),
        venue_id: venue_id.map(VenueId::from_uuid),
        salesperson_id: optional_user(row, "salesperson_id")?,
        title: col(row, "title")?,
        event_date: col(row, "event_date")?,
        start_time: col(row, "start_time")?,
        end_time: col(row, "end_time")?,
        inquiry_time: col(row, "inquiry_time")?,
        guest_count,
        category: category
            .map(|c| EventCategory::parse(&c).map_err(corrupt))
            .transpose()?,
        state: state(row, "state")?,
        budget: col(row, "budget")?,
        budget_date: col(row, "budget_date")?,
        channel: col(row, "channel")?,
        original_message: col(row, "original_message")?,
        thread_id: col(row, "thread_id")?,
        invoiced: col(row, "invoiced")?,
        priority: col(row, "priority")?,
        tentative: col(row, "tentative")?,
        rejection_reason: col(row, "rejection_reason")?,
        deletion: deletion_reason
            .zip(restore_to)
            .map(|(reason, restore_to)| SoftDeletion { reason, restore_to }),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
        state_changed_at: col(row, "state_changed_at")?,
        version: col(row, "version")?,
    })
}

pub(crate) fn transition(row: &PgRow) -> Result<StateTransition> {
    let origin: String = col(row, "origin")?;
    Ok(StateTransition {
        id: TransitionId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        from_state: optional_state(row, "from_state")?,
        to_state: state(row, "to_state")?,
        actor: optional_user(row, "actor")?,
        origin: TransitionOrigin::parse(&origin).map_err(corrupt)?,
        at: col(row, "at")?,
    })
}

pub(crate) fn violation(row: &PgRow) -> Result<SlaViolation> {
    let salesperson_id = optional_user(row, "salesperson_id")?;
    let salesperson_name: Option<String> = col(row, "salesperson_name")?;
    Ok(SlaViolation {
        id: ViolationId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        state: state(row, "state")?,
        salesperson: salesperson_id.map(|id| SalespersonSnapshot {
            id,
            name: salesperson_name.unwrap_or_else(|| format!("ID {id}")),
        }),
        breached_at: col(row, "breached_at")?,
        elapsed_secs: col(row, "elapsed_secs")?,
    })
}

pub(crate) fn concept(row: &PgRow) -> Result<Concept> {
    Ok(Concept {
        id: ConceptId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        category: category(row)?,
        category_other: col(row, "category_other")?,
        description: col(row, "description")?,
        quantity: col(row, "quantity")?,
        unit_price: col(row, "unit_price")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(crate) fn additional(row: &PgRow) -> Result<Additional> {
    Ok(Additional {
        id: AdditionalId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        category: category(row)?,
        category_other: col(row, "category_other")?,
        description: col(row, "description")?,
        amount: col(row, "amount")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<Payment> {
    let method: String = col(row, "method")?;
    let review: String = col(row, "review")?;
    let receipt_key: Option<String> = col(row, "receipt_key")?;
    let receipt_filename: Option<String> = col(row, "receipt_filename")?;
    let reviewed_at: Option<DateTime<Utc>> = col(row, "reviewed_at")?;

    Ok(Payment {
        id: PaymentId::from_uuid(col(row, "id")?),
        event_id: EventId::from_uuid(col(row, "event_id")?),
        method: PaymentMethod::parse(&method).map_err(corrupt)?,
        amount: col(row, "amount")?,
        payment_date: col(row, "payment_date")?,
        deposit_date: col(row, "deposit_date")?,
        clearing_date: col(row, "clearing_date")?,
        receipt: receipt_key.map(|key| Receipt {
            filename: receipt_filename.unwrap_or_else(|| key.clone()),
            key,
        }),
        notes: col(row, "notes")?,
        review: ReviewState::parse(&review).map_err(corrupt)?,
        external_reference: col(row, "external_reference")?,
        reviewed_by: optional_user(row, "reviewed_by")?,
        reviewed_at,
        rejection_reason: col(row, "rejection_reason")?,
        original_amount: col(row, "original_amount")?,
        amount_change_note: col(row, "amount_change_note")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_rows_surface_as_storage_errors() {
        let error = corrupt(CrmError::validation("state", "unknown state CONFIRMED"));
        assert!(matches!(error, CrmError::Storage(message) if message.contains("CONFIRMED")));
    }

    #[test]
    fn column_lists_match_the_event_row() {
        assert_eq!(EVENT_COLUMNS.split(',').count(), 27);
        assert_eq!(PAYMENT_COLUMNS.split(',').count(), 19);
    }
}
