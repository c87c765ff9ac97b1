//! `PostgreSQL` persistence for the EventDesk pipeline.
//!
//! [`PostgresCrmStore`] implements [`CrmStore`] on top of a sqlx connection pool:
//!
//! - Event changes commit in one transaction together with their ledger rows
//! - Optimistic concurrency through the `version` column
//! - SLA violations are unique per (event, state), enforced by the schema
//! - Schema migrations embedded from `migrations/`
//!
//! # Example
//!
//! ```no_run
//! use eventdesk_crm::Config;
//! use eventdesk_postgres::PostgresCrmStore;
//!
//! # async fn example() -> eventdesk_crm::Result<()> {
//! let config = Config::from_env();
//! let store = PostgresCrmStore::connect(&config.database).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod decode;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventdesk_crm::config::DatabaseConfig;
use eventdesk_crm::error::{CrmError, Result};
use eventdesk_crm::precheck::{Additional, Concept, Payment, Precheck, ReviewState};
use eventdesk_crm::store::{CrmStore, EventChange, EventFilter, ViolationFilter};
use eventdesk_crm::types::{
    AdditionalId, Client, ClientId, ConceptId, Event, EventId, PaymentId, SlaViolation,
    StateTransition, User, UserId, Venue, VenueId,
};
use decode::{
    ADDITIONAL_COLUMNS, CLIENT_COLUMNS, CONCEPT_COLUMNS, EVENT_COLUMNS, PAYMENT_COLUMNS,
    TRANSITION_COLUMNS, USER_COLUMNS, VENUE_COLUMNS, VIOLATION_COLUMNS,
};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

const INSERT_EVENT: &str = r"
    INSERT INTO events (
        id, client_id, venue_id, salesperson_id, title, event_date, start_time, end_time,
        inquiry_time, guest_count, category, state, budget, budget_date, channel,
        original_message, thread_id, invoiced, priority, tentative, rejection_reason,
        deletion_reason, restore_state, created_at, updated_at, state_changed_at, version
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
        $19, $20, $21, $22, $23, $24, $25, $26, $27
    )
";

const UPDATE_EVENT: &str = r"
    UPDATE events SET
        client_id = $2, venue_id = $3, salesperson_id = $4, title = $5, event_date = $6,
        start_time = $7, end_time = $8, inquiry_time = $9, guest_count = $10,
        category = $11, state = $12, budget = $13, budget_date = $14, channel = $15,
        original_message = $16, thread_id = $17, invoiced = $18, priority = $19,
        tentative = $20, rejection_reason = $21, deletion_reason = $22,
        restore_state = $23, created_at = $24, updated_at = $25, state_changed_at = $26,
        version = $27
    WHERE id = $1 AND version = $28
";

/// Map a sqlx failure onto the pipeline error taxonomy.
///
/// Unique violations become [`CrmError::Conflict`]; everything else is
/// [`CrmError::Storage`].
fn db_error(error: sqlx::Error) -> CrmError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some("idx_events_thread") => "thread already belongs to another event".to_string(),
                Some("clients_phone_key") => "a client with this phone already exists".to_string(),
                Some("events_pkey") => "event already exists".to_string(),
                _ => db.message().to_string(),
            };
            return CrmError::Conflict(message);
        }
    }
    CrmError::Storage(error.to_string())
}

/// Bind `$1..=$26` of [`INSERT_EVENT`] / [`UPDATE_EVENT`]
fn bind_event<'q>(query: PgQuery<'q>, event: &'q Event) -> PgQuery<'q> {
    query
        .bind(*event.id.as_uuid())
        .bind(*event.client_id.as_uuid())
        .bind(event.venue_id.map(|v| *v.as_uuid()))
        .bind(event.salesperson_id.map(|u| *u.as_uuid()))
        .bind(event.title.as_deref())
        .bind(event.event_date)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.inquiry_time)
        .bind(event.guest_count.map(i64::from))
        .bind(event.category.map(|c| c.as_str()))
        .bind(event.state.as_str())
        .bind(event.budget)
        .bind(event.budget_date)
        .bind(event.channel.as_deref())
        .bind(event.original_message.as_deref())
        .bind(event.thread_id.as_deref())
        .bind(event.invoiced)
        .bind(event.priority)
        .bind(event.tentative)
        .bind(event.rejection_reason.as_deref())
        .bind(event.deletion.as_ref().map(|d| d.reason.as_str()))
        .bind(event.deletion.as_ref().map(|d| d.restore_to.as_str()))
        .bind(event.created_at)
        .bind(event.updated_at)
        .bind(event.state_changed_at)
}

const UPSERT_PAYMENT: &str = r"
    INSERT INTO precheck_payments (
        id, event_id, method, amount, payment_date, deposit_date, clearing_date,
        receipt_key, receipt_filename, notes, review, external_reference, reviewed_by,
        reviewed_at, rejection_reason, original_amount, amount_change_note, created_at,
        updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
    ON CONFLICT (id) DO UPDATE SET
        method = EXCLUDED.method, amount = EXCLUDED.amount,
        payment_date = EXCLUDED.payment_date, deposit_date = EXCLUDED.deposit_date,
        clearing_date = EXCLUDED.clearing_date, receipt_key = EXCLUDED.receipt_key,
        receipt_filename = EXCLUDED.receipt_filename, notes = EXCLUDED.notes,
        review = EXCLUDED.review, external_reference = EXCLUDED.external_reference,
        reviewed_by = EXCLUDED.reviewed_by, reviewed_at = EXCLUDED.reviewed_at,
        rejection_reason = EXCLUDED.rejection_reason,
        original_amount = EXCLUDED.original_amount,
        amount_change_note = EXCLUDED.amount_change_note,
        updated_at = EXCLUDED.updated_at
";

/// Only matches a row still awaiting review
const UPDATE_PENDING_PAYMENT: &str = r"
    UPDATE precheck_payments SET
        method = $3, amount = $4, payment_date = $5, deposit_date = $6, clearing_date = $7,
        receipt_key = $8, receipt_filename = $9, notes = $10, review = $11,
        external_reference = $12, reviewed_by = $13, reviewed_at = $14,
        rejection_reason = $15, original_amount = $16, amount_change_note = $17,
        created_at = $18, updated_at = $19
    WHERE id = $1 AND event_id = $2 AND review = 'pending'
";

/// Bind `$1..=$19` of [`UPSERT_PAYMENT`] / [`UPDATE_PENDING_PAYMENT`]
fn bind_payment<'q>(query: PgQuery<'q>, payment: &'q Payment) -> PgQuery<'q> {
    query
        .bind(*payment.id.as_uuid())
        .bind(*payment.event_id.as_uuid())
        .bind(payment.method.as_str())
        .bind(payment.amount)
        .bind(payment.payment_date)
        .bind(payment.deposit_date)
        .bind(payment.clearing_date)
        .bind(payment.receipt.as_ref().map(|r| r.key.as_str()))
        .bind(payment.receipt.as_ref().map(|r| r.filename.as_str()))
        .bind(payment.notes.as_deref())
        .bind(payment.review.as_str())
        .bind(payment.external_reference.as_deref())
        .bind(payment.reviewed_by.map(|u| *u.as_uuid()))
        .bind(payment.reviewed_at)
        .bind(payment.rejection_reason.as_deref())
        .bind(payment.original_amount)
        .bind(payment.amount_change_note.as_deref())
        .bind(payment.created_at)
        .bind(payment.updated_at)
}

fn already_reviewed(id: PaymentId, review: &str) -> CrmError {
    metrics::counter!("eventdesk.store.payment_review_conflicts").increment(1);
    CrmError::Conflict(format!("payment {id} was already {review}"))
}

/// [`CrmStore`] backed by a `PostgreSQL` connection pool.
///
/// Clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresCrmStore {
    pool: PgPool,
}

impl PostgresCrmStore {
    /// Open a pool sized from `config`.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] when the database cannot be reached.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(db_error)?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] when a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CrmError::Storage(format!("migration failed: {e}")))?;
        tracing::info!("Database schema up to date");
        Ok(())
    }

    async fn review_state(&self, event_id: EventId, id: PaymentId) -> Result<Option<String>> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT review FROM precheck_payments WHERE event_id = $1 AND id = $2")
                .bind(*event_id.as_uuid())
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(found.map(|(review,)| review))
    }
}

#[async_trait]
impl CrmStore for PostgresCrmStore {
    // ------------------------------------------------------------------
    // Reference data
    // ------------------------------------------------------------------

    async fn user(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::user)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .as_ref()
        .map(decode::user)
        .transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(decode::user).collect()
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, name, email, role, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, email = EXCLUDED.email,
                role = EXCLUDED.role, active = EXCLUDED.active
            ",
        )
        .bind(*user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(user.active)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn venue(&self, id: VenueId) -> Result<Option<Venue>> {
        sqlx::query(&format!("SELECT {VENUE_COLUMNS} FROM venues WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::venue)
            .transpose()
    }

    async fn list_venues(&self) -> Result<Vec<Venue>> {
        let rows = sqlx::query(&format!("SELECT {VENUE_COLUMNS} FROM venues ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(decode::venue).collect()
    }

    async fn save_venue(&self, venue: &Venue) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO venues (id, name, colour, active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, colour = EXCLUDED.colour, active = EXCLUDED.active
            ",
        )
        .bind(*venue.id.as_uuid())
        .bind(&venue.name)
        .bind(&venue.colour)
        .bind(venue.active)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn client(&self, id: ClientId) -> Result<Option<Client>> {
        sqlx::query(&format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::client)
            .transpose()
    }

    async fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>> {
        sqlx::query(&format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE phone = $1"))
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::client)
            .transpose()
    }

    // ------------------------------------------------------------------
    // Events and ledger
    // ------------------------------------------------------------------

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::event)
            .transpose()
    }

    async fn find_event_by_thread(&self, thread_id: &str) -> Result<Option<Event>> {
        sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE thread_id = $1"))
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(decode::event)
            .transpose()
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut query =
            QueryBuilder::<Postgres>::new(format!("SELECT {EVENT_COLUMNS} FROM events WHERE TRUE"));
        if !filter.states.is_empty() {
            let states: Vec<String> = filter.states.iter().map(ToString::to_string).collect();
            query.push(" AND state = ANY(").push_bind(states).push(")");
        }
        if let Some(venue) = filter.venue_id {
            query.push(" AND venue_id = ").push_bind(*venue.as_uuid());
        }
        if let Some((from, to)) = filter.event_date_between {
            query
                .push(" AND event_date BETWEEN ")
                .push_bind(from)
                .push(" AND ")
                .push_bind(to);
        }
        query.push(" ORDER BY created_at DESC");

        let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(decode::event).collect()
    }

    #[tracing::instrument(skip(self, change), fields(event_id = %change.event.id))]
    async fn commit_event(&self, change: EventChange) -> Result<Event> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if let Some(client) = &change.new_client {
            sqlx::query(
                r"
                INSERT INTO clients (id, phone, name, email, preferred_salesperson, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(*client.id.as_uuid())
            .bind(&client.phone)
            .bind(&client.name)
            .bind(client.email.as_deref())
            .bind(client.preferred_salesperson.map(|u| *u.as_uuid()))
            .bind(client.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        let mut event = change.event;
        let version = change.expected_version.map_or(1, |v| v + 1);
        match change.expected_version {
            None => {
                bind_event(sqlx::query(INSERT_EVENT), &event)
                    .bind(version)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
            }
            Some(expected) => {
                let updated = bind_event(sqlx::query(UPDATE_EVENT), &event)
                    .bind(version)
                    .bind(expected)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
                if updated.rows_affected() == 0 {
                    let found: Option<(i64,)> =
                        sqlx::query_as("SELECT version FROM events WHERE id = $1")
                            .bind(*event.id.as_uuid())
                            .fetch_optional(&mut *tx)
                            .await
                            .map_err(db_error)?;
                    return Err(match found {
                        None => CrmError::not_found("event", event.id),
                        Some((current,)) => {
                            metrics::counter!("eventdesk.store.version_conflicts").increment(1);
                            CrmError::Conflict(format!(
                                "event {} was modified concurrently (expected version {expected}, found {current})",
                                event.id
                            ))
                        }
                    });
                }
            }
        }

        if let Some((client_id, salesperson)) = change.preferred_salesperson {
            sqlx::query("UPDATE clients SET preferred_salesperson = $2 WHERE id = $1")
                .bind(*client_id.as_uuid())
                .bind(*salesperson.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        if change.discard_precheck_items {
            for table in ["precheck_concepts", "precheck_additionals"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE event_id = $1"))
                    .bind(*event.id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_error)?;
            }
        }

        for row in &change.transitions {
            sqlx::query(&format!(
                "INSERT INTO state_transitions ({TRANSITION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
            ))
            .bind(*row.id.as_uuid())
            .bind(*row.event_id.as_uuid())
            .bind(row.from_state.map(|s| s.as_str()))
            .bind(row.to_state.as_str())
            .bind(row.actor.map(|u| *u.as_uuid()))
            .bind(row.origin.as_str())
            .bind(row.at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        event.version = version;
        tracing::debug!(
            version,
            transitions = change.transitions.len(),
            "Event change committed"
        );
        Ok(event)
    }

    async fn transitions_for(&self, event_id: EventId) -> Result<Vec<StateTransition>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM state_transitions WHERE event_id = $1 ORDER BY at"
        ))
        .bind(*event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(decode::transition).collect()
    }

    async fn transitions_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StateTransition>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM state_transitions WHERE at BETWEEN $1 AND $2 ORDER BY at"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(decode::transition).collect()
    }

    // ------------------------------------------------------------------
    // SLA violations
    // ------------------------------------------------------------------

    async fn record_violation(&self, violation: &SlaViolation) -> Result<bool> {
        let inserted = sqlx::query(&format!(
            r"
            INSERT INTO sla_violations ({VIOLATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, state) DO NOTHING
            "
        ))
        .bind(*violation.id.as_uuid())
        .bind(*violation.event_id.as_uuid())
        .bind(violation.state.as_str())
        .bind(violation.salesperson.as_ref().map(|s| *s.id.as_uuid()))
        .bind(violation.salesperson.as_ref().map(|s| s.name.as_str()))
        .bind(violation.breached_at)
        .bind(violation.elapsed_secs)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn list_violations(&self, filter: &ViolationFilter) -> Result<Vec<SlaViolation>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {VIOLATION_COLUMNS} FROM sla_violations WHERE TRUE"
        ));
        if let Some(from) = filter.from {
            query.push(" AND breached_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND breached_at <= ").push_bind(to);
        }
        if let Some(salesperson) = filter.salesperson {
            query
                .push(" AND salesperson_id = ")
                .push_bind(*salesperson.as_uuid());
        }
        query
            .push(" ORDER BY breached_at DESC LIMIT ")
            .push_bind(i64::try_from(filter.limit).unwrap_or(i64::MAX));

        let rows = query.build().fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(decode::violation).collect()
    }

    // ------------------------------------------------------------------
    // Pre-checks
    // ------------------------------------------------------------------

    async fn precheck(&self, event_id: EventId) -> Result<Precheck> {
        Ok(self
            .prechecks_for(&[event_id])
            .await?
            .remove(&event_id)
            .unwrap_or_default())
    }

    async fn prechecks_for(&self, event_ids: &[EventId]) -> Result<HashMap<EventId, Precheck>> {
        let ids: Vec<Uuid> = event_ids.iter().map(|id| *id.as_uuid()).collect();
        let mut prechecks: HashMap<EventId, Precheck> = HashMap::new();

        let rows = sqlx::query(&format!(
            "SELECT {CONCEPT_COLUMNS} FROM precheck_concepts WHERE event_id = ANY($1) ORDER BY created_at"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        for row in &rows {
            let concept = decode::concept(row)?;
            prechecks.entry(concept.event_id).or_default().concepts.push(concept);
        }

        let rows = sqlx::query(&format!(
            "SELECT {ADDITIONAL_COLUMNS} FROM precheck_additionals WHERE event_id = ANY($1) ORDER BY created_at"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        for row in &rows {
            let additional = decode::additional(row)?;
            prechecks
                .entry(additional.event_id)
                .or_default()
                .additionals
                .push(additional);
        }

        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM precheck_payments WHERE event_id = ANY($1) ORDER BY payment_date, created_at"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        for row in &rows {
            let payment = decode::payment(row)?;
            prechecks.entry(payment.event_id).or_default().payments.push(payment);
        }

        Ok(prechecks)
    }

    async fn save_concept(&self, concept: &Concept) -> Result<()> {
        sqlx::query(&format!(
            r"
            INSERT INTO precheck_concepts ({CONCEPT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                category = EXCLUDED.category, category_other = EXCLUDED.category_other,
                description = EXCLUDED.description, quantity = EXCLUDED.quantity,
                unit_price = EXCLUDED.unit_price, updated_at = EXCLUDED.updated_at
            "
        ))
        .bind(*concept.id.as_uuid())
        .bind(*concept.event_id.as_uuid())
        .bind(concept.category.as_str())
        .bind(concept.category_other.as_deref())
        .bind(&concept.description)
        .bind(concept.quantity)
        .bind(concept.unit_price)
        .bind(concept.created_at)
        .bind(concept.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_concept(&self, event_id: EventId, id: ConceptId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM precheck_concepts WHERE event_id = $1 AND id = $2")
            .bind(*event_id.as_uuid())
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn save_additional(&self, additional: &Additional) -> Result<()> {
        sqlx::query(&format!(
            r"
            INSERT INTO precheck_additionals ({ADDITIONAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                category = EXCLUDED.category, category_other = EXCLUDED.category_other,
                description = EXCLUDED.description, amount = EXCLUDED.amount,
                updated_at = EXCLUDED.updated_at
            "
        ))
        .bind(*additional.id.as_uuid())
        .bind(*additional.event_id.as_uuid())
        .bind(additional.category.as_str())
        .bind(additional.category_other.as_deref())
        .bind(&additional.description)
        .bind(additional.amount)
        .bind(additional.created_at)
        .bind(additional.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_additional(&self, event_id: EventId, id: AdditionalId) -> Result<bool> {
        let deleted =
            sqlx::query("DELETE FROM precheck_additionals WHERE event_id = $1 AND id = $2")
                .bind(*event_id.as_uuid())
                .bind(*id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn payment(&self, event_id: EventId, id: PaymentId) -> Result<Option<Payment>> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM precheck_payments WHERE event_id = $1 AND id = $2"
        ))
        .bind(*event_id.as_uuid())
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .as_ref()
        .map(decode::payment)
        .transpose()
    }

    async fn save_payment(&self, payment: &Payment) -> Result<()> {
        bind_payment(sqlx::query(UPSERT_PAYMENT), payment)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn update_pending_payment(&self, payment: &Payment) -> Result<()> {
        let updated = bind_payment(sqlx::query(UPDATE_PENDING_PAYMENT), payment)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if updated.rows_affected() == 0 {
            let review = self.review_state(payment.event_id, payment.id).await?;
            return Err(match review {
                None => CrmError::not_found("payment", payment.id),
                Some(current) => already_reviewed(payment.id, &current),
            });
        }
        Ok(())
    }

    async fn delete_pending_payment(&self, event_id: EventId, id: PaymentId) -> Result<bool> {
        let deleted = sqlx::query(
            "DELETE FROM precheck_payments WHERE event_id = $1 AND id = $2 AND review = 'pending'",
        )
        .bind(*event_id.as_uuid())
        .bind(*id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        if deleted.rows_affected() > 0 {
            return Ok(true);
        }
        match self.review_state(event_id, id).await? {
            None => Ok(false),
            Some(current) => Err(already_reviewed(id, &current)),
        }
    }

    async fn payments_in_review_state(&self, state: ReviewState) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM precheck_payments WHERE review = $1"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(decode::payment).collect()
    }
}
