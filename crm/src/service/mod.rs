//! Pipeline service: the operations exposed to the outside world.
//!
//! Every operation is one unit of work against the shared [`CrmStore`]: load, check
//! permissions, run the pure aggregates, then commit. Nothing is persisted when an
//! operation returns an error.
//!
//! Operations are grouped by concern:
//! - [`events`]: creation, edits, assignment and the event listings
//! - [`sla`]: alert feed and violation history
//! - [`sweeps`]: the idempotent SLA and auto-conclude sweeps
//! - [`precheck`]: pre-check lines, payments and receipts
//! - [`treasury`]: payment review and queues
//! - [`reports`]: commercial and financial reports

use crate::aggregates::{EventAction, EventReducer, LifecycleEffect, LifecycleEnvironment};
use crate::config::Config;
use crate::error::{CrmError, Result};
use crate::integrations::{DocumentRenderer, ObjectStorage};
use crate::policy::{StatePolicy, StatePriorities};
use crate::sla::SlaTable;
use crate::store::{CrmStore, EventChange};
use crate::types::{Actor, Client, Event, EventId, Role};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use eventdesk_core::environment::Clock;
use eventdesk_core::reducer::Reducer;
use std::sync::Arc;

pub mod events;
pub mod precheck;
pub mod reports;
pub mod sla;
pub mod sweeps;
pub mod treasury;

pub use events::{Board, BoardCard, BoardColumn, CalendarEntry, CreatedEvent, EventView};
pub use precheck::PrecheckView;
pub use reports::{FinancialFilter, FinancialReports, Reports};
pub use sla::{SlaAlert, SlaFeed, ViolationQuery};
pub use sweeps::SweepReport;
pub use treasury::{PaymentValidation, QueueEntry, TreasuryQueue};

/// Maximum rows of the SLA notification feed
pub const SLA_FEED_LIMIT: usize = 50;

/// Maximum rows of the violation history
pub const VIOLATION_HISTORY_LIMIT: usize = 200;

/// Days of reviewed payments shown in the treasury queues
pub const TREASURY_HISTORY_DAYS: i64 = 30;

/// Entry point for every pipeline operation.
#[derive(Clone)]
pub struct PipelineService {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    sla: SlaTable,
    lifecycle: LifecycleEnvironment,
    storage: Option<Arc<dyn ObjectStorage>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
}

impl PipelineService {
    /// Build the service.
    ///
    /// Resolves the multi-booking account from its configured e-mail; an unknown
    /// address disables the rule with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Storage`] if the account lookup fails.
    pub async fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>, config: Config) -> Result<Self> {
        let multi_booking_account = match config.pipeline.multi_booking_email.as_deref() {
            Some(email) => {
                let account = store.find_user_by_email(email).await?;
                if account.is_none() {
                    tracing::warn!(email = %email, "Multi-booking account not found, rule disabled");
                }
                account.map(|user| user.id)
            }
            None => None,
        };

        let policy = StatePolicy::new(StatePriorities::standard(), multi_booking_account);
        let lifecycle = LifecycleEnvironment::new(
            Arc::clone(&clock),
            policy,
            config.pipeline.deletion_reason_min_len,
        );

        Ok(Self {
            sla: SlaTable::from_config(&config.sla),
            store,
            clock,
            config,
            lifecycle,
            storage: None,
            renderer: None,
        })
    }

    /// Attach the receipt storage
    #[must_use]
    pub fn with_object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Attach the pre-check document renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Replace the SLA thresholds
    #[must_use]
    pub fn with_sla_table(mut self, sla: SlaTable) -> Self {
        self.sla = sla;
        self
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CrmStore> {
        &self.store
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// SLA thresholds in use
    #[must_use]
    pub const fn sla_table(&self) -> &SlaTable {
        &self.sla
    }

    /// Derivation rules in use
    #[must_use]
    pub const fn policy(&self) -> &StatePolicy {
        &self.lifecycle.policy
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    async fn load_event(&self, id: EventId) -> Result<Event> {
        self.store
            .event(id)
            .await?
            .ok_or_else(|| CrmError::not_found("event", id))
    }

    /// Load an event the actor may see
    async fn visible_event(&self, actor: &Actor, id: EventId) -> Result<Event> {
        let event = self.load_event(id).await?;
        if can_view(actor, &event) {
            Ok(event)
        } else {
            Err(denied())
        }
    }

    /// Load an event the actor may edit
    async fn editable_event(&self, actor: &Actor, id: EventId) -> Result<Event> {
        let event = self.load_event(id).await?;
        if actor.owns_or_admin(&event) {
            Ok(event)
        } else {
            Err(denied())
        }
    }

    /// Run the lifecycle reducer and commit its outcome.
    ///
    /// `expected_version` is `None` for inserts.
    async fn apply(
        &self,
        mut event: Event,
        action: EventAction,
        expected_version: Option<i64>,
        new_client: Option<Client>,
    ) -> Result<Event> {
        let effects = EventReducer::new().reduce(&mut event, action, &self.lifecycle)?;

        let mut change = match expected_version {
            Some(version) => EventChange::update(event, version),
            None => EventChange::insert(event),
        };
        change.new_client = new_client;
        for effect in effects {
            match effect {
                LifecycleEffect::RecordTransition(row) => change.transitions.push(row),
                LifecycleEffect::DiscardPrecheckItems => change.discard_precheck_items = true,
                LifecycleEffect::SetPreferredSalesperson {
                    client,
                    salesperson,
                } => change.preferred_salesperson = Some((client, salesperson)),
            }
        }

        let recorded = change.transitions.clone();
        let stored = self.store.commit_event(change).await?;
        for row in &recorded {
            metrics::counter!(
                "eventdesk.transitions.recorded",
                "to" => row.to_state.as_str(),
                "origin" => row.origin.as_str()
            )
            .increment(1);
            tracing::info!(
                event_id = %row.event_id,
                from = ?row.from_state.map(|s| s.as_str()),
                to = %row.to_state,
                origin = row.origin.as_str(),
                "State transition recorded"
            );
        }
        Ok(stored)
    }

    /// UTC instant at which local `date` starts
    fn day_start(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN);
        self.clock
            .offset()
            .from_local_datetime(&naive)
            .single()
            .map_or_else(|| Utc.from_utc_datetime(&naive), |dt| dt.with_timezone(&Utc))
    }

    /// Last UTC instant of local `date`
    fn day_end(&self, date: NaiveDate) -> DateTime<Utc> {
        self.day_start(date) + Duration::days(1) - Duration::microseconds(1)
    }

    fn today(&self) -> NaiveDate {
        self.clock.today()
    }
}

/// Whether `actor` may see `event`.
///
/// Admins and treasury see everything; salespeople see their own events plus the
/// unassigned ones.
#[must_use]
pub fn can_view(actor: &Actor, event: &Event) -> bool {
    match actor.role {
        Role::Admin | Role::Treasury => true,
        Role::Salesperson => event
            .salesperson_id
            .is_none_or(|owner| owner == actor.user_id),
    }
}

fn denied() -> CrmError {
    CrmError::Permission("not allowed to access this event".to_string())
}

fn ensure_admin(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CrmError::Permission("administrators only".to_string()))
    }
}
