//! SLA notification feed and violation history.

use super::{PipelineService, SLA_FEED_LIMIT, VIOLATION_HISTORY_LIMIT, can_view, ensure_admin};
use crate::error::{CrmError, Result};
use crate::ledger::format_duration;
use crate::sla::SlaStatus;
use crate::store::{EventFilter, ViolationFilter};
use crate::types::{Actor, EventId, EventState, SlaViolation, UserId};
use chrono::NaiveDate;
use serde::Serialize;

/// One event needing attention
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlaAlert {
    /// Event
    pub event_id: EventId,
    /// Display title
    pub title: String,
    /// State being timed
    pub state: EventState,
    /// Owner
    pub salesperson_id: Option<UserId>,
    /// Alert or critical
    pub status: SlaStatus,
    /// Seconds in the state
    pub elapsed_secs: i64,
    /// Human readable time in the state
    pub elapsed_label: String,
}

/// Alerts of one actor, critical first, then longest waiting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SlaFeed {
    /// At most [`SLA_FEED_LIMIT`] alerts
    pub alerts: Vec<SlaAlert>,
    /// Critical events before truncation
    pub critical_count: usize,
    /// Alert events before truncation
    pub alert_count: usize,
}

/// Filters of the violation history
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViolationQuery {
    /// First local day
    pub from: Option<NaiveDate>,
    /// Last local day, inclusive
    pub to: Option<NaiveDate>,
    /// Only this salesperson
    pub salesperson: Option<UserId>,
}

impl PipelineService {
    /// Events past their alert threshold that the actor may see.
    ///
    /// # Errors
    ///
    /// [`CrmError::Storage`] on store failures.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_sla_alerts(&self, actor: &Actor) -> Result<SlaFeed> {
        let now = self.clock.now();
        let events: Vec<_> = self
            .store
            .list_events(&EventFilter::in_states(&self.timed_states()))
            .await?
            .into_iter()
            .filter(|e| can_view(actor, e))
            .filter_map(|e| {
                let reading = self.sla.evaluate(&e, now)?;
                (reading.status != SlaStatus::Ok).then_some((e, reading))
            })
            .collect();

        let plain: Vec<_> = events.iter().map(|(e, _)| e.clone()).collect();
        let titles = self.titles_for(&plain).await?;

        let mut alerts: Vec<SlaAlert> = events
            .into_iter()
            .map(|(event, reading)| SlaAlert {
                title: titles.get(&event.id).cloned().unwrap_or_default(),
                event_id: event.id,
                state: reading.state,
                salesperson_id: event.salesperson_id,
                status: reading.status,
                elapsed_secs: reading.elapsed.num_seconds(),
                elapsed_label: format_duration(reading.elapsed),
            })
            .collect();
        alerts.sort_by(|a, b| {
            b.status
                .cmp(&a.status)
                .then_with(|| b.elapsed_secs.cmp(&a.elapsed_secs))
        });

        let critical_count = alerts
            .iter()
            .filter(|a| a.status == SlaStatus::Critical)
            .count();
        let alert_count = alerts.len() - critical_count;
        alerts.truncate(SLA_FEED_LIMIT);

        Ok(SlaFeed {
            alerts,
            critical_count,
            alert_count,
        })
    }

    /// Recorded breaches, newest first, at most [`VIOLATION_HISTORY_LIMIT`].
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] for non-admins, [`CrmError::Validation`] when the range
    /// is inverted.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn list_violations(&self, actor: &Actor, query: ViolationQuery) -> Result<Vec<SlaViolation>> {
        ensure_admin(actor)?;
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(CrmError::validation("from", "range starts after it ends"));
            }
        }

        let filter = ViolationFilter {
            from: query.from.map(|d| self.day_start(d)),
            to: query.to.map(|d| self.day_end(d)),
            salesperson: query.salesperson,
            limit: VIOLATION_HISTORY_LIMIT,
        };
        self.store.list_violations(&filter).await
    }

    /// States that carry thresholds
    pub(super) fn timed_states(&self) -> Vec<EventState> {
        EventState::ALL
            .into_iter()
            .filter(|s| self.sla.thresholds(*s).is_some())
            .collect()
    }
}
