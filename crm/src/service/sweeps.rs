//! Scheduled sweeps. Both are idempotent and skip items that fail.

use super::PipelineService;
use crate::aggregates::EventAction;
use crate::error::Result;
use crate::sla::SlaStatus;
use crate::store::EventFilter;
use crate::types::{Event, EventState, SalespersonSnapshot, SlaViolation, ViolationId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a sweep run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Events looked at
    pub examined: usize,
    /// Rows written
    pub changed: usize,
    /// Items that failed and were skipped
    pub failed: usize,
}

impl PipelineService {
    /// Record one violation per (event, state) for every critical event.
    ///
    /// # Errors
    ///
    /// Only when the candidate events cannot be listed; per-event failures are logged
    /// and counted.
    #[tracing::instrument(skip(self))]
    pub async fn run_sla_sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let events = self
            .store
            .list_events(&EventFilter::in_states(&self.timed_states()))
            .await?;

        let mut report = SweepReport::default();
        for event in events {
            report.examined += 1;
            let Some(reading) = self.sla.evaluate(&event, now) else {
                continue;
            };
            if reading.status != SlaStatus::Critical {
                continue;
            }

            match self.record_breach(&event, reading.elapsed.num_seconds(), now).await {
                Ok(true) => {
                    report.changed += 1;
                    metrics::counter!("eventdesk.sla.violations.recorded", "state" => event.state.as_str())
                        .increment(1);
                    tracing::info!(event_id = %event.id, state = %event.state, "SLA violation recorded");
                }
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    metrics::counter!("eventdesk.sweep.failures", "sweep" => "sla").increment(1);
                    tracing::warn!(event_id = %event.id, error = %error, "SLA sweep item failed");
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            recorded = report.changed,
            failed = report.failed,
            "SLA sweep finished"
        );
        Ok(report)
    }

    async fn record_breach(&self, event: &Event, elapsed_secs: i64, now: DateTime<Utc>) -> Result<bool> {
        let salesperson = match event.salesperson_id {
            Some(id) => Some(SalespersonSnapshot {
                id,
                name: self
                    .store
                    .user(id)
                    .await?
                    .map_or_else(|| format!("ID {id}"), |user| user.name),
            }),
            None => None,
        };

        self.store
            .record_violation(&SlaViolation {
                id: ViolationId::new(),
                event_id: event.id,
                state: event.state,
                salesperson,
                breached_at: now,
                elapsed_secs,
            })
            .await
    }

    /// Conclude approved events whose date has passed.
    ///
    /// # Errors
    ///
    /// Only when the candidate events cannot be listed; per-event failures are logged
    /// and counted.
    #[tracing::instrument(skip(self))]
    pub async fn run_auto_conclude_sweep(&self) -> Result<SweepReport> {
        let today = self.today();
        let events = self
            .store
            .list_events(&EventFilter::in_states(&[EventState::Approved]))
            .await?;

        let mut report = SweepReport::default();
        for event in events {
            report.examined += 1;
            if !event.event_date.is_some_and(|date| date < today) {
                continue;
            }

            let id = event.id;
            let version = event.version;
            match self
                .apply(event, EventAction::AutoConclude, Some(version), None)
                .await
            {
                Ok(_) => report.changed += 1,
                Err(error) => {
                    report.failed += 1;
                    metrics::counter!("eventdesk.sweep.failures", "sweep" => "auto_conclude")
                        .increment(1);
                    tracing::warn!(event_id = %id, error = %error, "Auto-conclude item failed");
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            concluded = report.changed,
            failed = report.failed,
            "Auto-conclude sweep finished"
        );
        Ok(report)
    }
}
