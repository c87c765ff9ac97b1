//! Commercial and financial reports.

use super::{PipelineService, ensure_admin};
use crate::error::{CrmError, Result};
use crate::reporting::{
    BalanceSummary, CashFlowMatrix, ChannelMatrix, DateBasis, DisplayNames, Grouping, Kpis,
    ReportRange, SalespersonLoad, VolumeReport, balance_summary, cash_flow, channel_matrix,
    financial_scope, kpis, salesperson_load, volume,
};
use crate::store::EventFilter;
use crate::types::{Actor, EventId, EventState, VenueId};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Commercial dashboard
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reports {
    /// Range the report covers
    pub range: ReportRange,
    /// Headline figures
    pub kpis: Kpis,
    /// Volume over time
    pub volume: VolumeReport,
    /// Channel × venue
    pub channels: ChannelMatrix,
    /// Salesperson load
    pub load: SalespersonLoad,
}

/// Filters of the financial reports; missing dates cover the last year
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialFilter {
    /// First event date
    pub from: Option<NaiveDate>,
    /// Last event date
    pub to: Option<NaiveDate>,
    /// Only this venue
    pub venue_id: Option<VenueId>,
}

/// Financial reports
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FinancialReports {
    /// Range the report covers, on event dates
    pub range: ReportRange,
    /// Event month × payment month
    pub cash_flow: CashFlowMatrix,
    /// Per-event balances
    pub balances: BalanceSummary,
}

impl PipelineService {
    /// KPIs, volume, channel × venue and salesperson load for a range.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] for non-admins, [`CrmError::Validation`] for an
    /// inverted range.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_reports(
        &self,
        actor: &Actor,
        range: ReportRange,
        grouping: Grouping,
    ) -> Result<Reports> {
        ensure_admin(actor)?;
        ensure_ordered(range.from, range.to)?;
        let offset = self.clock.offset();
        let vat_rate = self.config.pipeline.vat_rate;

        let events = self.store.list_events(&EventFilter::default()).await?;
        let transitions = match range.basis {
            DateBasis::CreatedAt => {
                self.store
                    .transitions_between(self.day_start(range.from), self.day_end(range.to))
                    .await?
            }
            DateBasis::EventDate => Vec::new(),
        };
        let closed: Vec<EventId> = events
            .iter()
            .filter(|e| matches!(e.state, EventState::Approved | EventState::Concluded))
            .map(|e| e.id)
            .collect();
        let prechecks = self.store.prechecks_for(&closed).await?;
        let venues = self.store.list_venues().await?;
        let users = self.store.list_users().await?;

        Ok(Reports {
            kpis: kpis(&events, &transitions, &prechecks, &range, offset, vat_rate),
            volume: volume(&events, &range, offset, grouping),
            channels: channel_matrix(&events, &venues, &range, offset),
            load: salesperson_load(&events, &users, &range, offset),
            range,
        })
    }

    /// Cash-flow matrix and balance summary of approved and concluded events.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] unless the actor is admin or treasury,
    /// [`CrmError::Validation`] for an inverted range.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn get_financial_reports(
        &self,
        actor: &Actor,
        filter: FinancialFilter,
    ) -> Result<FinancialReports> {
        if !actor.can_review_payments() {
            return Err(CrmError::Permission(
                "financial reports are restricted to treasury".to_string(),
            ));
        }
        let today = self.today();
        let range = ReportRange {
            from: filter.from.unwrap_or(today - Duration::days(365)),
            to: filter.to.unwrap_or(today),
            basis: DateBasis::EventDate,
            venue_id: filter.venue_id,
        };
        ensure_ordered(range.from, range.to)?;

        let events = self
            .store
            .list_events(&EventFilter {
                states: vec![EventState::Approved, EventState::Concluded],
                venue_id: range.venue_id,
                event_date_between: Some((range.from, range.to)),
            })
            .await?;
        let scope = financial_scope(&events, &range);
        let ids: Vec<EventId> = scope.iter().map(|e| e.id).collect();
        let prechecks = self.store.prechecks_for(&ids).await?;

        let names = DisplayNames {
            venues: self
                .store
                .list_venues()
                .await?
                .into_iter()
                .map(|v| (v.id, v.name))
                .collect(),
            clients: self.client_names(scope.iter().map(|e| e.client_id)).await?,
        };
        let vat_rate = self.config.pipeline.vat_rate;

        Ok(FinancialReports {
            cash_flow: cash_flow(&scope, &prechecks, vat_rate),
            balances: balance_summary(&scope, &prechecks, &names, vat_rate),
            range,
        })
    }
}

fn ensure_ordered(from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from > to {
        return Err(CrmError::validation("from", "range starts after it ends"));
    }
    Ok(())
}
