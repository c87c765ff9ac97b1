//! Read-only rollups of the pipeline.
//!
//! Every function here is pure: the service loads events, ledger rows and pre-checks
//! and hands them over. Percentages are rounded to one decimal and are zero when the
//! base is zero.

use crate::precheck::{Precheck, compute_summary};
use crate::types::{
    ClientId, Event, EventId, EventState, StateTransition, User, UserId, Role, Venue, VenueId,
};
use chrono::{Datelike, Duration, FixedOffset, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

// ============================================================================
// Filters
// ============================================================================

/// Which date of an event a report range applies to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateBasis {
    /// Local date the inquiry arrived
    #[default]
    CreatedAt,
    /// Date of the celebration
    EventDate,
}

/// Bucket size of the volume report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    /// One row per day
    #[default]
    Daily,
    /// One row per week, starting Monday
    Weekly,
}

/// Inclusive date range plus optional venue filter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRange {
    /// First day
    pub from: NaiveDate,
    /// Last day
    pub to: NaiveDate,
    /// Date the range applies to
    pub basis: DateBasis,
    /// Only this venue
    pub venue_id: Option<VenueId>,
}

impl ReportRange {
    /// Whether `date` falls in the range
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }

    /// Whether `event` passes the venue filter
    #[must_use]
    pub fn venue_matches(&self, event: &Event) -> bool {
        self.venue_id.is_none() || event.venue_id == self.venue_id
    }

    /// The date of `event` the range is compared against
    #[must_use]
    pub fn basis_date(&self, event: &Event, offset: FixedOffset) -> Option<NaiveDate> {
        match self.basis {
            DateBasis::CreatedAt => Some(event.created_at.with_timezone(&offset).date_naive()),
            DateBasis::EventDate => event.event_date,
        }
    }

    /// Non-deleted events of the venue whose basis date is in range
    #[must_use]
    pub fn in_period<'a>(&self, events: &'a [Event], offset: FixedOffset) -> Vec<&'a Event> {
        events
            .iter()
            .filter(|e| e.state != EventState::Deleted && self.venue_matches(e))
            .filter(|e| self.basis_date(e, offset).is_some_and(|d| self.contains(d)))
            .collect()
    }
}

/// `part / whole × 100`, one decimal
#[must_use]
pub fn percentage(part: usize, whole: usize) -> Decimal {
    if whole == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole))
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// Calendar month
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    /// Year
    pub year: i32,
    /// Month, 1-12
    pub month: u32,
}

impl YearMonth {
    /// Month containing `date`
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Counts of events per state
pub type StateCounts = BTreeMap<EventState, usize>;

// ============================================================================
// KPIs
// ============================================================================

/// Point-in-time figures, independent of the date range
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotKpis {
    /// `INCOMING` events nobody owns
    pub unassigned_incoming: usize,
    /// Events waiting for the client's answer
    pub open_quotes: usize,
    /// Budget of those events
    pub open_quote_budget: Decimal,
}

/// Figures for the selected period
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PeriodKpis {
    /// Inquiries received
    pub inquiries: usize,
    /// Events won
    pub won: usize,
    /// Events lost
    pub lost: usize,
    /// Value of the events won
    pub revenue: Decimal,
    /// `won / (won + lost)`, in percent
    pub win_rate: Decimal,
}

/// Dashboard headline figures
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Kpis {
    /// Point-in-time figures
    pub snapshot: SnapshotKpis,
    /// Figures for the period
    pub period: PeriodKpis,
}

/// Value of a closed event: the pre-check total when it has lines, else the budget
#[must_use]
pub fn closed_value(event: &Event, precheck: Option<&Precheck>, vat_rate: Decimal) -> Decimal {
    match precheck.filter(|p| p.has_items()) {
        Some(precheck) => compute_summary(precheck, event.invoiced, vat_rate).total,
        None => event.budget.unwrap_or(Decimal::ZERO),
    }
}

/// A ledger row that closes a sale: an approval, or an approval that concluded at once
/// because the event date had already passed. `APPROVED -> CONCLUDED` is not a new win.
fn closes_won(transition: &StateTransition) -> bool {
    match transition.to_state {
        EventState::Approved => true,
        EventState::Concluded => transition.from_state != Some(EventState::Approved),
        _ => false,
    }
}

/// Headline figures.
///
/// With the creation-date basis, won and lost count events that were approved (directly
/// or straight into `CONCLUDED`) or rejected during the period according to
/// `transitions`. With the event-date
/// basis they count events of the period currently approved/concluded or rejected.
#[must_use]
pub fn kpis(
    events: &[Event],
    transitions: &[StateTransition],
    prechecks: &HashMap<EventId, Precheck>,
    range: &ReportRange,
    offset: FixedOffset,
    vat_rate: Decimal,
) -> Kpis {
    let venue_events = || events.iter().filter(|e| range.venue_matches(e));
    let quoted: Vec<&Event> = venue_events()
        .filter(|e| e.state == EventState::Quoted)
        .collect();

    let snapshot = SnapshotKpis {
        unassigned_incoming: venue_events()
            .filter(|e| e.state == EventState::Incoming && e.salesperson_id.is_none())
            .count(),
        open_quotes: quoted.len(),
        open_quote_budget: quoted.iter().filter_map(|e| e.budget).sum(),
    };

    let period_events = range.in_period(events, offset);
    let (won, lost): (Vec<&Event>, Vec<&Event>) = match range.basis {
        DateBasis::CreatedAt => {
            let by_id: HashMap<EventId, &Event> = events
                .iter()
                .filter(|e| e.state != EventState::Deleted && range.venue_matches(e))
                .map(|e| (e.id, e))
                .collect();
            let moved = |closes: fn(&StateTransition) -> bool| -> Vec<&Event> {
                let ids: BTreeSet<EventId> = transitions
                    .iter()
                    .filter(|t| closes(t))
                    .filter(|t| range.contains(t.at.with_timezone(&offset).date_naive()))
                    .map(|t| t.event_id)
                    .collect();
                ids.iter().filter_map(|id| by_id.get(id).copied()).collect()
            };
            (moved(closes_won), moved(|t| t.to_state == EventState::Rejected))
        }
        DateBasis::EventDate => (
            period_events
                .iter()
                .copied()
                .filter(|e| matches!(e.state, EventState::Approved | EventState::Concluded))
                .collect(),
            period_events
                .iter()
                .copied()
                .filter(|e| e.state == EventState::Rejected)
                .collect(),
        ),
    };

    let revenue = won
        .iter()
        .map(|e| closed_value(e, prechecks.get(&e.id), vat_rate))
        .sum();

    Kpis {
        snapshot,
        period: PeriodKpis {
            inquiries: period_events.len(),
            won: won.len(),
            lost: lost.len(),
            revenue,
            win_rate: percentage(won.len(), won.len() + lost.len()),
        },
    }
}

// ============================================================================
// Volume over time
// ============================================================================

/// Events of one bucket
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VolumeRow {
    /// First day of the bucket
    pub period_start: NaiveDate,
    /// Events in the bucket
    pub total: usize,
    /// Events per current state
    pub by_state: StateCounts,
}

/// Volume report
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VolumeReport {
    /// Buckets, newest first
    pub rows: Vec<VolumeRow>,
    /// Sum over every bucket
    pub total: usize,
    /// Sum per state over every bucket
    pub by_state: StateCounts,
}

/// Monday of the week containing `date`
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Events of the period per day or week, split by current state
#[must_use]
pub fn volume(
    events: &[Event],
    range: &ReportRange,
    offset: FixedOffset,
    grouping: Grouping,
) -> VolumeReport {
    let mut buckets: BTreeMap<NaiveDate, StateCounts> = BTreeMap::new();
    let mut by_state = StateCounts::new();

    for event in range.in_period(events, offset) {
        let Some(date) = range.basis_date(event, offset) else {
            continue;
        };
        let bucket = match grouping {
            Grouping::Daily => date,
            Grouping::Weekly => week_start(date),
        };
        *buckets.entry(bucket).or_default().entry(event.state).or_default() += 1;
        *by_state.entry(event.state).or_default() += 1;
    }

    let rows = buckets
        .into_iter()
        .rev()
        .map(|(period_start, counts)| VolumeRow {
            period_start,
            total: counts.values().sum(),
            by_state: counts,
        })
        .collect();

    VolumeReport {
        rows,
        total: by_state.values().sum(),
        by_state,
    }
}

// ============================================================================
// Channel × venue
// ============================================================================

/// Channel slug used for events without a channel
pub const NO_CHANNEL: &str = "no_channel";

/// One venue column of a channel row
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelCell {
    /// Venue
    pub venue_id: VenueId,
    /// Events of the channel at the venue
    pub count: usize,
    /// Share of the channel's events, in percent
    pub percentage: Decimal,
}

/// One channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelRow {
    /// Channel slug
    pub channel: String,
    /// Events of the channel
    pub total: usize,
    /// Share of all events, in percent
    pub percentage: Decimal,
    /// One cell per listed venue
    pub venues: Vec<ChannelCell>,
}

/// Channel × venue matrix
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelMatrix {
    /// Column venues (active ones)
    pub venues: Vec<Venue>,
    /// Rows, largest channel first
    pub rows: Vec<ChannelRow>,
    /// Events per venue
    pub venue_totals: BTreeMap<VenueId, usize>,
    /// Events in the matrix
    pub total: usize,
}

/// Where the period's inquiries came from, per venue
#[must_use]
pub fn channel_matrix(
    events: &[Event],
    venues: &[Venue],
    range: &ReportRange,
    offset: FixedOffset,
) -> ChannelMatrix {
    let columns: Vec<Venue> = venues.iter().filter(|v| v.active).cloned().collect();
    let mut per_channel: BTreeMap<String, HashMap<Option<VenueId>, usize>> = BTreeMap::new();
    let mut venue_totals: BTreeMap<VenueId, usize> = columns.iter().map(|v| (v.id, 0)).collect();

    for event in range.in_period(events, offset) {
        let channel = event
            .channel
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| NO_CHANNEL.to_string());
        *per_channel
            .entry(channel)
            .or_default()
            .entry(event.venue_id)
            .or_default() += 1;
        if let Some(venue) = event.venue_id {
            *venue_totals.entry(venue).or_default() += 1;
        }
    }

    let total: usize = per_channel.values().flat_map(HashMap::values).sum();
    let mut rows: Vec<ChannelRow> = per_channel
        .into_iter()
        .map(|(channel, counts)| {
            let row_total: usize = counts.values().sum();
            ChannelRow {
                channel,
                total: row_total,
                percentage: percentage(row_total, total),
                venues: columns
                    .iter()
                    .map(|venue| {
                        let count = counts.get(&Some(venue.id)).copied().unwrap_or(0);
                        ChannelCell {
                            venue_id: venue.id,
                            count,
                            percentage: percentage(count, row_total),
                        }
                    })
                    .collect(),
            }
        })
        .collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.channel.cmp(&b.channel)));

    ChannelMatrix {
        venues: columns,
        rows,
        venue_totals,
        total,
    }
}

// ============================================================================
// Salesperson load
// ============================================================================

/// Label of the row gathering unassigned events
pub const UNASSIGNED_LABEL: &str = "Unassigned";

/// One salesperson, or the unassigned bucket
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadRow {
    /// Salesperson, `None` for unassigned events
    pub salesperson: Option<UserId>,
    /// Display name
    pub name: String,
    /// Events per current state
    pub by_state: StateCounts,
    /// Events of the period
    pub total: usize,
    /// Share of all events, in percent
    pub participation: Decimal,
}

/// Salesperson load report
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SalespersonLoad {
    /// Unassigned first, then busiest first
    pub rows: Vec<LoadRow>,
    /// Sum per state
    pub by_state: StateCounts,
    /// Events of the period
    pub total: usize,
}

/// Events of the period per owner. Active salespeople always get a row.
#[must_use]
pub fn salesperson_load(
    events: &[Event],
    users: &[User],
    range: &ReportRange,
    offset: FixedOffset,
) -> SalespersonLoad {
    let names: HashMap<UserId, &str> = users.iter().map(|u| (u.id, u.name.as_str())).collect();
    let mut counts: HashMap<Option<UserId>, StateCounts> = users
        .iter()
        .filter(|u| u.active && u.role == Role::Salesperson)
        .map(|u| (Some(u.id), StateCounts::new()))
        .collect();
    counts.entry(None).or_default();

    let mut by_state = StateCounts::new();
    for event in range.in_period(events, offset) {
        *counts
            .entry(event.salesperson_id)
            .or_default()
            .entry(event.state)
            .or_default() += 1;
        *by_state.entry(event.state).or_default() += 1;
    }
    let total: usize = by_state.values().sum();

    let mut rows: Vec<LoadRow> = counts
        .into_iter()
        .map(|(salesperson, states)| {
            let row_total = states.values().sum();
            let name = match salesperson {
                None => UNASSIGNED_LABEL.to_string(),
                Some(id) => names
                    .get(&id)
                    .map_or_else(|| format!("ID {id}"), |n| (*n).to_string()),
            };
            LoadRow {
                salesperson,
                name,
                by_state: states,
                total: row_total,
                participation: percentage(row_total, total),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        a.salesperson
            .is_some()
            .cmp(&b.salesperson.is_some())
            .then_with(|| b.total.cmp(&a.total))
            .then_with(|| a.name.cmp(&b.name))
    });

    SalespersonLoad {
        rows,
        by_state,
        total,
    }
}

// ============================================================================
// Financial reports
// ============================================================================

/// Approved or concluded events of the venue dated within the range
#[must_use]
pub fn financial_scope<'a>(events: &'a [Event], range: &ReportRange) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| matches!(e.state, EventState::Approved | EventState::Concluded))
        .filter(|e| range.venue_matches(e))
        .filter(|e| e.event_date.is_some_and(|d| range.contains(d)))
        .collect()
}

/// Payments received for the events of one month
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CashFlowRow {
    /// Month of the events
    pub event_month: YearMonth,
    /// Pre-check total of those events
    pub events_total: Decimal,
    /// Payments per column month, aligned with [`CashFlowMatrix::payment_months`]
    pub payments: Vec<Decimal>,
    /// Sum of the row
    pub paid_total: Decimal,
}

/// Event month × payment month matrix of validated payments
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CashFlowMatrix {
    /// Column months, chronological
    pub payment_months: Vec<YearMonth>,
    /// Rows, chronological
    pub rows: Vec<CashFlowRow>,
    /// Column sums
    pub payment_month_totals: Vec<Decimal>,
    /// Sum of event totals
    pub events_total: Decimal,
    /// Sum of every payment
    pub paid_total: Decimal,
}

/// When events happen versus when they are paid
#[must_use]
pub fn cash_flow(
    events: &[&Event],
    prechecks: &HashMap<EventId, Precheck>,
    vat_rate: Decimal,
) -> CashFlowMatrix {
    let empty = Precheck::default();
    let mut months: BTreeMap<YearMonth, (Decimal, BTreeMap<YearMonth, Decimal>)> = BTreeMap::new();
    let mut columns: BTreeSet<YearMonth> = BTreeSet::new();

    for event in events {
        let Some(date) = event.event_date else {
            continue;
        };
        let precheck = prechecks.get(&event.id).unwrap_or(&empty);
        let summary = compute_summary(precheck, event.invoiced, vat_rate);

        let (total, paid) = months.entry(YearMonth::of(date)).or_default();
        *total += summary.total;
        for payment in precheck.payments.iter().filter(|p| p.is_validated()) {
            let column = YearMonth::of(payment.payment_date);
            columns.insert(column);
            *paid.entry(column).or_default() += payment.amount;
        }
    }

    let payment_months: Vec<YearMonth> = columns.into_iter().collect();
    let mut payment_month_totals = vec![Decimal::ZERO; payment_months.len()];
    let mut events_total = Decimal::ZERO;

    let rows = months
        .into_iter()
        .map(|(event_month, (total, paid))| {
            let payments: Vec<Decimal> = payment_months
                .iter()
                .map(|m| paid.get(m).copied().unwrap_or(Decimal::ZERO))
                .collect();
            for (sum, amount) in payment_month_totals.iter_mut().zip(&payments) {
                *sum += *amount;
            }
            events_total += total;
            CashFlowRow {
                event_month,
                events_total: total,
                paid_total: payments.iter().sum(),
                payments,
            }
        })
        .collect();

    CashFlowMatrix {
        paid_total: payment_month_totals.iter().sum(),
        payment_months,
        rows,
        payment_month_totals,
        events_total,
    }
}

/// Settlement state of an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStatus {
    /// The pre-check total is zero
    NoBudget,
    /// Fully paid
    Settled,
    /// Money still owed
    Pending,
}

/// One event of the balance summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceRow {
    /// Event
    pub event_id: EventId,
    /// Venue name
    pub venue: Option<String>,
    /// Client name
    pub client: Option<String>,
    /// Event date
    pub event_date: NaiveDate,
    /// Month bucket
    pub month: YearMonth,
    /// Pre-check total
    pub total: Decimal,
    /// Validated payments
    pub paid: Decimal,
    /// Total minus paid
    pub balance: Decimal,
    /// Settlement state
    pub status: BalanceStatus,
}

/// Totals of the balance summary
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BalanceTotals {
    /// Sum of totals
    pub total: Decimal,
    /// Sum of payments
    pub paid: Decimal,
    /// Sum of balances
    pub balance: Decimal,
    /// Events listed
    pub event_count: usize,
    /// Settled events
    pub settled_count: usize,
    /// Events with money owed
    pub pending_count: usize,
}

/// Balance summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceSummary {
    /// Rows, latest event first
    pub rows: Vec<BalanceRow>,
    /// Totals
    pub totals: BalanceTotals,
}

/// Names shown next to ids in financial rows
#[derive(Clone, Debug, Default)]
pub struct DisplayNames {
    /// Venue names
    pub venues: HashMap<VenueId, String>,
    /// Client names
    pub clients: HashMap<ClientId, String>,
}

/// What every event of the scope costs, has paid and still owes
#[must_use]
pub fn balance_summary(
    events: &[&Event],
    prechecks: &HashMap<EventId, Precheck>,
    names: &DisplayNames,
    vat_rate: Decimal,
) -> BalanceSummary {
    let empty = Precheck::default();
    let mut totals = BalanceTotals::default();
    let mut seen = HashSet::new();

    let mut rows: Vec<BalanceRow> = events
        .iter()
        .filter(|e| seen.insert(e.id))
        .filter_map(|event| {
            let event_date = event.event_date?;
            let precheck = prechecks.get(&event.id).unwrap_or(&empty);
            let summary = compute_summary(precheck, event.invoiced, vat_rate);

            let status = if summary.total.is_zero() {
                BalanceStatus::NoBudget
            } else if summary.balance <= Decimal::ZERO {
                totals.settled_count += 1;
                BalanceStatus::Settled
            } else {
                totals.pending_count += 1;
                BalanceStatus::Pending
            };
            totals.total += summary.total;
            totals.paid += summary.paid;
            totals.balance += summary.balance;

            Some(BalanceRow {
                event_id: event.id,
                venue: event.venue_id.and_then(|v| names.venues.get(&v).cloned()),
                client: names.clients.get(&event.client_id).cloned(),
                event_date,
                month: YearMonth::of(event_date),
                total: summary.total,
                paid: summary.paid,
                balance: summary.balance,
                status,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.event_date.cmp(&a.event_date));
    totals.event_count = rows.len();

    BalanceSummary { rows, totals }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::precheck::{PaymentDraft, PaymentMethod, ReviewState};
    use crate::types::{PaymentId, TransitionId, TransitionOrigin};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event_created(date: NaiveDate, state: EventState) -> Event {
        let created = Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap());
        let mut event = Event::new(EventId::new(), ClientId::new(), created);
        event.state = state;
        event
    }

    fn march() -> ReportRange {
        ReportRange {
            from: day(2025, 3, 1),
            to: day(2025, 3, 31),
            basis: DateBasis::CreatedAt,
            venue_id: None,
        }
    }

    #[test]
    fn percentages_round_to_one_decimal_and_guard_zero() {
        assert_eq!(percentage(1, 3), dec!(33.3));
        assert_eq!(percentage(2, 3), dec!(66.7));
        assert_eq!(percentage(5, 0), Decimal::ZERO);
    }

    #[test]
    fn snapshot_ignores_the_range_but_period_does_not() {
        let mut quoted = event_created(day(2024, 1, 10), EventState::Quoted);
        quoted.budget = Some(dec!(1000));
        let events = vec![
            event_created(day(2025, 3, 2), EventState::Incoming),
            event_created(day(2025, 3, 3), EventState::Deleted),
            quoted,
        ];

        let kpis = kpis(&events, &[], &HashMap::new(), &march(), utc(), dec!(0.21));

        assert_eq!(kpis.snapshot.unassigned_incoming, 1);
        assert_eq!(kpis.snapshot.open_quotes, 1);
        assert_eq!(kpis.snapshot.open_quote_budget, dec!(1000));
        assert_eq!(kpis.period.inquiries, 1);
    }

    #[test]
    fn won_and_lost_follow_the_ledger_in_the_period() {
        let mut won = event_created(day(2025, 2, 1), EventState::Approved);
        won.budget = Some(dec!(500));
        let lost = event_created(day(2025, 2, 1), EventState::Rejected);
        let rows: Vec<StateTransition> = [(won.id, EventState::Approved), (lost.id, EventState::Rejected)]
            .into_iter()
            .map(|(event_id, to_state)| StateTransition {
                id: TransitionId::new(),
                event_id,
                from_state: Some(EventState::Quoted),
                to_state,
                actor: None,
                origin: TransitionOrigin::Manual,
                at: Utc.with_ymd_and_hms(2025, 3, 15, 10, 0, 0).unwrap(),
            })
            .collect();
        let events = vec![won, lost];

        let kpis = kpis(&events, &rows, &HashMap::new(), &march(), utc(), dec!(0.21));

        assert_eq!(kpis.period.won, 1);
        assert_eq!(kpis.period.lost, 1);
        assert_eq!(kpis.period.revenue, dec!(500));
        assert_eq!(kpis.period.win_rate, dec!(50.0));
    }

    #[test]
    fn weekly_volume_buckets_on_monday() {
        let events = vec![
            event_created(day(2025, 3, 5), EventState::Incoming),
            event_created(day(2025, 3, 7), EventState::Quoted),
            event_created(day(2025, 3, 11), EventState::Quoted),
        ];

        let report = volume(&events, &march(), utc(), Grouping::Weekly);

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].period_start, day(2025, 3, 10));
        assert_eq!(report.rows[1].period_start, day(2025, 3, 3));
        assert_eq!(report.rows[1].total, 2);
        assert_eq!(report.by_state.get(&EventState::Quoted), Some(&2));
    }

    #[test]
    fn channel_rows_are_sorted_and_split_by_venue() {
        let venue = Venue {
            id: VenueId::new(),
            name: "Costa".to_string(),
            colour: "#00f".to_string(),
            active: true,
        };
        let mut events = Vec::new();
        for channel in ["whatsapp", "whatsapp", "instagram"] {
            let mut event = event_created(day(2025, 3, 4), EventState::Incoming);
            event.channel = Some(channel.to_string());
            event.venue_id = Some(venue.id);
            events.push(event);
        }
        events.push(event_created(day(2025, 3, 4), EventState::Incoming));

        let matrix = channel_matrix(&events, &[venue.clone()], &march(), utc());

        assert_eq!(matrix.total, 4);
        assert_eq!(matrix.rows[0].channel, "whatsapp");
        assert_eq!(matrix.rows[0].percentage, dec!(50.0));
        assert_eq!(matrix.rows[0].venues[0].percentage, dec!(100.0));
        assert!(matrix.rows.iter().any(|r| r.channel == NO_CHANNEL));
        assert_eq!(matrix.venue_totals.get(&venue.id), Some(&3));
    }

    #[test]
    fn unassigned_row_comes_first() {
        let busy = User {
            id: UserId::new(),
            name: "Bea".to_string(),
            email: "bea@example.com".to_string(),
            role: Role::Salesperson,
            active: true,
        };
        let mut events = Vec::new();
        for _ in 0..3 {
            let mut event = event_created(day(2025, 3, 8), EventState::Assigned);
            event.salesperson_id = Some(busy.id);
            events.push(event);
        }
        events.push(event_created(day(2025, 3, 8), EventState::Incoming));

        let load = salesperson_load(&events, &[busy.clone()], &march(), utc());

        assert_eq!(load.rows[0].name, UNASSIGNED_LABEL);
        assert_eq!(load.rows[1].salesperson, Some(busy.id));
        assert_eq!(load.rows[1].participation, dec!(75.0));
        assert_eq!(load.total, 4);
    }

    #[test]
    fn cash_flow_and_balances_count_validated_payments() {
        let mut event = event_created(day(2025, 1, 5), EventState::Concluded);
        event.event_date = Some(day(2025, 3, 20));
        event.budget = Some(dec!(999));

        let payment = |amount, date, review| {
            let mut p = PaymentDraft {
                method: PaymentMethod::Cash,
                amount,
                payment_date: date,
                deposit_date: None,
                clearing_date: None,
                notes: None,
            }
            .into_payment(PaymentId::new(), event.id, Utc::now())
            .unwrap();
            p.review = review;
            p
        };
        let precheck = Precheck {
            concepts: vec![
                crate::precheck::ConceptDraft {
                    category: crate::precheck::PrecheckCategory::Venue,
                    category_other: None,
                    description: "Hall".to_string(),
                    quantity: None,
                    unit_price: dec!(1000),
                }
                .into_concept(crate::types::ConceptId::new(), event.id, Utc::now())
                .unwrap(),
            ],
            additionals: Vec::new(),
            payments: vec![
                payment(dec!(300), day(2025, 1, 10), ReviewState::Validated),
                payment(dec!(200), day(2025, 2, 10), ReviewState::Validated),
                payment(dec!(500), day(2025, 3, 1), ReviewState::Pending),
            ],
        };
        let prechecks = HashMap::from([(event.id, precheck)]);
        let range = ReportRange {
            basis: DateBasis::EventDate,
            ..march()
        };
        let events = vec![event];
        let scope = financial_scope(&events, &range);

        let flow = cash_flow(&scope, &prechecks, dec!(0.21));
        assert_eq!(
            flow.payment_months,
            vec![YearMonth { year: 2025, month: 1 }, YearMonth { year: 2025, month: 2 }]
        );
        assert_eq!(flow.rows[0].payments, vec![dec!(300), dec!(200)]);
        assert_eq!(flow.events_total, dec!(1000));
        assert_eq!(flow.paid_total, dec!(500));

        let balances = balance_summary(&scope, &prechecks, &DisplayNames::default(), dec!(0.21));
        assert_eq!(balances.rows[0].balance, dec!(500));
        assert_eq!(balances.rows[0].status, BalanceStatus::Pending);
        assert_eq!(balances.totals.pending_count, 1);
    }

    #[test]
    fn events_without_lines_have_no_budget_status() {
        let mut event = event_created(day(2025, 1, 5), EventState::Approved);
        event.event_date = Some(day(2025, 3, 2));
        let events = vec![event];
        let range = ReportRange {
            basis: DateBasis::EventDate,
            ..march()
        };
        let scope = financial_scope(&events, &range);

        let balances = balance_summary(&scope, &HashMap::new(), &DisplayNames::default(), dec!(0.21));
        assert_eq!(balances.rows[0].status, BalanceStatus::NoBudget);
        assert_eq!(balances.totals.settled_count, 0);
    }
}
