//! Transition ledger read model.
//!
//! Turns an event's append-only transition rows into residence durations: how long the
//! event stayed in each state, entry by entry and in total.

use crate::types::{EventState, StateTransition};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One ledger row with the time the event spent in its `to_state`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// The ledger row
    pub transition: StateTransition,
    /// Seconds until the next row, or until now for the latest one
    pub duration_secs: i64,
    /// Human readable duration
    pub duration_label: String,
    /// Whether this is the state the event is still in
    pub current: bool,
}

/// Accumulated time spent in one state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateTotal {
    /// State
    pub state: EventState,
    /// Seconds, summed over every visit
    pub duration_secs: i64,
    /// Human readable duration
    pub duration_label: String,
}

/// Full history of an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransitionHistory {
    /// Rows in chronological order
    pub entries: Vec<HistoryEntry>,
    /// Totals per state, in funnel order
    pub totals: Vec<StateTotal>,
}

/// Build the history of an event from its ledger rows.
///
/// Rows may arrive in any order; they are sorted by timestamp first. Negative gaps
/// (clock skew between writers) count as zero.
#[must_use]
pub fn history(mut transitions: Vec<StateTransition>, now: DateTime<Utc>) -> TransitionHistory {
    transitions.sort_by_key(|t| t.at);

    let ends: Vec<DateTime<Utc>> = transitions
        .iter()
        .skip(1)
        .map(|t| t.at)
        .chain(std::iter::once(now))
        .collect();
    let last = transitions.len().saturating_sub(1);

    let mut per_state: BTreeMap<EventState, i64> = BTreeMap::new();
    let entries = transitions
        .into_iter()
        .zip(ends)
        .enumerate()
        .map(|(index, (transition, end))| {
            let secs = (end - transition.at).num_seconds().max(0);
            *per_state.entry(transition.to_state).or_default() += secs;
            HistoryEntry {
                transition,
                duration_secs: secs,
                duration_label: format_duration(Duration::seconds(secs)),
                current: index == last,
            }
        })
        .collect();

    let totals = per_state
        .into_iter()
        .map(|(state, secs)| StateTotal {
            state,
            duration_secs: secs,
            duration_label: format_duration(Duration::seconds(secs)),
        })
        .collect();

    TransitionHistory { entries, totals }
}

/// Compact duration label.
///
/// `45s`, `12m`, `3h`, `3h 20m`, `2d`, `2d 5h`. Negative durations read as `0s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        return format!("{secs}s");
    }
    let minutes = secs / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        let rest = minutes % 60;
        return if rest == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {rest}m")
        };
    }
    let days = hours / 24;
    let rest = hours % 24;
    if rest == 0 {
        format!("{days}d")
    } else {
        format!("{days}d {rest}h")
    }
}
