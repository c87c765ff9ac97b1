//! SLA thresholds and evaluation.
//!
//! Every non-terminal state has an alert and a critical threshold. Time in state is
//! measured from the event's last state change.

use crate::config::SlaConfig;
use crate::error::{CrmError, Result};
use crate::types::{Event, EventState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert and critical limits for one state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaThresholds {
    /// Time in state after which the event needs attention
    pub alert: Duration,
    /// Time in state after which the breach is recorded
    pub critical: Duration,
}

impl SlaThresholds {
    /// Thresholds from whole seconds
    #[must_use]
    pub fn from_secs(alert: i64, critical: i64) -> Self {
        Self {
            alert: Duration::seconds(alert),
            critical: Duration::seconds(critical),
        }
    }
}

/// Outcome of an evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaStatus {
    /// Within limits
    Ok,
    /// Past the alert threshold
    Alert,
    /// Past the critical threshold
    Critical,
}

impl SlaStatus {
    /// Status name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Alert => "alert",
            Self::Critical => "critical",
        }
    }
}

/// SLA reading for one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlaReading {
    /// State being timed
    pub state: EventState,
    /// Time since the last state change
    pub elapsed: Duration,
    /// Resulting status
    pub status: SlaStatus,
    /// Limits applied
    pub thresholds: SlaThresholds,
}

/// Thresholds per state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlaTable {
    thresholds: BTreeMap<EventState, SlaThresholds>,
}

impl SlaTable {
    /// Table from configured seconds
    #[must_use]
    pub fn from_config(config: &SlaConfig) -> Self {
        let thresholds = BTreeMap::from([
            (
                EventState::Incoming,
                SlaThresholds::from_secs(config.incoming_alert_secs, config.incoming_critical_secs),
            ),
            (
                EventState::Assigned,
                SlaThresholds::from_secs(config.assigned_alert_secs, config.assigned_critical_secs),
            ),
            (
                EventState::Contacted,
                SlaThresholds::from_secs(
                    config.contacted_alert_secs,
                    config.contacted_critical_secs,
                ),
            ),
            (
                EventState::Quoted,
                SlaThresholds::from_secs(config.quoted_alert_secs, config.quoted_critical_secs),
            ),
        ]);
        Self { thresholds }
    }

    /// Replace the thresholds of one state.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for terminal states, which never carry an SLA,
    /// and when the critical threshold precedes the alert one.
    pub fn with_thresholds(mut self, state: EventState, thresholds: SlaThresholds) -> Result<Self> {
        if state.is_terminal() {
            return Err(CrmError::validation(
                "state",
                format!("{state} does not carry an SLA"),
            ));
        }
        if thresholds.critical < thresholds.alert {
            return Err(CrmError::validation(
                "critical",
                "critical threshold must not precede the alert threshold",
            ));
        }
        self.thresholds.insert(state, thresholds);
        Ok(self)
    }

    /// Thresholds of `state`, if it has an SLA
    #[must_use]
    pub fn thresholds(&self, state: EventState) -> Option<SlaThresholds> {
        self.thresholds.get(&state).copied()
    }

    /// Evaluate `event` at `now`. `None` for states without an SLA.
    #[must_use]
    pub fn evaluate(&self, event: &Event, now: DateTime<Utc>) -> Option<SlaReading> {
        let thresholds = self.thresholds(event.state)?;
        let elapsed = now - event.sla_reference();
        Some(SlaReading {
            state: event.state,
            elapsed,
            status: classify(elapsed, thresholds),
            thresholds,
        })
    }
}

impl Default for SlaTable {
    fn default() -> Self {
        Self::from_config(&SlaConfig::default())
    }
}

/// `elapsed < alert` is ok, `[alert, critical)` alerts, anything longer is critical.
#[must_use]
pub fn classify(elapsed: Duration, thresholds: SlaThresholds) -> SlaStatus {
    if elapsed >= thresholds.critical {
        SlaStatus::Critical
    } else if elapsed >= thresholds.alert {
        SlaStatus::Alert
    } else {
        SlaStatus::Ok
    }
}
