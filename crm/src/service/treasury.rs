//! Treasury review of payments.

use super::{PipelineService, TREASURY_HISTORY_DAYS};
use crate::aggregates::{PaymentReviewReducer, ReviewAction, ReviewEffect, ReviewEnvironment};
use crate::error::{CrmError, Result};
use crate::precheck::{Payment, ReviewState};
use crate::types::{Actor, Event, EventId, PaymentId};
use chrono::Duration;
use eventdesk_core::reducer::Reducer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Reviewer input when validating a payment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentValidation {
    /// Reference number of the accounting entry
    pub external_reference: String,
    /// Amount actually received, when it differs
    pub corrected_amount: Option<Decimal>,
    /// Why the amount differs
    pub change_note: Option<String>,
}

/// A payment with the event it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    /// Payment
    pub payment: Payment,
    /// Event title
    pub title: String,
}

/// Treasury work lists
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TreasuryQueue {
    /// Awaiting review, oldest payment date first
    pub pending: Vec<QueueEntry>,
    /// Validated recently, latest review first
    pub validated: Vec<QueueEntry>,
    /// Rejected recently, latest review first
    pub rejected: Vec<QueueEntry>,
}

impl PipelineService {
    /// Confirm a pending payment.
    ///
    /// # Errors
    ///
    /// - [`CrmError::Permission`] unless the actor is treasury or admin
    /// - [`CrmError::Conflict`] when the payment was already reviewed
    /// - [`CrmError::Validation`] for a missing reference or an unexplained correction
    #[tracing::instrument(skip(self, input), fields(actor = %actor.user_id))]
    pub async fn validate_payment(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: PaymentId,
        input: PaymentValidation,
    ) -> Result<Payment> {
        self.review(
            event_id,
            id,
            ReviewAction::Validate {
                external_reference: input.external_reference,
                corrected_amount: input.corrected_amount,
                change_note: input.change_note,
                reviewer: *actor,
            },
        )
        .await
    }

    /// Refuse a pending payment.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_payment`], with [`CrmError::Validation`] for an empty reason.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn reject_payment(
        &self,
        actor: &Actor,
        event_id: EventId,
        id: PaymentId,
        reason: String,
    ) -> Result<Payment> {
        self.review(
            event_id,
            id,
            ReviewAction::Reject {
                reason,
                reviewer: *actor,
            },
        )
        .await
    }

    async fn review(&self, event_id: EventId, id: PaymentId, action: ReviewAction) -> Result<Payment> {
        let mut payment = self
            .store
            .payment(event_id, id)
            .await?
            .ok_or_else(|| CrmError::not_found("payment", id))?;

        let env = ReviewEnvironment::new(Arc::clone(&self.clock));
        let effects = PaymentReviewReducer::new().reduce(&mut payment, action, &env)?;
        self.store.update_pending_payment(&payment).await?;

        for effect in effects {
            match effect {
                ReviewEffect::Reviewed(state) => {
                    metrics::counter!("eventdesk.payments.reviewed", "outcome" => state.as_str())
                        .increment(1);
                    tracing::info!(payment_id = %payment.id, event_id = %event_id, outcome = state.as_str(), "Payment reviewed");
                }
                ReviewEffect::AmountCorrected {
                    original,
                    corrected,
                } => {
                    tracing::info!(payment_id = %payment.id, original = %original, corrected = %corrected, "Payment amount corrected");
                }
            }
        }
        Ok(payment)
    }

    /// Pending payments plus those reviewed in the last 30 days.
    ///
    /// # Errors
    ///
    /// [`CrmError::Permission`] unless the actor is treasury or admin.
    #[tracing::instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn treasury_queue(&self, actor: &Actor) -> Result<TreasuryQueue> {
        if !actor.can_review_payments() {
            return Err(CrmError::Permission("treasury only".to_string()));
        }

        let since = self.clock.now() - Duration::days(TREASURY_HISTORY_DAYS);
        let recent = |p: &Payment| p.reviewed_at.is_some_and(|at| at >= since);

        let mut pending = self.store.payments_in_review_state(ReviewState::Pending).await?;
        pending.sort_by_key(|p| (p.payment_date, p.created_at));
        let mut validated: Vec<Payment> = self
            .store
            .payments_in_review_state(ReviewState::Validated)
            .await?
            .into_iter()
            .filter(recent)
            .collect();
        validated.sort_by_key(|p| std::cmp::Reverse(p.reviewed_at));
        let mut rejected: Vec<Payment> = self
            .store
            .payments_in_review_state(ReviewState::Rejected)
            .await?
            .into_iter()
            .filter(recent)
            .collect();
        rejected.sort_by_key(|p| std::cmp::Reverse(p.reviewed_at));

        let mut events: Vec<Event> = Vec::new();
        for event_id in pending
            .iter()
            .chain(&validated)
            .chain(&rejected)
            .map(|p| p.event_id)
        {
            if events.iter().any(|e| e.id == event_id) {
                continue;
            }
            if let Some(event) = self.store.event(event_id).await? {
                events.push(event);
            }
        }
        let titles: HashMap<EventId, String> = self.titles_for(&events).await?;
        let entries = |payments: Vec<Payment>| -> Vec<QueueEntry> {
            payments
                .into_iter()
                .map(|payment| QueueEntry {
                    title: titles.get(&payment.event_id).cloned().unwrap_or_default(),
                    payment,
                })
                .collect()
        };

        Ok(TreasuryQueue {
            pending: entries(pending),
            validated: entries(validated),
            rejected: entries(rejected),
        })
    }
}
