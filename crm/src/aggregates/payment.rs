//! Payment review aggregate.
//!
//! Treasury moves each payment from `pending` to `validated` or `rejected`, both final.
//! Only validated payments count toward an event's balance.

use crate::error::CrmError;
use crate::precheck::{Payment, ReviewState, ensure_pending};
use crate::types::Actor;
use eventdesk_core::{environment::Clock, reducer::Effects, reducer::Reducer, smallvec};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Actions accepted by [`PaymentReviewReducer`]
#[derive(Clone, Debug)]
pub enum ReviewAction {
    /// Confirm the payment against the accounting system
    Validate {
        /// Reference number of the accounting entry
        external_reference: String,
        /// Amount actually received, when it differs from the registered one
        corrected_amount: Option<Decimal>,
        /// Why the amount was corrected
        change_note: Option<String>,
        /// Reviewer
        reviewer: Actor,
    },
    /// Refuse the payment
    Reject {
        /// Why
        reason: String,
        /// Reviewer
        reviewer: Actor,
    },
}

/// Facts produced by a review
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewEffect {
    /// The payment reached a final review state
    Reviewed(ReviewState),
    /// The reviewer replaced the registered amount
    AmountCorrected {
        /// Amount as registered
        original: Decimal,
        /// Amount after review
        corrected: Decimal,
    },
}

/// Dependencies of [`PaymentReviewReducer`]
#[derive(Clone)]
pub struct ReviewEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl ReviewEnvironment {
    /// Creates a new `ReviewEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer for the treasury review of a single payment
#[derive(Clone, Debug, Default)]
pub struct PaymentReviewReducer;

impl PaymentReviewReducer {
    /// Creates a new `PaymentReviewReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for PaymentReviewReducer {
    type State = Payment;
    type Action = ReviewAction;
    type Environment = ReviewEnvironment;
    type Effect = ReviewEffect;
    type Error = CrmError;

    fn reduce(
        &self,
        payment: &mut Payment,
        action: ReviewAction,
        env: &ReviewEnvironment,
    ) -> Result<Effects<ReviewEffect>, CrmError> {
        match action {
            ReviewAction::Validate {
                external_reference,
                corrected_amount,
                change_note,
                reviewer,
            } => {
                ensure_reviewer(&reviewer)?;
                ensure_pending(payment)?;

                let reference = external_reference.trim();
                if reference.is_empty() {
                    return Err(CrmError::validation(
                        "external_reference",
                        "a validated payment needs its accounting reference",
                    ));
                }

                let mut effects = Effects::new();
                if let Some(corrected) = corrected_amount.filter(|a| *a != payment.amount) {
                    if corrected <= Decimal::ZERO {
                        return Err(CrmError::validation("amount", "amount must be positive"));
                    }
                    let note = change_note
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            CrmError::validation(
                                "amount_change_note",
                                "explain why the amount changed",
                            )
                        })?;

                    effects.push(ReviewEffect::AmountCorrected {
                        original: payment.amount,
                        corrected,
                    });
                    payment.original_amount = Some(payment.amount);
                    payment.amount_change_note = Some(note.to_string());
                    payment.amount = corrected;
                }

                let now = env.clock.now();
                payment.review = ReviewState::Validated;
                payment.external_reference = Some(reference.to_string());
                payment.reviewed_by = Some(reviewer.user_id);
                payment.reviewed_at = Some(now);
                payment.updated_at = now;

                effects.push(ReviewEffect::Reviewed(ReviewState::Validated));
                Ok(effects)
            }
            ReviewAction::Reject { reason, reviewer } => {
                ensure_reviewer(&reviewer)?;
                ensure_pending(payment)?;

                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(CrmError::validation(
                        "rejection_reason",
                        "a rejected payment needs a reason",
                    ));
                }

                let now = env.clock.now();
                payment.review = ReviewState::Rejected;
                payment.rejection_reason = Some(reason.to_string());
                payment.reviewed_by = Some(reviewer.user_id);
                payment.reviewed_at = Some(now);
                payment.updated_at = now;

                Ok(smallvec![ReviewEffect::Reviewed(ReviewState::Rejected)])
            }
        }
    }
}

fn ensure_reviewer(reviewer: &Actor) -> Result<(), CrmError> {
    if reviewer.can_review_payments() {
        Ok(())
    } else {
        Err(CrmError::Permission(
            "only treasury or admins review payments".to_string(),
        ))
    }
}
