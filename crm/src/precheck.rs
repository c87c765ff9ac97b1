//! Pre-check ledger and financial aggregation.
//!
//! A pre-check is the itemized pre-invoice of an approved event: concepts (quantity ×
//! unit price), additionals (fixed amounts) and payments. Only validated payments count
//! toward the paid total.

use crate::error::{CrmError, Result};
use crate::types::{
    Actor, AdditionalId, ConceptId, Event, EventId, EventState, PaymentId, UserId,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

// ============================================================================
// Line items
// ============================================================================

/// Grouping of concepts and additionals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecheckCategory {
    /// Food and drinks
    Gastronomy,
    /// Room hire
    Venue,
    /// Sound, lights, screens
    Technical,
    /// Staff and third-party services
    Services,
    /// Free text in `category_other`
    Other,
}

impl PrecheckCategory {
    /// Convert category to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gastronomy => "gastronomy",
            Self::Venue => "venue",
            Self::Technical => "technical",
            Self::Services => "services",
            Self::Other => "other",
        }
    }

    /// Parse category from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown categories.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "gastronomy" => Ok(Self::Gastronomy),
            "venue" => Ok(Self::Venue),
            "technical" => Ok(Self::Technical),
            "services" => Ok(Self::Services),
            "other" => Ok(Self::Other),
            _ => Err(CrmError::validation("category", format!("unknown category {s}"))),
        }
    }
}

/// A priced line: quantity × unit price
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Identifier
    pub id: ConceptId,
    /// Owning event
    pub event_id: EventId,
    /// Category
    pub category: PrecheckCategory,
    /// Label when the category is `Other`
    pub category_other: Option<String>,
    /// What is being charged
    pub description: String,
    /// Units
    pub quantity: Decimal,
    /// Price per unit, negative for discounts
    pub unit_price: Decimal,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// `quantity × unit_price`
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Input for creating or replacing a concept
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDraft {
    /// Category
    pub category: PrecheckCategory,
    /// Label when the category is `Other`
    pub category_other: Option<String>,
    /// What is being charged
    pub description: String,
    /// Units, 1 when absent
    pub quantity: Option<Decimal>,
    /// Price per unit
    pub unit_price: Decimal,
}

impl ConceptDraft {
    /// Validate and build the concept
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for an empty description, a missing `Other`
    /// label, or a non-positive quantity.
    pub fn into_concept(self, id: ConceptId, event_id: EventId, now: DateTime<Utc>) -> Result<Concept> {
        let description = required_text("description", &self.description)?;
        let category_other = other_label(self.category, self.category_other)?;
        let quantity = self.quantity.unwrap_or(Decimal::ONE);
        if quantity <= Decimal::ZERO {
            return Err(CrmError::validation("quantity", "quantity must be positive"));
        }

        Ok(Concept {
            id,
            event_id,
            category: self.category,
            category_other,
            description,
            quantity,
            unit_price: self.unit_price,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A fixed-amount line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Additional {
    /// Identifier
    pub id: AdditionalId,
    /// Owning event
    pub event_id: EventId,
    /// Category
    pub category: PrecheckCategory,
    /// Label when the category is `Other`
    pub category_other: Option<String>,
    /// What is being charged
    pub description: String,
    /// Amount, negative for discounts
    pub amount: Decimal,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing an additional
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalDraft {
    /// Category
    pub category: PrecheckCategory,
    /// Label when the category is `Other`
    pub category_other: Option<String>,
    /// What is being charged
    pub description: String,
    /// Amount
    pub amount: Decimal,
}

impl AdditionalDraft {
    /// Validate and build the additional
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for an empty description or a missing `Other`
    /// label.
    pub fn into_additional(
        self,
        id: AdditionalId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> Result<Additional> {
        let description = required_text("description", &self.description)?;
        let category_other = other_label(self.category, self.category_other)?;

        Ok(Additional {
            id,
            event_id,
            category: self.category,
            category_other,
            description,
            amount: self.amount,
            created_at: now,
            updated_at: now,
        })
    }
}

// ============================================================================
// Payments
// ============================================================================

/// How the client paid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Cash
    Cash,
    /// Bank transfer
    Transfer,
    /// Credit or debit card
    Card,
    /// Cheque
    Check,
    /// Anything else
    Other,
}

impl PaymentMethod {
    /// Convert method to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Transfer => "transfer",
            Self::Card => "card",
            Self::Check => "check",
            Self::Other => "other",
        }
    }

    /// Parse method from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown methods.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            "card" => Ok(Self::Card),
            "check" => Ok(Self::Check),
            "other" => Ok(Self::Other),
            _ => Err(CrmError::validation("method", format!("unknown payment method {s}"))),
        }
    }
}

/// Treasury review state of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewState {
    /// Waiting for treasury
    Pending,
    /// Confirmed; counts toward the balance
    Validated,
    /// Refused
    Rejected,
}

impl ReviewState {
    /// Convert review state to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
        }
    }

    /// Parse review state from its stored string representation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for unknown states.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "validated" => Ok(Self::Validated),
            "rejected" => Ok(Self::Rejected),
            _ => Err(CrmError::validation("review_state", format!("unknown review state {s}"))),
        }
    }
}

/// Stored receipt file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Opaque object storage key
    pub key: String,
    /// Name of the uploaded file
    pub filename: String,
}

/// A payment registered against an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier
    pub id: PaymentId,
    /// Owning event
    pub event_id: EventId,
    /// How it was paid
    pub method: PaymentMethod,
    /// Amount, possibly corrected by treasury
    pub amount: Decimal,
    /// Date the client paid
    pub payment_date: NaiveDate,
    /// Date the money was deposited
    pub deposit_date: Option<NaiveDate>,
    /// Date the money cleared
    pub clearing_date: Option<NaiveDate>,
    /// Proof of payment
    pub receipt: Option<Receipt>,
    /// Free notes
    pub notes: Option<String>,
    /// Review state
    pub review: ReviewState,
    /// Reference number of the accounting system entry
    pub external_reference: Option<String>,
    /// Reviewer
    pub reviewed_by: Option<UserId>,
    /// Review instant
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Why treasury refused it
    pub rejection_reason: Option<String>,
    /// Amount as registered, kept when treasury corrected it
    pub original_amount: Option<Decimal>,
    /// Why treasury corrected the amount
    pub amount_change_note: Option<String>,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Last modification instant
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Whether the payment still awaits review
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.review, ReviewState::Pending)
    }

    /// Whether the payment counts toward the paid total
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        matches!(self.review, ReviewState::Validated)
    }
}

/// Input for registering or editing a payment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDraft {
    /// How it was paid
    pub method: PaymentMethod,
    /// Amount
    pub amount: Decimal,
    /// Date the client paid
    pub payment_date: NaiveDate,
    /// Deposit date
    pub deposit_date: Option<NaiveDate>,
    /// Clearing date
    pub clearing_date: Option<NaiveDate>,
    /// Notes
    pub notes: Option<String>,
}

impl PaymentDraft {
    fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(CrmError::validation("amount", "amount must be positive"));
        }
        Ok(())
    }

    /// Validate and build a pending payment
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for a non-positive amount.
    pub fn into_payment(self, id: PaymentId, event_id: EventId, now: DateTime<Utc>) -> Result<Payment> {
        self.validate()?;
        Ok(Payment {
            id,
            event_id,
            method: self.method,
            amount: self.amount,
            payment_date: self.payment_date,
            deposit_date: self.deposit_date,
            clearing_date: self.clearing_date,
            receipt: None,
            notes: self.notes,
            review: ReviewState::Pending,
            external_reference: None,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            original_amount: None,
            amount_change_note: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Validate and overwrite the editable fields of `payment`
    ///
    /// # Errors
    ///
    /// Returns [`CrmError::Validation`] for a non-positive amount.
    pub fn apply_to(self, payment: &mut Payment, now: DateTime<Utc>) -> Result<()> {
        self.validate()?;
        payment.method = self.method;
        payment.amount = self.amount;
        payment.payment_date = self.payment_date;
        payment.deposit_date = self.deposit_date;
        payment.clearing_date = self.clearing_date;
        payment.notes = self.notes;
        payment.updated_at = now;
        Ok(())
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Every line of an event's pre-check
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precheck {
    /// Concepts
    pub concepts: Vec<Concept>,
    /// Additionals
    pub additionals: Vec<Additional>,
    /// Payments
    pub payments: Vec<Payment>,
}

impl Precheck {
    /// Whether any concept or additional exists
    #[must_use]
    pub fn has_items(&self) -> bool {
        !self.concepts.is_empty() || !self.additionals.is_empty()
    }
}

/// Financial totals of a pre-check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecheckSummary {
    /// Σ quantity × unit price
    pub concepts_total: Decimal,
    /// Σ additional amounts
    pub additionals_total: Decimal,
    /// Concepts plus additionals
    pub subtotal: Decimal,
    /// VAT, zero unless invoiced
    pub tax: Decimal,
    /// Subtotal plus tax
    pub total: Decimal,
    /// Σ validated payments
    pub paid: Decimal,
    /// Total minus paid
    pub balance: Decimal,
    /// Number of concepts
    pub concept_count: usize,
    /// Number of additionals
    pub additional_count: usize,
    /// Number of payments, any review state
    pub payment_count: usize,
    /// Whether any concept or additional exists
    pub has_items: bool,
}

/// Derive the totals of `precheck`.
///
/// Tax is `subtotal × vat_rate` rounded to cents (half away from zero) when `invoiced`.
/// Pending and rejected payments are ignored.
#[must_use]
pub fn compute_summary(precheck: &Precheck, invoiced: bool, vat_rate: Decimal) -> PrecheckSummary {
    let concepts_total: Decimal = precheck.concepts.iter().map(Concept::subtotal).sum();
    let additionals_total: Decimal = precheck.additionals.iter().map(|a| a.amount).sum();
    let subtotal = concepts_total + additionals_total;

    let tax = if invoiced {
        (subtotal * vat_rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    };
    let total = subtotal + tax;

    let paid: Decimal = precheck
        .payments
        .iter()
        .filter(|p| p.is_validated())
        .map(|p| p.amount)
        .sum();

    PrecheckSummary {
        concepts_total,
        additionals_total,
        subtotal,
        tax,
        total,
        paid,
        balance: total - paid,
        concept_count: precheck.concepts.len(),
        additional_count: precheck.additionals.len(),
        payment_count: precheck.payments.len(),
        has_items: precheck.has_items(),
    }
}

// ============================================================================
// Edit gates
// ============================================================================

/// Whether concepts and additionals of `event` may change on `today`.
///
/// Open while `APPROVED`, and while `CONCLUDED` up to `grace_days` after the event date.
#[must_use]
pub fn items_open(event: &Event, today: NaiveDate, grace_days: i64) -> bool {
    match event.state {
        EventState::Approved => true,
        EventState::Concluded => event
            .event_date
            .is_none_or(|date| (today - date).num_days() <= grace_days),
        _ => false,
    }
}

/// Whether payments of `event` may be registered or edited
#[must_use]
pub const fn payments_open(event: &Event) -> bool {
    matches!(event.state, EventState::Approved | EventState::Concluded)
}

/// Read access: admins and treasury see every pre-check, salespeople their own.
///
/// # Errors
///
/// Returns [`CrmError::Permission`] otherwise.
pub fn ensure_can_read(actor: &Actor, event: &Event) -> Result<()> {
    if actor.can_review_payments() || actor.owns_or_admin(event) {
        Ok(())
    } else {
        Err(CrmError::Permission(
            "pre-check belongs to another salesperson".to_string(),
        ))
    }
}

/// Edit access to concepts, additionals and the invoiced flag.
///
/// # Errors
///
/// Returns [`CrmError::Permission`] when the actor neither administers nor owns the
/// event, and [`CrmError::Conflict`] when the pre-check is closed.
pub fn ensure_items_editable(actor: &Actor, event: &Event, today: NaiveDate, grace_days: i64) -> Result<()> {
    ensure_owner(actor, event)?;
    if !payments_open(event) {
        return Err(CrmError::Conflict(
            "pre-check is only available for approved or concluded events".to_string(),
        ));
    }
    if !items_open(event, today, grace_days) {
        return Err(CrmError::Conflict(format!(
            "pre-check closed {grace_days} days after the event"
        )));
    }
    Ok(())
}

/// Edit access to payments.
///
/// # Errors
///
/// Returns [`CrmError::Permission`] when the actor neither administers nor owns the
/// event, and [`CrmError::Conflict`] when the event is not approved or concluded.
pub fn ensure_payments_editable(actor: &Actor, event: &Event) -> Result<()> {
    ensure_owner(actor, event)?;
    if !payments_open(event) {
        return Err(CrmError::Conflict(
            "payments are only available for approved or concluded events".to_string(),
        ));
    }
    Ok(())
}

/// A payment may only be edited or removed before review.
///
/// # Errors
///
/// Returns [`CrmError::Conflict`] for reviewed payments.
pub fn ensure_pending(payment: &Payment) -> Result<()> {
    if payment.is_pending() {
        Ok(())
    } else {
        Err(CrmError::Conflict(format!(
            "payment {} was already {}",
            payment.id,
            payment.review.as_str()
        )))
    }
}

fn ensure_owner(actor: &Actor, event: &Event) -> Result<()> {
    if actor.owns_or_admin(event) {
        Ok(())
    } else {
        Err(CrmError::Permission(
            "pre-check belongs to another salesperson".to_string(),
        ))
    }
}

fn required_text(field: &'static str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CrmError::validation(field, "must not be empty"));
    }
    Ok(value.to_string())
}

fn other_label(category: PrecheckCategory, label: Option<String>) -> Result<Option<String>> {
    let label = label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
    match (category, label) {
        (PrecheckCategory::Other, None) => Err(CrmError::validation(
            "category_other",
            "describe the category",
        )),
        (PrecheckCategory::Other, label) => Ok(label),
        _ => Ok(None),
    }
}
