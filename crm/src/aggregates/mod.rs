//! Aggregates (reducers) of the pipeline.
//!
//! - [`event`]: lifecycle of an event (derivation, manual transitions, soft delete)
//! - [`payment`]: treasury review of a payment

pub mod event;
pub mod payment;

pub use event::{EventAction, EventReducer, LifecycleEffect, LifecycleEnvironment, StateRequest};
pub use payment::{PaymentReviewReducer, ReviewAction, ReviewEffect, ReviewEnvironment};
