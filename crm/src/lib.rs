//! # EventDesk CRM
//!
//! Commercial pipeline of a venue group: inquiries move through a closed set of states
//! until they are won, lost or deleted, with every move recorded in an append-only
//! ledger.
//!
//! ## Layers
//!
//! - **Pure core**: [`types`], [`policy`], [`aggregates`], [`ledger`], [`sla`],
//!   [`precheck`] and [`reporting`]. No I/O; time comes from a
//!   [`Clock`](eventdesk_core::environment::Clock).
//! - **Seams**: [`store::CrmStore`] for persistence and [`integrations`] for object
//!   storage and document rendering.
//! - **Operations**: [`service::PipelineService`] loads, checks permissions, runs the
//!   aggregates and commits atomically.
//!
//! ## Example
//!
//! ```no_run
//! use eventdesk_core::environment::SystemClock;
//! use eventdesk_crm::{Config, InMemoryCrmStore, PipelineService};
//! use std::sync::Arc;
//!
//! # async fn example() -> eventdesk_crm::Result<()> {
//! let service = PipelineService::new(
//!     Arc::new(InMemoryCrmStore::new()),
//!     Arc::new(SystemClock::utc()),
//!     Config::default(),
//! )
//! .await?;
//! let report = service.run_sla_sweep().await?;
//! println!("recorded {} violations", report.changed);
//! # Ok(())
//! # }
//! ```

pub mod aggregates;
pub mod config;
pub mod error;
pub mod integrations;
pub mod ledger;
pub mod policy;
pub mod precheck;
pub mod reporting;
pub mod service;
pub mod sla;
pub mod store;
pub mod types;

pub use aggregates::StateRequest;
pub use config::Config;
pub use error::{CrmError, Result};
pub use service::PipelineService;
pub use store::{CrmStore, InMemoryCrmStore};
pub use types::{Actor, Event, EventDraft, EventId, EventPatch, EventState, Role};
