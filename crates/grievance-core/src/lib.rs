//! grievance-core library.
//!
//! Review engine for data-change grievance tickets: decompose a fetched
//! ticket into per-field and per-record diffs, track which of them the
//! reviewer approves, and commit the decision back to the ticket service.
//! Needs-adjudication tickets get their own duplicate/distinct resolution.

pub mod adjudication;
pub mod changeset;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod selection;

/// # Conventions
///
/// - **Errors**: typed `thiserror` enums in the library, each mapping to an
///   [`error::ErrorCode`]; `anyhow::Result` only for config file I/O.
/// - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`) with
///   structured fields such as `ticket_id`.
/// - **Service access**: only through [`commit::ApprovalBackend`].
pub use changeset::TicketChangeSet;
pub use commit::{ApprovalBackend, ReviewSession};
pub use selection::ApprovalSelection;
