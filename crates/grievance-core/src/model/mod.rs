//! Ticket vocabulary: statuses, field kinds and the service's wire shapes.

pub mod field;
pub mod payload;
pub mod status;
