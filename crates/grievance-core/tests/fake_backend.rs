//! In-memory ticket service shared by the scenario tests.
//!
//! Included from sibling test files with `#[path = "fake_backend.rs"]`.

#![allow(dead_code)]

use std::collections::BTreeMap;

use grievance_core::commit::ApprovalBackend;
use grievance_core::error::BackendError;
use grievance_core::model::payload::{AdjudicationCommit, CommitPayload, TicketPayload};
use grievance_core::model::status::TicketStatus;
use serde_json::{Value, json};

/// Stores tickets by id and settles them the way the service does: an
/// accepted approval closes the ticket and persists the per-field flags.
#[derive(Debug, Default)]
pub struct FakeBackend {
    pub tickets: BTreeMap<String, TicketPayload>,
    pub approvals: Vec<(String, CommitPayload)>,
    pub adjudications: Vec<(String, AdjudicationCommit)>,
    pub fail_next: Option<BackendError>,
    pub fetches: usize,
}

impl FakeBackend {
    pub fn with_ticket(ticket: Value) -> Self {
        let payload: TicketPayload = serde_json::from_value(ticket).expect("fixture ticket must parse");
        let mut backend = Self::default();
        backend.tickets.insert(payload.id.clone(), payload);
        backend
    }

    fn ticket_mut(&mut self, ticket_id: &str) -> Result<&mut TicketPayload, BackendError> {
        self.tickets
            .get_mut(ticket_id)
            .ok_or_else(|| BackendError::NotFound(ticket_id.to_string()))
    }
}

fn set_flag(details: &mut serde_json::Map<String, Value>, name: &str, approved: bool) {
    if let Some(Value::Object(entry)) = details.get_mut(name) {
        entry.insert("approveStatus".into(), Value::Bool(approved));
    }
}

fn id_list(details: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    details
        .get(key)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

impl ApprovalBackend for FakeBackend {
    fn fetch_ticket(&mut self, ticket_id: &str) -> Result<TicketPayload, BackendError> {
        self.fetches += 1;
        self.tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(ticket_id.to_string()))
    }

    fn approve(&mut self, ticket_id: &str, payload: &CommitPayload) -> Result<(), BackendError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        let ticket = self.ticket_mut(ticket_id)?;
        if let Some(map) = payload.scalar_approvals() {
            for (name, approved) in map {
                set_flag(&mut ticket.ticket_details, name, *approved);
            }
        }
        if let Some(approved) = payload.approve_status {
            ticket
                .ticket_details
                .insert("approveStatus".into(), Value::Bool(approved));
        }
        ticket.status = TicketStatus::Closed;
        self.approvals.push((ticket_id.to_string(), payload.clone()));
        Ok(())
    }

    fn approve_needs_adjudication(
        &mut self,
        ticket_id: &str,
        commit: &AdjudicationCommit,
    ) -> Result<(), BackendError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        let ticket = self.ticket_mut(ticket_id)?;
        let mut duplicates = id_list(&ticket.ticket_details, "selectedDuplicates");
        let mut distinct = id_list(&ticket.ticket_details, "selectedDistinct");
        let ids = commit.individual_ids();
        duplicates.retain(|id| !ids.contains(id));
        distinct.retain(|id| !ids.contains(id));
        match commit {
            AdjudicationCommit::DuplicateIndividualIds(_) => duplicates.extend_from_slice(ids),
            AdjudicationCommit::DistinctIndividualIds(_) => distinct.extend_from_slice(ids),
            AdjudicationCommit::ClearIndividualIds(_) => {}
        }
        ticket
            .ticket_details
            .insert("selectedDuplicates".into(), json!(duplicates));
        ticket
            .ticket_details
            .insert("selectedDistinct".into(), json!(distinct));
        self.adjudications.push((ticket_id.to_string(), commit.clone()));
        Ok(())
    }
}
