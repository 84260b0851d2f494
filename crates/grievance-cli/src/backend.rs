//! File-backed ticket service.
//!
//! Tickets are read from a JSON file holding one `GET ticket(id)` response.
//! Writes are not applied to that file; each request is appended as one JSON
//! line to the outbox (when configured) and kept for the command's output.

use anyhow::{Context, Result};
use grievance_core::commit::ApprovalBackend;
use grievance_core::error::BackendError;
use grievance_core::model::payload::{AdjudicationCommit, CommitPayload, TicketPayload};
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read and parse a ticket file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a ticket payload.
pub fn read_ticket(path: &Path) -> Result<TicketPayload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[derive(Debug)]
pub struct FileBackend {
    ticket_path: PathBuf,
    outbox: Option<PathBuf>,
    sent: Vec<Value>,
}

impl FileBackend {
    pub fn new(ticket_path: impl Into<PathBuf>, outbox: Option<PathBuf>) -> Self {
        Self {
            ticket_path: ticket_path.into(),
            outbox,
            sent: Vec::new(),
        }
    }

    /// Requests delivered so far, oldest first.
    pub fn sent(&self) -> &[Value] {
        &self.sent
    }

    fn deliver(&mut self, operation: &str, ticket_id: &str, body: &impl Serialize) -> Result<(), BackendError> {
        let payload = serde_json::to_value(body).map_err(|e| BackendError::rejected(e.to_string()))?;
        let request = json!({
            "operation": operation,
            "ticketId": ticket_id,
            "payload": payload,
        });

        if let Some(path) = &self.outbox {
            let unreachable = |e: std::io::Error| BackendError::Transient(format!("{}: {e}", path.display()));
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(unreachable)?;
            writeln!(file, "{request}").map_err(unreachable)?;
            debug!(outbox = %path.display(), operation, "request written");
        }

        self.sent.push(request);
        Ok(())
    }
}

impl ApprovalBackend for FileBackend {
    fn fetch_ticket(&mut self, ticket_id: &str) -> Result<TicketPayload, BackendError> {
        let payload = read_ticket(&self.ticket_path).map_err(|e| BackendError::Transient(format!("{e:#}")))?;
        if payload.id != ticket_id {
            return Err(BackendError::NotFound(ticket_id.to_string()));
        }
        Ok(payload)
    }

    fn approve(&mut self, ticket_id: &str, payload: &CommitPayload) -> Result<(), BackendError> {
        self.deliver("approve", ticket_id, payload)
    }

    fn approve_needs_adjudication(
        &mut self,
        ticket_id: &str,
        commit: &AdjudicationCommit,
    ) -> Result<(), BackendError> {
        self.deliver("approveNeedsAdjudication", ticket_id, commit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ticket(dir: &Path) -> PathBuf {
        let path = dir.join("ticket.json");
        std::fs::write(
            &path,
            r#"{"id": "GRV-1", "status": "FOR_APPROVAL", "issueType": "NEEDS_ADJUDICATION", "ticketDetails": {}}"#,
        )
        .expect("write ticket");
        path
    }

    #[test]
    fn fetch_checks_ticket_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut backend = FileBackend::new(write_ticket(dir.path()), None);
        assert_eq!(backend.fetch_ticket("GRV-1").expect("fetch").id, "GRV-1");
        assert_eq!(
            backend.fetch_ticket("GRV-2"),
            Err(BackendError::NotFound("GRV-2".into()))
        );
    }

    #[test]
    fn requests_are_appended_to_outbox() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = dir.path().join("outbox.jsonl");
        let mut backend = FileBackend::new(write_ticket(dir.path()), Some(outbox.clone()));

        let commit = AdjudicationCommit::ClearIndividualIds(vec!["IND-A".into()]);
        backend.approve_needs_adjudication("GRV-1", &commit).expect("deliver");
        backend.approve_needs_adjudication("GRV-1", &commit).expect("deliver");

        let content = std::fs::read_to_string(&outbox).expect("read outbox");
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["operation"], "approveNeedsAdjudication");
        assert_eq!(lines[0]["payload"], json!({"clearIndividualIds": ["IND-A"]}));
        assert_eq!(backend.sent().len(), 2);
    }

    #[test]
    fn unwritable_outbox_is_transient() {
        let dir = tempfile::tempdir().expect("tempdir");
        let outbox = dir.path().join("missing/outbox.jsonl");
        let mut backend = FileBackend::new(write_ticket(dir.path()), Some(outbox));
        let err = backend
            .approve("GRV-1", &CommitPayload::default())
            .expect_err("missing directory must fail");
        assert!(matches!(err, BackendError::Transient(_)));
        assert!(backend.sent().is_empty());
    }
}
