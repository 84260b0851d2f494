//! `gv approve` — select changes of a ticket and commit the decision.
//!
//! Selection starts from the approvals the service already recorded. Each
//! `--select` adds one change; `--all` takes the fast path and selects every
//! change. A partial approval needs `--yes`, because unselected changes are
//! rejected when the ticket closes.

use crate::backend::{FileBackend, read_ticket};
use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode};
use anyhow::Context;
use clap::Args;
use grievance_core::changeset::ChangeRef;
use grievance_core::commit::{CommitReceipt, Confirmation, ReviewSession};
use grievance_core::config::ProjectConfig;
use grievance_core::error::ApprovalError;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
#[command(
    about = "Approve selected changes of a ticket",
    long_about = "Select changes of a FOR_APPROVAL ticket and send one approval commit.\n\n\
                  Changes are referenced as CATEGORY:ID, as listed by `gv show`.",
    after_help = "EXAMPLES:\n    # Approve two scalar fields, rejecting the rest\n    \
                  gv approve ticket.json --select scalar:sex --select scalar:phone_no --yes\n\n\
                  # Approve everything\n    gv approve ticket.json --all\n\n\
                  # Keep the request for delivery\n    gv approve ticket.json --all --outbox out.jsonl"
)]
pub struct ApproveArgs {
    /// Path to the ticket JSON (a `GET ticket(id)` response).
    pub ticket: PathBuf,

    /// Change to approve, e.g. `scalar:sex`, `documents-edit:0`, `roles:1`, `ticket`.
    #[arg(long = "select", value_name = "CATEGORY:ID")]
    pub select: Vec<ChangeRef>,

    /// Approve every change of the ticket.
    #[arg(long)]
    pub all: bool,

    /// Confirm that unselected changes are rejected.
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Append the commit request as one JSON line to this file.
    #[arg(long, value_name = "FILE")]
    pub outbox: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct ApproveOutput {
    pub ticket_id: String,
    pub approved: usize,
    pub implicitly_rejected: usize,
    pub request: Value,
}

fn select_changes(session: &mut ReviewSession, args: &ApproveArgs) -> Result<(), ApprovalError> {
    if args.all {
        session.select_everything()?;
    }
    for change in &args.select {
        session.select_all(change.category, [change.id.clone()])?;
    }
    debug!(
        selected = session.selection().selected_count(),
        total = session.change_set().total_change_count(),
        "selection ready"
    );
    Ok(())
}

fn approve(
    args: &ApproveArgs,
    project: &ProjectConfig,
    backend: &mut FileBackend,
    ticket_id: &str,
) -> Result<CommitReceipt, ApprovalError> {
    let mut session = ReviewSession::open(backend, ticket_id, &project.registry(), project.schema_mode())?;
    select_changes(&mut session, args)?;
    let confirmation = if args.yes {
        Confirmation::Confirmed
    } else {
        Confirmation::Unconfirmed
    };
    session.commit(backend, confirmation)
}

/// Execute `gv approve <ticket.json>`.
///
/// # Errors
///
/// Returns an error if the ticket cannot be loaded, the commit is refused
/// by a guard or the service, or output rendering fails.
pub fn run_approve(args: &ApproveArgs, output: OutputMode, project: &ProjectConfig) -> anyhow::Result<()> {
    let payload = read_ticket(&args.ticket).context("loading ticket")?;
    let mut backend = FileBackend::new(&args.ticket, args.outbox.clone());
    let receipt = match approve(args, project, &mut backend, &payload.id) {
        Ok(receipt) => receipt,
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            anyhow::bail!("{err}");
        }
    };

    let result = ApproveOutput {
        ticket_id: receipt.ticket_id,
        approved: receipt.approved,
        implicitly_rejected: receipt.implicitly_rejected,
        request: backend.sent().last().cloned().unwrap_or(Value::Null),
    };
    render_mode(
        output,
        &result,
        |r, w| {
            writeln!(
                w,
                "{}  approved={}  rejected={}",
                r.ticket_id, r.approved, r.implicitly_rejected
            )
        },
        |r, w| {
            pretty_section(w, &format!("Approved ticket {}", r.ticket_id))?;
            pretty_kv(w, "Approved", r.approved.to_string())?;
            pretty_kv(w, "Rejected", r.implicitly_rejected.to_string())?;
            if let Some(path) = &args.outbox {
                pretty_kv(w, "Outbox", path.display().to_string())?;
            }
            Ok(())
        },
    )
}
