//! `gv show` — decompose a ticket and list its proposed changes.
//!
//! Data-change tickets list every diff by category with its noop flag and
//! the approval recorded so far. Needs-adjudication tickets list the
//! candidates with their marks and similarity to the golden record.

use crate::backend::read_ticket;
use crate::output::{CliError, OutputMode, pretty_kv, pretty_rule, pretty_section, render_error, render_mode};
use anyhow::Context;
use clap::Args;
use grievance_core::adjudication::{AdjudicationState, Mark};
use grievance_core::changeset::{ChangeCategory, ChangeId, ChangeRef, TicketChangeSet};
use grievance_core::commit::ReviewSession;
use grievance_core::config::ProjectConfig;
use grievance_core::diff::{RecordChange, RecordOperation, SnapshotField};
use grievance_core::model::payload::TicketPayload;
use grievance_core::model::status::{IssueType, TicketStatus};
use grievance_core::selection::ApprovalSelection;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(
    about = "Show the proposed changes of a ticket",
    after_help = "EXAMPLES:\n    # List diffs of a data update ticket\n    gv show ticket.json\n\n\
                  # Machine-readable output\n    gv show ticket.json --json"
)]
pub struct ShowArgs {
    /// Path to the ticket JSON (a `GET ticket(id)` response).
    pub ticket: PathBuf,
}

/// One proposed change as listed by `gv show`.
#[derive(Debug, Serialize)]
pub struct ChangeRow {
    /// `category:id` reference accepted by `gv approve --select`.
    pub change: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub previous: String,
    pub proposed: String,
    pub noop: bool,
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct ReviewView {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub issue_type: IssueType,
    pub editable: bool,
    pub total_changes: usize,
    pub selected: usize,
    pub changes: Vec<ChangeRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovered: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CandidateRow {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unicef_id: Option<String>,
    pub full_name: String,
    pub golden_record: bool,
    pub mark: Mark,
    pub score: Option<f64>,
    pub score_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    pub documents: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AdjudicationView {
    pub ticket_id: String,
    pub status: TicketStatus,
    pub editable: bool,
    pub candidates: Vec<CandidateRow>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ShowOutput {
    Review(ReviewView),
    Adjudication(AdjudicationView),
}

fn record_label(record: &RecordChange) -> String {
    record
        .record_id
        .clone()
        .unwrap_or_else(|| format!("{} #{}", record.kind, record.index))
}

fn compact(map: Option<&serde_json::Map<String, serde_json::Value>>) -> String {
    map.map_or_else(String::new, |m| serde_json::Value::Object(m.clone()).to_string())
}

fn changed_side(fields: &[SnapshotField], pick: impl Fn(&SnapshotField) -> &serde_json::Value) -> String {
    fields
        .iter()
        .map(|f| format!("{}={}", f.name, pick(f)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn record_row(category: ChangeCategory, record: &RecordChange, selection: &ApprovalSelection) -> ChangeRow {
    let id = ChangeId::Index(record.index);
    let (previous, proposed) = match record.operation {
        RecordOperation::Edit => {
            let changed: Vec<SnapshotField> =
                record.fields().into_iter().filter(|f| f.changed).collect();
            (
                changed_side(&changed, |f| &f.previous),
                changed_side(&changed, |f| &f.proposed),
            )
        }
        RecordOperation::Create | RecordOperation::Remove => {
            (compact(record.previous.as_ref()), compact(record.proposed.as_ref()))
        }
    };
    ChangeRow {
        change: ChangeRef::new(category, id.clone()).to_string(),
        label: record_label(record),
        kind: None,
        previous,
        proposed,
        noop: record.noop,
        selected: selection.is_selected(category, &id),
    }
}

/// Every change of a change set, noops included, in category order.
pub fn review_view(change_set: &TicketChangeSet, selection: &ApprovalSelection) -> ReviewView {
    let mut changes = Vec::new();

    for category in ChangeCategory::ALL {
        if !change_set.category_applies(category) {
            continue;
        }
        match category {
            ChangeCategory::Scalar | ChangeCategory::Flex => {
                let diffs = if category == ChangeCategory::Scalar {
                    change_set.scalar_diffs()
                } else {
                    change_set.flex_diffs()
                };
                for diff in diffs {
                    let id = ChangeId::Field(diff.field_name.clone());
                    changes.push(ChangeRow {
                        change: ChangeRef::new(category, id.clone()).to_string(),
                        label: diff.field_name.clone(),
                        kind: Some(diff.kind.to_string()),
                        previous: diff.previous_value.to_string(),
                        proposed: diff.proposed_value.to_string(),
                        noop: diff.noop,
                        selected: selection.is_selected(category, &id),
                    });
                }
            }
            ChangeCategory::Roles => {
                for role in change_set.roles() {
                    let id = ChangeId::Index(role.index);
                    changes.push(ChangeRow {
                        change: ChangeRef::new(category, id.clone()).to_string(),
                        label: format!("{} of {}", role.role, role.household_id),
                        kind: None,
                        previous: String::new(),
                        proposed: role.individual_id.clone(),
                        noop: false,
                        selected: selection.is_selected(category, &id),
                    });
                }
            }
            ChangeCategory::Ticket => {
                changes.push(ChangeRow {
                    change: ChangeRef::new(category, ChangeId::Ticket).to_string(),
                    label: change_set.issue_type().to_string(),
                    kind: None,
                    previous: String::new(),
                    proposed: String::new(),
                    noop: false,
                    selected: selection.is_selected(category, &ChangeId::Ticket),
                });
            }
            records => {
                for record in change_set.records(records) {
                    changes.push(record_row(records, record, selection));
                }
            }
        }
    }

    ReviewView {
        ticket_id: change_set.ticket_id().to_string(),
        status: change_set.status(),
        issue_type: change_set.issue_type(),
        editable: change_set.is_editable(),
        total_changes: change_set.total_change_count(),
        selected: selection.selected_count(),
        changes,
        recovered: change_set.recovered().iter().map(ToString::to_string).collect(),
    }
}

/// Candidates with marks and similarity to the golden record.
pub fn adjudication_view(
    ticket_id: &str,
    status: TicketStatus,
    state: &AdjudicationState,
    precision: usize,
) -> AdjudicationView {
    let candidates = state
        .candidates()
        .iter()
        .map(|candidate| {
            let snapshot = &candidate.snapshot;
            let score = state.score_against_golden(&snapshot.id);
            CandidateRow {
                id: snapshot.id.clone(),
                unicef_id: snapshot.unicef_id.clone(),
                full_name: snapshot.full_name.clone(),
                golden_record: candidate.is_golden_record,
                mark: state.mark(&snapshot.id).unwrap_or_default(),
                score: score.value(),
                score_display: score.render(precision),
                birth_date: snapshot.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
                documents: snapshot
                    .documents
                    .iter()
                    .map(|d| format!("{} {}", d.document_type, d.number))
                    .collect(),
            }
        })
        .collect();

    AdjudicationView {
        ticket_id: ticket_id.to_string(),
        status,
        editable: status.is_editable(),
        candidates,
    }
}

pub fn write_review_text(view: &ReviewView, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "{}  {}  {}  changes={}  selected={}",
        view.ticket_id, view.issue_type, view.status, view.total_changes, view.selected
    )?;
    for row in &view.changes {
        let mark = if row.noop {
            "noop"
        } else if row.selected {
            "[x]"
        } else {
            "[ ]"
        };
        writeln!(w, "{mark}  {}  {} -> {}", row.change, row.previous, row.proposed)?;
    }
    Ok(())
}

pub fn write_review_pretty(view: &ReviewView, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Ticket {}", view.ticket_id))?;
    pretty_kv(w, "Type", view.issue_type.to_string())?;
    pretty_kv(w, "Status", view.status.to_string())?;
    pretty_kv(w, "Changes", view.total_changes.to_string())?;
    pretty_kv(w, "Selected", view.selected.to_string())?;
    if !view.editable {
        writeln!(w, "Read only: decisions change only while FOR_APPROVAL.")?;
    }
    writeln!(w)?;

    for row in &view.changes {
        let mark = if row.noop {
            "   "
        } else if row.selected {
            "[x]"
        } else {
            "[ ]"
        };
        let kind = row.kind.as_deref().map(|k| format!(" ({k})")).unwrap_or_default();
        writeln!(w, "{mark} {}{kind}", row.change)?;
        if row.noop {
            writeln!(w, "      unchanged: {}", row.proposed)?;
        } else {
            if !row.previous.is_empty() {
                writeln!(w, "      was: {}", row.previous)?;
            }
            if !row.proposed.is_empty() {
                writeln!(w, "      now: {}", row.proposed)?;
            }
        }
    }

    if !view.recovered.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Kept as raw values")?;
        for problem in &view.recovered {
            writeln!(w, "  {problem}")?;
        }
    }
    pretty_rule(w)
}

pub fn write_adjudication_text(view: &AdjudicationView, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "{}  NEEDS_ADJUDICATION  {}", view.ticket_id, view.status)?;
    for row in &view.candidates {
        let golden = if row.golden_record { "*" } else { " " };
        writeln!(
            w,
            "{golden} {}  {}  score={}  {}",
            row.id, row.mark, row.score_display, row.full_name
        )?;
    }
    Ok(())
}

pub fn write_adjudication_pretty(view: &AdjudicationView, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Ticket {} (needs adjudication)", view.ticket_id))?;
    pretty_kv(w, "Status", view.status.to_string())?;
    writeln!(w)?;
    writeln!(w, "{:<14} {:<10} {:>6}  {}", "INDIVIDUAL", "MARK", "SCORE", "NAME")?;
    for row in &view.candidates {
        let id = if row.golden_record {
            format!("{} *", row.id)
        } else {
            row.id.clone()
        };
        writeln!(
            w,
            "{id:<14} {:<10} {:>6}  {}",
            row.mark.to_string(),
            row.score_display,
            row.full_name
        )?;
        if !row.documents.is_empty() {
            writeln!(w, "{:<32}{}", "", row.documents.join("; "))?;
        }
    }
    pretty_rule(w)
}

fn render_view(output: OutputMode, view: &ShowOutput) -> anyhow::Result<()> {
    render_mode(
        output,
        view,
        |v, w| match v {
            ShowOutput::Review(r) => write_review_text(r, w),
            ShowOutput::Adjudication(a) => write_adjudication_text(a, w),
        },
        |v, w| match v {
            ShowOutput::Review(r) => write_review_pretty(r, w),
            ShowOutput::Adjudication(a) => write_adjudication_pretty(a, w),
        },
    )
}

fn build_view(payload: &TicketPayload, project: &ProjectConfig) -> Result<ShowOutput, CliError> {
    if payload.issue_type == IssueType::NeedsAdjudication {
        let state = AdjudicationState::from_payload(payload).map_err(|e| {
            CliError::from(&grievance_core::adjudication::AdjudicationError::from(e))
        })?;
        return Ok(ShowOutput::Adjudication(adjudication_view(
            &payload.id,
            payload.status,
            &state,
            project.adjudication.score_precision,
        )));
    }

    let change_set = TicketChangeSet::decompose(payload, &project.registry(), project.schema_mode())
        .map_err(|e| CliError::from(&grievance_core::error::ApprovalError::from(e)))?;
    let session = ReviewSession::new(change_set);
    Ok(ShowOutput::Review(review_view(session.change_set(), session.selection())))
}

/// Execute `gv show <ticket.json>`.
///
/// # Errors
///
/// Returns an error if the ticket file cannot be read or decomposed, or
/// output rendering fails.
pub fn run_show(args: &ShowArgs, output: OutputMode, project: &ProjectConfig) -> anyhow::Result<()> {
    let payload = read_ticket(&args.ticket).context("loading ticket")?;
    match build_view(&payload, project) {
        Ok(view) => render_view(output, &view),
        Err(err) => {
            render_error(output, &err)?;
            anyhow::bail!("{}", err.message);
        }
    }
}
