//! `gv adjudicate` — mark candidates of a needs-adjudication ticket.

use crate::backend::{FileBackend, read_ticket};
use crate::cmd::show::{AdjudicationView, adjudication_view, write_adjudication_pretty, write_adjudication_text};
use crate::output::{CliError, OutputMode, render_error, render_mode};
use anyhow::Context;
use clap::{ArgGroup, Args};
use grievance_core::adjudication::{AdjudicationAction, AdjudicationError, AdjudicationSession};
use grievance_core::config::ProjectConfig;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Args, Debug)]
#[command(
    about = "Mark candidates as duplicate or distinct",
    long_about = "Send one adjudication decision for the given individuals.\n\n\
                  Marks change only once the decision is accepted. `--clear` \
                  returns individuals to unmarked.",
    after_help = "EXAMPLES:\n    # Mark one individual as a duplicate\n    gv adjudicate ticket.json --duplicate IND-B\n\n\
                  # Undo an earlier decision\n    gv adjudicate ticket.json --clear IND-B",
    group(ArgGroup::new("action").required(true).args(["duplicate", "distinct", "clear"]))
)]
pub struct AdjudicateArgs {
    /// Path to the ticket JSON (a `GET ticket(id)` response).
    pub ticket: PathBuf,

    /// Individual ids to act on.
    #[arg(required = true, value_name = "ID")]
    pub ids: Vec<String>,

    /// Mark the individuals as duplicates of the golden record.
    #[arg(long)]
    pub duplicate: bool,

    /// Mark the individuals as distinct.
    #[arg(long)]
    pub distinct: bool,

    /// Clear any earlier mark.
    #[arg(long)]
    pub clear: bool,

    /// Append the adjudication request as one JSON line to this file.
    #[arg(long, value_name = "FILE")]
    pub outbox: Option<PathBuf>,
}

impl AdjudicateArgs {
    const fn action(&self) -> AdjudicationAction {
        if self.duplicate {
            AdjudicationAction::MarkDuplicate
        } else if self.distinct {
            AdjudicationAction::MarkDistinct
        } else {
            AdjudicationAction::Clear
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdjudicateOutput {
    #[serde(flatten)]
    pub view: AdjudicationView,
    pub request: Value,
}

fn adjudicate(
    args: &AdjudicateArgs,
    backend: &mut FileBackend,
    ticket_id: &str,
) -> Result<AdjudicationSession, AdjudicationError> {
    let mut session = AdjudicationSession::open(backend, ticket_id)?;
    session.select(args.ids.iter().cloned())?;
    session.submit(backend, args.action())?;
    Ok(session)
}

/// Execute `gv adjudicate <ticket.json> (--duplicate|--distinct|--clear) ID...`.
///
/// # Errors
///
/// Returns an error if the ticket cannot be loaded, the action is not
/// available, or the decision is refused.
pub fn run_adjudicate(args: &AdjudicateArgs, output: OutputMode, project: &ProjectConfig) -> anyhow::Result<()> {
    let payload = read_ticket(&args.ticket).context("loading ticket")?;
    let mut backend = FileBackend::new(&args.ticket, args.outbox.clone());

    let session = match adjudicate(args, &mut backend, &payload.id) {
        Ok(session) => session,
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            anyhow::bail!("{err}");
        }
    };

    let result = AdjudicateOutput {
        view: adjudication_view(
            session.ticket_id(),
            session.status(),
            session.state(),
            project.adjudication.score_precision,
        ),
        request: backend.sent().last().cloned().unwrap_or(Value::Null),
    };
    render_mode(
        output,
        &result,
        |r, w| write_adjudication_text(&r.view, w),
        |r, w| write_adjudication_pretty(&r.view, w),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        args: AdjudicateArgs,
    }

    #[test]
    fn exactly_one_action_is_required() {
        let parsed = Harness::try_parse_from(["gv", "t.json", "--duplicate", "IND-A"]).expect("parse");
        assert_eq!(parsed.args.action(), AdjudicationAction::MarkDuplicate);

        let parsed = Harness::try_parse_from(["gv", "t.json", "--clear", "IND-A", "IND-B"]).expect("parse");
        assert_eq!(parsed.args.action(), AdjudicationAction::Clear);
        assert_eq!(parsed.args.ids, vec!["IND-A".to_string(), "IND-B".to_string()]);

        assert!(Harness::try_parse_from(["gv", "t.json", "IND-A"]).is_err());
        assert!(Harness::try_parse_from(["gv", "t.json", "--duplicate", "--distinct", "IND-A"]).is_err());
    }
}
