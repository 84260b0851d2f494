#![forbid(unsafe_code)]

mod backend;
mod cmd;
mod output;

use clap::{Parser, Subcommand};
use grievance_core::config;
use output::OutputMode;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "gv: review and approve grievance ticket data changes",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(next_help_heading = "Read")]
    Show(cmd::show::ShowArgs),

    #[command(next_help_heading = "Review")]
    Approve(cmd::approve::ApproveArgs),

    #[command(next_help_heading = "Review")]
    Adjudicate(cmd::adjudicate::AdjudicateArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("GV_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "grievance=debug,info"
        } else {
            "grievance=info,warn"
        })
    });

    let format = env::var("GV_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let effective = config::resolve_config(&project_root, cli.json)?;
    let output = OutputMode::from_resolved(&effective.resolved_output);
    let project = &effective.project;

    match cli.command {
        Commands::Show(ref args) => cmd::show::run_show(args, output, project),
        Commands::Approve(ref args) => cmd::approve::run_approve(args, output, project),
        Commands::Adjudicate(ref args) => cmd::adjudicate::run_adjudicate(args, output, project),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_before_and_after_subcommand() {
        let cli = Cli::parse_from(["gv", "--json", "show", "t.json"]);
        assert!(cli.json);
        let cli = Cli::parse_from(["gv", "show", "t.json", "--json"]);
        assert!(cli.json);
    }

    #[test]
    fn approve_parses_selections() {
        let cli = Cli::parse_from([
            "gv", "approve", "t.json", "--select", "scalar:sex", "--select", "documents-edit:1", "--yes",
        ]);
        let Commands::Approve(args) = cli.command else {
            panic!("expected approve");
        };
        assert_eq!(args.select.len(), 2);
        assert_eq!(args.select[1].to_string(), "documents-edit:1");
        assert!(args.yes);
        assert!(!args.all);
    }

    #[test]
    fn malformed_selection_is_a_usage_error() {
        assert!(Cli::try_parse_from(["gv", "approve", "t.json", "--select", "scalar"]).is_err());
        assert!(Cli::try_parse_from(["gv", "approve", "t.json", "--select", "bogus:1"]).is_err());
    }

    #[test]
    fn all_subcommands_listed() {
        let subcommands = [
            vec!["gv", "show", "t.json"],
            vec!["gv", "approve", "t.json", "--all"],
            vec!["gv", "adjudicate", "t.json", "--distinct", "IND-1"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "Failed to parse: {args:?}: {:?}", result.err());
        }
    }
}
