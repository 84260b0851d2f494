//! Rendering of command results and errors.
//!
//! Commands build one serializable view and hand it to [`render_mode`] with a
//! text and a pretty writer; errors go through [`render_error`] on stderr.
//! The mode itself is resolved by [`grievance_core::config::resolve_output`].

use grievance_core::adjudication::AdjudicationError;
use grievance_core::error::ApprovalError;
use serde::Serialize;
use std::io::{self, Write};

/// Width of the `---` rule under pretty headings.
pub const PRETTY_RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// `Key:` padded to 12 columns, then the value.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Headings and rules, for a reviewer at a terminal.
    Pretty,
    /// One line per item, for pipes.
    Text,
    Json,
}

impl OutputMode {
    /// Map a resolved mode name (`pretty`, `text`, `json`) to a mode.
    pub fn from_resolved(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "text" => Self::Text,
            _ => Self::Pretty,
        }
    }
}

/// A structured error with optional suggestion and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    /// Human-readable error message.
    pub message: String,
    /// Optional suggestion for how to fix the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Machine-readable error code (e.g. "E3003").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Per-item detail lines (unselected changes, rejected fields).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl CliError {
    /// Create an error with a suggestion and error code.
    pub fn with_details(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        error_code: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            suggestion: Some(suggestion.into()),
            error_code: Some(error_code.into()),
            details: Vec::new(),
        }
    }
}

impl From<&ApprovalError> for CliError {
    fn from(err: &ApprovalError) -> Self {
        let mut details = Vec::new();
        if let ApprovalError::ConfirmationRequired { unselected, .. } = err {
            details.extend(unselected.iter().map(|change| format!("unselected {change}")));
        }
        if let Some(fields) = err.field_errors() {
            for (field, messages) in fields {
                details.extend(messages.iter().map(|m| format!("{field}: {m}")));
            }
        }
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(str::to_string),
            error_code: Some(err.code().code().to_string()),
            details,
        }
    }
}

impl From<&AdjudicationError> for CliError {
    fn from(err: &AdjudicationError) -> Self {
        let mut details = Vec::new();
        if let AdjudicationError::Rejected { field_errors, .. } = err {
            for (field, messages) in field_errors {
                details.extend(messages.iter().map(|m| format!("{field}: {m}")));
            }
        }
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(str::to_string),
            error_code: Some(err.code().code().to_string()),
            details,
        }
    }
}

/// Render a serializable value with explicit pretty/text renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

/// Write an error in the requested format.
pub fn write_error(mode: OutputMode, error: &CliError, out: &mut dyn Write) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({
                "error": error,
            });
            serde_json::to_writer_pretty(&mut *out, &wrapper)?;
            writeln!(out)?;
        }
        OutputMode::Pretty | OutputMode::Text => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            for line in &error.details {
                writeln!(out, "  - {line}")?;
            }
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write_error(mode, error, &mut out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grievance_core::changeset::{ChangeCategory, ChangeId, ChangeRef};

    fn written(mode: OutputMode, error: &CliError) -> String {
        let mut buf = Vec::new();
        write_error(mode, error, &mut buf).expect("write should succeed");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn resolved_names_map_to_modes() {
        assert_eq!(OutputMode::from_resolved("json"), OutputMode::Json);
        assert_eq!(OutputMode::from_resolved("text"), OutputMode::Text);
        assert_eq!(OutputMode::from_resolved("pretty"), OutputMode::Pretty);
    }

    #[test]
    fn confirmation_error_lists_unselected_changes() {
        let err = ApprovalError::ConfirmationRequired {
            selected: 1,
            total: 2,
            unselected: vec![ChangeRef::new(
                ChangeCategory::Scalar,
                ChangeId::Field("phone_no".into()),
            )],
        };
        let cli = CliError::from(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E3003"));
        assert_eq!(cli.details, vec!["unselected scalar:phone_no".to_string()]);

        let text = written(OutputMode::Text, &cli);
        assert!(text.starts_with("error[E3003]: 1 of 2 changes selected"));
        assert!(text.contains("  - unselected scalar:phone_no"));
        assert!(text.contains("suggestion:"));
    }

    #[test]
    fn json_errors_are_wrapped() {
        let cli = CliError::with_details("boom", "try again", "E4002");
        let json: serde_json::Value =
            serde_json::from_str(&written(OutputMode::Json, &cli)).expect("valid json");
        assert_eq!(json["error"]["message"], "boom");
        assert_eq!(json["error"]["error_code"], "E4002");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn adjudication_errors_carry_codes() {
        let cli = CliError::from(&AdjudicationError::AllMarkedDuplicate);
        assert_eq!(cli.error_code.as_deref(), Some("E5003"));
        assert!(cli.suggestion.is_some());
    }
}
