use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::changeset::ChangeRef;
use crate::model::status::{IssueType, TicketStatus};
use crate::selection::SelectionError;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    MalformedTicket,
    NotSelectable,
    NotEditable,
    NotApprovable,
    IncompleteReassignment,
    UnverifiedIdentity,
    ConfirmationRequired,
    CommitInFlight,
    AlreadySettled,
    CommitRejected,
    TransientNetwork,
    TicketNotFound,
    AdjudicationDisabled,
    UnknownCandidate,
    AllMarkedDuplicate,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::MalformedTicket => "E2001",
            Self::NotSelectable => "E2002",
            Self::NotEditable => "E2003",
            Self::NotApprovable => "E2004",
            Self::IncompleteReassignment => "E3001",
            Self::UnverifiedIdentity => "E3002",
            Self::ConfirmationRequired => "E3003",
            Self::CommitInFlight => "E3004",
            Self::AlreadySettled => "E3005",
            Self::CommitRejected => "E4001",
            Self::TransientNetwork => "E4002",
            Self::TicketNotFound => "E4003",
            Self::AdjudicationDisabled => "E5001",
            Self::UnknownCandidate => "E5002",
            Self::AllMarkedDuplicate => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::MalformedTicket => "Ticket payload could not be interpreted",
            Self::NotSelectable => "Change is not selectable",
            Self::NotEditable => "Ticket is not awaiting approval",
            Self::NotApprovable => "Ticket type has no approval decisions",
            Self::IncompleteReassignment => "Role reassignment incomplete",
            Self::UnverifiedIdentity => "Beneficiary identity not verified",
            Self::ConfirmationRequired => "Partial approval needs confirmation",
            Self::CommitInFlight => "Commit already in flight",
            Self::AlreadySettled => "Change set already settled",
            Self::CommitRejected => "Commit rejected by service",
            Self::TransientNetwork => "Transient network failure",
            Self::TicketNotFound => "Ticket not found",
            Self::AdjudicationDisabled => "Adjudication action disabled",
            Self::UnknownCandidate => "Unknown adjudication candidate",
            Self::AllMarkedDuplicate => "Every candidate marked duplicate",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to reviewers and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .grievance/config.toml and retry."),
            Self::MalformedTicket => {
                Some("Register the field kind in .grievance/config.toml or disable strict_schema.")
            }
            Self::NotSelectable => Some("Use `gv show` to list the selectable changes."),
            Self::NotEditable => Some("Only FOR_APPROVAL tickets accept approval decisions."),
            Self::NotApprovable => Some("Resolve needs-adjudication tickets with `gv adjudicate`."),
            Self::IncompleteReassignment => {
                Some("Approve a reassignment for every primary collector and head role.")
            }
            Self::UnverifiedIdentity => {
                Some("Verify at least one identity attribute during beneficiary lookup.")
            }
            Self::ConfirmationRequired => {
                Some("Unselected changes are rejected when the ticket closes. Confirm to proceed.")
            }
            Self::CommitInFlight => Some("Wait for the in-flight commit to finish."),
            Self::AlreadySettled => Some("Refetch the ticket to start a new review."),
            Self::CommitRejected => Some("Fix the reported fields and resubmit."),
            Self::TransientNetwork => Some("Resubmit once the service is reachable."),
            Self::TicketNotFound => None,
            Self::AdjudicationDisabled => {
                Some("Select at least one individual on a FOR_APPROVAL ticket.")
            }
            Self::UnknownCandidate => Some("Use `gv show` to list the candidates of this ticket."),
            Self::AllMarkedDuplicate => Some("Leave at least one individual unmarked or distinct."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A ticket payload the engine cannot interpret.
///
/// In lenient decomposition the field-level variants are recovered by keeping
/// the raw value as an opaque diff; only structural problems abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedTicketError {
    /// A scalar or flex field has no kind descriptor.
    #[error("field '{field}' has no kind descriptor")]
    UnknownField { field: String, flex: bool },

    /// A value does not fit the declared kind of its field.
    #[error("field '{field}' does not hold a valid {kind} value: {detail}")]
    KindMismatch {
        field: String,
        kind: String,
        detail: String,
    },

    /// A reserved section of the payload has the wrong shape.
    #[error("'{key}' is not a valid {expected}: {detail}")]
    InvalidSection {
        key: String,
        expected: &'static str,
        detail: String,
    },

    /// An individual appears in both the duplicate and distinct lists.
    #[error("individual '{id}' is marked both duplicate and distinct")]
    ConflictingMarks { id: String },
}

impl MalformedTicketError {
    /// Name of the field or section the error refers to.
    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::UnknownField { field, .. } | Self::KindMismatch { field, .. } => field,
            Self::InvalidSection { key, .. } => key,
            Self::ConflictingMarks { id } => id,
        }
    }
}

/// Failures reported by the external persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The service refused the write (validation or permission).
    #[error("{message}")]
    Rejected {
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },

    /// The request never reached a verdict.
    #[error("{0}")]
    Transient(String),

    /// The ticket does not exist (or is not visible).
    #[error("ticket {0} not found")]
    NotFound(String),
}

impl BackendError {
    /// Rejection without field-level detail.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }
}

/// Errors raised at the approval commit boundary.
///
/// Every variant leaves the review session in `FOR_APPROVAL` with its
/// selections intact, except `AlreadySettled`, which reports that the change
/// set is terminal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApprovalError {
    #[error(transparent)]
    Malformed(#[from] MalformedTicketError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("ticket is {status}; approval decisions change only while FOR_APPROVAL")]
    NotEditable { status: TicketStatus },

    #[error("{issue_type} tickets carry no approval decisions")]
    NotApprovable { issue_type: IssueType },

    #[error("{approved} of {required} held roles have an approved reassignment")]
    IncompleteReassignment { required: usize, approved: usize },

    #[error("no identity attribute was verified during beneficiary lookup")]
    UnverifiedIdentity,

    #[error(
        "{selected} of {total} changes selected; the rest are rejected when the ticket closes"
    )]
    ConfirmationRequired {
        selected: usize,
        total: usize,
        unselected: Vec<ChangeRef>,
    },

    #[error("a commit is already in flight for ticket {ticket_id}")]
    CommitInFlight { ticket_id: String },

    #[error("no commit is in flight for ticket {ticket_id}")]
    NoCommitInFlight { ticket_id: String },

    #[error("change set for ticket {ticket_id} is settled")]
    AlreadySettled { ticket_id: String },

    #[error("commit rejected: {message}")]
    CommitRejected {
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("ticket {0} not found")]
    TicketNotFound(String),
}

impl ApprovalError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedTicket,
            Self::Selection(_) => ErrorCode::NotSelectable,
            Self::NotEditable { .. } => ErrorCode::NotEditable,
            Self::NotApprovable { .. } => ErrorCode::NotApprovable,
            Self::IncompleteReassignment { .. } => ErrorCode::IncompleteReassignment,
            Self::UnverifiedIdentity => ErrorCode::UnverifiedIdentity,
            Self::ConfirmationRequired { .. } => ErrorCode::ConfirmationRequired,
            Self::CommitInFlight { .. } => ErrorCode::CommitInFlight,
            Self::NoCommitInFlight { .. } => ErrorCode::InternalUnexpected,
            Self::AlreadySettled { .. } => ErrorCode::AlreadySettled,
            Self::CommitRejected { .. } => ErrorCode::CommitRejected,
            Self::TransientNetwork(_) => ErrorCode::TransientNetwork,
            Self::TicketNotFound(_) => ErrorCode::TicketNotFound,
        }
    }

    /// Optional remediation hint for reviewers and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether resubmitting the same commit unchanged may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Field-level messages supplied by the collaborator, if any.
    #[must_use]
    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::CommitRejected { field_errors, .. } if !field_errors.is_empty() => {
                Some(field_errors)
            }
            _ => None,
        }
    }
}

impl From<BackendError> for ApprovalError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected {
                message,
                field_errors,
            } => Self::CommitRejected {
                message,
                field_errors,
            },
            BackendError::Transient(msg) => Self::TransientNetwork(msg),
            BackendError::NotFound(id) => Self::TicketNotFound(id),
        }
    }
}
