//! Approval commit protocol.
//!
//! A [`ReviewSession`] owns one change set and the reviewer's selection, and
//! is the only component that emits writes. Its phase moves
//!
//! ```text
//! Editable --begin_commit--> InFlight --complete(ok)--> Settled
//!    ^                          |
//!    +-------complete(err)------+
//! ```
//!
//! `Settled` is terminal for the change set; [`ReviewSession::refresh`]
//! fetches the ticket again and starts a new session. A commit is built and
//! sent as one request; the guards inspect many sub-records but nothing is
//! applied partially.

use tracing::{info, warn};

use crate::changeset::{ChangeCategory, ChangeId, SchemaMode, TicketChangeSet};
use crate::error::{ApprovalError, BackendError};
use crate::model::field::FieldRegistry;
use crate::model::payload::{AdjudicationCommit, CommitPayload, TicketPayload};
use crate::selection::ApprovalSelection;

/// The external ticket service.
///
/// Implementations own transport; the engine issues at most one request per
/// reviewer action and never retries on its own.
pub trait ApprovalBackend {
    /// `GET ticket(id)`.
    ///
    /// # Errors
    ///
    /// Any [`BackendError`] the service reports.
    fn fetch_ticket(&mut self, ticket_id: &str) -> Result<TicketPayload, BackendError>;

    /// `POST approve(ticketId, payload)`.
    ///
    /// # Errors
    ///
    /// Any [`BackendError`] the service reports.
    fn approve(&mut self, ticket_id: &str, payload: &CommitPayload) -> Result<(), BackendError>;

    /// `POST approveNeedsAdjudication(ticketId, commit)`.
    ///
    /// # Errors
    ///
    /// Any [`BackendError`] the service reports.
    fn approve_needs_adjudication(
        &mut self,
        ticket_id: &str,
        commit: &AdjudicationCommit,
    ) -> Result<(), BackendError>;
}

/// Reviewer's answer to the partial-approval warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Confirmation {
    #[default]
    Unconfirmed,
    /// The reviewer accepted that unselected changes will be rejected.
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    Editable,
    InFlight,
    Settled,
}

/// A commit that passed the guards and is waiting for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a pending commit must be completed with the service outcome"]
pub struct PendingCommit {
    pub ticket_id: String,
    pub payload: CommitPayload,
    pub selected: usize,
    pub total: usize,
}

/// Summary of a settled commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub ticket_id: String,
    pub approved: usize,
    /// Changes left unselected; the service rejects them when the ticket closes.
    pub implicitly_rejected: usize,
}

/// One reviewer's session over one fetched ticket.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    change_set: TicketChangeSet,
    selection: ApprovalSelection,
    phase: CommitPhase,
}

impl ReviewSession {
    /// Start a session seeded with the approvals the service already recorded.
    #[must_use]
    pub fn new(change_set: TicketChangeSet) -> Self {
        let selection = ApprovalSelection::seeded(&change_set);
        Self {
            change_set,
            selection,
            phase: CommitPhase::Editable,
        }
    }

    /// Fetch and decompose a ticket.
    ///
    /// # Errors
    ///
    /// Returns the service failure, [`ApprovalError::NotApprovable`] for
    /// needs-adjudication tickets, or [`ApprovalError::Malformed`] when the
    /// payload cannot be decomposed.
    pub fn open<B: ApprovalBackend + ?Sized>(
        backend: &mut B,
        ticket_id: &str,
        registry: &FieldRegistry,
        mode: SchemaMode,
    ) -> Result<Self, ApprovalError> {
        let payload = backend.fetch_ticket(ticket_id)?;
        if !payload.issue_type.has_approval_decisions() {
            return Err(ApprovalError::NotApprovable {
                issue_type: payload.issue_type,
            });
        }
        let change_set = TicketChangeSet::decompose(&payload, registry, mode)?;
        Ok(Self::new(change_set))
    }

    #[must_use]
    pub const fn change_set(&self) -> &TicketChangeSet {
        &self.change_set
    }

    #[must_use]
    pub const fn selection(&self) -> &ApprovalSelection {
        &self.selection
    }

    #[must_use]
    pub const fn phase(&self) -> CommitPhase {
        self.phase
    }

    fn ensure_editable(&self) -> Result<(), ApprovalError> {
        let issue_type = self.change_set.issue_type();
        if !issue_type.has_approval_decisions() {
            return Err(ApprovalError::NotApprovable { issue_type });
        }
        let ticket_id = || self.change_set.ticket_id().to_string();
        match self.phase {
            CommitPhase::InFlight => Err(ApprovalError::CommitInFlight {
                ticket_id: ticket_id(),
            }),
            CommitPhase::Settled => Err(ApprovalError::AlreadySettled {
                ticket_id: ticket_id(),
            }),
            CommitPhase::Editable if !self.change_set.is_editable() => {
                Err(ApprovalError::NotEditable {
                    status: self.change_set.status(),
                })
            }
            CommitPhase::Editable => Ok(()),
        }
    }

    /// Flip one change; returns whether it is now selected.
    ///
    /// # Errors
    ///
    /// Rejected for needs-adjudication tickets, while a commit is in flight,
    /// after settlement, outside `FOR_APPROVAL`, or for ids that are not
    /// selectable.
    pub fn toggle(&mut self, category: ChangeCategory, id: ChangeId) -> Result<bool, ApprovalError> {
        self.ensure_editable()?;
        Ok(self.selection.toggle(category, id)?)
    }

    /// # Errors
    ///
    /// See [`Self::toggle`].
    pub fn select_all(
        &mut self,
        category: ChangeCategory,
        ids: impl IntoIterator<Item = ChangeId>,
    ) -> Result<usize, ApprovalError> {
        self.ensure_editable()?;
        Ok(self.selection.select_all(category, ids)?)
    }

    /// The "approve everything" fast path.
    ///
    /// # Errors
    ///
    /// See [`Self::toggle`].
    pub fn select_everything(&mut self) -> Result<(), ApprovalError> {
        self.ensure_editable()?;
        self.selection.select_everything();
        Ok(())
    }

    /// # Errors
    ///
    /// See [`Self::toggle`].
    pub fn clear(&mut self, category: ChangeCategory) -> Result<(), ApprovalError> {
        self.ensure_editable()?;
        self.selection.clear(category);
        Ok(())
    }

    /// Domain guards: role reassignment for deletions, identity verification
    /// for looked-up beneficiaries.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::IncompleteReassignment`] or
    /// [`ApprovalError::UnverifiedIdentity`].
    pub fn check_guards(&self) -> Result<(), ApprovalError> {
        let cs = &self.change_set;
        if cs.issue_type().requires_role_reassignment() {
            let required = cs.required_reassignments();
            let approved = cs.approved_reassignments(&self.selection);
            if required != approved {
                return Err(ApprovalError::IncompleteReassignment { required, approved });
            }
        }

        if cs
            .verification()
            .is_some_and(|verification| !verification.has_verified_identity())
        {
            return Err(ApprovalError::UnverifiedIdentity);
        }

        Ok(())
    }

    /// Whether submitting now needs the partial-approval confirmation.
    #[must_use]
    pub fn needs_confirmation(&self) -> bool {
        !self.selection.is_complete(&self.change_set)
    }

    /// Validate and freeze the current selection into a commit.
    ///
    /// An empty selection is a valid "approve nothing" commit, but like any
    /// partial approval it must be confirmed first.
    ///
    /// # Errors
    ///
    /// Phase and status errors as for [`Self::toggle`], guard failures from
    /// [`Self::check_guards`], and [`ApprovalError::ConfirmationRequired`].
    /// The session is unchanged on error.
    pub fn begin_commit(&mut self, confirmation: Confirmation) -> Result<PendingCommit, ApprovalError> {
        self.ensure_editable()?;
        self.check_guards()?;

        let selected = self.selection.selected_count();
        let total = self.change_set.total_change_count();
        if selected < total && confirmation == Confirmation::Unconfirmed {
            return Err(ApprovalError::ConfirmationRequired {
                selected,
                total,
                unselected: self.selection.unselected(),
            });
        }

        let payload = self.change_set.to_commit_payload(&self.selection);
        debug_assert_eq!(payload.approved_count(), selected);

        info!(
            ticket_id = %self.change_set.ticket_id(),
            selected,
            total,
            "submitting approval commit"
        );
        self.phase = CommitPhase::InFlight;

        Ok(PendingCommit {
            ticket_id: self.change_set.ticket_id().to_string(),
            payload,
            selected,
            total,
        })
    }

    /// Apply the service's verdict on a pending commit.
    ///
    /// # Errors
    ///
    /// Returns the service failure converted to [`ApprovalError`]; the
    /// session is back in `Editable` with its selection intact.
    /// [`ApprovalError::NoCommitInFlight`] if `pending` does not belong to an
    /// in-flight commit of this session.
    pub fn complete_commit(
        &mut self,
        pending: PendingCommit,
        outcome: Result<(), BackendError>,
    ) -> Result<CommitReceipt, ApprovalError> {
        if self.phase != CommitPhase::InFlight || pending.ticket_id != self.change_set.ticket_id() {
            return Err(ApprovalError::NoCommitInFlight {
                ticket_id: pending.ticket_id,
            });
        }

        match outcome {
            Ok(()) => {
                self.phase = CommitPhase::Settled;
                info!(ticket_id = %pending.ticket_id, approved = pending.selected, "approval commit settled");
                Ok(CommitReceipt {
                    ticket_id: pending.ticket_id,
                    approved: pending.selected,
                    implicitly_rejected: pending.total.saturating_sub(pending.selected),
                })
            }
            Err(err) => {
                self.phase = CommitPhase::Editable;
                warn!(ticket_id = %pending.ticket_id, error = %err, "approval commit failed");
                Err(err.into())
            }
        }
    }

    /// Guard, send and settle in one call.
    ///
    /// # Errors
    ///
    /// See [`Self::begin_commit`] and [`Self::complete_commit`].
    pub fn commit<B: ApprovalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        confirmation: Confirmation,
    ) -> Result<CommitReceipt, ApprovalError> {
        let pending = self.begin_commit(confirmation)?;
        let outcome = backend.approve(&pending.ticket_id, &pending.payload);
        self.complete_commit(pending, outcome)
    }

    /// Fetch the ticket again into a fresh session.
    ///
    /// # Errors
    ///
    /// [`ApprovalError::CommitInFlight`] while a commit is pending; otherwise
    /// as for [`Self::open`].
    pub fn refresh<B: ApprovalBackend + ?Sized>(
        &self,
        backend: &mut B,
        registry: &FieldRegistry,
        mode: SchemaMode,
    ) -> Result<Self, ApprovalError> {
        if self.phase == CommitPhase::InFlight {
            return Err(ApprovalError::CommitInFlight {
                ticket_id: self.change_set.ticket_id().to_string(),
            });
        }
        Self::open(backend, self.change_set.ticket_id(), registry, mode)
    }
}
