//! Needs-adjudication resolution.
//!
//! A needs-adjudication ticket groups a golden record individual with the
//! candidates the deduplication engine flagged as possible duplicates. Each
//! candidate is in exactly one of three states:
//!
//! | Action | Unmarked | Duplicate | Distinct |
//! |---|---|---|---|
//! | mark duplicate | Duplicate | Duplicate | Duplicate |
//! | mark distinct | Distinct | Distinct | Distinct |
//! | clear | Unmarked | Unmarked | Unmarked |
//!
//! Transitions happen only on reviewer action. Every action is sent to the
//! service as its own commit (`clear` included, which is how a reviewer
//! corrects an earlier decision) and is applied locally only once the service
//! accepts it.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::commit::ApprovalBackend;
use crate::error::{BackendError, ErrorCode, MalformedTicketError};
use crate::model::payload::{AdjudicationCommit, CandidateSnapshot, SimilarityPair, TicketPayload};
use crate::model::status::TicketStatus;

// ---------------------------------------------------------------------------
// Marks and scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mark {
    #[default]
    Unmarked,
    Duplicate,
    Distinct,
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unmarked => "unmarked",
            Self::Duplicate => "duplicate",
            Self::Distinct => "distinct",
        })
    }
}

/// Reviewer actions on the selected candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjudicationAction {
    MarkDuplicate,
    MarkDistinct,
    Clear,
}

impl AdjudicationAction {
    /// Mark a candidate ends up with after this action.
    #[must_use]
    pub const fn target(self) -> Mark {
        match self {
            Self::MarkDuplicate => Mark::Duplicate,
            Self::MarkDistinct => Mark::Distinct,
            Self::Clear => Mark::Unmarked,
        }
    }

    #[must_use]
    pub fn to_commit(self, ids: Vec<String>) -> AdjudicationCommit {
        match self {
            Self::MarkDuplicate => AdjudicationCommit::DuplicateIndividualIds(ids),
            Self::MarkDistinct => AdjudicationCommit::DistinctIndividualIds(ids),
            Self::Clear => AdjudicationCommit::ClearIndividualIds(ids),
        }
    }
}

/// A similarity score supplied by the deduplication engine, if any.
///
/// Zero is a real score; a missing score renders as `—`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimilarityScore(pub Option<f64>);

impl SimilarityScore {
    #[must_use]
    pub const fn value(self) -> Option<f64> {
        self.0
    }

    #[must_use]
    pub fn render(self, precision: usize) -> String {
        self.0
            .map_or_else(|| "—".to_string(), |score| format!("{score:.precision$}"))
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(score) => write!(f, "{score}"),
            None => f.write_str("—"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and actionability
// ---------------------------------------------------------------------------

/// Why an adjudication action is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledReason {
    NotForApproval,
    NoSelection,
    CommitInFlight,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotForApproval => "ticket is not awaiting approval",
            Self::NoSelection => "no individual selected",
            Self::CommitInFlight => "a decision is being saved",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actionability {
    Enabled,
    Disabled(DisabledReason),
}

impl Actionability {
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Mark and clear actions need a `FOR_APPROVAL` ticket and a non-empty selection.
#[must_use]
pub const fn actionability(status: TicketStatus, has_selection: bool) -> Actionability {
    if !status.is_editable() {
        Actionability::Disabled(DisabledReason::NotForApproval)
    } else if !has_selection {
        Actionability::Disabled(DisabledReason::NoSelection)
    } else {
        Actionability::Enabled
    }
}

#[must_use]
pub const fn is_actionable(status: TicketStatus, has_selection: bool) -> bool {
    actionability(status, has_selection).is_enabled()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdjudicationError {
    #[error(transparent)]
    Malformed(#[from] MalformedTicketError),

    #[error("action unavailable: {0}")]
    Disabled(DisabledReason),

    #[error("individual '{0}' is not a candidate of this ticket")]
    UnknownCandidate(String),

    #[error("at least one individual must stay unmarked or distinct")]
    AllMarkedDuplicate,

    #[error("no adjudication commit is in flight for ticket {0}")]
    NoCommitInFlight(String),

    #[error("adjudication rejected: {message}")]
    Rejected {
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("ticket {0} not found")]
    TicketNotFound(String),
}

impl AdjudicationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::MalformedTicket,
            Self::Disabled(DisabledReason::CommitInFlight) => ErrorCode::CommitInFlight,
            Self::Disabled(_) => ErrorCode::AdjudicationDisabled,
            Self::UnknownCandidate(_) => ErrorCode::UnknownCandidate,
            Self::AllMarkedDuplicate => ErrorCode::AllMarkedDuplicate,
            Self::NoCommitInFlight(_) => ErrorCode::InternalUnexpected,
            Self::Rejected { .. } => ErrorCode::CommitRejected,
            Self::TransientNetwork(_) => ErrorCode::TransientNetwork,
            Self::TicketNotFound(_) => ErrorCode::TicketNotFound,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl From<BackendError> for AdjudicationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected {
                message,
                field_errors,
            } => Self::Rejected {
                message,
                field_errors,
            },
            BackendError::Transient(msg) => Self::TransientNetwork(msg),
            BackendError::NotFound(id) => Self::TicketNotFound(id),
        }
    }
}

// ---------------------------------------------------------------------------
// AdjudicationState
// ---------------------------------------------------------------------------

/// One individual under review.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjudicationCandidate {
    pub snapshot: CandidateSnapshot,
    pub is_golden_record: bool,
}

/// Candidates of one ticket and their marks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjudicationState {
    candidates: Vec<AdjudicationCandidate>,
    marks: BTreeMap<String, Mark>,
    similarity_pair: Option<SimilarityPair>,
}

impl AdjudicationState {
    /// Read candidates and persisted marks from a needs-adjudication ticket.
    ///
    /// # Errors
    ///
    /// [`MalformedTicketError::InvalidSection`] for unreadable sections and
    /// [`MalformedTicketError::ConflictingMarks`] for an individual listed as
    /// both duplicate and distinct.
    pub fn from_payload(payload: &TicketPayload) -> Result<Self, MalformedTicketError> {
        let details = &payload.ticket_details;

        let mut candidates = Vec::new();
        if let Some(raw) = details.get("goldenRecord").filter(|v| !v.is_null()) {
            candidates.push(AdjudicationCandidate {
                snapshot: read::<CandidateSnapshot>(raw, "goldenRecord", "candidate")?,
                is_golden_record: true,
            });
        }
        if let Some(raw) = details.get("possibleDuplicates").filter(|v| !v.is_null()) {
            for snapshot in read::<Vec<CandidateSnapshot>>(raw, "possibleDuplicates", "candidate list")? {
                if candidates.iter().any(|c| c.snapshot.id == snapshot.id) {
                    continue;
                }
                candidates.push(AdjudicationCandidate {
                    snapshot,
                    is_golden_record: false,
                });
            }
        }

        let id_list = |key: &str| -> Result<Vec<String>, MalformedTicketError> {
            details
                .get(key)
                .filter(|v| !v.is_null())
                .map_or_else(|| Ok(Vec::new()), |raw| read(raw, key, "list of individual ids"))
        };
        let duplicates = id_list("selectedDuplicates")?;
        let distinct = id_list("selectedDistinct")?;

        let similarity_pair = details
            .get("similarityPair")
            .filter(|v| !v.is_null())
            .map(|raw| read::<SimilarityPair>(raw, "similarityPair", "similarity pair"))
            .transpose()?;

        let mut marks: BTreeMap<String, Mark> = candidates
            .iter()
            .map(|c| (c.snapshot.id.clone(), Mark::Unmarked))
            .collect();
        for id in &duplicates {
            if let Some(mark) = marks.get_mut(id) {
                *mark = Mark::Duplicate;
            } else {
                warn!(individual_id = %id, "duplicate mark for unknown candidate ignored");
            }
        }
        for id in &distinct {
            if duplicates.contains(id) {
                return Err(MalformedTicketError::ConflictingMarks { id: id.clone() });
            }
            if let Some(mark) = marks.get_mut(id) {
                *mark = Mark::Distinct;
            } else {
                warn!(individual_id = %id, "distinct mark for unknown candidate ignored");
            }
        }

        Ok(Self {
            candidates,
            marks,
            similarity_pair,
        })
    }

    /// Candidates in payload order, golden record first.
    #[must_use]
    pub fn candidates(&self) -> &[AdjudicationCandidate] {
        &self.candidates
    }

    #[must_use]
    pub fn golden_record(&self) -> Option<&AdjudicationCandidate> {
        self.candidates.iter().find(|c| c.is_golden_record)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.marks.contains_key(id)
    }

    #[must_use]
    pub fn mark(&self, id: &str) -> Option<Mark> {
        self.marks.get(id).copied()
    }

    /// Ids currently in the given state, in candidate order.
    #[must_use]
    pub fn with_mark(&self, mark: Mark) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|c| c.snapshot.id.as_str())
            .filter(|id| self.mark(id) == Some(mark))
            .collect()
    }

    fn check_known<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Result<(), AdjudicationError> {
        for id in ids {
            if !self.contains(id) {
                return Err(AdjudicationError::UnknownCandidate(id.clone()));
            }
        }
        Ok(())
    }

    /// Validate an action before it is sent.
    ///
    /// # Errors
    ///
    /// [`AdjudicationError::UnknownCandidate`] or
    /// [`AdjudicationError::AllMarkedDuplicate`].
    pub fn check(&self, action: AdjudicationAction, ids: &BTreeSet<String>) -> Result<(), AdjudicationError> {
        self.check_known(ids)?;
        if action == AdjudicationAction::MarkDuplicate {
            let survivors = self
                .marks
                .iter()
                .filter(|(id, mark)| **mark != Mark::Duplicate && !ids.contains(*id))
                .count();
            if survivors == 0 {
                return Err(AdjudicationError::AllMarkedDuplicate);
            }
        }
        Ok(())
    }

    /// Apply an action to every id; all-or-nothing.
    ///
    /// # Errors
    ///
    /// See [`Self::check`].
    pub fn apply(&mut self, action: AdjudicationAction, ids: &BTreeSet<String>) -> Result<(), AdjudicationError> {
        self.check(action, ids)?;
        self.record(action, ids);
        Ok(())
    }

    /// Set marks the service already accepted. Ids that are not candidates
    /// are skipped.
    fn record(&mut self, action: AdjudicationAction, ids: &BTreeSet<String>) {
        for id in ids {
            if let Some(mark) = self.marks.get_mut(id) {
                *mark = action.target();
            }
        }
    }

    /// # Errors
    ///
    /// See [`Self::check`].
    pub fn mark_duplicate(&mut self, ids: &BTreeSet<String>) -> Result<(), AdjudicationError> {
        self.apply(AdjudicationAction::MarkDuplicate, ids)
    }

    /// # Errors
    ///
    /// See [`Self::check`].
    pub fn mark_distinct(&mut self, ids: &BTreeSet<String>) -> Result<(), AdjudicationError> {
        self.apply(AdjudicationAction::MarkDistinct, ids)
    }

    /// # Errors
    ///
    /// See [`Self::check`].
    pub fn clear(&mut self, ids: &BTreeSet<String>) -> Result<(), AdjudicationError> {
        self.apply(AdjudicationAction::Clear, ids)
    }

    /// Similarity between two individuals.
    ///
    /// A score attached to the pair itself wins over one found in either
    /// candidate's deduplication results.
    #[must_use]
    pub fn pair_score(&self, a: &str, b: &str) -> SimilarityScore {
        let linked = self
            .similarity_pair
            .as_ref()
            .filter(|pair| pair.links(a, b))
            .and_then(|pair| pair.similarity_score);
        if linked.is_some() {
            return SimilarityScore(linked);
        }

        let hit = |owner: &str, other: &str| {
            self.candidates
                .iter()
                .find(|c| c.snapshot.id == owner)
                .and_then(|c| {
                    c.snapshot
                        .deduplication_results
                        .iter()
                        .find(|r| r.hit_id == other)
                })
                .and_then(|r| r.score)
        };
        SimilarityScore(hit(b, a).or_else(|| hit(a, b)))
    }

    /// Similarity of a candidate to the golden record.
    #[must_use]
    pub fn score_against_golden(&self, id: &str) -> SimilarityScore {
        match self.golden_record() {
            Some(golden) if golden.snapshot.id != id => self.pair_score(&golden.snapshot.id, id),
            _ => SimilarityScore(None),
        }
    }
}

fn read<T: serde::de::DeserializeOwned>(
    raw: &Value,
    key: &str,
    expected: &'static str,
) -> Result<T, MalformedTicketError> {
    serde_json::from_value(raw.clone()).map_err(|e| MalformedTicketError::InvalidSection {
        key: key.to_string(),
        expected,
        detail: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// AdjudicationSession
// ---------------------------------------------------------------------------

/// A decision waiting for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a pending adjudication must be completed with the service outcome"]
pub struct PendingAdjudication {
    pub ticket_id: String,
    pub action: AdjudicationAction,
    pub ids: BTreeSet<String>,
    pub commit: AdjudicationCommit,
}

/// Reviewer session over one needs-adjudication ticket.
#[derive(Debug, Clone)]
pub struct AdjudicationSession {
    ticket_id: String,
    status: TicketStatus,
    state: AdjudicationState,
    selected: BTreeSet<String>,
    in_flight: bool,
}

impl AdjudicationSession {
    /// # Errors
    ///
    /// See [`AdjudicationState::from_payload`].
    pub fn from_payload(payload: &TicketPayload) -> Result<Self, AdjudicationError> {
        Ok(Self {
            ticket_id: payload.id.clone(),
            status: payload.status,
            state: AdjudicationState::from_payload(payload)?,
            selected: BTreeSet::new(),
            in_flight: false,
        })
    }

    /// Fetch a ticket and start a session on it.
    ///
    /// # Errors
    ///
    /// The service failure, or a malformed payload.
    pub fn open<B: ApprovalBackend + ?Sized>(backend: &mut B, ticket_id: &str) -> Result<Self, AdjudicationError> {
        let payload = backend.fetch_ticket(ticket_id)?;
        Self::from_payload(&payload)
    }

    #[must_use]
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    #[must_use]
    pub const fn status(&self) -> TicketStatus {
        self.status
    }

    #[must_use]
    pub const fn state(&self) -> &AdjudicationState {
        &self.state
    }

    #[must_use]
    pub const fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether mark/clear actions are offered right now, and why not.
    #[must_use]
    pub fn actionability(&self) -> Actionability {
        if self.in_flight {
            return Actionability::Disabled(DisabledReason::CommitInFlight);
        }
        actionability(self.status, !self.selected.is_empty())
    }

    /// Flip the checkbox of one candidate; returns whether it is now selected.
    ///
    /// # Errors
    ///
    /// [`AdjudicationError::UnknownCandidate`], or `Disabled(CommitInFlight)`
    /// while a decision is being saved.
    pub fn toggle(&mut self, id: &str) -> Result<bool, AdjudicationError> {
        if self.in_flight {
            return Err(AdjudicationError::Disabled(DisabledReason::CommitInFlight));
        }
        if !self.state.contains(id) {
            return Err(AdjudicationError::UnknownCandidate(id.to_string()));
        }
        if self.selected.remove(id) {
            Ok(false)
        } else {
            self.selected.insert(id.to_string());
            Ok(true)
        }
    }

    /// Select several candidates at once.
    ///
    /// # Errors
    ///
    /// See [`Self::toggle`]; nothing is selected on error.
    pub fn select<I, S>(&mut self, ids: I) -> Result<(), AdjudicationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.in_flight {
            return Err(AdjudicationError::Disabled(DisabledReason::CommitInFlight));
        }
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.state.check_known(&ids)?;
        self.selected.extend(ids);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        if !self.in_flight {
            self.selected.clear();
        }
    }

    /// Validate an action on the current selection and freeze it into a commit.
    ///
    /// # Errors
    ///
    /// [`AdjudicationError::Disabled`] when the action is not offered, or a
    /// validation error from [`AdjudicationState::check`].
    pub fn begin(&mut self, action: AdjudicationAction) -> Result<PendingAdjudication, AdjudicationError> {
        if let Actionability::Disabled(reason) = self.actionability() {
            return Err(AdjudicationError::Disabled(reason));
        }
        self.state.check(action, &self.selected)?;

        let ids = self.selected.clone();
        let commit = action.to_commit(ids.iter().cloned().collect());
        info!(ticket_id = %self.ticket_id, ?action, count = ids.len(), "submitting adjudication");
        self.in_flight = true;

        Ok(PendingAdjudication {
            ticket_id: self.ticket_id.clone(),
            action,
            ids,
            commit,
        })
    }

    /// Apply the service's verdict; marks change only on success.
    ///
    /// An accepted decision is mirrored as sent: it was validated by
    /// [`Self::begin`] and the service now holds it.
    ///
    /// # Errors
    ///
    /// The service failure, with marks and selection untouched.
    pub fn complete(
        &mut self,
        pending: PendingAdjudication,
        outcome: Result<(), BackendError>,
    ) -> Result<(), AdjudicationError> {
        if !self.in_flight || pending.ticket_id != self.ticket_id {
            return Err(AdjudicationError::NoCommitInFlight(pending.ticket_id));
        }
        self.in_flight = false;

        match outcome {
            Ok(()) => {
                self.state.record(pending.action, &pending.ids);
                self.selected.clear();
                Ok(())
            }
            Err(err) => {
                warn!(ticket_id = %self.ticket_id, error = %err, "adjudication commit failed");
                Err(err.into())
            }
        }
    }

    /// Validate, send and apply in one call.
    ///
    /// # Errors
    ///
    /// See [`Self::begin`] and [`Self::complete`].
    pub fn submit<B: ApprovalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        action: AdjudicationAction,
    ) -> Result<(), AdjudicationError> {
        let pending = self.begin(action)?;
        let outcome = backend.approve_needs_adjudication(&pending.ticket_id, &pending.commit);
        self.complete(pending, outcome)
    }

    /// Fetch the ticket again into a fresh session.
    ///
    /// # Errors
    ///
    /// `Disabled(CommitInFlight)` while a decision is pending; otherwise as
    /// for [`Self::open`].
    pub fn refresh<B: ApprovalBackend + ?Sized>(&self, backend: &mut B) -> Result<Self, AdjudicationError> {
        if self.in_flight {
            return Err(AdjudicationError::Disabled(DisabledReason::CommitInFlight));
        }
        Self::open(backend, &self.ticket_id)
    }
}
