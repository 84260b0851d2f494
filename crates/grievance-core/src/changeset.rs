//! Ticket change set: a fetched ticket decomposed into typed diffs.
//!
//! A change set is built fresh from every ticket fetch and never reused
//! across tickets. Its record and role arrays keep the exact order of the
//! fetched payload: the approval payload refers to entries by array position,
//! so reordering would approve the wrong records.
//!
//! # Selectable changes
//!
//! Field-level tickets (individual/household data updates) expose every
//! non-noop field, record and role entry for approval. Whole-ticket proposals
//! (add individual, delete individual, delete household) expose one
//! [`ChangeCategory::Ticket`] item plus their role entries; their field diffs
//! are decomposed for display only.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::{fmt, str::FromStr};
use tracing::{debug, warn};

use crate::diff::{FieldDiff, RecordChange, RecordKind, RecordOperation, RoleReassignment};
use crate::error::MalformedTicketError;
use crate::model::field::FieldRegistry;
use crate::model::payload::{
    CommitPayload, CreateEntry, EditEntry, HeldRole, LookupVerification, RESERVED_DETAIL_KEYS,
    RemoveEntry, RoleApproval, RoleEntry, ScalarEntry, TicketPayload,
};
use crate::model::status::{IssueType, ParseEnumError, TicketStatus};
use crate::selection::ApprovalSelection;

// ---------------------------------------------------------------------------
// Categories and identifiers
// ---------------------------------------------------------------------------

/// Approval categories, one per independently selected group of changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCategory {
    Scalar,
    Flex,
    DocumentsCreate,
    DocumentsEdit,
    DocumentsRemove,
    IdentitiesCreate,
    IdentitiesEdit,
    IdentitiesRemove,
    AccountsCreate,
    AccountsEdit,
    Roles,
    Ticket,
}

impl ChangeCategory {
    pub const ALL: [Self; 12] = [
        Self::Scalar,
        Self::Flex,
        Self::DocumentsCreate,
        Self::DocumentsEdit,
        Self::DocumentsRemove,
        Self::IdentitiesCreate,
        Self::IdentitiesEdit,
        Self::IdentitiesRemove,
        Self::AccountsCreate,
        Self::AccountsEdit,
        Self::Roles,
        Self::Ticket,
    ];

    const RECORD_SECTIONS: [(Self, &'static str, RecordKind, RecordOperation); 8] = [
        (Self::DocumentsCreate, "documents", RecordKind::Document, RecordOperation::Create),
        (Self::DocumentsEdit, "documentsToEdit", RecordKind::Document, RecordOperation::Edit),
        (Self::DocumentsRemove, "documentsToRemove", RecordKind::Document, RecordOperation::Remove),
        (Self::IdentitiesCreate, "identities", RecordKind::Identity, RecordOperation::Create),
        (Self::IdentitiesEdit, "identitiesToEdit", RecordKind::Identity, RecordOperation::Edit),
        (Self::IdentitiesRemove, "identitiesToRemove", RecordKind::Identity, RecordOperation::Remove),
        (Self::AccountsCreate, "accounts", RecordKind::Account, RecordOperation::Create),
        (Self::AccountsEdit, "accountsToEdit", RecordKind::Account, RecordOperation::Edit),
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Flex => "flex",
            Self::DocumentsCreate => "documents-create",
            Self::DocumentsEdit => "documents-edit",
            Self::DocumentsRemove => "documents-remove",
            Self::IdentitiesCreate => "identities-create",
            Self::IdentitiesEdit => "identities-edit",
            Self::IdentitiesRemove => "identities-remove",
            Self::AccountsCreate => "accounts-create",
            Self::AccountsEdit => "accounts-edit",
            Self::Roles => "roles",
            Self::Ticket => "ticket",
        }
    }

    /// Whether changes in this category are identified by array position.
    #[must_use]
    pub const fn is_indexed(self) -> bool {
        !matches!(self, Self::Scalar | Self::Flex | Self::Ticket)
    }
}

impl fmt::Display for ChangeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "change category",
                got: s.to_string(),
            })
    }
}

/// Identifier of one change within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ChangeId {
    /// Scalar and flex fields, by field name.
    Field(String),
    /// Records and role entries, by position in the fetched array.
    Index(usize),
    /// The proposal as a whole.
    Ticket,
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{i}"),
            Self::Ticket => f.write_str("ticket"),
        }
    }
}

/// A category-qualified change identifier, written `category:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChangeRef {
    pub category: ChangeCategory,
    pub id: ChangeId,
}

impl ChangeRef {
    #[must_use]
    pub const fn new(category: ChangeCategory, id: ChangeId) -> Self {
        Self { category, id }
    }
}

impl fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category == ChangeCategory::Ticket {
            return f.write_str("ticket");
        }
        write!(f, "{}:{}", self.category, self.id)
    }
}

impl FromStr for ChangeRef {
    type Err = ParseEnumError;

    /// Parse `scalar:full_name`, `documents-edit:0`, `roles:1` or `ticket`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEnumError {
            expected: "change reference (category:id)",
            got: s.to_string(),
        };
        let (category, id) = match s.split_once(':') {
            Some((category, id)) => (category.parse::<ChangeCategory>()?, Some(id.trim())),
            None => (s.parse::<ChangeCategory>()?, None),
        };
        let id = match (category, id) {
            (ChangeCategory::Ticket, None | Some("ticket" | "")) => ChangeId::Ticket,
            (ChangeCategory::Scalar | ChangeCategory::Flex, Some(name)) if !name.is_empty() => {
                ChangeId::Field(name.to_string())
            }
            (c, Some(index)) if c.is_indexed() => {
                ChangeId::Index(index.parse::<usize>().map_err(|_| invalid())?)
            }
            _ => return Err(invalid()),
        };
        Ok(Self { category, id })
    }
}

// ---------------------------------------------------------------------------
// Decomposition options
// ---------------------------------------------------------------------------

/// How to treat field names without a kind descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaMode {
    /// Keep the raw value as an opaque diff and record the problem.
    #[default]
    Lenient,
    /// Fail decomposition with [`MalformedTicketError`].
    Strict,
}

// ---------------------------------------------------------------------------
// TicketChangeSet
// ---------------------------------------------------------------------------

/// All proposed changes of one ticket, grouped by category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketChangeSet {
    ticket_id: String,
    status: TicketStatus,
    issue_type: IssueType,
    scalar: Vec<FieldDiff>,
    flex: Vec<FieldDiff>,
    records: BTreeMap<ChangeCategory, Vec<RecordChange>>,
    roles: Vec<RoleReassignment>,
    held_roles: Vec<HeldRole>,
    verification: Option<LookupVerification>,
    ticket_approved: bool,
    #[serde(skip)]
    recovered: Vec<MalformedTicketError>,
}

impl TicketChangeSet {
    /// Decompose a fetched ticket, preserving uninterpretable fields as opaque
    /// diffs.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedTicketError::InvalidSection`] when a reserved section
    /// (documents, roles, verification, ...) has the wrong shape.
    pub fn from_ticket_payload(
        payload: &TicketPayload,
        registry: &FieldRegistry,
    ) -> Result<Self, MalformedTicketError> {
        Self::decompose(payload, registry, SchemaMode::Lenient)
    }

    /// Decompose a fetched ticket, failing on the first field that has no
    /// kind descriptor or does not match its kind.
    ///
    /// # Errors
    ///
    /// Returns any [`MalformedTicketError`].
    pub fn from_ticket_payload_strict(
        payload: &TicketPayload,
        registry: &FieldRegistry,
    ) -> Result<Self, MalformedTicketError> {
        Self::decompose(payload, registry, SchemaMode::Strict)
    }

    /// Decompose with an explicit [`SchemaMode`].
    ///
    /// # Errors
    ///
    /// See [`Self::from_ticket_payload`] and [`Self::from_ticket_payload_strict`].
    pub fn decompose(
        payload: &TicketPayload,
        registry: &FieldRegistry,
        mode: SchemaMode,
    ) -> Result<Self, MalformedTicketError> {
        let details = &payload.ticket_details;
        let mut recovered = Vec::new();

        let scalar_entries = details
            .iter()
            .filter(|(key, _)| !RESERVED_DETAIL_KEYS.contains(&key.as_str()));
        let scalar = decompose_fields(scalar_entries, false, registry, mode, &mut recovered)?;

        let flex = match details.get("flexFields") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => {
                decompose_fields(map.iter(), true, registry, mode, &mut recovered)?
            }
            Some(other) => {
                return Err(MalformedTicketError::InvalidSection {
                    key: "flexFields".into(),
                    expected: "object",
                    detail: format!("got {other}"),
                });
            }
        };

        let mut records = BTreeMap::new();
        for (category, key, kind, operation) in ChangeCategory::RECORD_SECTIONS {
            let changes = match operation {
                RecordOperation::Create => section::<CreateEntry>(details, key)?
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| RecordChange::create(kind, i, entry))
                    .collect(),
                RecordOperation::Edit => section::<EditEntry>(details, key)?
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| RecordChange::edit(kind, i, entry))
                    .collect(),
                RecordOperation::Remove => section::<RemoveEntry>(details, key)?
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| RecordChange::remove(kind, i, entry))
                    .collect(),
            };
            records.insert(category, changes);
        }

        let roles = section::<RoleEntry>(details, "roles")?
            .iter()
            .enumerate()
            .map(|(i, entry)| RoleReassignment::from_entry(i, entry))
            .collect();

        let held_roles = section::<HeldRole>(details, "heldRoles")?;

        let verification = match details.get("verification") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<LookupVerification>(raw.clone()).map_err(|e| {
                    MalformedTicketError::InvalidSection {
                        key: "verification".into(),
                        expected: "lookup verification",
                        detail: e.to_string(),
                    }
                })?,
            ),
        };

        let ticket_approved = details
            .get("approveStatus")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let change_set = Self {
            ticket_id: payload.id.clone(),
            status: payload.status,
            issue_type: payload.issue_type,
            scalar,
            flex,
            records,
            roles,
            held_roles,
            verification,
            ticket_approved,
            recovered,
        };

        debug!(
            ticket_id = %change_set.ticket_id,
            issue_type = %change_set.issue_type,
            total = change_set.total_change_count(),
            recovered = change_set.recovered.len(),
            "decomposed ticket"
        );

        Ok(change_set)
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
    pub const fn issue_type(&self) -> IssueType {
        self.issue_type
    }

    #[must_use]
    pub const fn is_editable(&self) -> bool {
        self.status.is_editable()
    }

    #[must_use]
    pub fn scalar_diffs(&self) -> &[FieldDiff] {
        &self.scalar
    }

    #[must_use]
    pub fn flex_diffs(&self) -> &[FieldDiff] {
        &self.flex
    }

    /// Record changes of one record category, in fetched order.
    #[must_use]
    pub fn records(&self, category: ChangeCategory) -> &[RecordChange] {
        self.records.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn roles(&self) -> &[RoleReassignment] {
        &self.roles
    }

    #[must_use]
    pub fn held_roles(&self) -> &[HeldRole] {
        &self.held_roles
    }

    #[must_use]
    pub const fn verification(&self) -> Option<&LookupVerification> {
        self.verification.as_ref()
    }

    /// Field-level problems that were recovered by keeping raw values.
    #[must_use]
    pub fn recovered(&self) -> &[MalformedTicketError] {
        &self.recovered
    }

    /// Whether `category` can hold selectable changes for this ticket's issue type.
    #[must_use]
    pub const fn category_applies(&self, category: ChangeCategory) -> bool {
        match category {
            ChangeCategory::Roles => true,
            ChangeCategory::Ticket => self.issue_type.is_whole_ticket(),
            _ => self.issue_type.is_field_level(),
        }
    }

    /// Selectable change ids of one category, in fetched order; noops excluded.
    #[must_use]
    pub fn change_ids(&self, category: ChangeCategory) -> Vec<ChangeId> {
        if !self.category_applies(category) {
            return Vec::new();
        }
        match category {
            ChangeCategory::Scalar => field_ids(&self.scalar),
            ChangeCategory::Flex => field_ids(&self.flex),
            ChangeCategory::Roles => self.roles.iter().map(|r| ChangeId::Index(r.index)).collect(),
            ChangeCategory::Ticket => vec![ChangeId::Ticket],
            records => self
                .records(records)
                .iter()
                .filter(|r| !r.noop)
                .map(|r| ChangeId::Index(r.index))
                .collect(),
        }
    }

    /// Every selectable change, category by category.
    #[must_use]
    pub fn change_refs(&self) -> Vec<ChangeRef> {
        ChangeCategory::ALL
            .into_iter()
            .flat_map(|category| {
                self.change_ids(category)
                    .into_iter()
                    .map(move |id| ChangeRef::new(category, id))
            })
            .collect()
    }

    /// Number of selectable changes in one category.
    #[must_use]
    pub fn category_count(&self, category: ChangeCategory) -> usize {
        self.change_ids(category).len()
    }

    /// Sum of all non-noop diffs and groups.
    ///
    /// Decides whether the "approve all" fast path is offered.
    #[must_use]
    pub fn total_change_count(&self) -> usize {
        ChangeCategory::ALL
            .into_iter()
            .map(|c| self.category_count(c))
            .sum()
    }

    /// Changes the service reports as already approved.
    ///
    /// Empty once the ticket has left `FOR_APPROVAL`: persisted flags are
    /// meaningless from then on.
    #[must_use]
    pub fn persisted_approvals(&self) -> Vec<ChangeRef> {
        if !self.is_editable() {
            return Vec::new();
        }
        self.change_refs()
            .into_iter()
            .filter(|change| self.persisted_flag(change))
            .collect()
    }

    fn persisted_flag(&self, change: &ChangeRef) -> bool {
        match (&change.category, &change.id) {
            (ChangeCategory::Scalar, ChangeId::Field(name)) => {
                self.scalar.iter().any(|d| &d.field_name == name && d.approved)
            }
            (ChangeCategory::Flex, ChangeId::Field(name)) => {
                self.flex.iter().any(|d| &d.field_name == name && d.approved)
            }
            (ChangeCategory::Roles, ChangeId::Index(i)) => {
                self.roles.get(*i).is_some_and(|r| r.approved)
            }
            (ChangeCategory::Ticket, ChangeId::Ticket) => self.ticket_approved,
            (category, ChangeId::Index(i)) => {
                self.records(*category).get(*i).is_some_and(|r| r.approved)
            }
            _ => false,
        }
    }

    /// Held primary-collector and head roles that must be handed over.
    #[must_use]
    pub fn required_reassignments(&self) -> usize {
        if !self.issue_type.requires_role_reassignment() {
            return 0;
        }
        self.held_roles
            .iter()
            .filter(|held| held.role.requires_reassignment())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Held roles covered by a selected reassignment of the same household and role.
    #[must_use]
    pub fn approved_reassignments(&self, selection: &ApprovalSelection) -> usize {
        if !self.issue_type.requires_role_reassignment() {
            return 0;
        }
        self.held_roles
            .iter()
            .filter(|held| held.role.requires_reassignment())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|held| {
                self.roles.iter().any(|r| {
                    r.household_id == held.household_id
                        && r.role == held.role
                        && selection.is_selected(ChangeCategory::Roles, &ChangeId::Index(r.index))
                })
            })
            .count()
    }

    /// Build the approval payload for the current selection.
    ///
    /// Pure: the payload approves exactly the selected changes. Field maps
    /// list every selectable field with its decision; index lists carry only
    /// selected positions, ascending.
    #[must_use]
    pub fn to_commit_payload(&self, selection: &ApprovalSelection) -> CommitPayload {
        let field_map = |category: ChangeCategory| -> BTreeMap<String, bool> {
            self.change_ids(category)
                .into_iter()
                .filter_map(|id| {
                    let selected = selection.is_selected(category, &id);
                    match id {
                        ChangeId::Field(name) => Some((name, selected)),
                        _ => None,
                    }
                })
                .collect()
        };
        let indices = |category: ChangeCategory| -> Vec<usize> {
            self.change_ids(category)
                .into_iter()
                .filter(|id| selection.is_selected(category, id))
                .filter_map(|id| match id {
                    ChangeId::Index(i) => Some(i),
                    _ => None,
                })
                .collect()
        };

        let mut payload = CommitPayload::default();

        if self.issue_type.is_field_level() {
            let scalar = field_map(ChangeCategory::Scalar);
            if self.issue_type.targets_household() {
                payload.household_approve_data = Some(scalar);
            } else {
                payload.individual_approve_data = Some(scalar);
            }
            payload.flex_fields_approve_data = field_map(ChangeCategory::Flex);
            payload.approved_documents_to_create = indices(ChangeCategory::DocumentsCreate);
            payload.approved_documents_to_edit = indices(ChangeCategory::DocumentsEdit);
            payload.approved_documents_to_remove = indices(ChangeCategory::DocumentsRemove);
            payload.approved_identities_to_create = indices(ChangeCategory::IdentitiesCreate);
            payload.approved_identities_to_edit = indices(ChangeCategory::IdentitiesEdit);
            payload.approved_identities_to_remove = indices(ChangeCategory::IdentitiesRemove);
            payload.approved_accounts_to_create = indices(ChangeCategory::AccountsCreate);
            payload.approved_accounts_to_edit = indices(ChangeCategory::AccountsEdit);
        }

        payload.roles = self
            .roles
            .iter()
            .map(|r| RoleApproval {
                individual_id: r.individual_id.clone(),
                approve_status: selection
                    .is_selected(ChangeCategory::Roles, &ChangeId::Index(r.index)),
            })
            .collect();

        if self.issue_type.is_whole_ticket() {
            payload.approve_status =
                Some(selection.is_selected(ChangeCategory::Ticket, &ChangeId::Ticket));
        }

        payload
    }
}

fn field_ids(diffs: &[FieldDiff]) -> Vec<ChangeId> {
    diffs
        .iter()
        .filter(|d| !d.noop)
        .map(|d| ChangeId::Field(d.field_name.clone()))
        .collect()
}

fn decompose_fields<'a>(
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
    is_flex: bool,
    registry: &FieldRegistry,
    mode: SchemaMode,
    recovered: &mut Vec<MalformedTicketError>,
) -> Result<Vec<FieldDiff>, MalformedTicketError> {
    let mut diffs = Vec::new();
    for (name, raw) in entries {
        let entry = ScalarEntry::from_raw(raw);
        let outcome = match registry.lookup(name, is_flex) {
            Some(kind) => FieldDiff::new(
                name.as_str(),
                is_flex,
                kind,
                &entry.previous_value,
                &entry.value,
                entry.approve_status,
            ),
            None => Err(MalformedTicketError::UnknownField {
                field: name.clone(),
                flex: is_flex,
            }),
        };

        match outcome {
            Ok(diff) => diffs.push(diff),
            Err(err) if mode == SchemaMode::Strict => return Err(err),
            Err(err) => {
                warn!(field = %name, flex = is_flex, error = %err, "keeping field as opaque");
                diffs.push(FieldDiff::opaque(
                    name.as_str(),
                    is_flex,
                    &entry.previous_value,
                    &entry.value,
                    entry.approve_status,
                ));
                recovered.push(err);
            }
        }
    }
    Ok(diffs)
}

fn section<T: serde::de::DeserializeOwned>(
    details: &Map<String, Value>,
    key: &str,
) -> Result<Vec<T>, MalformedTicketError> {
    match details.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value::<Vec<T>>(raw.clone()).map_err(|e| {
            MalformedTicketError::InvalidSection {
                key: key.to_string(),
                expected: "array of entries",
                detail: e.to_string(),
            }
        }),
    }
}
