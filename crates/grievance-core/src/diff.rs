//! Field-level diffs: one proposed change with its previous value.
//!
//! | Diff | Previous | Proposed | Approval unit |
//! |---|---|---|---|
//! | [`FieldDiff`] | scalar/flex value | scalar/flex value | field name |
//! | [`RecordChange`] create | — | record snapshot | array position |
//! | [`RecordChange`] edit | record snapshot | record snapshot | array position |
//! | [`RecordChange`] remove | record snapshot (optional) | — | array position |
//! | [`RoleReassignment`] | — | new role holder | array position |
//!
//! A diff whose previous and proposed values are equal under kind-aware
//! equality is kept (reviewers see "no change") but flagged `noop` and never
//! counts towards completeness.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::MalformedTicketError;
use crate::model::field::{FieldKind, FieldValue};
use crate::model::payload::{CreateEntry, EditEntry, RemoveEntry, RoleEntry};
use crate::model::status::{Role, TicketStatus};

// ---------------------------------------------------------------------------
// FieldDiff
// ---------------------------------------------------------------------------

/// A proposed change to one scalar or flex field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field_name: String,
    pub is_flex_field: bool,
    pub kind: FieldKind,
    pub previous_value: FieldValue,
    pub proposed_value: FieldValue,
    /// Approval flag as persisted by the service. Only meaningful while the
    /// ticket is `FOR_APPROVAL`; see [`FieldDiff::effective_approval`].
    pub approved: bool,
    pub noop: bool,
}

impl FieldDiff {
    /// Normalize a raw previous/proposed pair for a field of known kind.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedTicketError::KindMismatch`] when either value
    /// cannot be read as `kind`.
    pub fn new(
        field_name: impl Into<String>,
        is_flex_field: bool,
        kind: FieldKind,
        previous: &Value,
        proposed: &Value,
        approved: bool,
    ) -> Result<Self, MalformedTicketError> {
        let field_name = field_name.into();
        let normalize = |raw: &Value| {
            FieldValue::normalize(kind, raw).map_err(|detail| MalformedTicketError::KindMismatch {
                field: field_name.clone(),
                kind: kind.to_string(),
                detail,
            })
        };
        let previous_value = normalize(previous)?;
        let proposed_value = normalize(proposed)?;
        let noop = previous_value.same_as(&proposed_value);

        Ok(Self {
            field_name,
            is_flex_field,
            kind,
            previous_value,
            proposed_value,
            approved,
            noop,
        })
    }

    /// Keep a field the engine cannot interpret, with its raw JSON intact.
    pub fn opaque(
        field_name: impl Into<String>,
        is_flex_field: bool,
        previous: &Value,
        proposed: &Value,
        approved: bool,
    ) -> Self {
        let previous_value = FieldValue::Opaque(previous.clone());
        let proposed_value = FieldValue::Opaque(proposed.clone());
        let noop = previous_value.same_as(&proposed_value);
        Self {
            field_name: field_name.into(),
            is_flex_field,
            kind: FieldKind::Opaque,
            previous_value,
            proposed_value,
            approved,
            noop,
        }
    }

    /// The persisted approval flag, or `None` once the ticket has left
    /// `FOR_APPROVAL` and the flag no longer means anything.
    #[must_use]
    pub const fn effective_approval(&self, status: TicketStatus) -> Option<bool> {
        if status.is_editable() {
            Some(self.approved)
        } else {
            None
        }
    }

    /// Value shown in the "current value" column.
    ///
    /// Closed tickets show the recorded previous value; otherwise the live
    /// value of the record is shown when the caller has it.
    #[must_use]
    pub fn current_value<'a>(
        &'a self,
        status: TicketStatus,
        live: Option<&'a FieldValue>,
    ) -> &'a FieldValue {
        if status.shows_previous_value() {
            return &self.previous_value;
        }
        live.unwrap_or(&self.previous_value)
    }
}

// ---------------------------------------------------------------------------
// RecordChange
// ---------------------------------------------------------------------------

/// The record collections that support add/edit/remove proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Document,
    Identity,
    Account,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Identity => "identity",
            Self::Account => "account",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordOperation {
    Create,
    Edit,
    Remove,
}

/// One field of an edited record, previous against proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotField {
    pub name: String,
    pub previous: Value,
    pub proposed: Value,
    pub changed: bool,
}

/// A proposed create, edit or removal of a document, identity or account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordChange {
    pub kind: RecordKind,
    pub operation: RecordOperation,
    /// Position in the fetched array; the approval payload refers to it.
    pub index: usize,
    pub record_id: Option<String>,
    pub previous: Option<Map<String, Value>>,
    pub proposed: Option<Map<String, Value>>,
    pub approved: bool,
    pub noop: bool,
}

impl RecordChange {
    #[must_use]
    pub fn create(kind: RecordKind, index: usize, entry: &CreateEntry) -> Self {
        Self {
            kind,
            operation: RecordOperation::Create,
            index,
            record_id: None,
            previous: None,
            proposed: Some(entry.value.clone()),
            approved: entry.approve_status,
            noop: false,
        }
    }

    #[must_use]
    pub fn edit(kind: RecordKind, index: usize, entry: &EditEntry) -> Self {
        let record_id = entry.id.clone().or_else(|| {
            entry
                .previous_value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Self {
            kind,
            operation: RecordOperation::Edit,
            index,
            record_id,
            noop: snapshot_fields(&entry.previous_value, &entry.value)
                .iter()
                .all(|f| !f.changed),
            previous: Some(entry.previous_value.clone()),
            proposed: Some(entry.value.clone()),
            approved: entry.approve_status,
        }
    }

    #[must_use]
    pub fn remove(kind: RecordKind, index: usize, entry: &RemoveEntry) -> Self {
        Self {
            kind,
            operation: RecordOperation::Remove,
            index,
            record_id: Some(entry.value.clone()),
            previous: entry.previous_value.clone(),
            proposed: None,
            approved: entry.approve_status,
            noop: false,
        }
    }

    /// Field-by-field view of the change.
    ///
    /// For creates every proposed field is listed as changed; for removals
    /// every known previous field is.
    #[must_use]
    pub fn fields(&self) -> Vec<SnapshotField> {
        let empty = Map::new();
        let previous = self.previous.as_ref().unwrap_or(&empty);
        let proposed = self.proposed.as_ref().unwrap_or(&empty);
        match self.operation {
            RecordOperation::Edit => snapshot_fields(previous, proposed),
            RecordOperation::Create => proposed
                .iter()
                .map(|(name, value)| SnapshotField {
                    name: name.clone(),
                    previous: Value::Null,
                    proposed: value.clone(),
                    changed: true,
                })
                .collect(),
            RecordOperation::Remove => previous
                .iter()
                .map(|(name, value)| SnapshotField {
                    name: name.clone(),
                    previous: value.clone(),
                    proposed: Value::Null,
                    changed: true,
                })
                .collect(),
        }
    }
}

fn snapshot_fields(previous: &Map<String, Value>, proposed: &Map<String, Value>) -> Vec<SnapshotField> {
    let mut names: Vec<&String> = previous.keys().chain(proposed.keys()).collect();
    names.sort();
    names.dedup();
    names
        .into_iter()
        .filter(|name| name.as_str() != "id")
        .map(|name| {
            let before = previous.get(name).cloned().unwrap_or(Value::Null);
            let after = proposed.get(name).cloned().unwrap_or(Value::Null);
            SnapshotField {
                name: name.clone(),
                changed: before != after,
                previous: before,
                proposed: after,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RoleReassignment
// ---------------------------------------------------------------------------

/// A proposed handover of a household role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleReassignment {
    pub index: usize,
    pub individual_id: String,
    pub household_id: String,
    pub role: Role,
    pub approved: bool,
}

impl RoleReassignment {
    #[must_use]
    pub fn from_entry(index: usize, entry: &RoleEntry) -> Self {
        Self {
            index,
            individual_id: entry.individual_id.clone(),
            household_id: entry.household_id.clone(),
            role: entry.role,
            approved: entry.approve_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn equal_values_produce_noop_diff() {
        let diff = FieldDiff::new(
            "observed_disability",
            false,
            FieldKind::SelectMany,
            &json!(["SEEING", "HEARING"]),
            &json!(["HEARING", "SEEING"]),
            false,
        )
        .unwrap();
        assert!(diff.noop);
    }

    #[test]
    fn boolean_null_to_false_is_a_change() {
        let diff =
            FieldDiff::new("pregnant", false, FieldKind::Bool, &Value::Null, &json!(false), false)
                .unwrap();
        assert!(!diff.noop);
        assert_eq!(diff.proposed_value, FieldValue::Bool(false));
        assert!(diff.previous_value.is_null());
    }

    #[test]
    fn kind_mismatch_names_the_field() {
        let err = FieldDiff::new("birth_date", false, FieldKind::Date, &Value::Null, &json!(12), false)
            .unwrap_err();
        assert!(matches!(
            err,
            MalformedTicketError::KindMismatch { ref field, .. } if field == "birth_date"
        ));
    }

    #[test]
    fn opaque_diff_keeps_raw_json() {
        let diff = FieldDiff::opaque("geopoint", false, &json!([1, 2]), &json!([1, 3]), true);
        assert_eq!(diff.kind, FieldKind::Opaque);
        assert!(!diff.noop);
        assert_eq!(diff.proposed_value.to_json(), json!([1, 3]));
    }

    #[test]
    fn approval_is_ignored_outside_for_approval() {
        let diff = FieldDiff::new("sex", false, FieldKind::SelectOne, &json!("M"), &json!("F"), true)
            .unwrap();
        assert_eq!(diff.effective_approval(TicketStatus::ForApproval), Some(true));
        assert_eq!(diff.effective_approval(TicketStatus::Closed), None);
        assert_eq!(diff.effective_approval(TicketStatus::InProgress), None);
    }

    #[test]
    fn closed_tickets_show_previous_value() {
        let diff = FieldDiff::new("sex", false, FieldKind::SelectOne, &json!("M"), &json!("F"), true)
            .unwrap();
        let live = FieldValue::Code("F".into());
        assert_eq!(
            diff.current_value(TicketStatus::Closed, Some(&live)),
            &FieldValue::Code("M".into())
        );
        assert_eq!(diff.current_value(TicketStatus::ForApproval, Some(&live)), &live);
        assert_eq!(
            diff.current_value(TicketStatus::ForApproval, None),
            &FieldValue::Code("M".into())
        );
    }

    #[test]
    fn edit_lists_changed_fields_and_ignores_id() {
        let entry = EditEntry {
            id: None,
            value: obj(json!({"id": "DOC-1", "number": "B-2", "country": "AF"})),
            previous_value: obj(json!({"id": "DOC-1", "number": "B-1", "country": "AF"})),
            approve_status: false,
        };
        let change = RecordChange::edit(RecordKind::Document, 0, &entry);
        assert_eq!(change.record_id.as_deref(), Some("DOC-1"));
        assert!(!change.noop);

        let fields = change.fields();
        assert_eq!(fields.len(), 2);
        let number = fields.iter().find(|f| f.name == "number").unwrap();
        assert!(number.changed);
        let country = fields.iter().find(|f| f.name == "country").unwrap();
        assert!(!country.changed);
    }

    #[test]
    fn edit_without_changes_is_noop() {
        let snapshot = obj(json!({"number": "B-1"}));
        let entry = EditEntry {
            id: Some("DOC-1".into()),
            value: snapshot.clone(),
            previous_value: snapshot,
            approve_status: true,
        };
        assert!(RecordChange::edit(RecordKind::Identity, 3, &entry).noop);
    }

    #[test]
    fn remove_refers_to_existing_record() {
        let entry = RemoveEntry {
            value: "ACC-9".into(),
            previous_value: None,
            approve_status: false,
        };
        let change = RecordChange::remove(RecordKind::Document, 1, &entry);
        assert_eq!(change.record_id.as_deref(), Some("ACC-9"));
        assert!(change.fields().is_empty());
        assert!(!change.noop);
    }
}
