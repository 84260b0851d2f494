//! Wire shapes exchanged with the ticket service.
//!
//! Ticket details arrive as one flat JSON object: every key that is not a
//! reserved section name is a scalar field proposal. Arrays keep the order the
//! service sent them in, because approvals refer back to them by position.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::status::{IssueType, Role, TicketStatus};

/// Keys of `ticketDetails` that are not scalar field proposals.
pub const RESERVED_DETAIL_KEYS: &[&str] = &[
    "flexFields",
    "documents",
    "documentsToEdit",
    "documentsToRemove",
    "identities",
    "identitiesToEdit",
    "identitiesToRemove",
    "accounts",
    "accountsToEdit",
    "roles",
    "heldRoles",
    "verification",
    "approveStatus",
    "goldenRecord",
    "possibleDuplicates",
    "selectedDuplicates",
    "selectedDistinct",
    "similarityPair",
];

/// Response of `GET ticket(id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPayload {
    pub id: String,
    pub status: TicketStatus,
    pub issue_type: IssueType,
    #[serde(default)]
    pub ticket_details: Map<String, Value>,
}

/// One scalar or flex field proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarEntry {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub previous_value: Value,
    #[serde(default, deserialize_with = "null_as_false")]
    pub approve_status: bool,
}

impl ScalarEntry {
    /// Read a scalar entry.
    ///
    /// Add-individual tickets carry bare proposed values rather than
    /// `{value, previousValue}` objects; those become entries with a null
    /// previous value. An object with a `value` key is always read as an
    /// entry, whatever shape its other keys have.
    #[must_use]
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::Object(obj) if obj.contains_key("value") => Self {
                value: obj.get("value").cloned().unwrap_or_default(),
                previous_value: obj.get("previousValue").cloned().unwrap_or_default(),
                approve_status: obj
                    .get("approveStatus")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            _ => Self {
                value: raw.clone(),
                previous_value: Value::Null,
                approve_status: false,
            },
        }
    }
}

/// `approveStatus` may be `null` on entries nobody has decided yet.
fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// A record to be created (document, identity or account).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntry {
    pub value: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub approve_status: bool,
}

/// An existing record with proposed field edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub value: Map<String, Value>,
    #[serde(default)]
    pub previous_value: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub approve_status: bool,
}

/// An existing record proposed for removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEntry {
    /// Identifier of the record to remove.
    pub value: String,
    #[serde(default)]
    pub previous_value: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub approve_status: bool,
}

/// A proposed handover of a household role to another individual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleEntry {
    pub individual_id: String,
    pub household_id: String,
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_false")]
    pub approve_status: bool,
}

/// A role held by the record a delete ticket targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldRole {
    pub household_id: String,
    pub role: Role,
}

/// Outcome of the beneficiary lookup questionnaire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupVerification {
    #[serde(default)]
    pub verified_fields: Vec<String>,
    #[serde(default)]
    pub unverified_fields: Vec<String>,
}

impl LookupVerification {
    #[must_use]
    pub fn has_verified_identity(&self) -> bool {
        !self.verified_fields.is_empty()
    }
}

/// Body of `POST approve(ticketId, ...)`.
///
/// Index lists refer to positions in the arrays of the fetched ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub individual_approve_data: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_approve_data: Option<BTreeMap<String, bool>>,
    #[serde(default)]
    pub flex_fields_approve_data: BTreeMap<String, bool>,
    #[serde(default)]
    pub approved_documents_to_create: Vec<usize>,
    #[serde(default)]
    pub approved_documents_to_edit: Vec<usize>,
    #[serde(default)]
    pub approved_documents_to_remove: Vec<usize>,
    #[serde(default)]
    pub approved_identities_to_create: Vec<usize>,
    #[serde(default)]
    pub approved_identities_to_edit: Vec<usize>,
    #[serde(default)]
    pub approved_identities_to_remove: Vec<usize>,
    #[serde(default)]
    pub approved_accounts_to_create: Vec<usize>,
    #[serde(default)]
    pub approved_accounts_to_edit: Vec<usize>,
    #[serde(default)]
    pub roles: Vec<RoleApproval>,
    /// Whole-ticket decision for add/delete proposals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_status: Option<bool>,
}

impl CommitPayload {
    /// Scalar approvals, whichever of the individual/household maps is set.
    #[must_use]
    pub fn scalar_approvals(&self) -> Option<&BTreeMap<String, bool>> {
        self.individual_approve_data
            .as_ref()
            .or(self.household_approve_data.as_ref())
    }

    /// Number of changes this payload approves.
    #[must_use]
    pub fn approved_count(&self) -> usize {
        let approved_in = |map: &BTreeMap<String, bool>| map.values().filter(|v| **v).count();
        let scalar = self.scalar_approvals().map_or(0, approved_in);
        let flex = approved_in(&self.flex_fields_approve_data);
        let indices = [
            &self.approved_documents_to_create,
            &self.approved_documents_to_edit,
            &self.approved_documents_to_remove,
            &self.approved_identities_to_create,
            &self.approved_identities_to_edit,
            &self.approved_identities_to_remove,
            &self.approved_accounts_to_create,
            &self.approved_accounts_to_edit,
        ]
        .iter()
        .map(|list| list.len())
        .sum::<usize>();
        let roles = self.roles.iter().filter(|r| r.approve_status).count();
        let ticket = usize::from(self.approve_status == Some(true));
        scalar + flex + indices + roles + ticket
    }
}

/// Per-entry role decision in a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleApproval {
    pub individual_id: String,
    pub approve_status: bool,
}

/// Body of `POST approveNeedsAdjudication(ticketId, ...)`.
///
/// Serializes as an object with exactly one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjudicationCommit {
    DuplicateIndividualIds(Vec<String>),
    DistinctIndividualIds(Vec<String>),
    ClearIndividualIds(Vec<String>),
}

impl AdjudicationCommit {
    #[must_use]
    pub fn individual_ids(&self) -> &[String] {
        match self {
            Self::DuplicateIndividualIds(ids)
            | Self::DistinctIndividualIds(ids)
            | Self::ClearIndividualIds(ids) => ids,
        }
    }
}

/// Identity document as shown next to an adjudication candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub document_type: String,
    pub number: String,
    #[serde(default)]
    pub country: Option<String>,
}

/// A similarity hit reported by the deduplication engine for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupResult {
    pub hit_id: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Biographic snapshot of an individual under adjudication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSnapshot {
    pub id: String,
    #[serde(default)]
    pub unicef_id: Option<String>,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub birth_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub last_registration_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub admin2: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentSnapshot>,
    #[serde(default)]
    pub deduplication_results: Vec<DedupResult>,
}

/// Score the engine attached directly to one pair of individuals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityPair {
    pub individual1: String,
    pub individual2: String,
    #[serde(default)]
    pub similarity_score: Option<f64>,
}

impl SimilarityPair {
    /// Whether this pair links `a` and `b`, in either order.
    #[must_use]
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.individual1 == a && self.individual2 == b)
            || (self.individual1 == b && self.individual2 == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adjudication_commit_has_exactly_one_key() {
        let commit = AdjudicationCommit::ClearIndividualIds(vec!["IND-1".into()]);
        let value = serde_json::to_value(&commit).unwrap();
        assert_eq!(value, json!({"clearIndividualIds": ["IND-1"]}));

        let parsed: AdjudicationCommit =
            serde_json::from_value(json!({"distinctIndividualIds": ["A", "B"]})).unwrap();
        assert_eq!(parsed.individual_ids(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn scalar_entry_accepts_bare_values() {
        let entry = ScalarEntry::from_raw(&json!("Amina"));
        assert_eq!(entry.value, json!("Amina"));
        assert!(entry.previous_value.is_null());
        assert!(!entry.approve_status);

        let entry = ScalarEntry::from_raw(
            &json!({"value": "F", "previousValue": "M", "approveStatus": true}),
        );
        assert_eq!(entry.previous_value, json!("M"));
        assert!(entry.approve_status);
    }

    #[test]
    fn null_approve_status_keeps_the_entry_shape() {
        let entry = ScalarEntry::from_raw(
            &json!({"value": "F", "previousValue": "M", "approveStatus": null}),
        );
        assert_eq!(entry.value, json!("F"));
        assert_eq!(entry.previous_value, json!("M"));
        assert!(!entry.approve_status);

        let entry = ScalarEntry::from_raw(&json!({"value": "F", "approveStatus": "yes"}));
        assert_eq!(entry.value, json!("F"));
        assert!(entry.previous_value.is_null());

        let create: CreateEntry =
            serde_json::from_value(json!({"value": {"number": "1"}, "approveStatus": null})).unwrap();
        assert!(!create.approve_status);
    }

    #[test]
    fn commit_payload_serializes_camel_case_and_skips_unused_maps() {
        let mut payload = CommitPayload::default();
        payload.individual_approve_data = Some(BTreeMap::from([("sex".to_string(), true)]));
        payload.approved_documents_to_create = vec![0, 2];
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["individualApproveData"], json!({"sex": true}));
        assert_eq!(value["approvedDocumentsToCreate"], json!([0, 2]));
        assert!(value.get("householdApproveData").is_none());
        assert!(value.get("approveStatus").is_none());
        assert_eq!(payload.approved_count(), 3);
    }

    #[test]
    fn similarity_pair_links_either_order() {
        let pair = SimilarityPair {
            individual1: "A".into(),
            individual2: "B".into(),
            similarity_score: Some(7.2),
        };
        assert!(pair.links("A", "B"));
        assert!(pair.links("B", "A"));
        assert!(!pair.links("A", "C"));
    }
}
