use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

use grievance_core::adjudication::{AdjudicationAction, AdjudicationState, Mark};
use grievance_core::changeset::{ChangeCategory, ChangeId, TicketChangeSet};
use grievance_core::model::field::{FieldKind, FieldRegistry};
use grievance_core::model::payload::{CommitPayload, TicketPayload};
use grievance_core::model::status::{IssueType, TicketStatus};
use grievance_core::selection::ApprovalSelection;

const INDIVIDUAL_FIELDS: &[&str] = &[
    "full_name",
    "given_name",
    "middle_name",
    "family_name",
    "phone_no",
    "email",
];

const HOUSEHOLD_FIELDS: &[&str] = &["address", "village", "admin_area_title"];

const FLEX_FIELDS: &[&str] = &["school_enrolled", "water_source", "livelihood"];

/// Shape of one generated ticket. `bool` vectors say, per entry, whether the
/// proposal differs from the previous value.
#[derive(Debug, Clone)]
struct TicketShape {
    issue_type: IssueType,
    fields: Vec<bool>,
    flex: Vec<bool>,
    documents: usize,
    documents_to_edit: Vec<bool>,
    documents_to_remove: usize,
    identities: usize,
    identities_to_edit: Vec<bool>,
    identities_to_remove: usize,
    accounts: usize,
    accounts_to_edit: Vec<bool>,
    roles: usize,
}

fn arb_issue_type() -> impl Strategy<Value = IssueType> {
    prop_oneof![
        Just(IssueType::IndividualDataUpdate),
        Just(IssueType::HouseholdDataUpdate),
        Just(IssueType::AddIndividual),
        Just(IssueType::DeleteIndividual),
        Just(IssueType::DeleteHousehold),
    ]
}

fn arb_shape() -> impl Strategy<Value = TicketShape> {
    let flags = |max: usize| prop::collection::vec(any::<bool>(), 0..max);
    (
        arb_issue_type(),
        prop::collection::vec(any::<bool>(), INDIVIDUAL_FIELDS.len()),
        flags(FLEX_FIELDS.len() + 1),
        0usize..3,
        flags(4),
        0usize..3,
        0usize..3,
        flags(4),
        0usize..2,
        0usize..3,
        flags(4),
        0usize..4,
    )
        .prop_map(
            |(
                issue_type,
                fields,
                flex,
                documents,
                documents_to_edit,
                documents_to_remove,
                identities,
                identities_to_edit,
                identities_to_remove,
                accounts,
                accounts_to_edit,
                roles,
            )| TicketShape {
                issue_type,
                fields,
                flex,
                documents,
                documents_to_edit,
                documents_to_remove,
                identities,
                identities_to_edit,
                identities_to_remove,
                accounts,
                accounts_to_edit,
                roles,
            },
        )
}

fn field_entry(changed: bool) -> Value {
    let proposed = if changed { "new" } else { "old" };
    json!({"value": proposed, "previousValue": "old"})
}

fn created(prefix: &str, count: usize) -> Value {
    (0..count)
        .map(|i| json!({"value": {"number": format!("{prefix}-{i}")}}))
        .collect()
}

fn edited(prefix: &str, changed: &[bool]) -> Value {
    changed
        .iter()
        .enumerate()
        .map(|(i, changed)| {
            let proposed = if *changed { "new" } else { "old" };
            json!({
                "id": format!("{prefix}-{i}"),
                "value": {"number": proposed},
                "previousValue": {"number": "old"},
            })
        })
        .collect()
}

fn removed(prefix: &str, count: usize) -> Value {
    (0..count).map(|i| json!({"value": format!("{prefix}-{i}")})).collect()
}

impl TicketShape {
    fn payload(&self) -> TicketPayload {
        let names = if self.issue_type == IssueType::HouseholdDataUpdate {
            HOUSEHOLD_FIELDS
        } else {
            INDIVIDUAL_FIELDS
        };
        let mut details = Map::new();
        for (name, changed) in names.iter().zip(&self.fields) {
            details.insert((*name).to_string(), field_entry(*changed));
        }
        let flex: Map<String, Value> = FLEX_FIELDS
            .iter()
            .zip(&self.flex)
            .map(|(name, changed)| ((*name).to_string(), field_entry(*changed)))
            .collect();
        details.insert("flexFields".into(), Value::Object(flex));
        details.insert("documents".into(), created("D", self.documents));
        details.insert("documentsToEdit".into(), edited("DOC", &self.documents_to_edit));
        details.insert("documentsToRemove".into(), removed("DOC", self.documents_to_remove));
        details.insert("identities".into(), created("I", self.identities));
        details.insert("identitiesToEdit".into(), edited("IDN", &self.identities_to_edit));
        details.insert("identitiesToRemove".into(), removed("IDN", self.identities_to_remove));
        details.insert("accounts".into(), created("A", self.accounts));
        details.insert("accountsToEdit".into(), edited("ACC", &self.accounts_to_edit));
        let roles: Value = (0..self.roles)
            .map(|i| {
                json!({
                    "individualId": format!("IND-{i}"),
                    "householdId": format!("HH-{i}"),
                    "role": if i % 2 == 0 { "PRIMARY" } else { "HEAD" },
                })
            })
            .collect();
        details.insert("roles".into(), roles);

        TicketPayload {
            id: "GRV-PROP".into(),
            status: TicketStatus::ForApproval,
            issue_type: self.issue_type,
            ticket_details: details,
        }
    }
}

fn arb_ticket() -> impl Strategy<Value = TicketPayload> {
    arb_shape().prop_map(|shape| shape.payload())
}

fn decompose(payload: &TicketPayload) -> TicketChangeSet {
    let registry = FLEX_FIELDS
        .iter()
        .fold(FieldRegistry::builtin(), |registry, name| {
            registry.with_flex(*name, FieldKind::String)
        });
    TicketChangeSet::from_ticket_payload(payload, &registry)
        .expect("generated ticket must decompose")
}

fn approved_indices(commit: &CommitPayload, category: ChangeCategory) -> &[usize] {
    match category {
        ChangeCategory::DocumentsCreate => &commit.approved_documents_to_create,
        ChangeCategory::DocumentsEdit => &commit.approved_documents_to_edit,
        ChangeCategory::DocumentsRemove => &commit.approved_documents_to_remove,
        ChangeCategory::IdentitiesCreate => &commit.approved_identities_to_create,
        ChangeCategory::IdentitiesEdit => &commit.approved_identities_to_edit,
        ChangeCategory::IdentitiesRemove => &commit.approved_identities_to_remove,
        ChangeCategory::AccountsCreate => &commit.approved_accounts_to_create,
        ChangeCategory::AccountsEdit => &commit.approved_accounts_to_edit,
        other => panic!("{other} has no index list"),
    }
}

/// Every category of `commit` approves exactly what `selection` holds.
fn assert_matches_selection(
    cs: &TicketChangeSet,
    selection: &ApprovalSelection,
    commit: &CommitPayload,
) -> Result<(), TestCaseError> {
    let issue_type = cs.issue_type();
    prop_assert_eq!(commit.approved_count(), selection.selected_count());
    prop_assert_eq!(
        commit.individual_approve_data.is_some(),
        issue_type == IssueType::IndividualDataUpdate
    );
    prop_assert_eq!(
        commit.household_approve_data.is_some(),
        issue_type == IssueType::HouseholdDataUpdate
    );

    for category in ChangeCategory::ALL {
        let selectable = cs.change_ids(category);
        match category {
            ChangeCategory::Scalar | ChangeCategory::Flex => {
                let map = if category == ChangeCategory::Scalar {
                    commit.scalar_approvals().cloned().unwrap_or_default()
                } else {
                    commit.flex_fields_approve_data.clone()
                };
                prop_assert_eq!(map.len(), selectable.len());
                for (name, approved) in &map {
                    let id = ChangeId::Field(name.clone());
                    prop_assert!(selectable.contains(&id));
                    prop_assert_eq!(*approved, selection.is_selected(category, &id));
                }
                prop_assert_eq!(
                    map.values().filter(|v| **v).count(),
                    selection.selected_count_in(category)
                );
            }
            ChangeCategory::Roles => {
                prop_assert_eq!(commit.roles.len(), cs.roles().len());
                for (role, decision) in cs.roles().iter().zip(&commit.roles) {
                    prop_assert_eq!(&decision.individual_id, &role.individual_id);
                    prop_assert_eq!(
                        decision.approve_status,
                        selection.is_selected(category, &ChangeId::Index(role.index))
                    );
                }
            }
            ChangeCategory::Ticket => {
                let expected = issue_type
                    .is_whole_ticket()
                    .then(|| selection.is_selected(category, &ChangeId::Ticket));
                prop_assert_eq!(commit.approve_status, expected);
            }
            records => {
                let expected: Vec<usize> = selectable
                    .iter()
                    .filter(|id| selection.is_selected(records, id))
                    .filter_map(|id| match id {
                        ChangeId::Index(i) => Some(*i),
                        _ => None,
                    })
                    .collect();
                prop_assert_eq!(approved_indices(commit, records), expected.as_slice());
                prop_assert_eq!(expected.len(), selection.selected_count_in(records));
            }
        }
    }
    Ok(())
}

fn arb_action() -> impl Strategy<Value = AdjudicationAction> {
    prop_oneof![
        Just(AdjudicationAction::MarkDuplicate),
        Just(AdjudicationAction::MarkDistinct),
        Just(AdjudicationAction::Clear),
    ]
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn payload_approves_exactly_the_selection(payload in arb_ticket(), picks in prop::collection::vec(any::<bool>(), 1..32)) {
        let cs = decompose(&payload);
        let mut selection = ApprovalSelection::for_change_set(&cs);
        for (change, pick) in cs.change_refs().into_iter().zip(picks.iter().cycle()) {
            if *pick {
                selection.toggle(change.category, change.id).unwrap();
            }
        }

        let commit = cs.to_commit_payload(&selection);
        assert_matches_selection(&cs, &selection, &commit)?;
    }

    #[test]
    fn full_selection_approves_every_change(payload in arb_ticket()) {
        let cs = decompose(&payload);
        let mut selection = ApprovalSelection::for_change_set(&cs);
        selection.select_everything();
        prop_assert_eq!(selection.selected_count(), cs.total_change_count());

        let commit = cs.to_commit_payload(&selection);
        assert_matches_selection(&cs, &selection, &commit)?;
        prop_assert_eq!(commit.approved_count(), cs.total_change_count());
    }

    #[test]
    fn noop_fields_never_count(payload in arb_ticket()) {
        let cs = decompose(&payload);
        for (category, diffs) in [
            (ChangeCategory::Scalar, cs.scalar_diffs()),
            (ChangeCategory::Flex, cs.flex_diffs()),
        ] {
            if cs.category_applies(category) {
                let changed = diffs.iter().filter(|d| !d.noop).count();
                prop_assert_eq!(cs.category_count(category), changed);
            }
            prop_assert!(diffs.iter().filter(|d| d.noop).all(|d| d.previous_value.same_as(&d.proposed_value)));
        }
    }

    #[test]
    fn double_toggle_is_identity(payload in arb_ticket(), index in 0usize..32) {
        let cs = decompose(&payload);
        let changes = cs.change_refs();
        prop_assume!(!changes.is_empty());
        let change = changes[index % changes.len()].clone();

        let mut selection = ApprovalSelection::seeded(&cs);
        let before = selection.clone();
        selection.toggle(change.category, change.id.clone()).unwrap();
        selection.toggle(change.category, change.id).unwrap();
        prop_assert_eq!(selection, before);
    }

    #[test]
    fn marks_stay_mutually_exclusive(
        steps in prop::collection::vec((arb_action(), prop::collection::btree_set(0usize..4, 1..3)), 1..20)
    ) {
        let payload: TicketPayload = serde_json::from_value(json!({
            "id": "GRV-PROP-ADJ",
            "status": "FOR_APPROVAL",
            "issueType": "NEEDS_ADJUDICATION",
            "ticketDetails": {
                "goldenRecord": {"id": "IND-0"},
                "possibleDuplicates": [{"id": "IND-1"}, {"id": "IND-2"}, {"id": "IND-3"}],
            }
        }))
        .unwrap();
        let mut state = AdjudicationState::from_payload(&payload).unwrap();

        for (action, picks) in steps {
            let ids: BTreeSet<String> = picks.iter().map(|i| format!("IND-{i}")).collect();
            if state.apply(action, &ids).is_ok() {
                for id in &ids {
                    prop_assert_eq!(state.mark(id), Some(action.target()));
                }
            }

            let duplicates: BTreeSet<&str> = state.with_mark(Mark::Duplicate).into_iter().collect();
            let distinct: BTreeSet<&str> = state.with_mark(Mark::Distinct).into_iter().collect();
            prop_assert!(duplicates.is_disjoint(&distinct));
            prop_assert!(duplicates.len() < 4);
        }
    }
}
