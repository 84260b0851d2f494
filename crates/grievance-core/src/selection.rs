//! Reviewer's in-progress approval choices for one change set.
//!
//! The selection only knows which changes are selectable (captured from the
//! change set it was built for) and which of those are currently selected.
//! It never talks to the service; locking while a commit is in flight or
//! after the ticket left `FOR_APPROVAL` is the review session's job.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::changeset::{ChangeCategory, ChangeId, ChangeRef, TicketChangeSet};

/// Rejected selection edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The id is unknown, a no-op, or not approvable for this issue type.
    #[error("{0} is not a selectable change")]
    NotSelectable(ChangeRef),
}

/// Selected change ids, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalSelection {
    selectable: BTreeMap<ChangeCategory, BTreeSet<ChangeId>>,
    selected: BTreeMap<ChangeCategory, BTreeSet<ChangeId>>,
}

impl ApprovalSelection {
    /// Empty selection over the selectable changes of `change_set`.
    #[must_use]
    pub fn for_change_set(change_set: &TicketChangeSet) -> Self {
        let selectable = ChangeCategory::ALL
            .into_iter()
            .map(|category| {
                let ids: BTreeSet<ChangeId> = change_set.change_ids(category).into_iter().collect();
                (category, ids)
            })
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        Self {
            selectable,
            selected: BTreeMap::new(),
        }
    }

    /// Selection seeded with the approvals the service already recorded.
    #[must_use]
    pub fn seeded(change_set: &TicketChangeSet) -> Self {
        let mut selection = Self::for_change_set(change_set);
        for change in change_set.persisted_approvals() {
            selection
                .selected
                .entry(change.category)
                .or_default()
                .insert(change.id);
        }
        selection
    }

    fn check(&self, category: ChangeCategory, id: &ChangeId) -> Result<(), SelectionError> {
        if self
            .selectable
            .get(&category)
            .is_some_and(|ids| ids.contains(id))
        {
            Ok(())
        } else {
            Err(SelectionError::NotSelectable(ChangeRef::new(
                category,
                id.clone(),
            )))
        }
    }

    /// Flip membership of one change; returns whether it is now selected.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::NotSelectable`] for ids the change set does
    /// not offer for approval. The selection is unchanged in that case.
    pub fn toggle(&mut self, category: ChangeCategory, id: ChangeId) -> Result<bool, SelectionError> {
        self.check(category, &id)?;
        let ids = self.selected.entry(category).or_default();
        if ids.remove(&id) {
            Ok(false)
        } else {
            ids.insert(id);
            Ok(true)
        }
    }

    /// Select every id in `ids`; returns how many were newly selected.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::NotSelectable`] for the first unknown id,
    /// without selecting any of them.
    pub fn select_all(
        &mut self,
        category: ChangeCategory,
        ids: impl IntoIterator<Item = ChangeId>,
    ) -> Result<usize, SelectionError> {
        let ids: Vec<ChangeId> = ids.into_iter().collect();
        for id in &ids {
            self.check(category, id)?;
        }
        let selected = self.selected.entry(category).or_default();
        Ok(ids.into_iter().filter(|id| selected.insert(id.clone())).count())
    }

    /// Select every selectable change of every category.
    pub fn select_everything(&mut self) {
        self.selected = self.selectable.clone();
    }

    pub fn clear(&mut self, category: ChangeCategory) {
        self.selected.remove(&category);
    }

    pub fn clear_all(&mut self) {
        self.selected.clear();
    }

    #[must_use]
    pub fn is_selected(&self, category: ChangeCategory, id: &ChangeId) -> bool {
        self.selected
            .get(&category)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Selected ids of one category, ordered.
    pub fn selected(&self, category: ChangeCategory) -> impl Iterator<Item = &ChangeId> {
        self.selected.get(&category).into_iter().flatten()
    }

    #[must_use]
    pub fn selected_count_in(&self, category: ChangeCategory) -> usize {
        self.selected.get(&category).map_or(0, BTreeSet::len)
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.selected.values().map(BTreeSet::len).sum()
    }

    #[must_use]
    pub fn selectable_count(&self) -> usize {
        self.selectable.values().map(BTreeSet::len).sum()
    }

    /// True iff every change of `change_set` is selected.
    #[must_use]
    pub fn is_complete(&self, change_set: &TicketChangeSet) -> bool {
        self.selected_count() == change_set.total_change_count()
    }

    /// Selectable changes left unselected; they are implicitly rejected when
    /// the ticket closes.
    #[must_use]
    pub fn unselected(&self) -> Vec<ChangeRef> {
        self.selectable
            .iter()
            .flat_map(|(category, ids)| {
                ids.iter()
                    .filter(|id| !self.is_selected(*category, id))
                    .map(|id| ChangeRef::new(*category, id.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::field::FieldRegistry;
    use crate::model::payload::TicketPayload;
    use crate::model::status::{IssueType, TicketStatus};
    use serde_json::json;

    fn change_set() -> TicketChangeSet {
        let payload: TicketPayload = serde_json::from_value(json!({
            "id": "GRV-0002",
            "status": "FOR_APPROVAL",
            "issueType": "INDIVIDUAL_DATA_UPDATE",
            "ticketDetails": {
                "sex": {"value": "F", "previousValue": "M", "approveStatus": true},
                "phone_no": {"value": "+1", "previousValue": "+2"},
                "email": {"value": "a@b.c", "previousValue": "a@b.c"},
                "documents": [{"value": {"number": "1"}}, {"value": {"number": "2"}}],
            }
        }))
        .unwrap();
        assert_eq!(payload.status, TicketStatus::ForApproval);
        assert_eq!(payload.issue_type, IssueType::IndividualDataUpdate);
        TicketChangeSet::from_ticket_payload(&payload, &FieldRegistry::builtin()).unwrap()
    }

    fn field(name: &str) -> ChangeId {
        ChangeId::Field(name.into())
    }

    #[test]
    fn double_toggle_restores_state() {
        let cs = change_set();
        let mut selection = ApprovalSelection::for_change_set(&cs);
        let before = selection.clone();

        assert!(selection.toggle(ChangeCategory::Scalar, field("phone_no")).unwrap());
        assert!(!selection.toggle(ChangeCategory::Scalar, field("phone_no")).unwrap());
        assert_eq!(selection.selected_count(), before.selected_count());
        assert!(!selection.is_selected(ChangeCategory::Scalar, &field("phone_no")));
    }

    #[test]
    fn noop_and_unknown_ids_are_not_selectable() {
        let cs = change_set();
        let mut selection = ApprovalSelection::for_change_set(&cs);

        let err = selection.toggle(ChangeCategory::Scalar, field("email")).unwrap_err();
        assert_eq!(err.to_string(), "scalar:email is not a selectable change");
        assert!(selection.toggle(ChangeCategory::DocumentsCreate, ChangeId::Index(5)).is_err());
        assert!(selection.toggle(ChangeCategory::Flex, field("sex")).is_err());
        assert_eq!(selection.selected_count(), 0);
    }

    #[test]
    fn select_all_is_atomic() {
        let cs = change_set();
        let mut selection = ApprovalSelection::for_change_set(&cs);

        let err = selection.select_all(
            ChangeCategory::DocumentsCreate,
            [ChangeId::Index(0), ChangeId::Index(9)],
        );
        assert!(err.is_err());
        assert_eq!(selection.selected_count(), 0);

        let added = selection
            .select_all(ChangeCategory::DocumentsCreate, [ChangeId::Index(0), ChangeId::Index(1)])
            .unwrap();
        assert_eq!(added, 2);
        let again = selection
            .select_all(ChangeCategory::DocumentsCreate, [ChangeId::Index(1)])
            .unwrap();
        assert_eq!(again, 0);

        selection.clear(ChangeCategory::DocumentsCreate);
        assert_eq!(selection.selected_count_in(ChangeCategory::DocumentsCreate), 0);
    }

    #[test]
    fn completeness_tracks_total_change_count() {
        let cs = change_set();
        assert_eq!(cs.total_change_count(), 4);

        let mut selection = ApprovalSelection::for_change_set(&cs);
        assert!(!selection.is_complete(&cs));
        assert_eq!(selection.unselected().len(), 4);

        selection.select_everything();
        assert!(selection.is_complete(&cs));
        assert!(selection.unselected().is_empty());

        selection.clear_all();
        assert_eq!(selection.selected_count(), 0);
    }

    #[test]
    fn seeded_selection_reflects_persisted_flags() {
        let cs = change_set();
        let selection = ApprovalSelection::seeded(&cs);
        assert!(selection.is_selected(ChangeCategory::Scalar, &field("sex")));
        assert_eq!(selection.selected_count(), 1);
        assert_eq!(
            selection.selected(ChangeCategory::Scalar).collect::<Vec<_>>(),
            vec![&field("sex")]
        );
    }
}
