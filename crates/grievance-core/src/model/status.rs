use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Grievance ticket lifecycle states relevant to approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    Assigned,
    InProgress,
    OnHold,
    ForApproval,
    Closed,
}

impl TicketStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::OnHold => "ON_HOLD",
            Self::ForApproval => "FOR_APPROVAL",
            Self::Closed => "CLOSED",
        }
    }

    /// Approval decisions may only be edited in `FOR_APPROVAL`.
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::ForApproval)
    }

    /// Closed tickets display the recorded previous value instead of the live one.
    #[must_use]
    pub const fn shows_previous_value(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// The kind of proposal a ticket carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    AddIndividual,
    IndividualDataUpdate,
    HouseholdDataUpdate,
    DeleteIndividual,
    DeleteHousehold,
    NeedsAdjudication,
}

impl IssueType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AddIndividual => "ADD_INDIVIDUAL",
            Self::IndividualDataUpdate => "INDIVIDUAL_DATA_UPDATE",
            Self::HouseholdDataUpdate => "HOUSEHOLD_DATA_UPDATE",
            Self::DeleteIndividual => "DELETE_INDIVIDUAL",
            Self::DeleteHousehold => "DELETE_HOUSEHOLD",
            Self::NeedsAdjudication => "NEEDS_ADJUDICATION",
        }
    }

    /// Deleting a record orphans its household roles unless they are reassigned.
    #[must_use]
    pub const fn requires_role_reassignment(self) -> bool {
        matches!(self, Self::DeleteIndividual | Self::DeleteHousehold)
    }

    /// Field-by-field approval (as opposed to approving the proposal as a whole).
    #[must_use]
    pub const fn is_field_level(self) -> bool {
        matches!(self, Self::IndividualDataUpdate | Self::HouseholdDataUpdate)
    }

    /// Reviewed through the approval commit rather than adjudication.
    #[must_use]
    pub const fn has_approval_decisions(self) -> bool {
        self.is_field_level() || self.is_whole_ticket()
    }

    /// The proposal is approved or rejected in one decision.
    #[must_use]
    pub const fn is_whole_ticket(self) -> bool {
        matches!(
            self,
            Self::AddIndividual | Self::DeleteIndividual | Self::DeleteHousehold
        )
    }

    /// Scalar approvals go to `householdApproveData` instead of `individualApproveData`.
    #[must_use]
    pub const fn targets_household(self) -> bool {
        matches!(self, Self::HouseholdDataUpdate | Self::DeleteHousehold)
    }
}

/// Household role held by an individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Primary,
    Alternate,
    Head,
    NoRole,
    /// Any role this engine has no rules for.
    #[serde(other)]
    Other,
}

impl Role {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Alternate => "ALTERNATE",
            Self::Head => "HEAD",
            Self::NoRole => "NO_ROLE",
            Self::Other => "OTHER",
        }
    }

    /// Primary collectors and heads of household must be handed over before deletion.
    #[must_use]
    pub const fn requires_reassignment(self) -> bool {
        matches!(self, Self::Primary | Self::Head)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_uppercase().replace('-', "_")
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "NEW" => Ok(Self::New),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "ON_HOLD" => Ok(Self::OnHold),
            "FOR_APPROVAL" => Ok(Self::ForApproval),
            "CLOSED" => Ok(Self::Closed),
            _ => Err(ParseEnumError {
                expected: "ticket status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for IssueType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "ADD_INDIVIDUAL" => Ok(Self::AddIndividual),
            "INDIVIDUAL_DATA_UPDATE" => Ok(Self::IndividualDataUpdate),
            "HOUSEHOLD_DATA_UPDATE" => Ok(Self::HouseholdDataUpdate),
            "DELETE_INDIVIDUAL" => Ok(Self::DeleteIndividual),
            "DELETE_HOUSEHOLD" => Ok(Self::DeleteHousehold),
            "NEEDS_ADJUDICATION" => Ok(Self::NeedsAdjudication),
            _ => Err(ParseEnumError {
                expected: "issue type",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "PRIMARY" => Ok(Self::Primary),
            "ALTERNATE" => Ok(Self::Alternate),
            "HEAD" => Ok(Self::Head),
            "NO_ROLE" => Ok(Self::NoRole),
            "" => Err(ParseEnumError {
                expected: "role",
                got: s.to_string(),
            }),
            _ => Ok(Self::Other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IssueType, Role, TicketStatus};
    use std::str::FromStr;

    #[test]
    fn enum_json_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&TicketStatus::ForApproval).unwrap(),
            "\"FOR_APPROVAL\""
        );
        assert_eq!(
            serde_json::from_str::<IssueType>("\"DELETE_INDIVIDUAL\"").unwrap(),
            IssueType::DeleteIndividual
        );
        assert_eq!(serde_json::from_str::<Role>("\"HEAD\"").unwrap(), Role::Head);
    }

    #[test]
    fn display_parse_roundtrips() {
        for value in [
            TicketStatus::New,
            TicketStatus::Assigned,
            TicketStatus::InProgress,
            TicketStatus::OnHold,
            TicketStatus::ForApproval,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::from_str(&value.to_string()).unwrap(), value);
        }

        for value in [
            IssueType::AddIndividual,
            IssueType::IndividualDataUpdate,
            IssueType::HouseholdDataUpdate,
            IssueType::DeleteIndividual,
            IssueType::DeleteHousehold,
            IssueType::NeedsAdjudication,
        ] {
            assert_eq!(IssueType::from_str(&value.to_string()).unwrap(), value);
        }
    }

    #[test]
    fn parse_is_lenient_about_case_and_dashes() {
        assert_eq!(
            TicketStatus::from_str("for-approval").unwrap(),
            TicketStatus::ForApproval
        );
        assert!(TicketStatus::from_str("approved").is_err());
        assert_eq!(Role::from_str("collector").unwrap(), Role::Other);
        assert!(Role::from_str(" ").is_err());
    }

    #[test]
    fn only_for_approval_is_editable() {
        assert!(TicketStatus::ForApproval.is_editable());
        assert!(!TicketStatus::Closed.is_editable());
        assert!(!TicketStatus::InProgress.is_editable());
        assert!(TicketStatus::Closed.shows_previous_value());
    }

    #[test]
    fn deletions_require_reassignment_of_primary_and_head() {
        assert!(IssueType::DeleteIndividual.requires_role_reassignment());
        assert!(IssueType::DeleteHousehold.requires_role_reassignment());
        assert!(!IssueType::IndividualDataUpdate.requires_role_reassignment());
        assert!(Role::Primary.requires_reassignment());
        assert!(Role::Head.requires_reassignment());
        assert!(!Role::Alternate.requires_reassignment());
        assert!(!Role::Other.requires_reassignment());
    }

    #[test]
    fn unknown_role_names_deserialize_as_other() {
        assert_eq!(
            serde_json::from_str::<Role>("\"SECONDARY_COLLECTOR\"").unwrap(),
            Role::Other
        );
    }
}
