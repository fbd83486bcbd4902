//! Filter and label domain types.
//!
//! A [`FilterAction`] is what the user picks for blocked mail. It maps to a
//! [`LabelMutation`] applied both by server-side filters (future mail) and by
//! bulk modification (mail already received). The [`ProvisioningLabel`] records
//! the action in its name so the changes can be reversed later.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{system_labels, FilterId, LabelId};

/// Prefix of every label created by provisioning.
pub const DEFAULT_LABEL_PREFIX: &str = "Modified by College Spam Guard";

/// What happens to mail from blocked senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterAction {
    /// Remove the unread marker; mail stays in the inbox.
    #[serde(rename = "read")]
    MarkRead,
    /// Remove from the inbox.
    #[serde(rename = "archive")]
    Archive,
    /// Move to the trash.
    #[serde(rename = "trash")]
    Trash,
}

impl FilterAction {
    /// All actions, in the order they are offered to the user.
    pub const ALL: [FilterAction; 3] = [Self::MarkRead, Self::Archive, Self::Trash];

    /// Keyword embedded in the provisioning label name.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::MarkRead => "read",
            Self::Archive => "archive",
            Self::Trash => "trash",
        }
    }

    /// Human readable past-tense description.
    pub fn describe(self) -> &'static str {
        match self {
            Self::MarkRead => "marked as read",
            Self::Archive => "archived",
            Self::Trash => "trashed",
        }
    }

    /// System label changes this action makes, without the provisioning label.
    pub fn mutation(self) -> LabelMutation {
        match self {
            Self::MarkRead => LabelMutation::new(vec![], vec![system_labels::unread()]),
            Self::Archive => LabelMutation::new(vec![], vec![system_labels::inbox()]),
            Self::Trash => {
                LabelMutation::new(vec![system_labels::trash()], vec![system_labels::inbox()])
            }
        }
    }

    /// Changes applied to blocked mail: the action plus the provisioning label.
    pub fn provisioning_mutation(self, label: &LabelId) -> LabelMutation {
        let mut mutation = self.mutation();
        mutation.add_labels.insert(0, label.clone());
        mutation
    }

    /// The system label this action takes away. Only mail carrying it is
    /// changed retroactively, so restoring it later is exact.
    pub fn affected_label(self) -> LabelId {
        match self {
            Self::MarkRead => system_labels::unread(),
            Self::Archive | Self::Trash => system_labels::inbox(),
        }
    }

    /// Changes that undo [`provisioning_mutation`](Self::provisioning_mutation).
    pub fn restore_mutation(self, label: &LabelId) -> LabelMutation {
        let add = self.affected_label();
        let mut remove = vec![label.clone()];
        if self == Self::Trash {
            remove.push(system_labels::trash());
        }
        LabelMutation::new(vec![add], remove)
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Error returned when a string is not a filter action keyword.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown filter action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for FilterAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::MarkRead),
            "archive" => Ok(Self::Archive),
            "trash" => Ok(Self::Trash),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Labels to add and remove in one modification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMutation {
    /// Labels to add.
    pub add_labels: Vec<LabelId>,
    /// Labels to remove.
    pub remove_labels: Vec<LabelId>,
}

impl LabelMutation {
    /// Creates a mutation.
    pub fn new(add_labels: Vec<LabelId>, remove_labels: Vec<LabelId>) -> Self {
        Self {
            add_labels,
            remove_labels,
        }
    }

    /// Whether the mutation adds the given label.
    pub fn adds(&self, label: &LabelId) -> bool {
        self.add_labels.contains(label)
    }
}

/// A label as reported by the mail service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailLabel {
    /// Label identifier.
    pub id: LabelId,
    /// Label display name.
    pub name: String,
}

/// The label that anchors everything provisioning created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningLabel {
    /// Label identifier.
    pub id: LabelId,
    /// Full label name, including the action keyword.
    pub name: String,
    /// Action recorded in the name.
    pub action: FilterAction,
}

impl ProvisioningLabel {
    /// Builds the label name for an action: `"<prefix> (<keyword>)"`.
    pub fn name_for(prefix: &str, action: FilterAction) -> String {
        format!("{} ({})", prefix, action.keyword())
    }

    /// Recognises a provisioning label among the account's labels.
    ///
    /// Returns `None` when the name does not start with `prefix`, and
    /// `Some(Err(_))` when it does but carries no recognisable action.
    pub fn from_label(label: &MailLabel, prefix: &str) -> Option<Result<Self, UnknownAction>> {
        if !label.name.starts_with(prefix) {
            return None;
        }
        Some(parse_action_keyword(&label.name).map(|action| Self {
            id: label.id.clone(),
            name: label.name.clone(),
            action,
        }))
    }
}

/// Extracts the first `(keyword)` of lowercase ASCII letters from a label name.
pub fn parse_action_keyword(name: &str) -> Result<FilterAction, UnknownAction> {
    for (open, _) in name.match_indices('(') {
        let rest = &name[open + 1..];
        let Some(close) = rest.find(')') else {
            break;
        };
        let keyword = &rest[..close];
        if !keyword.is_empty() && keyword.bytes().all(|b| b.is_ascii_lowercase()) {
            return keyword.parse();
        }
    }
    Err(UnknownAction(name.to_string()))
}

/// Match criteria of a server-side filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Sender expression, e.g. `{a@x.edu b@y.edu}`.
    pub from: Option<String>,
}

/// A filter to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Which mail the filter applies to.
    pub criteria: FilterCriteria,
    /// Label changes applied to matching mail.
    pub action: LabelMutation,
}

/// A filter that exists on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFilter {
    /// Filter identifier.
    pub id: FilterId,
    /// Which mail the filter applies to.
    pub criteria: FilterCriteria,
    /// Label changes applied to matching mail.
    pub action: LabelMutation,
}

impl MailFilter {
    /// Whether this filter applies the given label.
    pub fn references(&self, label: &LabelId) -> bool {
        self.action.adds(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> LabelId {
        LabelId::from("Label_42")
    }

    #[test]
    fn trash_mutation_adds_trash_and_removes_inbox() {
        let mutation = FilterAction::Trash.provisioning_mutation(&label());
        assert_eq!(mutation.add_labels, vec![label(), system_labels::trash()]);
        assert_eq!(mutation.remove_labels, vec![system_labels::inbox()]);
    }

    #[test]
    fn archive_mutation_removes_inbox_only() {
        let mutation = FilterAction::Archive.provisioning_mutation(&label());
        assert_eq!(mutation.add_labels, vec![label()]);
        assert_eq!(mutation.remove_labels, vec![system_labels::inbox()]);
    }

    #[test]
    fn mark_read_mutation_removes_unread_only() {
        let mutation = FilterAction::MarkRead.provisioning_mutation(&label());
        assert_eq!(mutation.add_labels, vec![label()]);
        assert_eq!(mutation.remove_labels, vec![system_labels::unread()]);
    }

    #[test]
    fn restore_mutations_invert_each_action() {
        let read = FilterAction::MarkRead.restore_mutation(&label());
        assert_eq!(read.add_labels, vec![system_labels::unread()]);
        assert_eq!(read.remove_labels, vec![label()]);

        let archive = FilterAction::Archive.restore_mutation(&label());
        assert_eq!(archive.add_labels, vec![system_labels::inbox()]);
        assert_eq!(archive.remove_labels, vec![label()]);

        let trash = FilterAction::Trash.restore_mutation(&label());
        assert_eq!(trash.add_labels, vec![system_labels::inbox()]);
        assert_eq!(trash.remove_labels, vec![label(), system_labels::trash()]);
    }

    #[test]
    fn affected_label_is_what_the_action_removes() {
        for action in FilterAction::ALL {
            let removed = action.mutation().remove_labels;
            assert_eq!(removed, vec![action.affected_label()]);
        }
    }

    #[test]
    fn label_name_embeds_keyword() {
        assert_eq!(
            ProvisioningLabel::name_for(DEFAULT_LABEL_PREFIX, FilterAction::Trash),
            "Modified by College Spam Guard (trash)"
        );
    }

    #[test]
    fn keyword_round_trips_through_label_name() {
        for action in FilterAction::ALL {
            let name = ProvisioningLabel::name_for(DEFAULT_LABEL_PREFIX, action);
            assert_eq!(parse_action_keyword(&name), Ok(action));
        }
    }

    #[test]
    fn parse_skips_non_keyword_parentheses() {
        assert_eq!(
            parse_action_keyword("Spam (Old) (archive)"),
            Ok(FilterAction::Archive)
        );
        assert!(parse_action_keyword("No keyword here").is_err());
        assert!(parse_action_keyword("Bad (delete)").is_err());
    }

    #[test]
    fn from_label_ignores_foreign_labels() {
        let foreign = MailLabel {
            id: LabelId::from("Label_1"),
            name: "Receipts".to_string(),
        };
        assert!(ProvisioningLabel::from_label(&foreign, DEFAULT_LABEL_PREFIX).is_none());

        let ours = MailLabel {
            id: LabelId::from("Label_2"),
            name: "Modified by College Spam Guard (read)".to_string(),
        };
        let parsed = ProvisioningLabel::from_label(&ours, DEFAULT_LABEL_PREFIX)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.action, FilterAction::MarkRead);
        assert_eq!(parsed.id, LabelId::from("Label_2"));
    }

    #[test]
    fn action_serializes_as_keyword() {
        assert_eq!(
            serde_json::to_string(&FilterAction::MarkRead).unwrap(),
            "\"read\""
        );
        let parsed: FilterAction = serde_json::from_str("\"trash\"").unwrap();
        assert_eq!(parsed, FilterAction::Trash);
    }

    #[test]
    fn filter_references_label_through_action() {
        let filter = MailFilter {
            id: FilterId::from("f-1"),
            criteria: FilterCriteria {
                from: Some("{a@x.edu}".to_string()),
            },
            action: FilterAction::Archive.provisioning_mutation(&label()),
        };
        assert!(filter.references(&label()));
        assert!(!filter.references(&LabelId::from("Label_7")));
    }
}
