//! Sender classification.
//!
//! Turns discovered message headers into organization groups:
//!
//! 1. Parse each `From` header into a [`Sender`].
//! 2. Collapse repeated addresses; the first occurrence keeps its name and
//!    every occurrence contributes its message id.
//! 3. Resolve organizations: an exact match in the legacy blocked list, else
//!    the first directory entry whose suffix matches. Domains nothing matches
//!    are collected for reporting.
//! 4. Group by organization (resolved) or fallback name (unresolved) and sort.
//!
//! Every group starts out blocked. The user then moves groups or single
//! members to the whitelist with [`move_member`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::{domain_of, DirectorySnapshot, Sender, SenderGroup};
use crate::providers::directory::DirectoryApi;
use crate::providers::mail::MessageMetadata;

/// Which working set a group lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetKind {
    /// Mail from these senders gets filtered.
    Blocked,
    /// Mail from these senders is left alone.
    Whitelist,
}

/// What to move between sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The whole group.
    Group,
    /// One member, by address.
    Member(String),
}

/// The two working sets the user edits before provisioning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderSets {
    /// Groups that will be filtered.
    pub blocked: Vec<SenderGroup>,
    /// Groups that will be left alone.
    pub whitelist: Vec<SenderGroup>,
}

impl SenderSets {
    /// Groups of one set.
    pub fn get(&self, kind: SetKind) -> &[SenderGroup] {
        match kind {
            SetKind::Blocked => &self.blocked,
            SetKind::Whitelist => &self.whitelist,
        }
    }

    fn get_mut(&mut self, kind: SetKind) -> &mut Vec<SenderGroup> {
        match kind {
            SetKind::Blocked => &mut self.blocked,
            SetKind::Whitelist => &mut self.whitelist,
        }
    }

    /// Every blocked address, in group order, without duplicates.
    pub fn blocked_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = Vec::new();
        for address in self.blocked.iter().flat_map(SenderGroup::addresses) {
            if !addresses.iter().any(|a| a == address) {
                addresses.push(address.to_string());
            }
        }
        addresses
    }
}

/// Result of classifying discovered messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Working sets: everything blocked, nothing whitelisted.
    pub sets: SenderSets,
    /// Sender domains the directory did not recognise, in first-seen order.
    pub unknown_domains: Vec<String>,
    /// Distinct sender addresses.
    pub sender_count: usize,
}

/// Classifies message headers against a directory snapshot.
pub fn classify(messages: &[MessageMetadata], directory: &DirectorySnapshot) -> Classification {
    let senders = dedup_senders(messages);
    let sender_count = senders.len();

    let mut unknown_domains: Vec<String> = Vec::new();
    let resolved: Vec<Sender> = senders
        .into_iter()
        .map(|mut sender| {
            if let Some(legacy) = directory.blocked_entry(&sender.address) {
                sender.organization = Some(legacy.school.clone());
                if sender.display_name.is_empty() {
                    sender.display_name = legacy.name.clone();
                }
            } else if let Some(entry) = directory.resolve(&sender.address) {
                sender.organization = Some(entry.organization_name.clone());
            } else {
                let domain = domain_of(&sender.address).to_string();
                if !unknown_domains.contains(&domain) {
                    unknown_domains.push(domain);
                }
            }
            sender
        })
        .collect();

    let blocked = group_senders(resolved);
    tracing::info!(
        senders = sender_count,
        groups = blocked.len(),
        unknown_domains = unknown_domains.len(),
        "Classified senders"
    );

    Classification {
        sets: SenderSets {
            blocked,
            whitelist: Vec::new(),
        },
        unknown_domains,
        sender_count,
    }
}

/// Collapses messages into one sender per address.
fn dedup_senders(messages: &[MessageMetadata]) -> Vec<Sender> {
    let mut senders: Vec<Sender> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let Some(from) = message.from_header() else {
            tracing::debug!(id = %message.id, "Message has no From header");
            continue;
        };
        let sender = Sender::from_header(from);
        if sender.address.is_empty() {
            continue;
        }

        let slot = *index.entry(sender.address.clone()).or_insert_with(|| {
            senders.push(sender);
            senders.len() - 1
        });
        senders[slot].message_refs.push(message.id.clone());
    }

    senders
}

/// Groups senders by key, sorted by key, with members sorted by name.
fn group_senders(senders: Vec<Sender>) -> Vec<SenderGroup> {
    let mut groups: BTreeMap<String, SenderGroup> = BTreeMap::new();
    for sender in senders {
        let key = sender.group_key().to_string();
        groups
            .entry(key.clone())
            .or_insert_with(|| SenderGroup::new(key))
            .insert(sender);
    }

    groups
        .into_values()
        .map(|mut group| {
            group.sort_members();
            group
        })
        .collect()
}

/// Reports unknown domains one at a time and returns how many were not
/// reported. Reporting stops at the first failure; failures are logged, not
/// returned.
pub async fn report_unknown_domains(directory: &dyn DirectoryApi, domains: &[String]) -> usize {
    for (reported, domain) in domains.iter().enumerate() {
        if let Err(e) = directory.report_unknown_domain(domain).await {
            let unreported = domains.len() - reported;
            tracing::warn!(domain = %domain, unreported, error = %e, "Stopped reporting unknown domains");
            return unreported;
        }
    }
    0
}

/// Moves a group, or one of its members, from one set to the other.
///
/// The moved senders join the target group with the same key, which is
/// created if missing. A source group emptied by the move disappears. Unknown
/// keys and addresses leave the sets unchanged.
pub fn move_member(
    mut sets: SenderSets,
    from: SetKind,
    to: SetKind,
    key: &str,
    selection: Selection,
) -> SenderSets {
    if from == to {
        return sets;
    }

    let source = sets.get_mut(from);
    let Some(position) = source.iter().position(|g| g.organization == key) else {
        return sets;
    };

    let moved: Vec<Sender> = match selection {
        Selection::Group => source.remove(position).members,
        Selection::Member(address) => {
            let Some(member) = source[position].remove(&address) else {
                return sets;
            };
            if source[position].members.is_empty() {
                source.remove(position);
            }
            vec![member]
        }
    };

    let target = sets.get_mut(to);
    let group = match target.iter().position(|g| g.organization == key) {
        Some(i) => &mut target[i],
        None => {
            target.push(SenderGroup::new(key));
            target.sort_by(|a, b| a.organization.cmp(&b.organization));
            let i = target
                .iter()
                .position(|g| g.organization == key)
                .unwrap_or(target.len() - 1);
            &mut target[i]
        }
    };
    for sender in moved {
        group.insert(sender);
    }
    group.sort_members();

    sets
}

/// Keeps the groups whose search key contains `term`, case-insensitively.
/// Within a kept group, only matching members are kept, unless the term
/// matches the group key itself. An empty term keeps everything.
pub fn filter_groups(groups: &[SenderGroup], term: &str) -> Vec<SenderGroup> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return groups.to_vec();
    }

    groups
        .iter()
        .filter_map(|group| {
            if group.organization.to_lowercase().contains(&term) {
                return Some(group.clone());
            }
            let members: Vec<Sender> = group
                .members
                .iter()
                .filter(|m| m.search_key().contains(&term))
                .cloned()
                .collect();
            (!members.is_empty()).then(|| SenderGroup {
                organization: group.organization.clone(),
                members,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockedEmail, DirectoryEntry, MessageId};
    use crate::providers::directory::{DirectoryError, MockDirectoryApi};
    use pretty_assertions::assert_eq;

    fn meta(id: &str, from: &str) -> MessageMetadata {
        MessageMetadata::new(id, from, "subject")
    }

    fn mit_directory() -> DirectorySnapshot {
        DirectorySnapshot::new(vec![DirectoryEntry::new("mit.edu", "MIT")], vec![])
    }

    #[test]
    fn mit_example_groups_and_reports_unknown_domain() {
        let messages = vec![
            meta("m1", "\"MIT Admissions\" <admit@mit.edu>"),
            meta("m2", "admit@mit.edu"),
            meta("m3", "spam@random.biz"),
        ];

        let result = classify(&messages, &mit_directory());

        assert_eq!(result.sender_count, 2);
        assert_eq!(result.unknown_domains, vec!["random.biz"]);

        let mit = result
            .sets
            .blocked
            .iter()
            .find(|g| g.organization == "MIT")
            .unwrap();
        assert_eq!(mit.members.len(), 1);
        assert_eq!(mit.members[0].display_name, "MIT Admissions");
        assert_eq!(
            mit.members[0].message_refs,
            vec![MessageId::from("m1"), MessageId::from("m2")]
        );
        assert!(result.sets.whitelist.is_empty());
    }

    #[test]
    fn dedup_collects_every_occurrence_regardless_of_order() {
        let forward = vec![
            meta("a", "x@mit.edu"),
            meta("b", "Someone <X@MIT.EDU>"),
            meta("c", "x@mit.edu"),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        for messages in [forward, backward] {
            let result = classify(&messages, &mit_directory());
            assert_eq!(result.sender_count, 1);
            assert_eq!(result.sets.blocked[0].members[0].message_refs.len(), 3);
        }
    }

    #[test]
    fn every_member_shares_its_group_key() {
        let messages = vec![
            meta("1", "\"Admissions\" <a@mit.edu>"),
            meta("2", "b@cs.mit.edu"),
            meta("3", "\"Random U\" <news@random.biz>"),
            meta("4", "\"Random U\" <other@random.biz>"),
            meta("5", "plain@nowhere.org"),
        ];
        let result = classify(&messages, &mit_directory());

        let mut seen = Vec::new();
        for group in &result.sets.blocked {
            for member in &group.members {
                assert_eq!(member.group_key(), group.organization);
                assert!(!seen.contains(&member.address));
                seen.push(member.address.clone());
            }
        }
        assert_eq!(seen.len(), 5);

        let keys: Vec<&str> = result
            .sets
            .blocked
            .iter()
            .map(|g| g.organization.as_str())
            .collect();
        assert_eq!(keys, vec!["MIT", "Random U", "plain@nowhere.org"]);
        assert_eq!(result.unknown_domains, vec!["random.biz", "nowhere.org"]);
    }

    #[test]
    fn legacy_blocked_address_takes_precedence() {
        let directory = DirectorySnapshot::new(
            vec![DirectoryEntry::new("collegeboard.org", "Common App")],
            vec![BlockedEmail {
                email_address: "info@collegeboard.org".to_string(),
                is_edu: false,
                school: "College Board".to_string(),
                name: "College Board Updates".to_string(),
            }],
        );

        let result = classify(&[meta("1", "info@collegeboard.org")], &directory);
        let group = &result.sets.blocked[0];
        assert_eq!(group.organization, "College Board");
        assert_eq!(group.members[0].display_name, "College Board Updates");
        assert!(result.unknown_domains.is_empty());
    }

    #[test]
    fn messages_without_from_are_skipped() {
        let message = MessageMetadata {
            id: MessageId::from("1"),
            headers: vec![("Subject".to_string(), "hi".to_string())],
        };
        let result = classify(&[message], &mit_directory());
        assert_eq!(result.sender_count, 0);
        assert!(result.sets.blocked.is_empty());
    }

    #[tokio::test]
    async fn reporting_stops_at_first_failure() {
        let mut mock = MockDirectoryApi::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_report_unknown_domain()
            .withf(|d: &str| d == "a.biz")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_report_unknown_domain()
            .withf(|d: &str| d == "b.biz")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(DirectoryError::Status {
                    status: 503,
                    url: "unknown-school".to_string(),
                })
            });

        let domains = vec!["a.biz".to_string(), "b.biz".to_string(), "c.biz".to_string()];
        assert_eq!(report_unknown_domains(&mock, &domains).await, 2);
    }

    #[tokio::test]
    async fn reporting_everything_leaves_nothing_unreported() {
        let mut mock = MockDirectoryApi::new();
        mock.expect_report_unknown_domain()
            .times(2)
            .returning(|_| Ok(()));

        let domains = vec!["a.biz".to_string(), "b.biz".to_string()];
        assert_eq!(report_unknown_domains(&mock, &domains).await, 0);
    }

    fn sample_sets() -> SenderSets {
        let messages = vec![
            meta("1", "\"A\" <a@mit.edu>"),
            meta("2", "\"B\" <b@mit.edu>"),
            meta("3", "\"Random U\" <r@random.biz>"),
        ];
        classify(&messages, &mit_directory()).sets
    }

    #[test]
    fn move_whole_group_to_whitelist() {
        let sets = move_member(
            sample_sets(),
            SetKind::Blocked,
            SetKind::Whitelist,
            "MIT",
            Selection::Group,
        );

        assert_eq!(sets.blocked.len(), 1);
        assert_eq!(sets.whitelist.len(), 1);
        assert_eq!(sets.whitelist[0].organization, "MIT");
        assert_eq!(sets.whitelist[0].members.len(), 2);
        assert_eq!(sets.blocked_addresses(), vec!["r@random.biz"]);
    }

    #[test]
    fn move_single_member_then_merge_back() {
        let sets = move_member(
            sample_sets(),
            SetKind::Blocked,
            SetKind::Whitelist,
            "MIT",
            Selection::Member("a@mit.edu".to_string()),
        );
        let mit_blocked = sets.blocked.iter().find(|g| g.organization == "MIT").unwrap();
        assert_eq!(mit_blocked.members.len(), 1);
        assert!(sets.whitelist[0].contains("a@mit.edu"));

        let sets = move_member(
            sets,
            SetKind::Whitelist,
            SetKind::Blocked,
            "MIT",
            Selection::Member("a@mit.edu".to_string()),
        );
        assert!(sets.whitelist.is_empty());
        let mit = sets.blocked.iter().find(|g| g.organization == "MIT").unwrap();
        let names: Vec<&str> = mit.members.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn move_keeps_target_sorted() {
        let sets = move_member(
            sample_sets(),
            SetKind::Blocked,
            SetKind::Whitelist,
            "Random U",
            Selection::Group,
        );
        let sets = move_member(sets, SetKind::Blocked, SetKind::Whitelist, "MIT", Selection::Group);
        let keys: Vec<&str> = sets.whitelist.iter().map(|g| g.organization.as_str()).collect();
        assert_eq!(keys, vec!["MIT", "Random U"]);
    }

    #[test]
    fn move_with_unknown_key_is_a_no_op() {
        let before = sample_sets();
        let after = move_member(
            before.clone(),
            SetKind::Blocked,
            SetKind::Whitelist,
            "Nowhere",
            Selection::Group,
        );
        assert_eq!(after, before);

        let after = move_member(
            before.clone(),
            SetKind::Blocked,
            SetKind::Whitelist,
            "MIT",
            Selection::Member("zzz@mit.edu".to_string()),
        );
        assert_eq!(after, before);
    }

    #[test]
    fn filter_groups_matches_search_keys() {
        let groups = sample_sets().blocked;

        assert_eq!(filter_groups(&groups, "").len(), 2);

        let by_org = filter_groups(&groups, "mit");
        assert_eq!(by_org.len(), 1);
        assert_eq!(by_org[0].members.len(), 2);

        let by_address = filter_groups(&groups, "B@MIT");
        assert_eq!(by_address.len(), 1);
        assert_eq!(by_address[0].members.len(), 1);
        assert_eq!(by_address[0].members[0].address, "b@mit.edu");

        assert!(filter_groups(&groups, "stanford").is_empty());
    }
}
