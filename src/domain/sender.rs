//! Sender domain types.
//!
//! A [`Sender`] is one unique From address seen during a discovery run, and a
//! [`SenderGroup`] is the set of senders attributed to the same organization.
//! Groups are what the user whitelists or blocks.

use serde::{Deserialize, Serialize};

use super::MessageId;

/// A unique sender address discovered in the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Lowercased address, unique within a run.
    pub address: String,
    /// Display name from the From header, possibly empty.
    pub display_name: String,
    /// Institution resolved from the directory, if any.
    pub organization: Option<String>,
    /// Messages attributed to this address, in discovery order.
    pub message_refs: Vec<MessageId>,
}

impl Sender {
    /// Creates a sender with no organization and no message references.
    pub fn new(address: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            address: address.into().to_lowercase(),
            display_name: display_name.into(),
            organization: None,
            message_refs: Vec::new(),
        }
    }

    /// Parses a `From` header value.
    ///
    /// `"Name" <addr>` and `Name <addr>` yield both parts; anything without an
    /// angle-bracketed address is taken whole as the address.
    pub fn from_header(value: &str) -> Self {
        let value = value.trim();
        if let (Some(start), Some(end)) = (value.find('<'), value.rfind('>')) {
            if end > start + 1 {
                let address = value[start + 1..end].trim();
                let name = value[..start].trim().trim_matches('"').trim();
                return Self::new(address, name);
            }
        }
        Self::new(value, "")
    }

    /// Key used to place this sender in a group: the organization, else the
    /// display name, else the address.
    pub fn group_key(&self) -> &str {
        match &self.organization {
            Some(org) => org,
            None if !self.display_name.is_empty() => &self.display_name,
            None => &self.address,
        }
    }

    /// Key used to order members inside a group.
    pub fn sort_key(&self) -> &str {
        if self.display_name.is_empty() {
            &self.address
        } else {
            &self.display_name
        }
    }

    /// Lowercase haystack for substring search.
    pub fn search_key(&self) -> String {
        format!(
            "{} {} {}",
            self.display_name,
            self.address,
            self.organization.as_deref().unwrap_or_default()
        )
        .to_lowercase()
    }

    /// Whether the directory resolved an organization for this sender.
    pub fn is_resolved(&self) -> bool {
        self.organization.is_some()
    }
}

/// Senders that share a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderGroup {
    /// Grouping key.
    pub organization: String,
    /// Members, unique by address.
    pub members: Vec<Sender>,
}

impl SenderGroup {
    /// Creates an empty group.
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            members: Vec::new(),
        }
    }

    /// Adds a member unless one with the same address is already present.
    /// Returns whether the member was added.
    pub fn insert(&mut self, sender: Sender) -> bool {
        if self.contains(&sender.address) {
            return false;
        }
        self.members.push(sender);
        true
    }

    /// Returns whether an address is a member of this group.
    pub fn contains(&self, address: &str) -> bool {
        self.members.iter().any(|m| m.address == address)
    }

    /// Removes and returns the member with the given address.
    pub fn remove(&mut self, address: &str) -> Option<Sender> {
        let index = self.members.iter().position(|m| m.address == address)?;
        Some(self.members.remove(index))
    }

    /// Orders members by display name, falling back to address.
    pub fn sort_members(&mut self) {
        self.members.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
    }

    /// Union of the members' search keys.
    pub fn search_key(&self) -> String {
        self.members
            .iter()
            .map(Sender::search_key)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Total number of messages attributed to the group.
    pub fn message_count(&self) -> usize {
        self.members.iter().map(|m| m.message_refs.len()).sum()
    }

    /// Addresses of all members, in member order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.address.as_str())
    }
}
