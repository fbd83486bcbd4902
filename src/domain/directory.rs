//! College directory domain types.
//!
//! The directory service is the system of record for which mail domains belong
//! to which institution. These types mirror its JSON payloads.

use serde::{Deserialize, Serialize};

/// A known college domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Domain suffix, e.g. `mit.edu` or `commonapp.org`.
    #[serde(rename = "url")]
    pub domain_suffix: String,
    /// Whether the suffix lives under `.edu`.
    pub is_edu: bool,
    /// Institution name used as the grouping key.
    #[serde(rename = "name")]
    pub organization_name: String,
}

impl DirectoryEntry {
    /// Creates a directory entry, deriving `is_edu` from the suffix.
    pub fn new(domain_suffix: impl Into<String>, organization_name: impl Into<String>) -> Self {
        let domain_suffix = domain_suffix.into();
        Self {
            is_edu: domain_suffix.ends_with(".edu"),
            domain_suffix,
            organization_name: organization_name.into(),
        }
    }

    /// Tests whether an address belongs to this entry's domain.
    ///
    /// The address must end in `@suffix` or `.suffix`. Only the character in
    /// front of the suffix is checked, so every host under the suffix matches,
    /// including unrelated ones that merely share the trailing labels.
    pub fn matches(&self, address: &str) -> bool {
        let suffix = self.domain_suffix.as_str();
        if suffix.is_empty() || address.len() <= suffix.len() {
            return false;
        }
        if !address.ends_with(suffix) {
            return false;
        }
        matches!(
            address.as_bytes()[address.len() - suffix.len() - 1],
            b'@' | b'.'
        )
    }
}

/// A previously blocked address from the legacy `/blocked-emails` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedEmail {
    /// Full sender address.
    pub email_address: String,
    /// Whether the address is under `.edu`.
    pub is_edu: bool,
    /// Institution the address belongs to.
    pub school: String,
    /// Display name for the sender.
    pub name: String,
}

/// Returns the domain part of an address (everything after the last `@`).
pub fn domain_of(address: &str) -> &str {
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or(address)
}

/// Everything the directory service knows, loaded once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Known college domains, in directory order.
    pub entries: Vec<DirectoryEntry>,
    /// Legacy individually blocked addresses.
    pub blocked: Vec<BlockedEmail>,
}

impl DirectorySnapshot {
    /// Creates a snapshot.
    pub fn new(entries: Vec<DirectoryEntry>, blocked: Vec<BlockedEmail>) -> Self {
        Self { entries, blocked }
    }

    /// First entry whose suffix matches the address.
    pub fn resolve(&self, address: &str) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.matches(address))
    }

    /// Legacy entry for exactly this address.
    pub fn blocked_entry(&self, address: &str) -> Option<&BlockedEmail> {
        self.blocked
            .iter()
            .find(|b| b.email_address.eq_ignore_ascii_case(address))
    }

    /// Non-`.edu` addresses and domains that the `.edu` wildcard misses,
    /// deduplicated in first-seen order.
    pub fn non_edu_terms(&self) -> Vec<String> {
        let candidates = self
            .blocked
            .iter()
            .filter(|b| !b.is_edu)
            .map(|b| b.email_address.to_lowercase())
            .chain(
                self.entries
                    .iter()
                    .filter(|e| !e.is_edu)
                    .map(|e| e.domain_suffix.to_lowercase()),
            );

        let mut terms: Vec<String> = Vec::new();
        for term in candidates {
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }
}
