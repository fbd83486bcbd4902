//! Domain layer types for College Spam Guard.
//!
//! This module contains the core domain types used throughout the crate:
//! senders and their organization groups, directory entries, filter actions,
//! labels, and the search query grammar.

mod directory;
mod filter;
mod query;
mod sender;
mod types;

pub use directory::{domain_of, BlockedEmail, DirectoryEntry, DirectorySnapshot};
pub use filter::{
    parse_action_keyword, FilterAction, FilterCriteria, FilterSpec, LabelMutation, MailFilter,
    MailLabel, ProvisioningLabel, UnknownAction, DEFAULT_LABEL_PREFIX,
};
pub use query::{
    known_sender_query, known_sender_term, or_group, parse_or_group, potential_sender_query,
    sender_history_query, QueryLane, SearchQuery, EDU_WILDCARD, INSTITUTIONAL_WORDS,
    SUBSCRIPTION_TERMS, UNBOUNDED_HISTORY,
};
pub use sender::{Sender, SenderGroup};
pub use types::{system_labels, FilterId, LabelId, MessageId};
